// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Command codes of the ingest link.
//!
//! Every frame starts with a 4-byte little-endian command code. The upper
//! half of each code is the shared marker `0xB7A5`; a decoder that loses
//! sync scans forward until it sees the marker again.

use thiserror::Error;

use crate::models::common::{MAX_INGESTER_STATE_SIZE, MAX_TAG_LENGTH};

/// Upper 16 bits shared by every command code; the resync marker.
pub const COMMAND_MARKER: u16 = 0xB7A5;

const fn cmd(n: u16) -> u32 {
    ((COMMAND_MARKER as u32) << 16) | n as u32
}

/// Returned when the low half of a marked code does not name a command.
#[derive(Debug, Error)]
#[error("unknown command code: 0x{0:08x}")]
pub struct UnknownCommand(pub u32);

/// Every command the link speaks, writer-to-reader and back.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IngestCommand {
    NewEntry = cmd(0x01),
    ForceAck = cmd(0x02),
    ConfirmEntry = cmd(0x03),
    Throttle = cmd(0x04),
    Ping = cmd(0x05),
    Pong = cmd(0x06),
    Tag = cmd(0x07),
    ConfirmTag = cmd(0x08),
    ErrorTag = cmd(0x09),
    Id = cmd(0x0A),
    ConfirmId = cmd(0x0B),
    ApiVer = cmd(0x0C),
    ConfirmApiVer = cmd(0x0D),
    IngestOk = cmd(0x0E),
    ConfirmIngestOk = cmd(0x0F),
    IngesterState = cmd(0x10),
    ConfirmIngesterState = cmd(0x11),
}

/// How the bytes after a command code are shaped. The codec stays stateless:
/// given the code (and, for length-prefixed payloads, the prefix itself) the
/// payload length is fully determined or capped by a ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// No payload at all.
    Empty,
    /// A single little-endian u16.
    U16,
    /// A single little-endian u64.
    U64,
    /// u32 length prefix, then that many bytes, rejected above the ceiling.
    LenPrefixed { ceiling: u32 },
    /// Three length-prefixed fields (name, version, uuid), each capped.
    IdBlock,
    /// Entry frames carry their own fixed header + data + EV block.
    Entry,
}

impl IngestCommand {
    #[inline]
    pub const fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(v: u32) -> Option<Self> {
        Some(match v {
            x if x == cmd(0x01) => Self::NewEntry,
            x if x == cmd(0x02) => Self::ForceAck,
            x if x == cmd(0x03) => Self::ConfirmEntry,
            x if x == cmd(0x04) => Self::Throttle,
            x if x == cmd(0x05) => Self::Ping,
            x if x == cmd(0x06) => Self::Pong,
            x if x == cmd(0x07) => Self::Tag,
            x if x == cmd(0x08) => Self::ConfirmTag,
            x if x == cmd(0x09) => Self::ErrorTag,
            x if x == cmd(0x0A) => Self::Id,
            x if x == cmd(0x0B) => Self::ConfirmId,
            x if x == cmd(0x0C) => Self::ApiVer,
            x if x == cmd(0x0D) => Self::ConfirmApiVer,
            x if x == cmd(0x0E) => Self::IngestOk,
            x if x == cmd(0x0F) => Self::ConfirmIngestOk,
            x if x == cmd(0x10) => Self::IngesterState,
            x if x == cmd(0x11) => Self::ConfirmIngesterState,
            _ => return None,
        })
    }

    /// True when the 4 bytes carry the shared marker, whether or not the low
    /// half names a known command.
    #[inline]
    pub fn has_marker(v: u32) -> bool {
        (v >> 16) as u16 == COMMAND_MARKER
    }

    pub fn payload(self) -> PayloadKind {
        use IngestCommand::*;
        match self {
            NewEntry => PayloadKind::Entry,
            ForceAck | Ping | Pong | ErrorTag | ConfirmId | ConfirmApiVer
            | IngestOk | ConfirmIngesterState => PayloadKind::Empty,
            ConfirmEntry | Throttle | ConfirmTag | ConfirmIngestOk => PayloadKind::U64,
            ApiVer => PayloadKind::U16,
            Tag => PayloadKind::LenPrefixed {
                ceiling: MAX_TAG_LENGTH as u32,
            },
            Id => PayloadKind::IdBlock,
            IngesterState => PayloadKind::LenPrefixed {
                ceiling: MAX_INGESTER_STATE_SIZE,
            },
        }
    }
}

impl TryFrom<u32> for IngestCommand {
    type Error = UnknownCommand;

    fn try_from(v: u32) -> Result<Self, Self::Error> {
        Self::from_code(v).ok_or(UnknownCommand(v))
    }
}
