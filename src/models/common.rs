// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Shared wire constants: protocol versions, feature gates, size ceilings and
//! the tag-name ruleset. Every decoder enforces the ceilings here; a frame
//! that exceeds one kills the connection.

use std::time::Duration;

use anyhow::{Result, ensure};
use bytes::{Buf, BufMut, BytesMut};

/// Version this crate speaks and advertises in its challenge.
pub const CURRENT_API_VERSION: u16 = 8;

// Feature gates. Each gated operation checks the peer version first; an
// unmet gate makes the operation a silent no-op (except dynamic tag
// negotiation, which must yield an id and therefore errors).
pub const MINIMUM_TAG_RENEGOTIATE_VERSION: u16 = 2;
pub const MINIMUM_ID_VERSION: u16 = 3;
pub const MINIMUM_INGEST_OK_VERSION: u16 = 4;
pub const MINIMUM_DYN_CONFIG_VERSION: u16 = 5;
pub const MINIMUM_INGEST_STATE_VERSION: u16 = 6;
pub const MINIMUM_TENANT_AUTH_VERSION: u16 = 7;

// Size ceilings.
pub const MAX_ENTRY_DATA_SIZE: usize = 1 << 30; // 1 GiB
pub const STREAM_CONFIG_CEILING: u32 = 1 << 20;
pub const MAX_INGESTER_STATE_SIZE: u32 = 1 << 20;
pub const STATE_RESPONSE_CEILING: u32 = 4 << 10;
pub const TAG_REQUEST_CEILING: u32 = 32 << 20;
pub const TAG_RESPONSE_CEILING: u32 = 64 << 20;
pub const MAX_TENANT_LENGTH: usize = 512;
pub const MAX_ID_FIELD_SIZE: u32 = 512;
pub const MAX_OUTSTANDING_ENTRIES: usize = 65535;
pub const MAX_TAG_LENGTH: usize = 4096;

// Enumerated-value bounds.
pub const MAX_EVS_PER_ENTRY: usize = 128;
pub const MAX_EV_VALUE_SIZE: usize = 256 << 10;
pub const MAX_EV_BLOCK_SIZE: u32 = 16 << 20;

// Deadlines and intervals.
pub const WRITE_DEADLINE: Duration = Duration::from_secs(10);
pub const ACK_READ_DEADLINE: Duration = Duration::from_secs(10);
pub const CONTROL_REPLY_DEADLINE: Duration = Duration::from_secs(2);
pub const CLOSING_SERVICE_ACK_TIMEOUT: Duration = Duration::from_secs(3);
pub const MAX_THROTTLE_PAUSE: Duration = Duration::from_secs(5);
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(1);
pub const READER_TIMEOUT: Duration = Duration::from_secs(600);

/// Characters a tag (or enumerated-value) name may never contain, on top of
/// the control/whitespace ban.
pub const FORBIDDEN_TAG_CHARS: &str = "!@#$%^&*()=+<>,.:;`\"'{[}]|\\";

/// Validates a tag or enumerated-value name against the shared ruleset:
/// non-empty, at most [`MAX_TAG_LENGTH`] bytes, no control characters, no
/// whitespace, none of [`FORBIDDEN_TAG_CHARS`].
pub fn validate_tag_name(name: &str) -> Result<()> {
    ensure!(!name.is_empty(), "tag name must not be empty");
    ensure!(
        name.len() <= MAX_TAG_LENGTH,
        "tag name of {} bytes exceeds the {MAX_TAG_LENGTH} byte cap",
        name.len()
    );
    for c in name.chars() {
        ensure!(
            !c.is_control() && !c.is_whitespace(),
            "tag name {name:?} contains control or whitespace characters"
        );
        ensure!(
            !FORBIDDEN_TAG_CHARS.contains(c),
            "tag name {name:?} contains the reserved character {c:?}"
        );
    }
    Ok(())
}

/// Appends a `u32`-length-prefixed block, rejecting payloads above `ceiling`.
pub fn put_len_block(out: &mut BytesMut, payload: &[u8], ceiling: u32) -> Result<()> {
    ensure!(
        payload.len() as u64 <= ceiling as u64,
        "block of {} bytes exceeds the {ceiling} byte ceiling",
        payload.len()
    );
    out.put_u32_le(payload.len() as u32);
    out.put_slice(payload);
    Ok(())
}

/// Splits one length-prefixed block off the front of `buf`, returning the
/// payload and the total bytes consumed. Oversized prefixes fail before any
/// payload is touched.
pub fn take_len_block(buf: &[u8], ceiling: u32) -> Result<(&[u8], usize)> {
    ensure!(buf.len() >= 4, "short length prefix");
    let mut rd = buf;
    let len = rd.get_u32_le();
    ensure!(
        len <= ceiling,
        "block of {len} bytes exceeds the {ceiling} byte ceiling"
    );
    let len = len as usize;
    ensure!(rd.len() >= len, "truncated block body");
    Ok((&rd[..len], 4 + len))
}
