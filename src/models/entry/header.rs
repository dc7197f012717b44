// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Result, anyhow, bail};
use bitflags::bitflags;
use zerocopy::{
    FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, LittleEndian, U16, U32,
    U64, Unaligned,
};

/// Fixed-width entry header that follows the NEW_ENTRY command code.
/// All integers little-endian; the source slot is 16 bytes wide regardless
/// of address family, with `src_len` naming the used prefix (0, 4 or 16).
#[repr(C)]
#[derive(Debug, Default, Clone, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct EntryHeader {
    pub ts_sec: zerocopy::I64<LittleEndian>,  // 0..8
    pub ts_nsec: zerocopy::I32<LittleEndian>, // 8..12
    pub tag: U16<LittleEndian>,               // 12..14
    pub src_len: u8,                          // 14
    pub flags: u8,                            // 15
    pub src: [u8; 16],                        // 16..32
    pub data_len: U32<LittleEndian>,          // 32..36
    pub send_id: U64<LittleEndian>,           // 36..44
}

pub const ENTRY_HEADER_LEN: usize = 44;

bitflags! {
    /// Per-entry flags byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryFlags: u8 {
        /// An enumerated-value block follows the data bytes.
        const HAS_EVS = 0b0000_0001;
    }
}

impl EntryHeader {
    pub fn write_to(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() != ENTRY_HEADER_LEN {
            bail!("buffer length must be {ENTRY_HEADER_LEN}, got {}", buf.len());
        }
        buf.copy_from_slice(self.as_bytes());
        Ok(())
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        Self::read_from_bytes(buf)
            .map_err(|e| anyhow!("failed to parse entry header: {e}"))
    }

    #[inline]
    pub fn has_evs(&self) -> bool {
        EntryFlags::from_bits_truncate(self.flags).contains(EntryFlags::HAS_EVS)
    }
}
