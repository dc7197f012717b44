// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The unit of ingest: a timestamped, tagged, opaque payload with optional
//! enumerated values. Immutable once handed to the writer.

pub mod evs;
pub mod header;

use std::net::IpAddr;

use anyhow::{Result, bail, ensure};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::Utc;
use zerocopy::IntoBytes;

use crate::{
    errors::IngestError,
    models::{
        command::IngestCommand,
        common::{MAX_ENTRY_DATA_SIZE, MAX_EV_BLOCK_SIZE},
        entry::{
            evs::{EnumeratedValue, decode_evs, encode_evs},
            header::{ENTRY_HEADER_LEN, EntryFlags, EntryHeader},
        },
    },
};

/// 96-bit wall-clock timestamp: seconds plus nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timestamp {
    pub sec: i64,
    pub nsec: i32,
}

impl Timestamp {
    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            sec: now.timestamp(),
            nsec: now.timestamp_subsec_nanos() as i32,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub ts: Timestamp,
    /// Source address; `None` means "stamp the connection default".
    pub src: Option<IpAddr>,
    pub tag: u16,
    pub data: Bytes,
    pub evs: Vec<EnumeratedValue>,
}

impl Entry {
    pub fn new(tag: u16, data: impl Into<Bytes>) -> Self {
        Self {
            ts: Timestamp::now(),
            src: None,
            tag,
            data: data.into(),
            evs: Vec::new(),
        }
    }

    pub fn with_ts(mut self, ts: Timestamp) -> Self {
        self.ts = ts;
        self
    }

    pub fn with_src(mut self, src: IpAddr) -> Self {
        self.src = Some(src);
        self
    }

    pub fn with_ev(mut self, ev: EnumeratedValue) -> Self {
        self.evs.push(ev);
        self
    }

    /// Size gate checked at `write` time: an oversized or malformed entry
    /// is rejected without touching the wire and without invalidating the
    /// connection.
    pub fn validate(&self) -> Result<()> {
        if self.data.len() > MAX_ENTRY_DATA_SIZE {
            return Err(IngestError::OversizedEntry(self.data.len()).into());
        }
        for ev in &self.evs {
            ev.validate()
                .map_err(|e| IngestError::InvalidEntry(format!("{e:#}")))?;
        }
        Ok(())
    }

    fn header(&self, send_id: u64) -> EntryHeader {
        let mut src = [0u8; 16];
        let src_len = match self.src {
            None => 0u8,
            Some(IpAddr::V4(v4)) => {
                src[..4].copy_from_slice(&v4.octets());
                4
            },
            Some(IpAddr::V6(v6)) => {
                src.copy_from_slice(&v6.octets());
                16
            },
        };
        let mut flags = EntryFlags::empty();
        if !self.evs.is_empty() {
            flags |= EntryFlags::HAS_EVS;
        }
        EntryHeader {
            ts_sec: self.ts.sec.into(),
            ts_nsec: self.ts.nsec.into(),
            tag: self.tag.into(),
            src_len,
            flags: flags.bits(),
            src,
            data_len: (self.data.len() as u32).into(),
            send_id: send_id.into(),
        }
    }

    /// Encodes a complete NEW_ENTRY frame: command code, fixed header, data
    /// and, when present, the length-prefixed enumerated-value block.
    pub fn encode_frame(&self, send_id: u64, out: &mut BytesMut) -> Result<()> {
        self.validate()?;
        out.put_u32_le(IngestCommand::NewEntry.code());
        out.put_slice(self.header(send_id).as_bytes());
        out.put_slice(&self.data);
        if !self.evs.is_empty() {
            let mut block = BytesMut::new();
            encode_evs(&self.evs, &mut block)?;
            ensure!(
                block.len() as u32 <= MAX_EV_BLOCK_SIZE,
                "enumerated value block of {} bytes exceeds the cap",
                block.len()
            );
            out.put_u32_le(block.len() as u32);
            out.put_slice(&block);
        }
        Ok(())
    }

    /// Reassembles an entry from its decoded frame parts.
    pub fn from_parts(
        header: &EntryHeader,
        data: Bytes,
        evs: Vec<EnumeratedValue>,
    ) -> Result<(u64, Entry)> {
        let src = match header.src_len {
            0 => None,
            4 => {
                let mut b = [0u8; 4];
                b.copy_from_slice(&header.src[..4]);
                Some(IpAddr::from(b))
            },
            16 => Some(IpAddr::from(header.src)),
            other => bail!("invalid source length {other}"),
        };
        Ok((
            header.send_id.get(),
            Entry {
                ts: Timestamp {
                    sec: header.ts_sec.get(),
                    nsec: header.ts_nsec.get(),
                },
                src,
                tag: header.tag.get(),
                data,
                evs,
            },
        ))
    }

    /// Pure counterpart of [`Entry::encode_frame`]; consumes one frame from
    /// the front of `buf` and returns `(send_id, entry, bytes_consumed)`.
    pub fn decode_frame(buf: &[u8]) -> Result<(u64, Entry, usize)> {
        let mut rd = buf;
        ensure!(rd.len() >= 4 + ENTRY_HEADER_LEN, "short entry frame");
        let code = rd.get_u32_le();
        ensure!(
            code == IngestCommand::NewEntry.code(),
            "frame does not start with NEW_ENTRY"
        );
        let header = EntryHeader::parse(&rd[..ENTRY_HEADER_LEN])?;
        rd.advance(ENTRY_HEADER_LEN);
        let data_len = header.data_len.get() as usize;
        ensure!(data_len <= MAX_ENTRY_DATA_SIZE, "oversized entry data");
        ensure!(rd.len() >= data_len, "truncated entry data");
        let data = Bytes::copy_from_slice(&rd[..data_len]);
        rd.advance(data_len);
        let evs = if header.has_evs() {
            ensure!(rd.len() >= 4, "truncated enumerated value block");
            let block_len = rd.get_u32_le();
            ensure!(
                block_len <= MAX_EV_BLOCK_SIZE,
                "oversized enumerated value block"
            );
            let block_len = block_len as usize;
            ensure!(rd.len() >= block_len, "truncated enumerated value block");
            let evs = decode_evs(&rd[..block_len])?;
            rd.advance(block_len);
            evs
        } else {
            Vec::new()
        };
        let consumed = buf.len() - rd.len();
        let (send_id, entry) = Entry::from_parts(&header, data, evs)?;
        Ok((send_id, entry, consumed))
    }
}
