// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Snappy *stream* framing over the raw block codec: a stream identifier
//! chunk, then compressed / uncompressed chunks carrying a masked CRC-32C
//! of the uncompressed bytes. Layout per the standard Snappy framing format.

use anyhow::{Result, bail, ensure};
use bytes::{Buf, BytesMut};

pub const CHUNK_COMPRESSED: u8 = 0x00;
pub const CHUNK_UNCOMPRESSED: u8 = 0x01;
pub const CHUNK_PADDING: u8 = 0xfe;
pub const CHUNK_STREAM_ID: u8 = 0xff;

const STREAM_ID_BODY: &[u8; 6] = b"sNaPpY";
/// Uncompressed payload of one chunk never exceeds this.
const MAX_BLOCK: usize = 65536;
/// Hard cap on any chunk body we are willing to stage.
const MAX_CHUNK_BODY: usize = 1 << 20;

fn masked_crc(data: &[u8]) -> u32 {
    let crc = crc32c::crc32c(data);
    ((crc >> 15) | (crc << 17)).wrapping_add(0xa282_ead8)
}

pub struct SnappyEncoder {
    raw: snap::raw::Encoder,
    wrote_stream_id: bool,
}

impl SnappyEncoder {
    pub fn new() -> Self {
        Self {
            raw: snap::raw::Encoder::new(),
            wrote_stream_id: false,
        }
    }

    /// Encodes `payload` into framed chunks appended to `out`. Blocks that
    /// do not shrink are carried as uncompressed chunks.
    pub fn encode(&mut self, payload: &[u8], out: &mut Vec<u8>) -> Result<()> {
        if !self.wrote_stream_id {
            out.push(CHUNK_STREAM_ID);
            out.extend_from_slice(&(STREAM_ID_BODY.len() as u32).to_le_bytes()[..3]);
            out.extend_from_slice(STREAM_ID_BODY);
            self.wrote_stream_id = true;
        }
        for block in payload.chunks(MAX_BLOCK) {
            let crc = masked_crc(block);
            let compressed = self
                .raw
                .compress_vec(block)
                .map_err(|e| anyhow::anyhow!("snappy compression failed: {e}"))?;
            let (kind, body) = if compressed.len() < block.len() {
                (CHUNK_COMPRESSED, compressed.as_slice())
            } else {
                (CHUNK_UNCOMPRESSED, block)
            };
            let body_len = 4 + body.len();
            out.push(kind);
            out.extend_from_slice(&(body_len as u32).to_le_bytes()[..3]);
            out.extend_from_slice(&crc.to_le_bytes());
            out.extend_from_slice(body);
        }
        Ok(())
    }
}

impl Default for SnappyEncoder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SnappyDecoder {
    raw: snap::raw::Decoder,
}

impl SnappyDecoder {
    pub fn new() -> Self {
        Self {
            raw: snap::raw::Decoder::new(),
        }
    }

    /// Consumes as many complete chunks from `staged` as are present,
    /// appending their uncompressed bytes to `out`. Returns true when at
    /// least one data-bearing chunk was decoded.
    pub fn drain_chunks(&mut self, staged: &mut BytesMut, out: &mut BytesMut) -> Result<bool> {
        let mut produced = false;
        loop {
            if staged.len() < 4 {
                return Ok(produced);
            }
            let kind = staged[0];
            let body_len =
                u32::from_le_bytes([staged[1], staged[2], staged[3], 0]) as usize;
            ensure!(
                body_len <= MAX_CHUNK_BODY,
                "snappy chunk body of {body_len} bytes exceeds the cap"
            );
            if staged.len() < 4 + body_len {
                return Ok(produced);
            }
            staged.advance(4);
            let body = staged.split_to(body_len);
            match kind {
                CHUNK_STREAM_ID => {
                    ensure!(
                        body.as_ref() == STREAM_ID_BODY,
                        "bad snappy stream identifier"
                    );
                },
                CHUNK_COMPRESSED | CHUNK_UNCOMPRESSED => {
                    ensure!(body.len() >= 4, "snappy chunk too short for checksum");
                    let crc = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
                    let data = &body[4..];
                    if kind == CHUNK_COMPRESSED {
                        let plain = self.raw.decompress_vec(data).map_err(|e| {
                            anyhow::anyhow!("snappy decompression failed: {e}")
                        })?;
                        ensure!(
                            plain.len() <= MAX_BLOCK,
                            "snappy block inflates past the format limit"
                        );
                        ensure!(masked_crc(&plain) == crc, "snappy checksum mismatch");
                        out.extend_from_slice(&plain);
                    } else {
                        ensure!(
                            data.len() <= MAX_BLOCK,
                            "snappy block exceeds the format limit"
                        );
                        ensure!(masked_crc(data) == crc, "snappy checksum mismatch");
                        out.extend_from_slice(data);
                    }
                    produced = true;
                },
                CHUNK_PADDING => {},
                k if (0x80..=0xfd).contains(&k) => {}, // skippable, ignore
                k => bail!("unskippable reserved snappy chunk 0x{k:02x}"),
            }
        }
    }
}

impl Default for SnappyDecoder {
    fn default() -> Self {
        Self::new()
    }
}
