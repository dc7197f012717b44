// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Stream configuration block: a length-prefixed single compression byte the
//! client offers and the server echoes back verbatim on acceptance.

use anyhow::{Result, bail, ensure};
use bytes::BytesMut;

use crate::{
    cfg::enums::Compression,
    models::common::{STREAM_CONFIG_CEILING, put_len_block, take_len_block},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfiguration {
    pub compression: Compression,
}

impl StreamConfiguration {
    pub fn encode(&self, out: &mut BytesMut) -> Result<()> {
        put_len_block(out, &[self.compression as u8], STREAM_CONFIG_CEILING)
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (payload, consumed) = take_len_block(buf, STREAM_CONFIG_CEILING)?;
        Ok((Self::decode_payload(payload)?, consumed))
    }

    pub fn decode_payload(payload: &[u8]) -> Result<Self> {
        ensure!(
            payload.len() == 1,
            "stream configuration must be a single byte, got {}",
            payload.len()
        );
        let compression = match payload[0] {
            0 => Compression::None,
            1 => Compression::Snappy,
            other => bail!("unknown compression id {other}"),
        };
        Ok(Self { compression })
    }
}
