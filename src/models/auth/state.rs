// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Length-prefixed JSON state exchange used during the handshake.

use anyhow::{Context, Result};
use bytes::BytesMut;
use serde::{Deserialize, Serialize};

use crate::models::common::{STATE_RESPONSE_CEILING, put_len_block, take_len_block};

pub const STATE_AUTHENTICATED: u32 = 2;
pub const STATE_NOT_AUTHENTICATED: u32 = 3;
pub const STATE_HOT: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateResponse {
    pub id: u32,
    #[serde(default)]
    pub info: String,
}

impl StateResponse {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            info: String::new(),
        }
    }

    pub fn with_info(id: u32, info: impl Into<String>) -> Self {
        Self {
            id,
            info: info.into(),
        }
    }

    pub fn encode(&self, out: &mut BytesMut) -> Result<()> {
        let json = serde_json::to_vec(self).context("failed to encode state response")?;
        put_len_block(out, &json, STATE_RESPONSE_CEILING)
    }

    /// Decodes one block off the front of `buf`, returning the message and
    /// the bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (payload, consumed) = take_len_block(buf, STATE_RESPONSE_CEILING)?;
        Ok((Self::decode_payload(payload)?, consumed))
    }

    /// Decodes the JSON body alone, once the length prefix has been consumed
    /// by the stream layer.
    pub fn decode_payload(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).context("failed to decode state response")
    }
}
