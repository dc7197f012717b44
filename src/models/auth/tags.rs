// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Batch tag negotiation blocks exchanged during the handshake. A response
//! with `count == 0` against a non-empty request signals that the whole
//! request was rejected.

use std::collections::HashMap;

use anyhow::{Context, Result};
use bytes::BytesMut;
use serde::{Deserialize, Serialize};

use crate::models::common::{
    TAG_REQUEST_CEILING, TAG_RESPONSE_CEILING, put_len_block, take_len_block,
    validate_tag_name,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRequest {
    pub count: u32,
    pub names: Vec<String>,
}

impl TagRequest {
    /// Builds a request, validating every name against the shared ruleset.
    pub fn new(names: Vec<String>) -> Result<Self> {
        for name in &names {
            validate_tag_name(name)?;
        }
        Ok(Self {
            count: names.len() as u32,
            names,
        })
    }

    pub fn encode(&self, out: &mut BytesMut) -> Result<()> {
        let json = serde_json::to_vec(self).context("failed to encode tag request")?;
        put_len_block(out, &json, TAG_REQUEST_CEILING)
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (payload, consumed) = take_len_block(buf, TAG_REQUEST_CEILING)?;
        Ok((Self::decode_payload(payload)?, consumed))
    }

    pub fn decode_payload(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).context("failed to decode tag request")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TagResponse {
    pub count: u32,
    pub tags: HashMap<String, u16>,
}

impl TagResponse {
    pub fn new(tags: HashMap<String, u16>) -> Self {
        Self {
            count: tags.len() as u32,
            tags,
        }
    }

    /// The failure form: the indexer could not assign one of the requested
    /// names, so the entire request is rejected.
    pub fn rejected() -> Self {
        Self::default()
    }

    pub fn encode(&self, out: &mut BytesMut) -> Result<()> {
        let json = serde_json::to_vec(self).context("failed to encode tag response")?;
        put_len_block(out, &json, TAG_RESPONSE_CEILING)
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (payload, consumed) = take_len_block(buf, TAG_RESPONSE_CEILING)?;
        Ok((Self::decode_payload(payload)?, consumed))
    }

    pub fn decode_payload(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).context("failed to decode tag response")
    }
}
