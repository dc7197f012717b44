// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Ingester identity and periodic state reports.
//!
//! `IngesterState` is recursive (children report through their parent); the
//! tree is acyclic by construction and `Clone` is a deep copy, which is what
//! the reader hands out so callers can never mutate its stored copy.

use std::collections::HashMap;

use anyhow::{Context, Result};
use bytes::BytesMut;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::common::{MAX_INGESTER_STATE_SIZE, put_len_block, take_len_block};

/// Identity reported over the ID command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngesterInfo {
    pub name: String,
    pub version: String,
    pub uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct IngesterState {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub uuid: String,
    /// Milliseconds since the ingester started.
    #[serde(default)]
    pub uptime_ms: u64,
    #[serde(default)]
    pub entries: u64,
    #[serde(default)]
    pub bytes: u64,
    /// Entries currently parked in the ingester-side cache, if any.
    #[serde(default)]
    pub cache_size: u64,
    /// Stamped by the reader when the report arrives; never sent upstream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub children: HashMap<String, IngesterState>,
}

impl IngesterState {
    pub fn encode(&self, out: &mut BytesMut) -> Result<()> {
        let json = serde_json::to_vec(self).context("failed to encode ingester state")?;
        put_len_block(out, &json, MAX_INGESTER_STATE_SIZE)
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (payload, consumed) = take_len_block(buf, MAX_INGESTER_STATE_SIZE)?;
        Ok((Self::decode_payload(payload)?, consumed))
    }

    pub fn decode_payload(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).context("failed to decode ingester state")
    }
}
