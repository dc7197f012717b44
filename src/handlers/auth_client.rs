// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Ingester-side handshake, one step per function:
//! challenge → response (plain or tenant-scoped) → state check →
//! stream configuration → batch tag negotiation → HOT.

use std::collections::HashMap;

use anyhow::{Result, ensure};
use bytes::{BufMut, BytesMut};
use tracing::debug;

use crate::{
    cfg::config::Config,
    errors::IngestError,
    handlers::stream_config,
    models::{
        auth::{
            challenge::{CHALLENGE_LEN, Challenge, SharedSecretHash, TENANT_SENTINEL},
            state::{STATE_AUTHENTICATED, STATE_HOT, StateResponse},
            tags::{TagRequest, TagResponse},
        },
        common::{
            ACK_READ_DEADLINE, CURRENT_API_VERSION, MINIMUM_DYN_CONFIG_VERSION,
            MINIMUM_TENANT_AUTH_VERSION, STATE_RESPONSE_CEILING, TAG_RESPONSE_CEILING,
            WRITE_DEADLINE,
        },
    },
    stream::{RecvStream, SendStream},
};

#[derive(Debug)]
pub struct HandshakeOutcome {
    /// Version the indexer advertised in its challenge; every later
    /// capability check reads this.
    pub peer_version: u16,
    /// Initial tag bindings assigned by the indexer.
    pub tags: HashMap<String, u16>,
}

async fn step_challenge_response(
    send: &mut SendStream,
    recv: &mut RecvStream,
    cfg: &Config,
    secret: &SharedSecretHash,
) -> Result<u16> {
    let raw = recv.read_exact(CHALLENGE_LEN, ACK_READ_DEADLINE).await?;
    let challenge = Challenge::parse(&raw)?;
    let peer_version = challenge.version.get();
    debug!(peer_version, "received challenge");

    let response = challenge.response(secret);
    let tenant = cfg.session.tenant.as_str();
    if tenant.is_empty() {
        send.write(&response, WRITE_DEADLINE).await?;
    } else {
        // The gate is checked before anything goes on the wire so the caller
        // can reconnect without a tenant against an old indexer.
        if peer_version < MINIMUM_TENANT_AUTH_VERSION {
            return Err(IngestError::TenantAuthUnsupported(peer_version).into());
        }
        let mut buf = BytesMut::with_capacity(64 + 4 + tenant.len());
        buf.put_slice(&TENANT_SENTINEL);
        buf.put_slice(&response);
        buf.put_u16_le(CURRENT_API_VERSION);
        buf.put_u16_le(tenant.len() as u16);
        buf.put_slice(tenant.as_bytes());
        send.write(&buf, WRITE_DEADLINE).await?;
    }
    send.flush(WRITE_DEADLINE).await?;

    let payload = recv
        .read_len_block(STATE_RESPONSE_CEILING, ACK_READ_DEADLINE)
        .await?;
    let state = StateResponse::decode_payload(&payload)?;
    if state.id != STATE_AUTHENTICATED {
        return Err(IngestError::NotAuthenticated.into());
    }
    Ok(peer_version)
}

async fn step_tags(
    send: &mut SendStream,
    recv: &mut RecvStream,
    cfg: &Config,
) -> Result<HashMap<String, u16>> {
    let request = TagRequest::new(cfg.session.initial_tags.clone())?;
    let mut buf = BytesMut::new();
    request.encode(&mut buf)?;
    send.write(&buf, WRITE_DEADLINE).await?;
    send.flush(WRITE_DEADLINE).await?;

    let payload = recv
        .read_len_block(TAG_RESPONSE_CEILING, ACK_READ_DEADLINE)
        .await?;
    let response = TagResponse::decode_payload(&payload)?;
    if response.count == 0 && request.count > 0 {
        return Err(IngestError::TagNegotiation(format!(
            "indexer rejected the initial {} tag request",
            request.count
        ))
        .into());
    }
    for name in &request.names {
        ensure!(
            response.tags.contains_key(name),
            "indexer response is missing the tag {name:?}"
        );
    }
    Ok(response.tags)
}

/// Runs the full client handshake and leaves the connection HOT.
pub async fn authenticate(
    send: &mut SendStream,
    recv: &mut RecvStream,
    cfg: &Config,
) -> Result<HandshakeOutcome> {
    let secret = SharedSecretHash::derive(&cfg.session.shared_secret);

    let peer_version = step_challenge_response(send, recv, cfg, &secret).await?;

    if peer_version >= MINIMUM_DYN_CONFIG_VERSION {
        stream_config::client_configure(send, recv, cfg.session.compression).await?;
    }

    let tags = step_tags(send, recv, cfg).await?;

    let mut buf = BytesMut::new();
    StateResponse::new(STATE_HOT).encode(&mut buf)?;
    send.write(&buf, WRITE_DEADLINE).await?;
    send.flush(WRITE_DEADLINE).await?;
    debug!(peer_version, tags = tags.len(), "connection is hot");

    Ok(HandshakeOutcome { peer_version, tags })
}
