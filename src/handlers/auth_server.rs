// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Indexer-side handshake: issue a challenge, verify the response (plain or
//! tenant-scoped), run stream configuration, assign the initial tag batch,
//! and wait for the client to report HOT.

use std::collections::HashMap;

use anyhow::{Result, ensure};
use bytes::BytesMut;
use tracing::{debug, warn};
use zerocopy::IntoBytes;

use crate::{
    cfg::enums::Compression,
    errors::IngestError,
    handlers::stream_config,
    models::{
        auth::{
            challenge::{
                Challenge, ChallengeRng, RESPONSE_LEN, SharedSecretHash,
                TENANT_SENTINEL,
            },
            state::{
                STATE_AUTHENTICATED, STATE_HOT, STATE_NOT_AUTHENTICATED, StateResponse,
            },
            tags::{TagRequest, TagResponse},
        },
        common::{
            ACK_READ_DEADLINE, MAX_TENANT_LENGTH, MINIMUM_DYN_CONFIG_VERSION,
            STATE_RESPONSE_CEILING, TAG_REQUEST_CEILING, WRITE_DEADLINE,
            validate_tag_name,
        },
    },
    server::tag_manager::TagManager,
    stream::{RecvStream, SendStream},
};

#[derive(Debug)]
pub struct ServerHandshake {
    /// Tenant the client authenticated into, if it asked for one.
    pub tenant: Option<String>,
    /// Initial tag bindings handed to the client.
    pub tags: HashMap<String, u16>,
    pub compression: Compression,
}

async fn write_state(
    send: &mut SendStream,
    id: u32,
) -> Result<()> {
    let mut buf = BytesMut::new();
    StateResponse::new(id).encode(&mut buf)?;
    send.write(&buf, WRITE_DEADLINE).await?;
    send.flush(WRITE_DEADLINE).await
}

async fn step_verify(
    send: &mut SendStream,
    recv: &mut RecvStream,
    secret: &SharedSecretHash,
    api_version: u16,
) -> Result<Option<String>> {
    let challenge = {
        let mut rng = ChallengeRng::global()
            .lock()
            .map_err(|_| IngestError::protocol("challenge rng poisoned"))?;
        Challenge::generate(&mut rng, api_version)
    };
    send.write(challenge.as_bytes(), WRITE_DEADLINE).await?;
    send.flush(WRITE_DEADLINE).await?;

    let first = recv.read_exact(RESPONSE_LEN, ACK_READ_DEADLINE).await?;
    let (response, tenant) = if first.as_ref() == TENANT_SENTINEL.as_slice() {
        let response = recv.read_exact(RESPONSE_LEN, ACK_READ_DEADLINE).await?;
        let _client_version = recv.read_u16(ACK_READ_DEADLINE).await?;
        let name_len = recv.read_u16(ACK_READ_DEADLINE).await? as usize;
        ensure!(
            name_len <= MAX_TENANT_LENGTH,
            "tenant name of {name_len} bytes exceeds the {MAX_TENANT_LENGTH} byte cap"
        );
        let name = recv.read_exact(name_len, ACK_READ_DEADLINE).await?;
        let name = String::from_utf8(name.to_vec())
            .map_err(|_| IngestError::protocol("tenant name is not utf-8"))?;
        (response, Some(name))
    } else {
        (first, None)
    };

    if !challenge.verify(&response, secret) {
        warn!("challenge response mismatch, rejecting");
        write_state(send, STATE_NOT_AUTHENTICATED).await?;
        return Err(IngestError::NotAuthenticated.into());
    }
    write_state(send, STATE_AUTHENTICATED).await?;
    debug!(?tenant, "client authenticated");
    Ok(tenant)
}

async fn step_tags(
    send: &mut SendStream,
    recv: &mut RecvStream,
    tag_manager: &dyn TagManager,
) -> Result<HashMap<String, u16>> {
    let payload = recv
        .read_len_block(TAG_REQUEST_CEILING, ACK_READ_DEADLINE)
        .await?;
    let request = TagRequest::decode_payload(&payload)?;

    let mut tags = HashMap::with_capacity(request.names.len());
    let mut failed = None;
    for name in &request.names {
        let assigned = validate_tag_name(name)
            .and_then(|_| tag_manager.get_and_populate(name));
        match assigned {
            Ok(id) => {
                tags.insert(name.clone(), id);
            },
            Err(e) => {
                failed = Some(format!("cannot assign tag {name:?}: {e}"));
                break;
            },
        }
    }

    // One bad name rejects the whole request: the response carries count=0
    // and the handshake fails on both ends.
    let response = match &failed {
        None => TagResponse::new(tags.clone()),
        Some(_) => TagResponse::rejected(),
    };
    let mut buf = BytesMut::new();
    response.encode(&mut buf)?;
    send.write(&buf, WRITE_DEADLINE).await?;
    send.flush(WRITE_DEADLINE).await?;

    match failed {
        None => Ok(tags),
        Some(msg) => Err(IngestError::TagNegotiation(msg).into()),
    }
}

/// Runs the full server handshake over a fresh byte stream.
pub async fn accept(
    send: &mut SendStream,
    recv: &mut RecvStream,
    secret: &SharedSecretHash,
    api_version: u16,
    tag_manager: &dyn TagManager,
) -> Result<ServerHandshake> {
    let tenant = step_verify(send, recv, secret, api_version).await?;

    let compression = if api_version >= MINIMUM_DYN_CONFIG_VERSION {
        stream_config::server_configure(send, recv).await?
    } else {
        Compression::None
    };

    let tags = step_tags(send, recv, tag_manager).await?;

    let payload = recv
        .read_len_block(STATE_RESPONSE_CEILING, ACK_READ_DEADLINE)
        .await?;
    let state = StateResponse::decode_payload(&payload)?;
    ensure!(
        state.id == STATE_HOT,
        "client reported state {} instead of HOT",
        state.id
    );

    Ok(ServerHandshake {
        tenant,
        tags,
        compression,
    })
}
