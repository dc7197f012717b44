// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Indexer-side pipeline: one decoder task pulling frames off the link and
//! one ack-writer task pushing confirmations back, joined by a bounded
//! channel. When the ack channel backs up the decoder stops pulling frames,
//! which stalls the transport and pauses the writer; that is the whole
//! back-pressure story.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU16, Ordering},
    },
    time::Duration,
};

use anyhow::{Result, ensure};
use chrono::Utc;
use dashmap::DashMap;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    cfg::{config::Config, enums::Compression},
    errors::IngestError,
    handlers::auth_server,
    models::{
        auth::challenge::SharedSecretHash,
        command::{IngestCommand, PayloadKind},
        common::{
            MAX_ENTRY_DATA_SIZE, MAX_EV_BLOCK_SIZE, MAX_ID_FIELD_SIZE,
            MAX_INGESTER_STATE_SIZE, MAX_TAG_LENGTH,
        },
        entry::{
            Entry,
            evs::decode_evs,
            header::{ENTRY_HEADER_LEN, EntryHeader},
        },
        state::{IngesterInfo, IngesterState},
    },
    server::{
        acker::{AckCommand, run_acker},
        tag_manager::TagManager,
    },
    stream::{RecvStream, SendStream, split_stream},
};

/// Observers run inline on the decoder task and must not block.
pub trait StateObserver: Send + Sync {
    fn on_state(&self, state: &IngesterState);
}

impl<F> StateObserver for F
where F: Fn(&IngesterState) + Send + Sync
{
    fn on_state(&self, state: &IngesterState) {
        self(state)
    }
}

/// State shared between the decoder, the ack writer and the handle.
pub(crate) struct ReaderShared {
    info: Mutex<Option<IngesterInfo>>,
    api_version: AtomicU16,
    state: Mutex<Option<IngesterState>>,
    /// Copy-on-register list: the decoder snapshots the Arc and never holds
    /// the lock while callbacks run.
    callbacks: Mutex<Arc<Vec<Arc<dyn StateObserver>>>>,
    fatal: Mutex<Option<IngestError>>,
    tags: DashMap<String, u16>,
}

impl ReaderShared {
    fn new(initial_tags: impl IntoIterator<Item = (String, u16)>) -> Self {
        let tags = DashMap::new();
        for (name, id) in initial_tags {
            tags.insert(name, id);
        }
        Self {
            info: Mutex::new(None),
            api_version: AtomicU16::new(0),
            state: Mutex::new(None),
            callbacks: Mutex::new(Arc::new(Vec::new())),
            fatal: Mutex::new(None),
            tags,
        }
    }

    pub(crate) fn record_error(&self, err: &anyhow::Error) {
        let mut slot = match self.fatal.lock() {
            Ok(s) => s,
            Err(p) => p.into_inner(),
        };
        if slot.is_none() {
            *slot = Some(match err.downcast_ref::<IngestError>() {
                Some(e) => e.clone(),
                None => IngestError::Protocol(format!("{err:#}")),
            });
        }
    }
}

pub struct IngestReader {
    shared: Arc<ReaderShared>,
    cancel: CancellationToken,
    ack_tx: mpsc::Sender<AckCommand>,
    entries: Mutex<Option<mpsc::Receiver<Entry>>>,
    tenant: Option<String>,
    compression: Compression,
}

impl std::fmt::Debug for IngestReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestReader")
            .field("tenant", &self.tenant)
            .field("compression", &self.compression)
            .finish_non_exhaustive()
    }
}

impl IngestReader {
    /// Accepts one ingester over a fresh duplex stream: runs the server
    /// handshake, then spawns the decoder and ack-writer tasks.
    pub async fn accept<S>(
        stream: S,
        mut cfg: Config,
        tag_manager: Arc<dyn TagManager>,
    ) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        cfg.validate_and_normalize()?;
        let (r, w) = split_stream(stream);
        let mut send = SendStream::new(w, cfg.runtime.reader_buffer_size);
        let mut recv = RecvStream::new(r, cfg.runtime.reader_buffer_size);

        let secret = SharedSecretHash::derive(&cfg.session.shared_secret);
        let handshake = auth_server::accept(
            &mut send,
            &mut recv,
            &secret,
            cfg.runtime.api_version,
            tag_manager.as_ref(),
        )
        .await?;

        let outstanding = cfg.runtime.outstanding_entry_count;
        let (entries_tx, entries_rx) = mpsc::channel(outstanding);
        let (ack_tx, ack_rx) = mpsc::channel(outstanding + 64);
        let shared = Arc::new(ReaderShared::new(handshake.tags));
        let cancel = CancellationToken::new();

        // Roughly one confirm frame per outstanding entry.
        let batch_limit = 12 * outstanding;
        tokio::spawn(run_acker(
            send,
            ack_rx,
            Arc::clone(&shared),
            cancel.clone(),
            batch_limit,
        ));

        {
            let shared = Arc::clone(&shared);
            let cancel = cancel.clone();
            let ack_tx = ack_tx.clone();
            let timeout = cfg.runtime.timeout;
            tokio::spawn(async move {
                if let Err(e) = decode_loop(
                    &mut recv,
                    &entries_tx,
                    &ack_tx,
                    &shared,
                    tag_manager.as_ref(),
                    &cancel,
                    timeout,
                )
                .await
                {
                    warn!("decoder exited: {e:#}");
                    shared.record_error(&e);
                }
                cancel.cancel();
            });
        }

        Ok(Self {
            shared,
            cancel,
            ack_tx,
            entries: Mutex::new(Some(entries_rx)),
            tenant: handshake.tenant,
            compression: handshake.compression,
        })
    }

    /// The decoded entry stream; can be taken exactly once.
    pub fn take_entries(&self) -> Option<mpsc::Receiver<Entry>> {
        match self.entries.lock() {
            Ok(mut slot) => slot.take(),
            Err(p) => p.into_inner().take(),
        }
    }

    /// Asks the ingester to pause for `duration` (capped by the writer at
    /// five seconds per pause).
    pub async fn throttle(&self, duration: Duration) -> Result<()> {
        self.ack_tx
            .send(AckCommand::Throttle(duration))
            .await
            .map_err(|_| IngestError::Closed.into())
    }

    pub fn get_ingester_info(&self) -> Option<IngesterInfo> {
        match self.shared.info.lock() {
            Ok(info) => info.clone(),
            Err(p) => p.into_inner().clone(),
        }
    }

    pub fn get_api_version(&self) -> u16 {
        self.shared.api_version.load(Ordering::Relaxed)
    }

    /// Deep copy of the last state report; mutating it cannot touch the
    /// reader's stored copy.
    pub fn get_ingester_state(&self) -> Option<IngesterState> {
        match self.shared.state.lock() {
            Ok(state) => state.clone(),
            Err(p) => p.into_inner().clone(),
        }
    }

    /// Registers an observer for state reports. Observers run inline on the
    /// decoder task and must return promptly.
    pub fn add_state_callback(&self, observer: Arc<dyn StateObserver>) {
        let mut slot = match self.shared.callbacks.lock() {
            Ok(s) => s,
            Err(p) => p.into_inner(),
        };
        let mut next = Vec::with_capacity(slot.len() + 1);
        next.extend(slot.iter().cloned());
        next.push(observer);
        *slot = Arc::new(next);
    }

    pub fn tenant(&self) -> Option<&str> {
        self.tenant.as_deref()
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Id bound to `name` on this connection, initial or renegotiated.
    pub fn tag_id(&self, name: &str) -> Option<u16> {
        self.shared.tags.get(name).map(|id| *id)
    }

    /// Reverse lookup for applications translating decoded entries.
    pub fn tag_name(&self, id: u16) -> Option<String> {
        self.shared
            .tags
            .iter()
            .find(|kv| *kv.value() == id)
            .map(|kv| kv.key().clone())
    }

    pub fn last_error(&self) -> Option<IngestError> {
        match self.shared.fatal.lock() {
            Ok(e) => e.clone(),
            Err(p) => p.into_inner().clone(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }
}

fn is_timeout_err(e: &anyhow::Error) -> bool {
    e.downcast_ref::<IngestError>()
        .is_some_and(IngestError::is_timeout)
}

/// Scans forward one byte at a time until the marker lines up on a known
/// command again.
async fn resync(
    recv: &mut RecvStream,
    first: u32,
    deadline: Duration,
) -> Result<IngestCommand> {
    let mut window = first.to_le_bytes();
    let mut skipped = 0usize;
    loop {
        let b = recv.read_exact(1, deadline).await?;
        window = [window[1], window[2], window[3], b[0]];
        skipped += 1;
        if let Some(cmd) = IngestCommand::from_code(u32::from_le_bytes(window)) {
            warn!(skipped, "resynchronised after unrecognised bytes");
            return Ok(cmd);
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn decode_loop(
    recv: &mut RecvStream,
    entries_tx: &mpsc::Sender<Entry>,
    ack_tx: &mpsc::Sender<AckCommand>,
    shared: &ReaderShared,
    tag_manager: &dyn TagManager,
    cancel: &CancellationToken,
    timeout: Duration,
) -> Result<()> {
    loop {
        let code = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            r = recv.read_u32(timeout) => r,
        };
        let code = match code {
            Ok(c) => c,
            // A silent peer past the timeout is dead; surface EOF.
            Err(e) if is_timeout_err(&e) => {
                return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof)
                    .into());
            },
            Err(e) => return Err(e),
        };
        let cmd = match IngestCommand::from_code(code) {
            Some(c) => c,
            None => resync(recv, code, timeout).await?,
        };
        dispatch(cmd, recv, entries_tx, ack_tx, shared, tag_manager, timeout).await?;
    }
}

async fn queue(ack_tx: &mpsc::Sender<AckCommand>, cmd: AckCommand) -> Result<()> {
    ack_tx
        .send(cmd)
        .await
        .map_err(|_| IngestError::Closed.into())
}

async fn dispatch(
    cmd: IngestCommand,
    recv: &mut RecvStream,
    entries_tx: &mpsc::Sender<Entry>,
    ack_tx: &mpsc::Sender<AckCommand>,
    shared: &ReaderShared,
    tag_manager: &dyn TagManager,
    deadline: Duration,
) -> Result<()> {
    match cmd {
        IngestCommand::NewEntry => {
            let hdr = recv.read_exact(ENTRY_HEADER_LEN, deadline).await?;
            let header = EntryHeader::parse(&hdr)?;
            let data_len = header.data_len.get() as usize;
            ensure!(
                data_len <= MAX_ENTRY_DATA_SIZE,
                "entry data of {data_len} bytes exceeds the maximum entry size"
            );
            let data = recv.read_exact(data_len, deadline).await?;
            let evs = if header.has_evs() {
                let block = recv.read_len_block(MAX_EV_BLOCK_SIZE, deadline).await?;
                decode_evs(&block)?
            } else {
                Vec::new()
            };
            let (send_id, entry) = Entry::from_parts(&header, data, evs)?;
            if entries_tx.send(entry).await.is_err() {
                return Err(IngestError::Closed.into());
            }
            queue(ack_tx, AckCommand::Confirm(send_id)).await?;
        },
        IngestCommand::ForceAck => queue(ack_tx, AckCommand::FlushMarker).await?,
        IngestCommand::Ping => queue(ack_tx, AckCommand::Pong).await?,
        IngestCommand::Tag => {
            let name = recv
                .read_len_block(MAX_TAG_LENGTH as u32, deadline)
                .await?;
            let reply = match String::from_utf8(name.to_vec()) {
                Ok(name) => match tag_manager.get_and_populate(&name) {
                    Ok(id) => {
                        shared.tags.insert(name, id);
                        AckCommand::ConfirmTag(id)
                    },
                    Err(e) => {
                        warn!("tag lookup for {name:?} failed: {e:#}");
                        AckCommand::ErrorTag
                    },
                },
                Err(_) => {
                    warn!("tag name is not utf-8");
                    AckCommand::ErrorTag
                },
            };
            queue(ack_tx, reply).await?;
        },
        IngestCommand::Id => {
            let name = recv.read_len_block(MAX_ID_FIELD_SIZE, deadline).await?;
            let version = recv.read_len_block(MAX_ID_FIELD_SIZE, deadline).await?;
            let uuid = recv.read_len_block(MAX_ID_FIELD_SIZE, deadline).await?;
            let uuid = std::str::from_utf8(&uuid)
                .ok()
                .and_then(|s| Uuid::parse_str(s).ok())
                .ok_or_else(|| IngestError::protocol("malformed ingester uuid"))?;
            let info = IngesterInfo {
                name: String::from_utf8_lossy(&name).into_owned(),
                version: String::from_utf8_lossy(&version).into_owned(),
                uuid,
            };
            debug!(name = %info.name, %uuid, "ingester identified");
            match shared.info.lock() {
                Ok(mut slot) => *slot = Some(info),
                Err(p) => *p.into_inner() = Some(info),
            }
            queue(ack_tx, AckCommand::ConfirmId).await?;
        },
        IngestCommand::ApiVer => {
            let version = recv.read_u16(deadline).await?;
            shared.api_version.store(version, Ordering::Relaxed);
            queue(ack_tx, AckCommand::ConfirmApiVer).await?;
        },
        IngestCommand::IngestOk => {
            queue(ack_tx, AckCommand::ConfirmIngestOk(true)).await?;
        },
        IngestCommand::IngesterState => {
            let payload = recv
                .read_len_block(MAX_INGESTER_STATE_SIZE, deadline)
                .await?;
            let mut state = IngesterState::decode_payload(&payload)?;
            state.last_seen = Some(Utc::now());
            let observers = {
                match shared.state.lock() {
                    Ok(mut slot) => *slot = Some(state.clone()),
                    Err(p) => *p.into_inner() = Some(state.clone()),
                }
                match shared.callbacks.lock() {
                    Ok(cbs) => Arc::clone(&cbs),
                    Err(p) => Arc::clone(&p.into_inner()),
                }
            };
            for obs in observers.iter() {
                obs.on_state(&state);
            }
            queue(ack_tx, AckCommand::ConfirmIngesterState).await?;
        },
        // A reader-bound confirm reaching the reader means the peer lost the
        // plot; skip its payload and keep the stream aligned.
        other => {
            warn!(?other, "skipping writer-bound command on the reader");
            match other.payload() {
                PayloadKind::Empty => {},
                PayloadKind::U16 => {
                    recv.read_u16(deadline).await?;
                },
                PayloadKind::U64 => {
                    recv.read_u64(deadline).await?;
                },
                PayloadKind::LenPrefixed { ceiling } => {
                    recv.read_len_block(ceiling, deadline).await?;
                },
                PayloadKind::IdBlock | PayloadKind::Entry => {
                    return Err(IngestError::protocol(format!(
                        "unexpected {other:?} frame"
                    ))
                    .into());
                },
            }
        },
    }
    Ok(())
}
