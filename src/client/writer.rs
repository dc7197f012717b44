// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Ingester-side pipeline: batch-buffered entry writes with ack-serviced
//! flush retries, force-ack draining, dynamic tag negotiation and the
//! version-gated control exchanges.
//!
//! One `IngestWriter` owns one transport. Every operation serialises on the
//! internal mutex, so entries reach the indexer in exactly the order the
//! `write` calls returned, and the unconfirmed ring is never shared.

use std::{
    net::IpAddr,
    time::{Duration, Instant},
};

use anyhow::Result;
use bytes::{BufMut, BytesMut};
use dashmap::DashMap;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::Mutex,
    time::timeout,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    attach::Attacher,
    cfg::config::Config,
    client::{
        common::{AckFrame, read_ack_frame},
        conf_buffer::ConfBuffer,
    },
    errors::IngestError,
    handlers::auth_client,
    models::{
        command::IngestCommand,
        common::{
            ACK_READ_DEADLINE, CLOSING_SERVICE_ACK_TIMEOUT, CONTROL_REPLY_DEADLINE,
            CURRENT_API_VERSION, MAX_THROTTLE_PAUSE, MINIMUM_ID_VERSION,
            MINIMUM_INGEST_OK_VERSION, MINIMUM_INGEST_STATE_VERSION,
            MINIMUM_TAG_RENEGOTIATE_VERSION, WRITE_DEADLINE, validate_tag_name,
        },
        entry::Entry,
        state::{IngesterInfo, IngesterState},
    },
    stream::{RecvStream, SendStream, split_stream},
};

const FLUSH_RETRY_LIMIT: u32 = 3;

/// Connection lifecycle after the handshake. Only `Hot` accepts entries;
/// the pre-hot stages live inside [`IngestWriter::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Hot,
    Closing,
    Closed,
}

struct WriterCore {
    send: SendStream,
    recv: RecvStream,
    conf: ConfBuffer,
    attacher: Option<Attacher>,
    next_send_id: u64,
    peer_version: u16,
    state: LinkState,
    fatal: Option<IngestError>,
    default_src: Option<IpAddr>,
}

pub struct IngestWriter {
    core: Mutex<WriterCore>,
    /// Negotiated name→id bindings, readable without taking the core lock.
    tags: DashMap<String, u16>,
    conn_id: Uuid,
}

impl std::fmt::Debug for IngestWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestWriter")
            .field("conn_id", &self.conn_id)
            .finish_non_exhaustive()
    }
}

fn is_timeout_err(e: &anyhow::Error) -> bool {
    e.downcast_ref::<IngestError>()
        .is_some_and(IngestError::is_timeout)
}

impl IngestWriter {
    /// Dials the handshake over any duplex byte stream and returns a HOT
    /// writer. The stream must be reliable and in-order; TCP, TLS and
    /// in-memory pipes all qualify.
    pub async fn connect<S>(stream: S, mut cfg: Config) -> Result<Self>
    where S: AsyncRead + AsyncWrite + Send + Unpin + 'static {
        cfg.validate_and_normalize()?;
        let (r, w) = split_stream(stream);
        let mut send = SendStream::new(w, cfg.runtime.writer_buffer_size);
        let mut recv = RecvStream::new(r, cfg.runtime.writer_buffer_size);

        let outcome = auth_client::authenticate(&mut send, &mut recv, &cfg).await?;

        let conn_id = Uuid::new_v4();
        let attacher = if cfg.attach.is_empty() {
            None
        } else {
            Some(Attacher::new(&cfg.attach, conn_id)?)
        };
        let tags = DashMap::new();
        for (name, id) in outcome.tags {
            tags.insert(name, id);
        }
        let conf = ConfBuffer::new(cfg.runtime.outstanding_entry_count.max(2))?;

        Ok(Self {
            core: Mutex::new(WriterCore {
                send,
                recv,
                conf,
                attacher,
                next_send_id: 1,
                peer_version: outcome.peer_version,
                state: LinkState::Hot,
                fatal: None,
                default_src: cfg.session.source,
            }),
            tags,
            conn_id,
        })
    }

    /// Hands an entry to the transport; the ack arrives later and frees its
    /// slot in the unconfirmed ring.
    pub async fn write(&self, entry: Entry) -> Result<()> {
        let mut core = self.core.lock().await;
        core.guard_hot()?;
        match core.buffer_entry(entry).await {
            Ok(_) => Ok(()),
            Err(e) => Err(core.record(e)),
        }
    }

    /// Writes a batch without flushing between entries. Returns how many
    /// entries were accepted; a per-entry rejection stops the batch early.
    pub async fn write_batch(&self, entries: Vec<Entry>) -> Result<usize> {
        let mut core = self.core.lock().await;
        core.guard_hot()?;
        let mut accepted = 0;
        for entry in entries {
            match core.buffer_entry(entry).await {
                Ok(_) => accepted += 1,
                Err(e) => {
                    if e.downcast_ref::<IngestError>().is_some_and(|k| {
                        matches!(
                            k,
                            IngestError::OversizedEntry(_)
                                | IngestError::InvalidEntry(_)
                        )
                    }) {
                        warn!("stopping batch at {accepted} entries: {e:#}");
                        return Ok(accepted);
                    }
                    return Err(core.record(e));
                },
            }
        }
        Ok(accepted)
    }

    /// Like [`IngestWriter::write`], then flushes immediately.
    pub async fn write_sync(&self, entry: Entry) -> Result<()> {
        let mut core = self.core.lock().await;
        core.guard_hot()?;
        let res = async {
            core.buffer_entry(entry).await?;
            core.flush_with_retry().await
        }
        .await;
        res.map_err(|e| core.record(e))
    }

    /// Flushes and blocks until every outstanding entry is confirmed.
    pub async fn force_ack(&self) -> Result<()> {
        let mut core = self.core.lock().await;
        core.guard_hot()?;
        let res = core.force_ack_core().await;
        res.map_err(|e| core.record(e))
    }

    /// Round-trips a PING, servicing any acks that arrive first.
    pub async fn ping(&self) -> Result<()> {
        let mut core = self.core.lock().await;
        core.guard_hot()?;
        let res = async {
            core.push_bytes(&IngestCommand::Ping.code().to_le_bytes())
                .await?;
            core.flush_with_retry().await?;
            loop {
                match read_ack_frame(&mut core.recv, ACK_READ_DEADLINE).await? {
                    AckFrame::Pong => return Ok(()),
                    frame => core.apply(frame).await?,
                }
            }
        }
        .await;
        res.map_err(|e| core.record(e))
    }

    /// Binds a new tag mid-connection. Outstanding entries are drained
    /// first; unrelated acks racing the reply are serviced, not dropped.
    pub async fn negotiate_tag(&self, name: &str) -> Result<u16> {
        validate_tag_name(name)?;
        if let Some(id) = self.tags.get(name) {
            return Ok(*id);
        }
        let mut core = self.core.lock().await;
        core.guard_hot()?;
        if core.peer_version < MINIMUM_TAG_RENEGOTIATE_VERSION {
            return Err(IngestError::TagNegotiation(format!(
                "peer version {} cannot renegotiate tags",
                core.peer_version
            ))
            .into());
        }
        let res = core.negotiate_tag_core(name).await;
        let id = res.map_err(|e| core.record(e))?;
        self.tags.insert(name.to_string(), id);
        Ok(id)
    }

    /// Reports the ingester identity. A silent success on peers older than
    /// the ID gate.
    pub async fn identify_ingester(&self, info: &IngesterInfo) -> Result<()> {
        let mut core = self.core.lock().await;
        core.guard_hot()?;
        if core.peer_version < MINIMUM_ID_VERSION {
            return Ok(());
        }
        let mut frame = BytesMut::with_capacity(
            4 + 12 + info.name.len() + info.version.len() + 36,
        );
        frame.put_u32_le(IngestCommand::Id.code());
        for field in [
            info.name.as_bytes(),
            info.version.as_bytes(),
            info.uuid.to_string().as_bytes(),
        ] {
            frame.put_u32_le(field.len() as u32);
            frame.put_slice(field);
        }
        let res = core
            .control_exchange(&frame, |f| matches!(f, AckFrame::ConfirmId))
            .await;
        res.map(|_| ()).map_err(|e| core.record(e))
    }

    /// Tells the indexer which protocol version we speak.
    pub async fn send_api_version(&self) -> Result<()> {
        let mut core = self.core.lock().await;
        core.guard_hot()?;
        let mut frame = BytesMut::with_capacity(6);
        frame.put_u32_le(IngestCommand::ApiVer.code());
        frame.put_u16_le(CURRENT_API_VERSION);
        let res = core
            .control_exchange(&frame, |f| matches!(f, AckFrame::ConfirmApiVer))
            .await;
        res.map(|_| ()).map_err(|e| core.record(e))
    }

    /// Asks whether the indexer is accepting ingest. Old peers answer yes
    /// by construction.
    pub async fn ingest_ok(&self) -> Result<bool> {
        let mut core = self.core.lock().await;
        core.guard_hot()?;
        if core.peer_version < MINIMUM_INGEST_OK_VERSION {
            return Ok(true);
        }
        let frame = IngestCommand::IngestOk.code().to_le_bytes();
        let res = core
            .control_exchange(&frame, |f| matches!(f, AckFrame::ConfirmIngestOk(_)))
            .await;
        match res {
            Ok(AckFrame::ConfirmIngestOk(ok)) => Ok(ok),
            Ok(other) => Err(IngestError::protocol(format!(
                "unexpected {other:?} reply to INGEST_OK"
            ))
            .into()),
            Err(e) => Err(core.record(e)),
        }
    }

    /// Ships a state report. A silent success on peers older than the
    /// ingester-state gate.
    pub async fn send_ingester_state(&self, state: &IngesterState) -> Result<()> {
        let mut core = self.core.lock().await;
        core.guard_hot()?;
        if core.peer_version < MINIMUM_INGEST_STATE_VERSION {
            return Ok(());
        }
        let mut frame = BytesMut::new();
        frame.put_u32_le(IngestCommand::IngesterState.code());
        state.encode(&mut frame)?;
        let res = core
            .control_exchange(&frame, |f| matches!(f, AckFrame::ConfirmIngesterState))
            .await;
        res.map(|_| ()).map_err(|e| core.record(e))
    }

    /// Orderly shutdown: drain outstanding acks for at most
    /// [`CLOSING_SERVICE_ACK_TIMEOUT`], then close the transport. Pending
    /// acks past the deadline are reported lost.
    pub async fn close(&self) -> Result<()> {
        let mut core = self.core.lock().await;
        if core.state == LinkState::Closed {
            return Ok(());
        }
        core.state = LinkState::Closing;
        match timeout(CLOSING_SERVICE_ACK_TIMEOUT, core.force_ack_core()).await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => warn!("close-time drain failed: {e:#}"),
            Err(_) => {},
        }
        let lost = core.conf.drain();
        if !lost.is_empty() {
            warn!(pending = lost.len(), "pending acks lost at close");
        }
        if let Err(e) = core.send.shutdown(CLOSING_SERVICE_ACK_TIMEOUT).await {
            debug!("transport shutdown: {e:#}");
        }
        core.state = LinkState::Closed;
        Ok(())
    }

    /// Tag binding previously negotiated on this connection, if any.
    pub fn get_tag(&self, name: &str) -> Option<u16> {
        self.tags.get(name).map(|id| *id)
    }

    /// Connection id, also the attacher's `$UUID` source.
    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    pub async fn peer_version(&self) -> u16 {
        self.core.lock().await.peer_version
    }

    /// Entries sent but not yet confirmed.
    pub async fn outstanding(&self) -> usize {
        self.core.lock().await.conf.count()
    }

    /// First fatal error recorded on this connection, if any.
    pub async fn last_error(&self) -> Option<IngestError> {
        self.core.lock().await.fatal.clone()
    }
}

impl WriterCore {
    fn guard_hot(&self) -> Result<()> {
        if let Some(e) = &self.fatal {
            return Err(e.clone().into());
        }
        match self.state {
            LinkState::Hot => Ok(()),
            _ => Err(IngestError::Closed.into()),
        }
    }

    /// Stores the first fatal error; recoverable kinds (timeouts, oversized
    /// entries, tag refusals) pass through untouched.
    fn record(&mut self, err: anyhow::Error) -> anyhow::Error {
        let recoverable = err.downcast_ref::<IngestError>().is_some_and(|e| {
            matches!(
                e,
                IngestError::Timeout { .. }
                    | IngestError::OversizedEntry(_)
                    | IngestError::InvalidEntry(_)
                    | IngestError::TagNegotiation(_)
            )
        });
        if !recoverable && self.fatal.is_none() {
            self.fatal = Some(match err.downcast_ref::<IngestError>() {
                Some(e) => e.clone(),
                None => IngestError::Protocol(format!("{err:#}")),
            });
        }
        err
    }

    /// Appends raw frame bytes, flushing (with ack-serviced retries)
    /// whenever the send buffer fills mid-way.
    async fn push_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let mut off = 0;
        while off < bytes.len() {
            off += self.send.append(&bytes[off..]);
            if self.send.is_full() {
                self.flush_with_retry().await?;
            }
        }
        Ok(())
    }

    async fn buffer_entry(&mut self, mut entry: Entry) -> Result<u64> {
        if let Some(att) = &mut self.attacher {
            att.attach(&mut entry);
        }
        if entry.src.is_none() {
            entry.src = self.default_src;
        }
        entry.validate()?;

        if self.conf.full() {
            // Push buffered entries out so their acks can free slots.
            self.flush_with_retry().await?;
            while self.conf.full() {
                self.service_ack(ACK_READ_DEADLINE).await?;
            }
        }

        let send_id = self.next_send_id;
        self.next_send_id += 1;
        let mut frame = BytesMut::with_capacity(64 + entry.data.len());
        entry.encode_frame(send_id, &mut frame)?;
        self.push_bytes(&frame).await?;
        self.conf.add(send_id, entry)?;
        Ok(send_id)
    }

    /// A stalled flush usually means the peer stopped pulling because its
    /// ack path backed up; servicing acks un-wedges the link before the
    /// retry. Repeated stalls escalate.
    async fn flush_with_retry(&mut self) -> Result<()> {
        let mut stalls = 0;
        loop {
            match self.send.flush(WRITE_DEADLINE).await {
                Ok(()) => return Ok(()),
                Err(e) if is_timeout_err(&e) => {
                    stalls += 1;
                    if stalls >= FLUSH_RETRY_LIMIT {
                        return Err(IngestError::protocol(
                            "flush stalled past the retry limit",
                        )
                        .into());
                    }
                    self.drain_ready_acks().await?;
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Consumes acks that are already in flight without waiting for more.
    async fn drain_ready_acks(&mut self) -> Result<()> {
        loop {
            match read_ack_frame(&mut self.recv, Duration::from_millis(50)).await {
                Ok(frame) => self.apply(frame).await?,
                Err(e) if is_timeout_err(&e) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    async fn service_ack(&mut self, deadline: Duration) -> Result<()> {
        let frame = read_ack_frame(&mut self.recv, deadline).await?;
        self.apply(frame).await
    }

    async fn apply(&mut self, frame: AckFrame) -> Result<()> {
        match frame {
            AckFrame::ConfirmEntry(id) => {
                // Unknown ids are inert; duplicated acks after a resend.
                if self.conf.confirm(id).is_none() {
                    debug!(id, "ack for unknown send id");
                }
            },
            AckFrame::Throttle(d) => self.pause(d).await?,
            AckFrame::Pong => {},
            other => debug!(?other, "stray control reply on the ack path"),
        }
        Ok(())
    }

    /// Reacts to THROTTLE: hold the lock and block on the ack path until
    /// the capped pause elapses, which pauses every outbound write too.
    async fn pause(&mut self, want: Duration) -> Result<()> {
        let limit = want.min(MAX_THROTTLE_PAUSE);
        debug!(?want, ?limit, "throttled by indexer");
        let start = Instant::now();
        loop {
            let left = limit.saturating_sub(start.elapsed());
            if left.is_zero() {
                return Ok(());
            }
            match read_ack_frame(&mut self.recv, left).await {
                Ok(AckFrame::ConfirmEntry(id)) => {
                    self.conf.confirm(id);
                },
                Ok(AckFrame::Throttle(_)) | Ok(AckFrame::Pong) => {},
                Ok(other) => debug!(?other, "stray control reply while throttled"),
                Err(e) if is_timeout_err(&e) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    async fn force_ack_core(&mut self) -> Result<()> {
        self.push_bytes(&IngestCommand::ForceAck.code().to_le_bytes())
            .await?;
        self.flush_with_retry().await?;
        while !self.conf.is_empty() {
            self.service_ack(ACK_READ_DEADLINE).await?;
        }
        Ok(())
    }

    async fn negotiate_tag_core(&mut self, name: &str) -> Result<u16> {
        self.force_ack_core().await?;
        let mut frame = BytesMut::with_capacity(8 + name.len());
        frame.put_u32_le(IngestCommand::Tag.code());
        frame.put_u32_le(name.len() as u32);
        frame.put_slice(name.as_bytes());
        self.push_bytes(&frame).await?;
        self.flush_with_retry().await?;
        loop {
            match read_ack_frame(&mut self.recv, ACK_READ_DEADLINE).await? {
                AckFrame::ConfirmTag(id) => return Ok(id),
                AckFrame::ErrorTag => {
                    return Err(IngestError::TagNegotiation(format!(
                        "indexer refused tag {name:?}"
                    ))
                    .into());
                },
                AckFrame::ConfirmEntry(id) => {
                    self.conf.confirm(id);
                },
                AckFrame::Pong => {},
                other => debug!(?other, "stray reply during tag negotiation"),
            }
        }
    }

    /// Serialised control exchange: drain outstanding entries, send the
    /// command, then read replies on a short per-read deadline, ignoring
    /// keepalive PONGs, until `want` matches.
    async fn control_exchange(
        &mut self,
        frame: &[u8],
        want: fn(&AckFrame) -> bool,
    ) -> Result<AckFrame> {
        self.force_ack_core().await?;
        self.push_bytes(frame).await?;
        self.flush_with_retry().await?;
        loop {
            let reply = read_ack_frame(&mut self.recv, CONTROL_REPLY_DEADLINE).await?;
            if want(&reply) {
                return Ok(reply);
            }
            match reply {
                AckFrame::Pong => {},
                AckFrame::ConfirmEntry(id) => {
                    self.conf.confirm(id);
                },
                other => debug!(?other, "stray reply during control exchange"),
            }
        }
    }
}
