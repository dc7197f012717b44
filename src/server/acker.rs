// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Ack-writer task: batches CONFIRM_ENTRY frames to amortise writes, pushes
//! control confirms out immediately, and keeps the link warm with a PONG
//! every second of silence. On a transport error it records the connection
//! error, cancels the link and lets its channel drop.

use std::time::{Duration, Instant};

use bytes::{BufMut, BytesMut};
use tokio::{sync::mpsc, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    models::{
        command::IngestCommand,
        common::{KEEPALIVE_INTERVAL, WRITE_DEADLINE},
    },
    server::reader::ReaderShared,
    stream::SendStream,
};

/// Commands the decoder (and the throttle API) queue for the ack writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AckCommand {
    Confirm(u64),
    /// FORCE_ACK arrived: everything batched must become visible now.
    FlushMarker,
    Pong,
    ConfirmTag(u16),
    ErrorTag,
    ConfirmId,
    ConfirmApiVer,
    ConfirmIngestOk(bool),
    ConfirmIngesterState,
    Throttle(Duration),
}

/// Encodes one queued command into the outgoing batch. FORCE_ACK markers
/// carry no bytes of their own; they exist to force the batch out.
fn encode_ack(cmd: AckCommand, buf: &mut BytesMut) {
    match cmd {
        AckCommand::Confirm(id) => {
            buf.put_u32_le(IngestCommand::ConfirmEntry.code());
            buf.put_u64_le(id);
        },
        AckCommand::FlushMarker => {},
        AckCommand::Pong => buf.put_u32_le(IngestCommand::Pong.code()),
        AckCommand::ConfirmTag(id) => {
            buf.put_u32_le(IngestCommand::ConfirmTag.code());
            buf.put_u64_le(id as u64);
        },
        AckCommand::ErrorTag => buf.put_u32_le(IngestCommand::ErrorTag.code()),
        AckCommand::ConfirmId => buf.put_u32_le(IngestCommand::ConfirmId.code()),
        AckCommand::ConfirmApiVer => {
            buf.put_u32_le(IngestCommand::ConfirmApiVer.code());
        },
        AckCommand::ConfirmIngestOk(ok) => {
            buf.put_u32_le(IngestCommand::ConfirmIngestOk.code());
            buf.put_u64_le(ok as u64);
        },
        AckCommand::ConfirmIngesterState => {
            buf.put_u32_le(IngestCommand::ConfirmIngesterState.code());
        },
        AckCommand::Throttle(d) => {
            buf.put_u32_le(IngestCommand::Throttle.code());
            buf.put_u64_le(d.as_nanos().min(u64::MAX as u128) as u64);
        },
    }
}

pub(crate) async fn run_acker(
    mut send: SendStream,
    mut rx: mpsc::Receiver<AckCommand>,
    shared: std::sync::Arc<ReaderShared>,
    cancel: CancellationToken,
    batch_limit: usize,
) {
    let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_write = Instant::now();
    let mut buf = BytesMut::with_capacity(batch_limit.min(1 << 16));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("ack writer cancelled");
                break;
            },
            maybe = rx.recv() => {
                let Some(cmd) = maybe else {
                    let _ = send.flush(WRITE_DEADLINE).await;
                    break;
                };
                buf.clear();
                encode_ack(cmd, &mut buf);
                // Pack whatever else is already queued into the same write.
                while buf.len() < batch_limit {
                    match rx.try_recv() {
                        Ok(cmd) => encode_ack(cmd, &mut buf),
                        Err(_) => break,
                    }
                }
                // The channel is momentarily empty (or the batch is full)
                // at this point, so the batch goes out either way, which
                // also covers every immediate-flush frame kind.
                let res = async {
                    send.write(&buf, WRITE_DEADLINE).await?;
                    send.flush(WRITE_DEADLINE).await
                }.await;
                if let Err(e) = res {
                    warn!("ack writer transport error: {e:#}");
                    shared.record_error(&e);
                    cancel.cancel();
                    break;
                }
                last_write = Instant::now();
            },
            _ = ticker.tick() => {
                if last_write.elapsed() < KEEPALIVE_INTERVAL {
                    continue;
                }
                buf.clear();
                encode_ack(AckCommand::Pong, &mut buf);
                let res = async {
                    send.write(&buf, WRITE_DEADLINE).await?;
                    send.flush(WRITE_DEADLINE).await
                }.await;
                if let Err(e) = res {
                    warn!("keepalive write failed: {e:#}");
                    shared.record_error(&e);
                    cancel.cancel();
                    break;
                }
                last_write = Instant::now();
            },
        }
    }
    // Whatever is still queued is discarded with the channel; the decoder
    // unblocks as soon as the receiver drops.
    rx.close();
    while rx.try_recv().is_ok() {}
}
