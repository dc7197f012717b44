// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use anyhow::Result;

use crate::{
    errors::IngestError,
    models::{command::IngestCommand, common::ACK_READ_DEADLINE},
    stream::RecvStream,
};

/// One reader-to-writer frame, as the writer's ack-servicing loop sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AckFrame {
    ConfirmEntry(u64),
    Throttle(Duration),
    Pong,
    ConfirmTag(u16),
    ErrorTag,
    ConfirmId,
    ConfirmApiVer,
    ConfirmIngestOk(bool),
    ConfirmIngesterState,
}

/// Reads one reader-to-writer frame. The caller's deadline only bounds the
/// wait for the command code; once a frame has started, its payload is read
/// on the full ack deadline so a short wait can never shear a frame in two.
/// A writer-to-reader command arriving here means the peers disagree about
/// direction, which is unrecoverable.
pub(crate) async fn read_ack_frame(
    recv: &mut RecvStream,
    deadline: Duration,
) -> Result<AckFrame> {
    let code = recv.read_u32(deadline).await?;
    let body = deadline.max(ACK_READ_DEADLINE);
    let cmd = IngestCommand::from_code(code).ok_or_else(|| {
        IngestError::protocol(format!("unknown command 0x{code:08x} on ack path"))
    })?;
    Ok(match cmd {
        IngestCommand::ConfirmEntry => {
            AckFrame::ConfirmEntry(recv.read_u64(body).await?)
        },
        IngestCommand::Throttle => {
            AckFrame::Throttle(Duration::from_nanos(recv.read_u64(body).await?))
        },
        IngestCommand::Pong => AckFrame::Pong,
        IngestCommand::ConfirmTag => {
            // Only the low 16 bits name a tag.
            AckFrame::ConfirmTag(recv.read_u64(body).await? as u16)
        },
        IngestCommand::ErrorTag => AckFrame::ErrorTag,
        IngestCommand::ConfirmId => AckFrame::ConfirmId,
        IngestCommand::ConfirmApiVer => AckFrame::ConfirmApiVer,
        IngestCommand::ConfirmIngestOk => {
            AckFrame::ConfirmIngestOk(recv.read_u64(body).await? != 0)
        },
        IngestCommand::ConfirmIngesterState => AckFrame::ConfirmIngesterState,
        other => {
            return Err(IngestError::protocol(format!(
                "unexpected {other:?} on the ack path"
            ))
            .into());
        },
    })
}
