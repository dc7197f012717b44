// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Stream configuration exchange: the client offers a compression mode, the
//! server validates and echoes it, then both sides swap their codecs and
//! drop whatever the old codec still buffered.

use anyhow::{Result, ensure};
use bytes::BytesMut;
use tracing::debug;

use crate::{
    cfg::enums::Compression,
    models::{
        common::{ACK_READ_DEADLINE, STREAM_CONFIG_CEILING, WRITE_DEADLINE},
        stream_config::StreamConfiguration,
    },
    stream::{RecvStream, SendStream},
};

pub async fn client_configure(
    send: &mut SendStream,
    recv: &mut RecvStream,
    compression: Compression,
) -> Result<Compression> {
    let offer = StreamConfiguration { compression };
    let mut buf = BytesMut::new();
    offer.encode(&mut buf)?;
    send.write(&buf, WRITE_DEADLINE).await?;
    send.flush(WRITE_DEADLINE).await?;

    let echo = recv
        .read_len_block(STREAM_CONFIG_CEILING, ACK_READ_DEADLINE)
        .await?;
    let echo = StreamConfiguration::decode_payload(&echo)?;
    ensure!(
        echo == offer,
        "server echoed {:?} for a {:?} stream configuration",
        echo.compression,
        offer.compression
    );

    apply(send, recv, compression)?;
    Ok(compression)
}

pub async fn server_configure(
    send: &mut SendStream,
    recv: &mut RecvStream,
) -> Result<Compression> {
    let offer = recv
        .read_len_block(STREAM_CONFIG_CEILING, ACK_READ_DEADLINE)
        .await?;
    let offer = StreamConfiguration::decode_payload(&offer)?;

    let mut buf = BytesMut::new();
    offer.encode(&mut buf)?;
    send.write(&buf, WRITE_DEADLINE).await?;
    send.flush(WRITE_DEADLINE).await?;

    apply(send, recv, offer.compression)?;
    Ok(offer.compression)
}

fn apply(
    send: &mut SendStream,
    recv: &mut RecvStream,
    compression: Compression,
) -> Result<()> {
    if compression == Compression::Snappy {
        debug!("enabling snappy stream compression");
        send.enable_snappy()?;
        recv.enable_snappy();
    }
    Ok(())
}
