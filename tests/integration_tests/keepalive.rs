// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use bytes::Bytes;
use ingest_link_rs::{
    cfg::config::Config, models::entry::Entry, server::tag_manager::MapTagManager,
};

use crate::integration_tests::{SECRET, spawn_pair, spawn_pair_with};

#[tokio::test]
async fn ping_round_trips() -> Result<()> {
    let (writer, _reader) = spawn_pair().await?;
    writer.ping().await?;
    writer.ping().await?;
    Ok(())
}

#[tokio::test]
async fn keepalive_pongs_do_not_confuse_the_writer() -> Result<()> {
    let (writer, reader) = spawn_pair().await?;
    let mut entries = reader.take_entries().expect("entry stream");

    // Idle long enough for several unsolicited keepalive PONGs to queue up
    // on the writer's ack path.
    tokio::time::sleep(Duration::from_millis(2600)).await;

    writer.ping().await?;
    writer
        .write_sync(Entry::new(0, Bytes::from_static(b"after idle")))
        .await?;
    writer.force_ack().await?;
    assert_eq!(
        entries.recv().await.expect("entry").data,
        Bytes::from_static(b"after idle")
    );
    Ok(())
}

#[tokio::test]
async fn silent_peer_times_out_as_eof() -> Result<()> {
    let mut reader_cfg = Config::with_secret(SECRET);
    reader_cfg.runtime.timeout = Duration::from_secs(2);
    let (writer, reader) = spawn_pair_with(
        Config::with_secret(SECRET),
        reader_cfg,
        Arc::new(MapTagManager::new()),
    )
    .await?;

    // The writer never sends a frame; past the timeout the reader declares
    // the peer dead.
    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert!(reader.is_closed());
    let err = reader.last_error().expect("an error was recorded");
    assert!(
        err.to_string().to_lowercase().contains("eof")
            || err.to_string().to_lowercase().contains("end of file"),
        "unexpected error: {err}"
    );
    drop(writer);
    Ok(())
}

#[tokio::test]
async fn traffic_resets_the_dead_peer_timer() -> Result<()> {
    let mut reader_cfg = Config::with_secret(SECRET);
    reader_cfg.runtime.timeout = Duration::from_secs(2);
    let (writer, reader) = spawn_pair_with(
        Config::with_secret(SECRET),
        reader_cfg,
        Arc::new(MapTagManager::new()),
    )
    .await?;

    // Pings every second keep the link alive well past the timeout.
    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(900)).await;
        writer.ping().await?;
    }
    assert!(!reader.is_closed());
    Ok(())
}
