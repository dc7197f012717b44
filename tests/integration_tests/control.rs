// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use ingest_link_rs::{
    cfg::config::Config,
    models::state::{IngesterInfo, IngesterState},
    server::tag_manager::MapTagManager,
};
use uuid::Uuid;

use crate::integration_tests::{SECRET, spawn_pair, spawn_pair_with};

fn sample_state() -> IngesterState {
    let mut children = HashMap::new();
    children.insert("child".to_string(), IngesterState {
        name: "child".into(),
        entries: 5,
        ..IngesterState::default()
    });
    IngesterState {
        name: "edge".into(),
        version: "1.2.3".into(),
        uptime_ms: 60_000,
        entries: 1000,
        bytes: 1 << 22,
        children,
        ..IngesterState::default()
    }
}

#[tokio::test]
async fn identify_and_api_version_roundtrip() -> Result<()> {
    let (writer, reader) = spawn_pair().await?;
    let info = IngesterInfo {
        name: "kinesis-ingester".into(),
        version: "4.1.0".into(),
        uuid: Uuid::new_v4(),
    };
    writer.identify_ingester(&info).await?;
    writer.send_api_version().await?;

    assert_eq!(reader.get_ingester_info(), Some(info));
    assert_eq!(reader.get_api_version(), 8);
    Ok(())
}

#[tokio::test]
async fn ingest_ok_roundtrip() -> Result<()> {
    let (writer, _reader) = spawn_pair().await?;
    assert!(writer.ingest_ok().await?);
    Ok(())
}

#[tokio::test]
async fn ingester_state_is_stored_stamped_and_deep_copied() -> Result<()> {
    let (writer, reader) = spawn_pair().await?;
    let fired = Arc::new(AtomicUsize::new(0));
    {
        let fired = Arc::clone(&fired);
        reader.add_state_callback(Arc::new(move |state: &IngesterState| {
            assert_eq!(state.name, "edge");
            fired.fetch_add(1, Ordering::SeqCst);
        }));
    }

    writer.send_ingester_state(&sample_state()).await?;

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    let mut copy = reader.get_ingester_state().expect("state stored");
    assert_eq!(copy.entries, 1000);
    assert!(copy.last_seen.is_some(), "reader stamps last_seen");

    // Mutating the returned copy must not leak into the reader.
    copy.entries = 0;
    copy.children.get_mut("child").expect("child").entries = 99;
    let again = reader.get_ingester_state().expect("state still stored");
    assert_eq!(again.entries, 1000);
    assert_eq!(again.children["child"].entries, 5);
    Ok(())
}

#[tokio::test]
async fn gated_operations_are_silent_noops_on_old_peers() -> Result<()> {
    let mut reader_cfg = Config::with_secret(SECRET);
    // Version 2: renegotiation exists, everything newer is gated off.
    reader_cfg.runtime.api_version = 2;
    let (writer, reader) = spawn_pair_with(
        Config::with_secret(SECRET),
        reader_cfg,
        Arc::new(MapTagManager::new()),
    )
    .await?;
    assert_eq!(writer.peer_version().await, 2);

    let info = IngesterInfo {
        name: "old-peer-probe".into(),
        version: "0.0.1".into(),
        uuid: Uuid::new_v4(),
    };
    // All gated calls succeed without putting anything on the wire.
    writer.identify_ingester(&info).await?;
    assert!(writer.ingest_ok().await?);
    writer.send_ingester_state(&sample_state()).await?;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(reader.get_ingester_info(), None);
    assert!(reader.get_ingester_state().is_none());
    Ok(())
}

#[tokio::test]
async fn multiple_state_reports_keep_the_latest() -> Result<()> {
    let (writer, reader) = spawn_pair().await?;
    let mut first = sample_state();
    first.entries = 1;
    writer.send_ingester_state(&first).await?;
    let mut second = sample_state();
    second.entries = 2;
    writer.send_ingester_state(&second).await?;

    assert_eq!(reader.get_ingester_state().expect("stored").entries, 2);
    Ok(())
}
