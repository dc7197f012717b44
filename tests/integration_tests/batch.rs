// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use bytes::Bytes;
use ingest_link_rs::{
    cfg::config::Config, models::entry::Entry, server::tag_manager::MapTagManager,
};

use crate::integration_tests::{SECRET, spawn_pair_with};

const TOTAL: usize = 8192;
const OUTSTANDING: usize = 4096;

#[tokio::test]
async fn batch_of_8192_entries_with_4096_outstanding() -> Result<()> {
    let mut writer_cfg = Config::with_secret(SECRET);
    writer_cfg.runtime.outstanding_entry_count = OUTSTANDING;
    let mut reader_cfg = Config::with_secret(SECRET);
    reader_cfg.runtime.outstanding_entry_count = OUTSTANDING;

    let (writer, reader) = spawn_pair_with(
        writer_cfg,
        reader_cfg,
        Arc::new(MapTagManager::new()),
    )
    .await?;
    let mut entries = reader.take_entries().expect("entry stream");

    // Consume concurrently; the writer blocks on the ring whenever more
    // than the outstanding window is in flight.
    let consumer = tokio::spawn(async move {
        let mut count = 0usize;
        let mut bytes = 0usize;
        while count < TOTAL {
            match entries.recv().await {
                Some(e) => {
                    count += 1;
                    bytes += e.data.len();
                },
                None => break,
            }
        }
        (count, bytes)
    });

    let payload = Bytes::from(vec![0x5Au8; 128]);
    let batch: Vec<Entry> = (0..TOTAL)
        .map(|_| Entry::new(3, payload.clone()))
        .collect();
    let accepted = writer.write_batch(batch).await?;
    assert_eq!(accepted, TOTAL);

    writer.force_ack().await?;
    assert_eq!(writer.outstanding().await, 0);

    let (count, bytes) = tokio::time::timeout(Duration::from_secs(60), consumer)
        .await
        .expect("consumer finished in time")
        .expect("consumer task alive");
    assert_eq!(count, TOTAL);
    assert_eq!(bytes, TOTAL * 128);

    writer.close().await?;
    Ok(())
}

#[tokio::test]
async fn small_outstanding_window_still_drains() -> Result<()> {
    let mut writer_cfg = Config::with_secret(SECRET);
    writer_cfg.runtime.outstanding_entry_count = 8;
    let (writer, reader) = spawn_pair_with(
        writer_cfg,
        Config::with_secret(SECRET),
        Arc::new(MapTagManager::new()),
    )
    .await?;
    let mut entries = reader.take_entries().expect("entry stream");

    let consumer = tokio::spawn(async move {
        let mut count = 0usize;
        while count < 200 {
            if entries.recv().await.is_none() {
                break;
            }
            count += 1;
        }
        count
    });

    for i in 0..200u32 {
        writer
            .write(Entry::new(0, Bytes::from(format!("e{i}"))))
            .await?;
    }
    writer.force_ack().await?;

    let count = tokio::time::timeout(Duration::from_secs(30), consumer)
        .await
        .expect("consumer finished")
        .expect("consumer alive");
    assert_eq!(count, 200);
    Ok(())
}
