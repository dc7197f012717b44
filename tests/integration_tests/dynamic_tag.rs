// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use ingest_link_rs::{
    cfg::config::Config, models::entry::Entry, server::tag_manager::MapTagManager,
};

use crate::integration_tests::{SECRET, spawn_pair_with};

#[tokio::test]
async fn negotiate_tag_binds_and_flows() -> Result<()> {
    let manager = Arc::new(MapTagManager::new());
    manager.bind("custom", 42)?;
    let (writer, reader) = spawn_pair_with(
        Config::with_secret(SECRET),
        Config::with_secret(SECRET),
        Arc::clone(&manager),
    )
    .await?;
    let mut entries = reader.take_entries().expect("entry stream");

    let id = writer.negotiate_tag("custom").await?;
    assert_eq!(id, 42);
    assert_eq!(writer.get_tag("custom"), Some(42));

    writer
        .write(Entry::new(id, Bytes::from_static(b"tagged payload")))
        .await?;
    writer.force_ack().await?;

    let got = entries.recv().await.expect("entry");
    assert_eq!(got.tag, 42);
    // The receiving application resolves the id back through the directory.
    assert_eq!(reader.tag_name(got.tag).as_deref(), Some("custom"));
    Ok(())
}

#[tokio::test]
async fn renegotiating_the_same_name_reuses_the_id() -> Result<()> {
    let (writer, _reader) = crate::integration_tests::spawn_pair().await?;
    let a = writer.negotiate_tag("repeat").await?;
    let b = writer.negotiate_tag("repeat").await?;
    assert_eq!(a, b);
    Ok(())
}

#[tokio::test]
async fn negotiation_drains_outstanding_entries_first() -> Result<()> {
    let (writer, reader) = crate::integration_tests::spawn_pair().await?;
    let mut entries = reader.take_entries().expect("entry stream");

    for i in 0..50u32 {
        writer
            .write(Entry::new(0, Bytes::from(format!("pre-{i}"))))
            .await?;
    }
    let id = writer.negotiate_tag("later").await?;
    // The force-ack inside negotiation drained every prior entry.
    assert_eq!(writer.outstanding().await, 0);

    writer
        .write(Entry::new(id, Bytes::from_static(b"post")))
        .await?;
    writer.force_ack().await?;

    for i in 0..50u32 {
        let got = entries.recv().await.expect("entry");
        assert_eq!(got.data, Bytes::from(format!("pre-{i}")));
    }
    let last = entries.recv().await.expect("post entry");
    assert_eq!(last.tag, id);
    Ok(())
}

#[tokio::test]
async fn invalid_names_fail_locally_without_poisoning_the_link() -> Result<()> {
    let (writer, reader) = crate::integration_tests::spawn_pair().await?;
    assert!(writer.negotiate_tag("not valid").await.is_err());

    // The failure was local; the connection is still hot.
    let mut entries = reader.take_entries().expect("entry stream");
    writer
        .write(Entry::new(0, Bytes::from_static(b"still alive")))
        .await?;
    writer.force_ack().await?;
    assert_eq!(
        entries.recv().await.expect("entry").data,
        Bytes::from_static(b"still alive")
    );
    Ok(())
}

#[tokio::test]
async fn oversized_entry_rejection_keeps_the_link_hot() -> Result<()> {
    // The size gate rejects at write() without any wire traffic; the error
    // kind is dedicated and the connection keeps working afterwards.
    let (writer, reader) = crate::integration_tests::spawn_pair().await?;
    let mut entries = reader.take_entries().expect("entry stream");

    let ev_bomb = Entry::new(0, Bytes::from_static(b"ok")).with_ev(
        ingest_link_rs::models::entry::evs::EnumeratedValue::new(
            "label",
            ingest_link_rs::models::entry::evs::EvValue::Binary(Bytes::from(vec![
                0u8;
                (256 << 10) + 1
            ])),
        ),
    );
    assert!(writer.write(ev_bomb).await.is_err());

    writer
        .write(Entry::new(0, Bytes::from_static(b"fine")))
        .await?;
    writer.force_ack().await?;
    assert_eq!(
        entries.recv().await.expect("entry").data,
        Bytes::from_static(b"fine")
    );
    assert!(writer.last_error().await.is_none());
    Ok(())
}
