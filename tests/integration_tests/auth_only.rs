// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use ingest_link_rs::{
    cfg::{config::Config, enums::Compression},
    errors::IngestError,
    models::entry::{Entry, Timestamp},
    server::tag_manager::MapTagManager,
};

use crate::integration_tests::{SECRET, spawn_pair, spawn_pair_with};

#[tokio::test]
async fn handshake_write_and_ack_one_entry() -> Result<()> {
    let (writer, reader) = spawn_pair().await?;
    let mut entries = reader.take_entries().expect("entry stream");

    let entry = Entry::new(0, Bytes::from_static(b"test"))
        .with_ts(Timestamp::now())
        .with_src("127.0.0.1".parse()?);
    writer.write(entry.clone()).await?;
    writer.force_ack().await?;
    assert_eq!(writer.outstanding().await, 0);

    let got = entries.recv().await.expect("one entry");
    assert_eq!(got.ts, entry.ts);
    assert_eq!(got.src, entry.src);
    assert_eq!(got.tag, 0);
    assert_eq!(got.data, Bytes::from_static(b"test"));
    assert!(got.evs.is_empty());

    writer.close().await?;
    reader.close();
    Ok(())
}

#[tokio::test]
async fn wrong_secret_is_rejected_as_auth_failure() -> Result<()> {
    let res = spawn_pair_with(
        Config::with_secret("not the right one"),
        Config::with_secret(SECRET),
        Arc::new(MapTagManager::new()),
    )
    .await;
    // The pair helper surfaces whichever side failed first; the writer
    // must see the dedicated authentication kind.
    let err = res.expect_err("mismatched secrets must fail");
    let kind = err.downcast_ref::<IngestError>();
    assert!(
        matches!(kind, Some(IngestError::NotAuthenticated)),
        "got {err:#}"
    );
    Ok(())
}

#[tokio::test]
async fn initial_tags_are_negotiated_in_the_handshake() -> Result<()> {
    let mut cfg = Config::with_secret(SECRET);
    cfg.session.initial_tags = vec!["syslog".into(), "apache".into()];
    let manager = Arc::new(MapTagManager::new());
    let (writer, reader) =
        spawn_pair_with(cfg, Config::with_secret(SECRET), Arc::clone(&manager))
            .await?;

    let syslog = writer.get_tag("syslog").expect("syslog bound");
    let apache = writer.get_tag("apache").expect("apache bound");
    assert_ne!(syslog, apache);
    assert_eq!(reader.tag_id("syslog"), Some(syslog));
    assert_eq!(manager.lookup("apache"), Some(apache));
    Ok(())
}

#[tokio::test]
async fn snappy_session_roundtrips_entries() -> Result<()> {
    let mut writer_cfg = Config::with_secret(SECRET);
    writer_cfg.session.compression = Compression::Snappy;
    let (writer, reader) = spawn_pair_with(
        writer_cfg,
        Config::with_secret(SECRET),
        Arc::new(MapTagManager::new()),
    )
    .await?;
    assert_eq!(reader.compression(), Compression::Snappy);

    let mut entries = reader.take_entries().expect("entry stream");
    for i in 0..100u32 {
        let data = format!("compressed entry {i} {}", "padding ".repeat(10));
        writer.write(Entry::new(5, Bytes::from(data))).await?;
    }
    writer.force_ack().await?;
    assert_eq!(writer.outstanding().await, 0);

    for i in 0..100u32 {
        let got = entries.recv().await.expect("entry");
        assert!(
            String::from_utf8_lossy(&got.data)
                .starts_with(&format!("compressed entry {i} "))
        );
    }
    Ok(())
}

#[tokio::test]
async fn default_source_is_stamped_when_missing() -> Result<()> {
    let mut cfg = Config::with_secret(SECRET);
    cfg.session.source = Some("10.1.2.3".parse()?);
    let (writer, reader) = spawn_pair_with(
        cfg,
        Config::with_secret(SECRET),
        Arc::new(MapTagManager::new()),
    )
    .await?;
    let mut entries = reader.take_entries().expect("entry stream");

    writer.write(Entry::new(0, Bytes::from_static(b"a"))).await?;
    writer
        .write(
            Entry::new(0, Bytes::from_static(b"b")).with_src("127.0.0.9".parse()?),
        )
        .await?;
    writer.force_ack().await?;

    let first = entries.recv().await.expect("first");
    assert_eq!(first.src, Some("10.1.2.3".parse()?));
    let second = entries.recv().await.expect("second");
    assert_eq!(second.src, Some("127.0.0.9".parse()?));
    Ok(())
}

#[tokio::test]
async fn order_is_preserved() -> Result<()> {
    let (writer, reader) = spawn_pair().await?;
    let mut entries = reader.take_entries().expect("entry stream");

    for i in 0..500u32 {
        writer
            .write(Entry::new(1, Bytes::from(i.to_le_bytes().to_vec())))
            .await?;
    }
    writer.force_ack().await?;

    for i in 0..500u32 {
        let got = entries.recv().await.expect("entry");
        assert_eq!(got.data.as_ref(), i.to_le_bytes());
    }
    Ok(())
}

#[tokio::test]
async fn writes_after_close_fail() -> Result<()> {
    let (writer, _reader) = spawn_pair().await?;
    writer.close().await?;
    let err = writer
        .write(Entry::new(0, Bytes::from_static(b"late")))
        .await
        .expect_err("closed writer must refuse entries");
    assert!(matches!(
        err.downcast_ref::<IngestError>(),
        Some(IngestError::Closed)
    ));
    Ok(())
}
