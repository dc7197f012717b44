// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::collections::HashMap;

use anyhow::Result;
use bytes::BytesMut;
use ingest_link_rs::models::state::IngesterState;

fn sample_state() -> IngesterState {
    let mut children = HashMap::new();
    children.insert(
        "relay-a".to_string(),
        IngesterState {
            name: "relay-a".into(),
            entries: 10,
            bytes: 1024,
            ..IngesterState::default()
        },
    );
    IngesterState {
        name: "edge-1".into(),
        version: "0.1.0".into(),
        uuid: "2b1e8a7e-1111-4222-8333-444455556666".into(),
        uptime_ms: 120_000,
        entries: 400,
        bytes: 1 << 20,
        cache_size: 12,
        last_seen: None,
        children,
    }
}

#[test]
fn json_block_roundtrips() -> Result<()> {
    let state = sample_state();
    let mut buf = BytesMut::new();
    state.encode(&mut buf)?;
    let (decoded, consumed) = IngesterState::decode(&buf)?;
    assert_eq!(decoded, state);
    assert_eq!(consumed, buf.len());
    Ok(())
}

#[test]
fn unknown_fields_are_tolerated() -> Result<()> {
    // Forward compatibility: newer ingesters may report more fields.
    let json = br#"{"name":"x","entries":3,"brand_new_field":true}"#;
    let mut buf = BytesMut::new();
    buf.extend_from_slice(&(json.len() as u32).to_le_bytes());
    buf.extend_from_slice(json);
    let (decoded, _) = IngesterState::decode(&buf)?;
    assert_eq!(decoded.name, "x");
    assert_eq!(decoded.entries, 3);
    Ok(())
}

#[test]
fn clone_is_a_deep_copy() {
    let original = sample_state();
    let mut copy = original.clone();
    copy.entries = 999;
    copy.children
        .get_mut("relay-a")
        .expect("child present")
        .bytes = 0;
    copy.children
        .insert("relay-b".to_string(), IngesterState::default());

    // The source is untouched, children included.
    assert_eq!(original.entries, 400);
    assert_eq!(original.children["relay-a"].bytes, 1024);
    assert_eq!(original.children.len(), 1);
}

#[test]
fn nested_children_survive_roundtrip() -> Result<()> {
    let mut grandchild = IngesterState::default();
    grandchild.name = "leaf".into();
    let mut child = IngesterState::default();
    child.children.insert("leaf".into(), grandchild);
    let mut root = IngesterState::default();
    root.children.insert("mid".into(), child);

    let mut buf = BytesMut::new();
    root.encode(&mut buf)?;
    let (decoded, _) = IngesterState::decode(&buf)?;
    assert_eq!(decoded.children["mid"].children["leaf"].name, "leaf");
    Ok(())
}
