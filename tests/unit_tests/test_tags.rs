// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::collections::HashMap;

use anyhow::Result;
use bytes::BytesMut;
use ingest_link_rs::{
    models::{
        auth::tags::{TagRequest, TagResponse},
        common::{MAX_TAG_LENGTH, validate_tag_name},
    },
    server::tag_manager::{MapTagManager, TagManager},
};

#[test]
fn tag_name_ruleset() {
    assert!(validate_tag_name("syslog").is_ok());
    assert!(validate_tag_name("app-01_prod").is_ok());
    assert!(validate_tag_name(&"x".repeat(MAX_TAG_LENGTH)).is_ok());

    assert!(validate_tag_name("").is_err());
    assert!(validate_tag_name(&"x".repeat(MAX_TAG_LENGTH + 1)).is_err());
    assert!(validate_tag_name("has space").is_err());
    assert!(validate_tag_name("tab\there").is_err());
    assert!(validate_tag_name("ctrl\u{1}").is_err());
    for c in "!@#$%^&*()=+<>,.:;`\"'{[}]|\\".chars() {
        assert!(validate_tag_name(&format!("bad{c}tag")).is_err(), "{c:?}");
    }
}

#[test]
fn request_roundtrip() -> Result<()> {
    let req = TagRequest::new(vec!["syslog".into(), "apache".into()])?;
    assert_eq!(req.count, 2);
    let mut buf = BytesMut::new();
    req.encode(&mut buf)?;
    let (decoded, consumed) = TagRequest::decode(&buf)?;
    assert_eq!(decoded, req);
    assert_eq!(consumed, buf.len());
    Ok(())
}

#[test]
fn request_rejects_bad_names() {
    assert!(TagRequest::new(vec!["ok".into(), "not ok".into()]).is_err());
}

#[test]
fn empty_request_is_valid() -> Result<()> {
    let req = TagRequest::new(Vec::new())?;
    assert_eq!(req.count, 0);
    Ok(())
}

#[test]
fn response_roundtrip_and_rejection_form() -> Result<()> {
    let mut tags = HashMap::new();
    tags.insert("syslog".to_string(), 0u16);
    tags.insert("apache".to_string(), 17u16);
    let resp = TagResponse::new(tags);
    assert_eq!(resp.count, 2);

    let mut buf = BytesMut::new();
    resp.encode(&mut buf)?;
    let (decoded, _) = TagResponse::decode(&buf)?;
    assert_eq!(decoded, resp);

    let rejected = TagResponse::rejected();
    assert_eq!(rejected.count, 0);
    assert!(rejected.tags.is_empty());
    Ok(())
}

#[test]
fn truncated_blocks_fail() -> Result<()> {
    let req = TagRequest::new(vec!["syslog".into()])?;
    let mut buf = BytesMut::new();
    req.encode(&mut buf)?;
    assert!(TagRequest::decode(&buf[..3]).is_err());
    assert!(TagRequest::decode(&buf[..buf.len() - 1]).is_err());
    Ok(())
}

#[test]
fn map_manager_assigns_stable_ids() -> Result<()> {
    let mgr = MapTagManager::new();
    let a = mgr.get_and_populate("syslog")?;
    let b = mgr.get_and_populate("apache")?;
    assert_ne!(a, b);
    // Same name always yields the same id within the connection.
    assert_eq!(mgr.get_and_populate("syslog")?, a);
    assert_eq!(mgr.lookup("apache"), Some(b));
    assert_eq!(mgr.name_of(b).as_deref(), Some("apache"));
    Ok(())
}

#[test]
fn map_manager_pre_binding() -> Result<()> {
    let mgr = MapTagManager::new();
    mgr.bind("custom", 42)?;
    assert_eq!(mgr.get_and_populate("custom")?, 42);
    assert!(mgr.bind("custom", 43).is_err());
    assert!(mgr.bind("bad name", 1).is_err());
    Ok(())
}

#[test]
fn map_manager_rejects_invalid_names() {
    let mgr = MapTagManager::new();
    assert!(mgr.get_and_populate("no good").is_err());
    assert!(mgr.get_and_populate("").is_err());
}
