// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use bytes::Bytes;
use ingest_link_rs::{
    attach::Attacher,
    cfg::config::AttachPair,
    models::entry::{Entry, evs::EvValue},
};
use serial_test::serial;
use uuid::Uuid;

fn pair(name: &str, value: &str) -> AttachPair {
    AttachPair {
        name: name.to_string(),
        value: value.to_string(),
    }
}

#[test]
fn literal_values_are_attached() -> Result<()> {
    let mut attacher = Attacher::new(
        &[pair("env", "prod"), pair("dc", "eu-west")],
        Uuid::new_v4(),
    )?;
    let mut entry = Entry::new(0, Bytes::from_static(b"x"));
    attacher.attach(&mut entry);
    assert_eq!(entry.evs.len(), 2);
    assert_eq!(entry.evs[0].name, "env");
    assert_eq!(entry.evs[0].value, EvValue::String("prod".into()));
    assert_eq!(entry.evs[1].name, "dc");
    Ok(())
}

#[test]
fn uuid_resolves_to_the_connection_id() -> Result<()> {
    let id = Uuid::new_v4();
    let mut attacher = Attacher::new(&[pair("conn", "$UUID")], id)?;
    let mut entry = Entry::new(0, Bytes::from_static(b"x"));
    attacher.attach(&mut entry);
    assert_eq!(entry.evs[0].value, EvValue::String(id.to_string()));
    Ok(())
}

#[test]
fn hostname_is_resolved_once_and_nonempty() -> Result<()> {
    let mut attacher = Attacher::new(&[pair("host", "$HOSTNAME")], Uuid::new_v4())?;
    let mut a = Entry::new(0, Bytes::from_static(b"a"));
    let mut b = Entry::new(0, Bytes::from_static(b"b"));
    attacher.attach(&mut a);
    attacher.attach(&mut b);
    assert_eq!(a.evs[0].value, b.evs[0].value);
    match &a.evs[0].value {
        EvValue::String(h) => assert!(!h.is_empty()),
        other => panic!("expected a string hostname, got {other:?}"),
    }
    Ok(())
}

#[test]
fn now_is_stamped_per_entry() -> Result<()> {
    let mut attacher = Attacher::new(&[pair("seen", "$NOW")], Uuid::new_v4())?;
    let mut entry = Entry::new(0, Bytes::from_static(b"x"));
    attacher.attach(&mut entry);
    assert!(matches!(entry.evs[0].value, EvValue::Timestamp(_)));
    Ok(())
}

#[test]
#[serial]
fn env_values_are_cached() -> Result<()> {
    // SAFETY: guarded by #[serial]; no other test touches this variable.
    unsafe { std::env::set_var("INGEST_ATTACH_PROBE", "before") };
    let mut attacher =
        Attacher::new(&[pair("probe", "$INGEST_ATTACH_PROBE")], Uuid::new_v4())?;

    let mut entry = Entry::new(0, Bytes::from_static(b"x"));
    attacher.attach(&mut entry);
    assert_eq!(entry.evs[0].value, EvValue::String("before".into()));

    // The cache holds for five minutes; an immediate change is not seen.
    unsafe { std::env::set_var("INGEST_ATTACH_PROBE", "after") };
    let mut entry2 = Entry::new(0, Bytes::from_static(b"y"));
    attacher.attach(&mut entry2);
    assert_eq!(entry2.evs[0].value, EvValue::String("before".into()));

    unsafe { std::env::remove_var("INGEST_ATTACH_PROBE") };
    Ok(())
}

#[test]
fn duplicate_names_are_rejected() {
    let err = Attacher::new(
        &[pair("env", "prod"), pair("env", "staging")],
        Uuid::new_v4(),
    );
    assert!(err.is_err());
}

#[test]
fn invalid_names_are_rejected() {
    assert!(Attacher::new(&[pair("bad name", "x")], Uuid::new_v4()).is_err());
}
