// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use anyhow::{Context, Result};
use ingest_link_rs::cfg::{config::Config, enums::Compression, resolve_config_path};

#[test]
fn load_and_validate_sample_config() -> Result<()> {
    let cfg = resolve_config_path("tests/config.yaml")
        .and_then(Config::load_from_file)
        .context("failed to resolve or load config")?;

    assert_eq!(cfg.session.shared_secret, "passwords and stuff");
    assert!(cfg.session.tenant.is_empty());
    assert_eq!(cfg.session.compression, Compression::None);
    assert_eq!(cfg.session.initial_tags, vec!["syslog", "apache"]);
    assert_eq!(cfg.session.source, Some("10.0.0.1".parse()?));

    assert_eq!(cfg.runtime.outstanding_entry_count, 1024);
    assert_eq!(cfg.runtime.writer_buffer_size, 256 << 10);
    assert_eq!(cfg.runtime.reader_buffer_size, 1 << 20);
    assert_eq!(cfg.runtime.timeout, Duration::from_secs(120));
    assert_eq!(cfg.runtime.api_version, 8);

    assert_eq!(cfg.attach.len(), 2);
    assert_eq!(cfg.attach[0].name, "environment");
    Ok(())
}

#[test]
fn defaults_fill_the_runtime_section() -> Result<()> {
    let cfg = Config::with_secret("s3cret");
    assert_eq!(cfg.runtime.outstanding_entry_count, 4096);
    assert_eq!(cfg.runtime.writer_buffer_size, 1 << 20);
    assert_eq!(cfg.runtime.reader_buffer_size, 4 << 20);
    assert_eq!(cfg.runtime.timeout, Duration::from_secs(600));
    Ok(())
}

#[test]
fn validation_rejects_bad_values() {
    let mut cfg = Config::with_secret("");
    assert!(cfg.validate_and_normalize().is_err());

    let mut cfg = Config::with_secret("ok");
    cfg.runtime.outstanding_entry_count = 0;
    assert!(cfg.validate_and_normalize().is_err());

    let mut cfg = Config::with_secret("ok");
    cfg.runtime.outstanding_entry_count = 70_000;
    assert!(cfg.validate_and_normalize().is_err());

    let mut cfg = Config::with_secret("ok");
    cfg.runtime.writer_buffer_size = 16;
    assert!(cfg.validate_and_normalize().is_err());

    let mut cfg = Config::with_secret("ok");
    cfg.session.tenant = "t".repeat(513);
    assert!(cfg.validate_and_normalize().is_err());

    let mut cfg = Config::with_secret("ok");
    cfg.session.initial_tags = vec!["not a tag".into()];
    assert!(cfg.validate_and_normalize().is_err());

    let mut cfg = Config::with_secret("ok");
    cfg.attach = vec![
        ingest_link_rs::cfg::config::AttachPair {
            name: "dup".into(),
            value: "a".into(),
        },
        ingest_link_rs::cfg::config::AttachPair {
            name: "dup".into(),
            value: "b".into(),
        },
    ];
    assert!(cfg.validate_and_normalize().is_err());
}
