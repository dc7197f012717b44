// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod config;
pub mod enums;
pub mod logger;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Resolves a config path relative to the working directory, honoring an
/// `INGEST_CONFIG` override so tests and deployments can relocate it.
pub fn resolve_config_path(rel: &str) -> Result<PathBuf> {
    let rel = std::env::var("INGEST_CONFIG").unwrap_or_else(|_| rel.to_string());
    let p = Path::new(&rel);

    let abs = if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir()
            .context("cannot get current working dir")?
            .join(p)
    };

    abs.canonicalize()
        .with_context(|| format!("failed to canonicalize path {abs:?}"))
}
