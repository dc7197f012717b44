// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, net::IpAddr, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::{
    cfg::{enums::Compression, logger::LogConfig},
    models::common::{MAX_OUTSTANDING_ENTRIES, MAX_TENANT_LENGTH, validate_tag_name},
};

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// Parameters that shape the wire session: secret, tenant, compression,
    /// pre-negotiated tags, default source.
    pub session: SessionConfig,
    /// Implementation/runtime parameters that live outside the protocol.
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Enumerated values attached to every outbound entry.
    #[serde(default)]
    pub attach: Vec<AttachPair>,
    /// Optional tracing setup; absent means the host application configured
    /// logging itself.
    #[serde(default)]
    pub logger: Option<LogConfig>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SessionConfig {
    #[serde(rename = "SharedSecret")]
    /// Secret shared with the indexer (mandatory).
    pub shared_secret: String,

    #[serde(default, rename = "Tenant")]
    /// Tenant namespace to authenticate into; empty selects the default.
    pub tenant: String,

    #[serde(default, rename = "Compression")]
    /// Compression offered during stream configuration.
    pub compression: Compression,

    #[serde(default, rename = "InitialTags")]
    /// Tags negotiated in the handshake batch; may be empty.
    pub initial_tags: Vec<String>,

    #[serde(default, rename = "Source")]
    /// Default source address stamped into entries that omit one.
    pub source: Option<IpAddr>,
}

impl SessionConfig {
    pub fn new(shared_secret: impl Into<String>) -> Self {
        Self {
            shared_secret: shared_secret.into(),
            tenant: String::new(),
            compression: Compression::None,
            initial_tags: Vec::new(),
            source: None,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RuntimeConfig {
    #[serde(default = "default_outstanding", rename = "OutstandingEntryCount")]
    /// Capacity of the unconfirmed-entry ring (1..=65535).
    pub outstanding_entry_count: usize,

    #[serde(default = "default_writer_buffer", rename = "WriterBufferSize")]
    /// Writer-side buffered stream size in bytes.
    pub writer_buffer_size: usize,

    #[serde(default = "default_reader_buffer", rename = "ReaderBufferSize")]
    /// Reader-side buffered stream size in bytes.
    pub reader_buffer_size: usize,

    #[serde(default = "default_timeout", rename = "Timeout", with = "serde_secs")]
    /// Reader dead-peer timeout; a silent link for this long reports EOF.
    pub timeout: Duration,

    #[serde(default = "default_api_version", rename = "ApiVersion")]
    /// Version advertised in server challenges. Left at the current version
    /// outside of compatibility testing.
    pub api_version: u16,
}

fn default_outstanding() -> usize {
    4096
}
fn default_writer_buffer() -> usize {
    1 << 20
}
fn default_reader_buffer() -> usize {
    4 << 20
}
fn default_timeout() -> Duration {
    Duration::from_secs(600)
}
fn default_api_version() -> u16 {
    crate::models::common::CURRENT_API_VERSION
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            outstanding_entry_count: default_outstanding(),
            writer_buffer_size: default_writer_buffer(),
            reader_buffer_size: default_reader_buffer(),
            timeout: default_timeout(),
            api_version: default_api_version(),
        }
    }
}

/// One `name = value` attachment; values understand the `$HOSTNAME`, `$UUID`,
/// `$NOW` and `$ENV_VAR` forms.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct AttachPair {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value")]
    pub value: String,
}

impl Config {
    /// Minimal programmatic config: a secret, everything else defaulted.
    pub fn with_secret(shared_secret: impl Into<String>) -> Self {
        Self {
            session: SessionConfig::new(shared_secret),
            runtime: RuntimeConfig::default(),
            attach: Vec::new(),
            logger: None,
        }
    }

    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: Config =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants and normalizes derived fields.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(
            !self.session.shared_secret.is_empty(),
            "SharedSecret must not be empty"
        );
        ensure!(
            self.session.tenant.len() <= MAX_TENANT_LENGTH,
            "Tenant must not exceed {MAX_TENANT_LENGTH} bytes"
        );
        for tag in &self.session.initial_tags {
            validate_tag_name(tag)?;
        }

        ensure!(
            (1..=MAX_OUTSTANDING_ENTRIES)
                .contains(&self.runtime.outstanding_entry_count),
            "OutstandingEntryCount must be in 1..={MAX_OUTSTANDING_ENTRIES}"
        );
        ensure!(
            self.runtime.writer_buffer_size >= 1 << 10,
            "WriterBufferSize must be at least 1 KiB"
        );
        ensure!(
            self.runtime.reader_buffer_size >= 1 << 10,
            "ReaderBufferSize must be at least 1 KiB"
        );

        // Attacher names share one namespace across all sections.
        let mut seen = std::collections::HashSet::new();
        for pair in &self.attach {
            validate_tag_name(&pair.name)?;
            ensure!(
                seen.insert(pair.name.as_str()),
                "duplicate attach name {:?}",
                pair.name
            );
        }
        Ok(())
    }
}

/// Serde helpers for representing `Duration` as a number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}
