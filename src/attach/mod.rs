// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Attacher: injects a fixed set of enumerated values into every outbound
//! entry. Values may be literals or the dynamic forms `$HOSTNAME` (resolved
//! once per process), `$UUID` (the connection id), `$NOW` (per entry) and
//! `$VAR` (any other `$`-name, read from the environment at most every five
//! minutes).

use std::time::{Duration, Instant};

use anyhow::{Result, ensure};
use once_cell::sync::Lazy;
use uuid::Uuid;

use crate::{
    cfg::config::AttachPair,
    models::{
        common::validate_tag_name,
        entry::{
            Entry, Timestamp,
            evs::{EnumeratedValue, EvValue},
        },
    },
};

pub const ENV_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

static HOSTNAME: Lazy<String> = Lazy::new(|| {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
});

#[derive(Debug)]
enum AttachSource {
    Literal(String),
    Now,
    Env {
        var: String,
        cached: String,
        refreshed: Instant,
    },
}

#[derive(Debug)]
struct AttachItem {
    name: String,
    source: AttachSource,
}

#[derive(Debug, Default)]
pub struct Attacher {
    items: Vec<AttachItem>,
}

impl Attacher {
    /// Builds an attacher from configured pairs. Names share one namespace;
    /// a duplicate is a configuration error.
    pub fn new(pairs: &[AttachPair], conn_id: Uuid) -> Result<Self> {
        let mut items = Vec::with_capacity(pairs.len());
        for pair in pairs {
            validate_tag_name(&pair.name)?;
            ensure!(
                !items.iter().any(|i: &AttachItem| i.name == pair.name),
                "duplicate attach name {:?}",
                pair.name
            );
            let source = match pair.value.as_str() {
                "$HOSTNAME" => AttachSource::Literal(HOSTNAME.clone()),
                "$UUID" => AttachSource::Literal(conn_id.to_string()),
                "$NOW" => AttachSource::Now,
                v => match v.strip_prefix('$') {
                    Some(var) => AttachSource::Env {
                        cached: std::env::var(var).unwrap_or_default(),
                        var: var.to_string(),
                        refreshed: Instant::now(),
                    },
                    None => AttachSource::Literal(v.to_string()),
                },
            };
            items.push(AttachItem {
                name: pair.name.clone(),
                source,
            });
        }
        Ok(Self { items })
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Appends the configured values to `entry`. Environment-backed values
    /// refresh on a five-minute clock, never per entry.
    pub fn attach(&mut self, entry: &mut Entry) {
        for item in &mut self.items {
            let value = match &mut item.source {
                AttachSource::Literal(v) => EvValue::String(v.clone()),
                AttachSource::Now => EvValue::Timestamp(Timestamp::now()),
                AttachSource::Env {
                    var,
                    cached,
                    refreshed,
                } => {
                    if refreshed.elapsed() >= ENV_REFRESH_INTERVAL {
                        *cached = std::env::var(var.as_str()).unwrap_or_default();
                        *refreshed = Instant::now();
                    }
                    EvValue::String(cached.clone())
                },
            };
            entry
                .evs
                .push(EnumeratedValue::new(item.name.clone(), value));
        }
    }
}
