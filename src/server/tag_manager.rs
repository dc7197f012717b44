// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Indexer-side tag directory collaborator. The reader consults it for both
//! the handshake batch and dynamic TAG commands; an error is reported to the
//! peer as ERROR_TAG.

use anyhow::{Result, bail};
use dashmap::DashMap;

use crate::models::common::validate_tag_name;

pub trait TagManager: Send + Sync {
    /// Returns the id bound to `name`, assigning one if it is new. Ids are
    /// never reused for a different name within one connection.
    fn get_and_populate(&self, name: &str) -> Result<u16>;
}

/// In-memory manager that hands out ids in registration order.
#[derive(Debug, Default)]
pub struct MapTagManager {
    tags: DashMap<String, u16>,
}

impl MapTagManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-binds a name to a fixed id, for deployments with a stable tag set.
    pub fn bind(&self, name: &str, id: u16) -> Result<()> {
        validate_tag_name(name)?;
        if let Some(existing) = self.tags.get(name)
            && *existing != id
        {
            bail!("tag {name:?} is already bound to id {}", *existing);
        }
        self.tags.insert(name.to_string(), id);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<u16> {
        self.tags.get(name).map(|id| *id)
    }

    pub fn name_of(&self, id: u16) -> Option<String> {
        self.tags
            .iter()
            .find(|kv| *kv.value() == id)
            .map(|kv| kv.key().clone())
    }
}

impl TagManager for MapTagManager {
    fn get_and_populate(&self, name: &str) -> Result<u16> {
        validate_tag_name(name)?;
        if let Some(id) = self.tags.get(name) {
            return Ok(*id);
        }
        let next = self.tags.len();
        if next > u16::MAX as usize {
            bail!("tag space exhausted");
        }
        let id = next as u16;
        self.tags.insert(name.to_string(), id);
        Ok(id)
    }
}
