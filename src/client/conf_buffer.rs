// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Circular FIFO of sent-but-unacknowledged entries.
//!
//! One slot is reserved so the writer always has room for the entry whose
//! arrival triggered a flush: `add` rejects once `count + 1` would reach
//! capacity. Confirming the head is O(1); confirming mid-ring compacts the
//! remainder in order, so a replay after failure stays FIFO.

use anyhow::{Result, bail};

use crate::models::{common::MAX_OUTSTANDING_ENTRIES, entry::Entry};

#[derive(Debug, Clone, PartialEq)]
pub struct UnconfirmedEntry {
    pub send_id: u64,
    pub entry: Entry,
}

#[derive(Debug)]
pub struct ConfBuffer {
    slots: Box<[Option<UnconfirmedEntry>]>,
    head: usize,
    count: usize,
}

impl ConfBuffer {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity < 2 || capacity > MAX_OUTSTANDING_ENTRIES {
            bail!("conf buffer capacity must be in 2..={MAX_OUTSTANDING_ENTRIES}");
        }
        Ok(Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            count: 0,
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// True once the reserved slot is all that remains.
    #[inline]
    pub fn full(&self) -> bool {
        self.count >= self.capacity() - 1
    }

    #[inline]
    fn slot(&self, offset: usize) -> usize {
        (self.head + offset) % self.capacity()
    }

    pub fn add(&mut self, send_id: u64, entry: Entry) -> Result<()> {
        if self.count + 1 >= self.capacity() {
            bail!("unconfirmed entry buffer is full ({} entries)", self.count);
        }
        let idx = self.slot(self.count);
        self.slots[idx] = Some(UnconfirmedEntry { send_id, entry });
        self.count += 1;
        Ok(())
    }

    /// Removes the entry confirmed by `send_id` and returns it. Unknown ids
    /// yield `None`; duplicated acks after a resend make them normal.
    pub fn confirm(&mut self, send_id: u64) -> Option<Entry> {
        if self.count == 0 {
            return None;
        }
        // Fast path: acks usually land in send order.
        if self.slots[self.head]
            .as_ref()
            .is_some_and(|u| u.send_id == send_id)
        {
            let taken = self.slots[self.head].take();
            self.head = self.slot(1);
            self.count -= 1;
            return taken.map(|u| u.entry);
        }
        let hit = (1..self.count)
            .find(|&off| {
                self.slots[self.slot(off)]
                    .as_ref()
                    .is_some_and(|u| u.send_id == send_id)
            })?;
        let taken = self.slots[self.slot(hit)].take();
        // Shift the tail back one slot to keep the survivors in FIFO order.
        for off in hit..self.count - 1 {
            let next = self.slots[self.slot(off + 1)].take();
            self.slots[self.slot(off)] = next;
        }
        self.count -= 1;
        taken.map(|u| u.entry)
    }

    /// Empties the ring in send order; used during force-ack failure paths
    /// and close.
    pub fn drain(&mut self) -> Vec<UnconfirmedEntry> {
        let mut out = Vec::with_capacity(self.count);
        for off in 0..self.count {
            if let Some(u) = self.slots[self.slot(off)].take() {
                out.push(u);
            }
        }
        self.head = 0;
        self.count = 0;
        out
    }

    /// Outstanding ids in send order, oldest first.
    pub fn outstanding(&self) -> Vec<u64> {
        (0..self.count)
            .filter_map(|off| self.slots[self.slot(off)].as_ref().map(|u| u.send_id))
            .collect()
    }
}
