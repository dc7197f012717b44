// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use core::fmt;

use serde::{Deserialize, Serialize};

/// Stream compression negotiated through the stream-configuration block.
///
/// `None` leaves the link as-is; `Snappy` wraps both directions in the
/// standard Snappy stream framing once the server echoes the block back.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Compression {
    #[default]
    #[serde(rename = "None", alias = "none", alias = "NONE")]
    None = 0,
    #[serde(rename = "Snappy", alias = "snappy", alias = "SNAPPY")]
    Snappy = 1,
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Compression::None => "None",
            Compression::Snappy => "Snappy",
        })
    }
}

impl Compression {
    pub fn is_none(self) -> bool {
        matches!(self, Compression::None)
    }
}
