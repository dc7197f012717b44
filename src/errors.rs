// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use thiserror::Error;

/// Error taxonomy of the ingest link. Flows return `anyhow::Result`; callers
/// that need to discriminate (re-prompt credentials, drop the tenant, retry a
/// tag name) downcast to this type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IngestError {
    /// Bad magic, oversized block, short read. The connection is dead.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The indexer rejected our challenge response.
    #[error("authentication failed")]
    NotAuthenticated,

    /// The peer is too old to understand tenant-scoped authentication.
    #[error("peer api version {0} does not support tenant authentication")]
    TenantAuthUnsupported(u16),

    /// Initial or dynamic tag negotiation failed.
    #[error("tag negotiation failed: {0}")]
    TagNegotiation(String),

    /// Entry data exceeds the 1 GiB ceiling. The connection stays usable.
    #[error("entry data of {0} bytes exceeds the maximum entry size")]
    OversizedEntry(usize),

    /// Entry carries a malformed enumerated value. Rejected at `write`
    /// without touching the wire; the connection stays usable.
    #[error("invalid entry: {0}")]
    InvalidEntry(String),

    /// A deadline elapsed. Recoverable outside of auth and close.
    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    /// The link was closed, either orderly or after a fatal error.
    #[error("connection closed")]
    Closed,
}

impl IngestError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        IngestError::Protocol(msg.into())
    }

    pub fn timeout(op: &'static str, after: Duration) -> Self {
        IngestError::Timeout { op, after }
    }

    /// Timeouts (and only timeouts) may be retried after servicing acks.
    pub fn is_timeout(&self) -> bool {
        matches!(self, IngestError::Timeout { .. })
    }
}
