// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Buffered, deadline-aware halves of one duplex byte stream.
//!
//! The core is transport-agnostic: anything `AsyncRead + AsyncWrite` can
//! carry a link (TCP, TLS, unix sockets, in-memory pipes in tests). Both
//! halves can be re-wrapped in Snappy stream framing after negotiation;
//! switching codecs discards whatever the previous codec still buffered.

pub mod snappy;

use std::time::Duration;

use anyhow::{Result, bail};
use bytes::{Buf, Bytes, BytesMut};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    time::timeout,
};

use crate::{
    errors::IngestError,
    stream::snappy::{SnappyDecoder, SnappyEncoder},
};

pub type ReadHalf = Box<dyn AsyncRead + Send + Unpin>;
pub type WriteHalf = Box<dyn AsyncWrite + Send + Unpin>;

/// Splits any duplex stream into the boxed halves the link works over.
pub fn split_stream<S>(stream: S) -> (ReadHalf, WriteHalf)
where S: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    let (r, w) = tokio::io::split(stream);
    (Box::new(r), Box::new(w))
}

/// Broken-pipe signals surface as EOF, like every other dead-peer shape.
pub(crate) fn normalize_io_err(e: std::io::Error) -> anyhow::Error {
    if e.kind() == std::io::ErrorKind::BrokenPipe {
        return std::io::Error::new(std::io::ErrorKind::UnexpectedEof, e).into();
    }
    e.into()
}

/// Buffered writing half. Bytes accumulate up to the configured limit and
/// go out on [`SendStream::flush`]; oversized appends flush mid-way.
pub struct SendStream {
    io: WriteHalf,
    buf: BytesMut,
    limit: usize,
    /// Staged wire bytes surviving a timed-out flush, so a retry resumes
    /// exactly where the transport stalled instead of re-encoding.
    pending: Option<Bytes>,
    codec: Option<SnappyEncoder>,
}

impl SendStream {
    pub fn new(io: WriteHalf, limit: usize) -> Self {
        Self {
            io,
            buf: BytesMut::with_capacity(limit),
            limit,
            pending: None,
            codec: None,
        }
    }

    #[inline]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.buf.len() >= self.limit
    }

    /// Appends up to the remaining room without flushing; returns how many
    /// bytes were taken. The caller decides when and how to flush, which is
    /// what lets the writer service acks between retries.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let room = self.limit.saturating_sub(self.buf.len());
        let n = room.min(bytes.len());
        self.buf.extend_from_slice(&bytes[..n]);
        n
    }

    /// Appends `bytes`, flushing whenever the buffer fills.
    pub async fn write(&mut self, bytes: &[u8], deadline: Duration) -> Result<()> {
        let mut rest = bytes;
        while !rest.is_empty() {
            let room = self.limit.saturating_sub(self.buf.len());
            if room == 0 {
                self.flush(deadline).await?;
                continue;
            }
            let n = room.min(rest.len());
            self.buf.extend_from_slice(&rest[..n]);
            rest = &rest[n..];
        }
        if self.buf.len() >= self.limit {
            self.flush(deadline).await?;
        }
        Ok(())
    }

    /// Pushes everything buffered onto the transport. On a deadline miss the
    /// unsent remainder is retained and the call fails with a timeout the
    /// caller may retry after servicing acks.
    pub async fn flush(&mut self, deadline: Duration) -> Result<()> {
        if self.pending.is_none() && !self.buf.is_empty() {
            let payload = self.buf.split();
            let staged = match &mut self.codec {
                None => payload.freeze(),
                Some(enc) => {
                    let mut framed = Vec::with_capacity(payload.len() / 2 + 64);
                    enc.encode(&payload, &mut framed)?;
                    Bytes::from(framed)
                },
            };
            self.pending = Some(staged);
        }
        if let Some(pending) = &mut self.pending {
            while !pending.is_empty() {
                match timeout(deadline, self.io.write(pending)).await {
                    Ok(Ok(0)) => return Err(IngestError::Closed.into()),
                    Ok(Ok(n)) => pending.advance(n),
                    Ok(Err(e)) => return Err(normalize_io_err(e)),
                    Err(_) => {
                        return Err(IngestError::timeout("flush", deadline).into());
                    },
                }
            }
            self.pending = None;
        }
        match timeout(deadline, self.io.flush()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(normalize_io_err(e)),
            Err(_) => Err(IngestError::timeout("flush", deadline).into()),
        }
    }

    /// Swaps in the Snappy codec. The caller must have flushed the plain
    /// buffer first; anything still staged would otherwise change meaning.
    pub fn enable_snappy(&mut self) -> Result<()> {
        if !self.buf.is_empty() || self.pending.is_some() {
            bail!("cannot enable compression with bytes still buffered");
        }
        self.codec = Some(SnappyEncoder::new());
        Ok(())
    }

    /// Half-closes the transport after a final flush attempt.
    pub async fn shutdown(&mut self, deadline: Duration) -> Result<()> {
        let _ = self.flush(deadline).await;
        match timeout(deadline, self.io.shutdown()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(normalize_io_err(e)),
            Err(_) => Err(IngestError::timeout("shutdown", deadline).into()),
        }
    }
}

/// Buffered reading half with cancel-safe fills: raw transport bytes are
/// staged first, so a timed-out read never loses a partial frame.
pub struct RecvStream {
    io: ReadHalf,
    /// Raw transport bytes not yet run through the codec.
    staged: BytesMut,
    /// Decoded bytes ready for consumption.
    decoded: BytesMut,
    codec: Option<SnappyDecoder>,
    read_chunk: usize,
}

impl RecvStream {
    pub fn new(io: ReadHalf, buffer_size: usize) -> Self {
        Self {
            io,
            staged: BytesMut::new(),
            decoded: BytesMut::new(),
            codec: None,
            read_chunk: buffer_size.clamp(4 << 10, 4 << 20),
        }
    }

    #[inline]
    pub fn buffered(&self) -> usize {
        self.decoded.len()
    }

    /// Ensures at least `need` decoded bytes are available. Each transport
    /// read is bounded by `deadline`; a miss surfaces as a retryable
    /// timeout and keeps every byte already staged.
    pub async fn fill(&mut self, need: usize, deadline: Duration) -> Result<()> {
        while self.decoded.len() < need {
            if let Some(dec) = &mut self.codec {
                if dec.drain_chunks(&mut self.staged, &mut self.decoded)? {
                    continue;
                }
            }
            self.staged.reserve(self.read_chunk);
            let n = match timeout(deadline, self.io.read_buf(&mut self.staged)).await {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(normalize_io_err(e)),
                Err(_) => return Err(IngestError::timeout("read", deadline).into()),
            };
            if n == 0 {
                return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof)
                    .into());
            }
            if self.codec.is_none() {
                self.decoded.unsplit(self.staged.split());
            }
        }
        Ok(())
    }

    pub async fn read_exact(&mut self, n: usize, deadline: Duration) -> Result<Bytes> {
        self.fill(n, deadline).await?;
        Ok(self.decoded.split_to(n).freeze())
    }

    pub async fn read_u16(&mut self, deadline: Duration) -> Result<u16> {
        self.fill(2, deadline).await?;
        Ok(self.decoded.get_u16_le())
    }

    pub async fn read_u32(&mut self, deadline: Duration) -> Result<u32> {
        self.fill(4, deadline).await?;
        Ok(self.decoded.get_u32_le())
    }

    pub async fn read_u64(&mut self, deadline: Duration) -> Result<u64> {
        self.fill(8, deadline).await?;
        Ok(self.decoded.get_u64_le())
    }

    /// Reads one `u32`-length-prefixed block, enforcing the ceiling before
    /// the body is pulled off the transport.
    pub async fn read_len_block(
        &mut self,
        ceiling: u32,
        deadline: Duration,
    ) -> Result<Bytes> {
        let len = self.read_u32(deadline).await?;
        if len > ceiling {
            return Err(IngestError::protocol(format!(
                "block of {len} bytes exceeds the {ceiling} byte ceiling"
            ))
            .into());
        }
        self.read_exact(len as usize, deadline).await
    }

    /// Swaps in the Snappy codec, discarding bytes buffered under the old
    /// one as the configuration exchange requires.
    pub fn enable_snappy(&mut self) {
        self.decoded.clear();
        self.staged.clear();
        self.codec = Some(SnappyDecoder::new());
    }
}
