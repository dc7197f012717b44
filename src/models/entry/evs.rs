// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Enumerated values: typed `(name, value)` labels carried after the entry
//! data. The block is count-prefixed; each value is
//! `{name_len: u16, kind: u8, value_len: u32, name, value}`, little-endian.

use anyhow::{Context, Result, bail, ensure};
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::models::{
    common::{MAX_EV_VALUE_SIZE, MAX_EVS_PER_ENTRY, validate_tag_name},
    entry::Timestamp,
};

const KIND_BOOL: u8 = 0;
const KIND_INT: u8 = 1;
const KIND_UINT: u8 = 2;
const KIND_FLOAT: u8 = 3;
const KIND_STRING: u8 = 4;
const KIND_BINARY: u8 = 5;
const KIND_TIMESTAMP: u8 = 6;

#[derive(Debug, Clone, PartialEq)]
pub enum EvValue {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    String(String),
    Binary(Bytes),
    Timestamp(Timestamp),
}

impl EvValue {
    fn kind(&self) -> u8 {
        match self {
            EvValue::Bool(_) => KIND_BOOL,
            EvValue::Int(_) => KIND_INT,
            EvValue::Uint(_) => KIND_UINT,
            EvValue::Float(_) => KIND_FLOAT,
            EvValue::String(_) => KIND_STRING,
            EvValue::Binary(_) => KIND_BINARY,
            EvValue::Timestamp(_) => KIND_TIMESTAMP,
        }
    }

    fn encoded_len(&self) -> usize {
        match self {
            EvValue::Bool(_) => 1,
            EvValue::Int(_) | EvValue::Uint(_) | EvValue::Float(_) => 8,
            EvValue::String(s) => s.len(),
            EvValue::Binary(b) => b.len(),
            EvValue::Timestamp(_) => 12,
        }
    }
}

/// One typed label attached to an entry. Names obey the tag-name ruleset.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumeratedValue {
    pub name: String,
    pub value: EvValue,
}

impl EnumeratedValue {
    pub fn new(name: impl Into<String>, value: EvValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_tag_name(&self.name)
            .with_context(|| format!("enumerated value name {:?}", self.name))?;
        let len = self.value.encoded_len();
        ensure!(
            len <= MAX_EV_VALUE_SIZE,
            "enumerated value {:?} of {len} bytes exceeds the {MAX_EV_VALUE_SIZE} byte cap",
            self.name
        );
        Ok(())
    }
}

/// Encodes a count-prefixed EV block. Every value is validated first.
pub fn encode_evs(evs: &[EnumeratedValue], out: &mut BytesMut) -> Result<()> {
    ensure!(
        evs.len() <= MAX_EVS_PER_ENTRY,
        "{} enumerated values exceed the {MAX_EVS_PER_ENTRY} cap",
        evs.len()
    );
    out.put_u16_le(evs.len() as u16);
    for ev in evs {
        ev.validate()?;
        out.put_u16_le(ev.name.len() as u16);
        out.put_u8(ev.value.kind());
        out.put_u32_le(ev.value.encoded_len() as u32);
        out.put_slice(ev.name.as_bytes());
        match &ev.value {
            EvValue::Bool(b) => out.put_u8(*b as u8),
            EvValue::Int(v) => out.put_i64_le(*v),
            EvValue::Uint(v) => out.put_u64_le(*v),
            EvValue::Float(v) => out.put_f64_le(*v),
            EvValue::String(s) => out.put_slice(s.as_bytes()),
            EvValue::Binary(b) => out.put_slice(b),
            EvValue::Timestamp(ts) => {
                out.put_i64_le(ts.sec);
                out.put_i32_le(ts.nsec);
            },
        }
    }
    Ok(())
}

/// Decodes a count-prefixed EV block, consuming the whole slice.
pub fn decode_evs(mut buf: &[u8]) -> Result<Vec<EnumeratedValue>> {
    ensure!(buf.len() >= 2, "short enumerated value block");
    let count = buf.get_u16_le() as usize;
    ensure!(
        count <= MAX_EVS_PER_ENTRY,
        "{count} enumerated values exceed the {MAX_EVS_PER_ENTRY} cap"
    );
    let mut evs = Vec::with_capacity(count);
    for _ in 0..count {
        ensure!(buf.len() >= 7, "truncated enumerated value header");
        let name_len = buf.get_u16_le() as usize;
        let kind = buf.get_u8();
        let value_len = buf.get_u32_le() as usize;
        ensure!(
            value_len <= MAX_EV_VALUE_SIZE,
            "enumerated value of {value_len} bytes exceeds the {MAX_EV_VALUE_SIZE} byte cap"
        );
        ensure!(
            buf.len() >= name_len + value_len,
            "truncated enumerated value body"
        );
        let name = String::from_utf8(buf[..name_len].to_vec())
            .context("enumerated value name is not utf-8")?;
        buf.advance(name_len);
        let mut val = &buf[..value_len];
        let value = match kind {
            KIND_BOOL => {
                ensure!(value_len == 1, "bool value must be 1 byte");
                EvValue::Bool(val.get_u8() != 0)
            },
            KIND_INT => {
                ensure!(value_len == 8, "int value must be 8 bytes");
                EvValue::Int(val.get_i64_le())
            },
            KIND_UINT => {
                ensure!(value_len == 8, "uint value must be 8 bytes");
                EvValue::Uint(val.get_u64_le())
            },
            KIND_FLOAT => {
                ensure!(value_len == 8, "float value must be 8 bytes");
                EvValue::Float(val.get_f64_le())
            },
            KIND_STRING => EvValue::String(
                String::from_utf8(val.to_vec())
                    .context("string value is not utf-8")?,
            ),
            KIND_BINARY => EvValue::Binary(Bytes::copy_from_slice(val)),
            KIND_TIMESTAMP => {
                ensure!(value_len == 12, "timestamp value must be 12 bytes");
                EvValue::Timestamp(Timestamp {
                    sec: val.get_i64_le(),
                    nsec: val.get_i32_le(),
                })
            },
            other => bail!("unknown enumerated value kind {other}"),
        };
        buf.advance(value_len);
        let ev = EnumeratedValue { name, value };
        ev.validate()?;
        evs.push(ev);
    }
    ensure!(buf.is_empty(), "trailing bytes after enumerated value block");
    Ok(evs)
}
