// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Canonical fingerprints used as cache keys.
//!
//! A [`HashValue`] is fed into SHA-256 through a type-tagged framing. Leaves
//! are written as `<tag>{<len>:<payload>}`, sequences as `list{...}` and
//! mappings as `dict{...}`. The tag and the length prefix keep different
//! shapes apart: the list `["a", "b"]` never hashes like the text `"ab"`,
//! and a mapping never hashes like a list holding the same items.
//!
//! Mappings are order-insensitive. Entries are sorted by the encoding of
//! their key before they reach the hash, so two configs that only differ in
//! field order share a fingerprint.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 digest of a [`HashValue`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Structured values the hasher understands.
///
/// Anything outside the explicit shapes goes through [`HashValue::Json`],
/// which hashes canonical JSON text (object keys sorted).
#[derive(Debug, Clone, PartialEq)]
pub enum HashValue {
    Bytes(Vec<u8>),
    Text(String),
    F32Array(Vec<f32>),
    F64Array(Vec<f64>),
    I64Array(Vec<i64>),
    List(Vec<HashValue>),
    Map(Vec<(HashValue, HashValue)>),
    Json(serde_json::Value),
}

impl HashValue {
    /// Build a mapping with text keys.
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, HashValue)>,
    {
        HashValue::Map(
            entries
                .into_iter()
                .map(|(k, v)| (HashValue::Text(k.into()), v))
                .collect(),
        )
    }

    fn emit(&self, feed: &mut dyn FnMut(&[u8])) {
        match self {
            HashValue::Bytes(b) => emit_leaf(b"bytes", b, feed),
            HashValue::Text(s) => emit_leaf(b"str", s.as_bytes(), feed),
            HashValue::F32Array(v) => {
                emit_leaf(b"ndarray<f32>", &le_bytes(v, |x| x.to_le_bytes()), feed)
            }
            HashValue::F64Array(v) => {
                emit_leaf(b"ndarray<f64>", &le_bytes(v, |x| x.to_le_bytes()), feed)
            }
            HashValue::I64Array(v) => {
                emit_leaf(b"ndarray<i64>", &le_bytes(v, |x| x.to_le_bytes()), feed)
            }
            HashValue::List(items) => {
                feed(b"list{");
                for item in items {
                    item.emit(feed);
                }
                feed(b"}");
            }
            HashValue::Map(entries) => {
                let mut encoded: Vec<(Vec<u8>, Vec<u8>)> = entries
                    .iter()
                    .map(|(k, v)| (k.encode(), v.encode()))
                    .collect();
                encoded.sort();
                feed(b"dict{");
                for (k, v) in &encoded {
                    feed(k);
                    feed(v);
                }
                feed(b"}");
            }
            HashValue::Json(value) => {
                let mut text = String::new();
                write_canonical_json(value, &mut text);
                emit_leaf(b"json", text.as_bytes(), feed);
            }
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.emit(&mut |chunk: &[u8]| out.extend_from_slice(chunk));
        out
    }
}

fn emit_leaf(tag: &[u8], payload: &[u8], feed: &mut dyn FnMut(&[u8])) {
    feed(tag);
    feed(b"{");
    feed(payload.len().to_string().as_bytes());
    feed(b":");
    feed(payload);
    feed(b"}");
}

fn le_bytes<T: Copy, const N: usize>(values: &[T], to_le: impl Fn(T) -> [u8; N]) -> Vec<u8> {
    values.iter().flat_map(|v| to_le(*v)).collect()
}

/// Serialize JSON with object keys sorted at every level.
///
/// Written out by hand so the result does not depend on whether
/// `serde_json/preserve_order` is enabled somewhere in the dependency graph.
fn write_canonical_json(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical_json(item, out);
            }
            out.push(']');
        }
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical_json(&map[key], out);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

impl From<&str> for HashValue {
    fn from(s: &str) -> Self {
        HashValue::Text(s.to_string())
    }
}

impl From<String> for HashValue {
    fn from(s: String) -> Self {
        HashValue::Text(s)
    }
}

impl From<Vec<f32>> for HashValue {
    fn from(v: Vec<f32>) -> Self {
        HashValue::F32Array(v)
    }
}

impl From<Vec<f64>> for HashValue {
    fn from(v: Vec<f64>) -> Self {
        HashValue::F64Array(v)
    }
}

impl From<Vec<i64>> for HashValue {
    fn from(v: Vec<i64>) -> Self {
        HashValue::I64Array(v)
    }
}

/// Objects become mappings, arrays become lists, strings become text.
/// Numbers, booleans and null stay on the JSON fallback.
impl From<serde_json::Value> for HashValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => HashValue::Text(s),
            serde_json::Value::Array(items) => {
                HashValue::List(items.into_iter().map(HashValue::from).collect())
            }
            serde_json::Value::Object(map) => HashValue::Map(
                map.into_iter()
                    .map(|(k, v)| (HashValue::Text(k), HashValue::from(v)))
                    .collect(),
            ),
            other => HashValue::Json(other),
        }
    }
}

/// Running fingerprint state.
#[derive(Default)]
pub struct Hasher {
    hash: Sha256,
}

impl Hasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, value: &HashValue) {
        let hash = &mut self.hash;
        value.emit(&mut |chunk: &[u8]| hash.update(chunk));
    }

    pub fn digest(self) -> Fingerprint {
        Fingerprint(format!("{:x}", self.hash.finalize()))
    }
}

/// Fingerprint of a single value.
pub fn fingerprint(value: &HashValue) -> Fingerprint {
    let mut hasher = Hasher::new();
    hasher.update(value);
    hasher.digest()
}
