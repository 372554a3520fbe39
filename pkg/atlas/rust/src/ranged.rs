// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Byte-range delivery of lazily computed binary content.

use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tokio::sync::OnceCell;

use crate::server::{ApiError, run_blocking};

type MakeContent = dyn Fn() -> anyhow::Result<Bytes> + Send + Sync;

/// Bytes computed on first request and kept for the process lifetime.
///
/// Concurrent first requests wait on a single computation, which runs on the
/// blocking pool. A failed computation is retried by the next request.
pub struct MemoizedContent {
    media_type: &'static str,
    make: Arc<MakeContent>,
    cell: OnceCell<Bytes>,
}

impl MemoizedContent {
    pub fn new<F>(media_type: &'static str, make: F) -> Self
    where
        F: Fn() -> anyhow::Result<Bytes> + Send + Sync + 'static,
    {
        Self {
            media_type,
            make: Arc::new(make),
            cell: OnceCell::new(),
        }
    }

    pub async fn get(&self) -> Result<Bytes, ApiError> {
        self.cell
            .get_or_try_init(|| async {
                let make = self.make.clone();
                let bytes = run_blocking(move || make()).await?;
                tracing::debug!(
                    media_type = self.media_type,
                    bytes = bytes.len(),
                    "Computed content"
                );
                Ok::<_, ApiError>(bytes)
            })
            .await
            .cloned()
    }

    /// Full body, or a 206 slice when `headers` carry a satisfiable range.
    pub async fn respond(&self, headers: &HeaderMap) -> Result<Response, ApiError> {
        let content = self.get().await?;
        let range = headers
            .get(header::RANGE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| parse_range(value, content.len()));

        if let Some(range) = range {
            tracing::debug!(start = range.start, bytes = range.len(), "Serving byte range");
        }

        let response = match range {
            Some(range) => (
                StatusCode::PARTIAL_CONTENT,
                [
                    (header::CONTENT_TYPE, self.media_type.to_string()),
                    (header::ACCEPT_RANGES, "bytes".to_string()),
                    (header::CONTENT_RANGE, range.content_range(content.len())),
                ],
                content.slice(range.start..=range.end),
            )
                .into_response(),
            None => (
                [
                    (header::CONTENT_TYPE, self.media_type.to_string()),
                    (header::ACCEPT_RANGES, "bytes".to_string()),
                ],
                content,
            )
                .into_response(),
        };
        Ok(response)
    }
}

/// Inclusive byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: usize,
    pub end: usize,
}

impl ByteRange {
    fn len(&self) -> usize {
        self.end - self.start + 1
    }

    fn content_range(&self, total: usize) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

/// Parse `bytes=<start>-<end>`, spaces allowed around each token.
///
/// Only single closed ranges with `start < end < len` are honored;
/// everything else means "send the whole body".
pub fn parse_range(value: &str, len: usize) -> Option<ByteRange> {
    let rest = value.trim_matches(' ').strip_prefix("bytes")?;
    let rest = rest.trim_start_matches(' ').strip_prefix('=')?;
    let (start, end) = rest.split_once('-')?;
    let start = parse_offset(start)?;
    let end = parse_offset(end)?;
    (start < end && end < len).then_some(ByteRange { start, end })
}

fn parse_offset(token: &str) -> Option<usize> {
    let token = token.trim_matches(' ');
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}
