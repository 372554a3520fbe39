// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Per-dataset key/value store for UI state.
//!
//! Entries live at `<cache_root>/cache/<dataset_id>/<name>` as JSON. Writes
//! replace the whole file through a rename, so readers see either the old or
//! the new value. Concurrent writers to the same name race; the last rename wins.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Directory under the cache root holding session entries.
pub const SESSION_DIR: &str = "cache";

/// Prefix of in-flight writes. Contains `..`, so no entry name can carry it.
pub const WRITE_PREFIX: &str = "..tmp";

#[derive(Debug, Clone)]
pub struct SessionCache {
    root: PathBuf,
}

impl SessionCache {
    pub fn new(cache_root: &Path) -> Self {
        Self {
            root: cache_root.join(SESSION_DIR),
        }
    }

    /// Directory holding the entries of one dataset.
    pub fn dataset_dir(&self, dataset_id: &str) -> PathBuf {
        self.root.join(dataset_id)
    }

    fn entry_path(&self, dataset_id: &str, name: &str) -> Result<PathBuf, SessionError> {
        validate_name(dataset_id)?;
        validate_name(name)?;
        Ok(self.dataset_dir(dataset_id).join(name))
    }

    pub fn set(
        &self,
        dataset_id: &str,
        name: &str,
        value: &serde_json::Value,
    ) -> Result<(), SessionError> {
        let path = self.entry_path(dataset_id, name)?;
        let dir = self.dataset_dir(dataset_id);
        fs::create_dir_all(&dir)?;

        let bytes = serde_json::to_vec(value)?;
        let mut tmp = tempfile::Builder::new()
            .prefix(WRITE_PREFIX)
            .tempfile_in(&dir)?;
        tmp.write_all(&bytes)?;
        tmp.persist(&path).map_err(|e| SessionError::Io(e.error))?;

        tracing::debug!(
            dataset = dataset_id,
            name,
            bytes = bytes.len(),
            "Stored session entry"
        );
        Ok(())
    }

    /// Absent entries are `Ok(None)`.
    pub fn get(
        &self,
        dataset_id: &str,
        name: &str,
    ) -> Result<Option<serde_json::Value>, SessionError> {
        let path = self.entry_path(dataset_id, name)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

/// Entry names become file names: reject anything that could leave the dataset directory.
fn validate_name(name: &str) -> Result<(), SessionError> {
    if name.is_empty()
        || name == "."
        || name.contains("..")
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(SessionError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Session cache errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid cache entry name: {0:?}")]
    InvalidName(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
