// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Disk-backed cache of projection artifacts keyed by fingerprint.
//!
//! Each artifact occupies three sibling files under `<cache_root>/artifacts/`
//! sharing the fingerprint as stem:
//!
//! - `<fp>.projection.bin` - N x 2 coordinates
//! - `<fp>.knn_indices.bin` - N x k neighbor row indices (`-1` when missing)
//! - `<fp>.knn_distances.bin` - N x k neighbor distances
//!
//! Parts are bincode-encoded and written to a temp file in the same directory
//! before being renamed into place. An artifact only counts as present when
//! all three parts exist, so readers never observe a half-written one.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::fingerprint::Fingerprint;

/// Directory under the cache root holding artifacts.
pub const ARTIFACTS_DIR: &str = "artifacts";

const PROJECTION_SUFFIX: &str = "projection.bin";
const KNN_INDICES_SUFFIX: &str = "knn_indices.bin";
const KNN_DISTANCES_SUFFIX: &str = "knn_distances.bin";

/// Dense row-major matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix<T> {
    rows: usize,
    cols: usize,
    data: Vec<T>,
}

impl<T> Matrix<T> {
    pub fn new(rows: usize, cols: usize, data: Vec<T>) -> Result<Self, ArtifactError> {
        if rows.checked_mul(cols) != Some(data.len()) {
            return Err(ArtifactError::Corrupt(format!(
                "{} values do not fill a {}x{} matrix",
                data.len(),
                rows,
                cols
            )));
        }
        Ok(Self { rows, cols, data })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn row(&self, index: usize) -> &[T] {
        &self.data[index * self.cols..(index + 1) * self.cols]
    }
}

/// Output of one projection run.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub projection: Matrix<f32>,
    pub knn_indices: Matrix<i64>,
    pub knn_distances: Matrix<f32>,
}

impl Artifact {
    /// Check that all parts describe the same rows.
    pub fn validate(&self) -> Result<(), ArtifactError> {
        let n = self.projection.rows();
        if self.projection.cols() != 2 {
            return Err(ArtifactError::Corrupt(format!(
                "projection has {} columns, expected 2",
                self.projection.cols()
            )));
        }
        if self.knn_indices.rows() != n || self.knn_distances.rows() != n {
            return Err(ArtifactError::Corrupt(format!(
                "neighbor tables have {}/{} rows, projection has {}",
                self.knn_indices.rows(),
                self.knn_distances.rows(),
                n
            )));
        }
        if self.knn_indices.cols() != self.knn_distances.cols() {
            return Err(ArtifactError::Corrupt(format!(
                "neighbor indices have {} columns, distances have {}",
                self.knn_indices.cols(),
                self.knn_distances.cols()
            )));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.projection.rows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// On-disk envelope for one artifact part.
#[derive(Serialize, Deserialize)]
struct StoredPart<T> {
    version: u8,
    matrix: Matrix<T>,
}

impl<T> StoredPart<T> {
    const VERSION: u8 = 1;
}

/// Artifact cache rooted at `<cache_root>/artifacts`.
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    dir: PathBuf,
}

impl ArtifactCache {
    pub fn new(cache_root: &Path) -> Self {
        Self {
            dir: cache_root.join(ARTIFACTS_DIR),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn part_path(&self, fingerprint: &Fingerprint, suffix: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", fingerprint, suffix))
    }

    pub fn exists(&self, fingerprint: &Fingerprint) -> bool {
        [PROJECTION_SUFFIX, KNN_INDICES_SUFFIX, KNN_DISTANCES_SUFFIX]
            .iter()
            .all(|suffix| self.part_path(fingerprint, suffix).is_file())
    }

    pub fn save(
        &self,
        fingerprint: &Fingerprint,
        artifact: &Artifact,
    ) -> Result<(), ArtifactError> {
        artifact.validate()?;
        fs::create_dir_all(&self.dir)?;

        // The projection goes last: `exists` only turns true once every part is in place.
        self.write_part(fingerprint, KNN_INDICES_SUFFIX, &artifact.knn_indices)?;
        self.write_part(fingerprint, KNN_DISTANCES_SUFFIX, &artifact.knn_distances)?;
        self.write_part(fingerprint, PROJECTION_SUFFIX, &artifact.projection)?;

        tracing::debug!(
            fingerprint = %fingerprint,
            rows = artifact.len(),
            neighbors = artifact.knn_indices.cols(),
            "Saved artifact"
        );
        Ok(())
    }

    pub fn load(&self, fingerprint: &Fingerprint) -> Result<Artifact, ArtifactError> {
        if !self.exists(fingerprint) {
            return Err(ArtifactError::NotFound(fingerprint.clone()));
        }
        let artifact = Artifact {
            projection: self.read_part(fingerprint, PROJECTION_SUFFIX)?,
            knn_indices: self.read_part(fingerprint, KNN_INDICES_SUFFIX)?,
            knn_distances: self.read_part(fingerprint, KNN_DISTANCES_SUFFIX)?,
        };
        artifact.validate()?;
        Ok(artifact)
    }

    fn write_part<T: Serialize + Clone>(
        &self,
        fingerprint: &Fingerprint,
        suffix: &str,
        matrix: &Matrix<T>,
    ) -> Result<(), ArtifactError> {
        let stored = StoredPart {
            version: StoredPart::<T>::VERSION,
            matrix: matrix.clone(),
        };
        let bytes = bincode::serialize(&stored)?;

        // Unique temp name per writer.
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.part_path(fingerprint, suffix))
            .map_err(|e| ArtifactError::Io(e.error))?;
        Ok(())
    }

    fn read_part<T: DeserializeOwned>(
        &self,
        fingerprint: &Fingerprint,
        suffix: &str,
    ) -> Result<Matrix<T>, ArtifactError> {
        let path = self.part_path(fingerprint, suffix);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ArtifactError::NotFound(fingerprint.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        let stored: StoredPart<T> = bincode::deserialize(&bytes)?;
        if stored.version > StoredPart::<T>::VERSION {
            return Err(ArtifactError::UnsupportedVersion {
                found: stored.version,
                max_supported: StoredPart::<T>::VERSION,
            });
        }
        let Matrix { rows, cols, data } = stored.matrix;
        Matrix::new(rows, cols, data)
    }
}

/// Artifact cache errors
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    NotFound(Fingerprint),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("Unsupported artifact version: found {found}, max supported {max_supported}")]
    UnsupportedVersion { found: u8, max_supported: u8 },

    #[error("corrupt artifact: {0}")]
    Corrupt(String),
}
