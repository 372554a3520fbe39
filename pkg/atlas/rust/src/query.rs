// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! SQL over the dataset through one embedded DuckDB database.
//!
//! The database is created on first use and lives as long as the engine. The
//! root connection sits behind a mutex that is only held long enough to clone
//! a per-request connection; clones share the database and run in parallel.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use arrow::error::ArrowError;
use arrow::ipc::writer::StreamWriter;
use arrow::json::WriterBuilder;
use arrow::json::writer::JsonArray;
use arrow::record_batch::RecordBatch;
use duckdb::Connection;
use once_cell::sync::OnceCell;
use serde::Deserialize;

use crate::dataset::{DatasetError, DatasetStore};

/// Name under which the dataset is visible to SQL.
pub const DATASET_TABLE: &str = "dataset";

/// How `execute` returns its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryFormat {
    /// Side effects only.
    Exec,
    /// Arrow IPC stream.
    Arrow,
    /// JSON array of row objects.
    Json,
}

/// File format of a selection export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Jsonl,
    Csv,
    Parquet,
}

impl ExportFormat {
    fn copy_options(self) -> &'static str {
        match self {
            ExportFormat::Json => "(FORMAT JSON, ARRAY true)",
            ExportFormat::Jsonl => "(FORMAT JSON)",
            ExportFormat::Csv => "(FORMAT CSV)",
            ExportFormat::Parquet => "(FORMAT parquet)",
        }
    }

    fn extension(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Jsonl => "jsonl",
            ExportFormat::Csv => "csv",
            ExportFormat::Parquet => "parquet",
        }
    }
}

/// Body of `/data/query`.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub sql: String,
    #[serde(rename = "type")]
    pub format: QueryFormat,
}

/// Body of `/data/selection`.
#[derive(Debug, Clone, Deserialize)]
pub struct SelectionRequest {
    #[serde(default)]
    pub predicate: Option<String>,
    pub format: ExportFormat,
}

#[derive(Debug)]
pub enum QueryOutput {
    Ack,
    Arrow(Vec<u8>),
    Json(Vec<u8>),
}

pub struct QueryEngine {
    dataset: Arc<DatasetStore>,
    scratch_dir: PathBuf,
    connection: OnceCell<Mutex<Connection>>,
}

impl QueryEngine {
    pub fn new(dataset: Arc<DatasetStore>, scratch_dir: PathBuf) -> Self {
        Self {
            dataset,
            scratch_dir,
            connection: OnceCell::new(),
        }
    }

    /// Per-request connection to the shared database.
    fn connection(&self) -> Result<Connection, QueryError> {
        let root = self
            .connection
            .get_or_try_init(|| self.open_database().map(Mutex::new))?;
        let root = root.lock().map_err(|_| QueryError::Poisoned)?;
        Ok(root.try_clone()?)
    }

    fn open_database(&self) -> Result<Connection, QueryError> {
        let connection = Connection::open_in_memory()?;

        // DuckDB loads the table from the store's Parquet encoding; the file
        // goes away with the guard.
        let scratch = self.scratch()?;
        let path = scratch.path().join("dataset.parquet");
        std::fs::write(&path, self.dataset.parquet_bytes()?)?;
        connection.execute_batch(&format!(
            "CREATE TABLE {} AS SELECT * FROM read_parquet({})",
            DATASET_TABLE,
            sql_string(&path)
        ))?;

        tracing::info!(
            rows = self.dataset.table().num_rows(),
            identifier = %self.dataset.identifier(),
            "Opened analytic database"
        );
        Ok(connection)
    }

    fn scratch(&self) -> Result<tempfile::TempDir, QueryError> {
        std::fs::create_dir_all(&self.scratch_dir)?;
        Ok(tempfile::Builder::new()
            .prefix(".selection-")
            .tempdir_in(&self.scratch_dir)?)
    }

    pub fn execute(&self, sql: &str, format: QueryFormat) -> Result<QueryOutput, QueryError> {
        let connection = self.connection()?;
        match format {
            QueryFormat::Exec => {
                connection.execute_batch(sql)?;
                Ok(QueryOutput::Ack)
            }
            QueryFormat::Arrow => {
                let mut statement = connection.prepare(sql)?;
                let result = statement.query_arrow([])?;
                let schema = result.get_schema();
                let batches: Vec<RecordBatch> = result.collect();

                let mut buffer = Vec::new();
                {
                    let mut writer = StreamWriter::try_new(&mut buffer, &schema)?;
                    for batch in &batches {
                        writer.write(batch)?;
                    }
                    writer.finish()?;
                }
                Ok(QueryOutput::Arrow(buffer))
            }
            QueryFormat::Json => {
                let mut statement = connection.prepare(sql)?;
                let batches: Vec<RecordBatch> = statement.query_arrow([])?.collect();

                let mut buffer = Vec::new();
                {
                    let mut writer = WriterBuilder::new()
                        .with_explicit_nulls(true)
                        .build::<_, JsonArray>(&mut buffer);
                    for batch in &batches {
                        writer.write(batch)?;
                    }
                    writer.finish()?;
                }
                Ok(QueryOutput::Json(buffer))
            }
        }
    }

    /// Export the rows matching `predicate` (all rows when `None`) in `format`.
    pub fn select(
        &self,
        predicate: Option<&str>,
        format: ExportFormat,
    ) -> Result<Vec<u8>, QueryError> {
        let connection = self.connection()?;
        let scratch = self.scratch()?;
        let path = scratch.path().join(format!("selection.{}", format.extension()));

        let source = match predicate {
            Some(predicate) => format!("SELECT * FROM {} WHERE {}", DATASET_TABLE, predicate),
            None => format!("SELECT * FROM {}", DATASET_TABLE),
        };
        connection.execute_batch(&format!(
            "COPY ({}) TO {} {}",
            source,
            sql_string(&path),
            format.copy_options()
        ))?;

        let bytes = std::fs::read(&path)?;
        tracing::debug!(format = ?format, bytes = bytes.len(), "Exported selection");
        Ok(bytes)
    }
}

/// Quote a path as a SQL string literal.
fn sql_string(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', "''"))
}

/// Query engine errors
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("{0}")]
    Database(#[from] duckdb::Error),

    #[error("{0}")]
    Arrow(#[from] ArrowError),

    #[error("failed to prepare dataset: {0}")]
    Dataset(#[from] DatasetError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database connection lock poisoned")]
    Poisoned,
}
