// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! In-memory dataset, its column roles, and the offline bundle.
//!
//! The table is an Arrow [`RecordBatch`] owned by [`DatasetStore`] for the
//! lifetime of the server. Projection columns are appended before the store
//! is built; after that nothing mutates it.

use std::fs::File;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use once_cell::sync::OnceCell;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::{Compression, ZstdLevel};
use parquet::errors::ParquetError;
use parquet::file::properties::WriterProperties;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::config::DatabaseMode;
use crate::fingerprint::{Fingerprint, HashValue, Hasher};
use crate::session::WRITE_PREFIX;

/// Column name candidate for the row identifier.
pub const ROW_INDEX_COLUMN: &str = "_row_index";
/// Column name candidate for the source file of each row.
pub const FILE_NAME_COLUMN: &str = "FILE_NAME";

/// Which columns play which role in the viewer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ColumnRoles {
    pub id: String,
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<EmbeddingColumns>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neighbors: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingColumns {
    pub x: String,
    pub y: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub columns: ColumnRoles,
}

impl DatasetMetadata {
    fn referenced_columns(&self) -> Vec<&str> {
        let roles = &self.columns;
        let mut names = vec![roles.id.as_str()];
        names.extend(roles.text.as_deref());
        if let Some(embedding) = &roles.embedding {
            names.push(&embedding.x);
            names.push(&embedding.y);
        }
        names.extend(roles.neighbors.as_deref());
        names
    }
}

/// Owns the dataset for one server process.
pub struct DatasetStore {
    identifier: Fingerprint,
    table: RecordBatch,
    metadata: DatasetMetadata,
    session_dir: PathBuf,
    parquet: OnceCell<Bytes>,
}

impl DatasetStore {
    /// `session_dir` is this dataset's session cache directory; its files
    /// are shipped in the offline bundle.
    pub fn new(
        identifier: Fingerprint,
        table: RecordBatch,
        metadata: DatasetMetadata,
        session_dir: PathBuf,
    ) -> Result<Self, DatasetError> {
        let schema = table.schema();
        for name in metadata.referenced_columns() {
            if schema.column_with_name(name).is_none() {
                return Err(DatasetError::MissingColumn(name.to_string()));
            }
        }
        tracing::info!(
            identifier = %identifier,
            rows = table.num_rows(),
            columns = table.num_columns(),
            "Dataset loaded"
        );
        Ok(Self {
            identifier,
            table,
            metadata,
            session_dir,
            parquet: OnceCell::new(),
        })
    }

    /// Stable identifier over the input references followed by the metadata.
    pub fn identifier_for(
        inputs: &[String],
        metadata: &DatasetMetadata,
    ) -> Result<Fingerprint, DatasetError> {
        let mut hasher = Hasher::new();
        hasher.update(&HashValue::List(
            inputs.iter().map(|s| HashValue::Text(s.clone())).collect(),
        ));
        hasher.update(&HashValue::from(serde_json::to_value(metadata)?));
        Ok(hasher.digest())
    }

    pub fn identifier(&self) -> &Fingerprint {
        &self.identifier
    }

    pub fn table(&self) -> &RecordBatch {
        &self.table
    }

    pub fn metadata(&self) -> &DatasetMetadata {
        &self.metadata
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    /// Column roles as a JSON object.
    pub fn metadata_json(&self) -> Result<serde_json::Value, DatasetError> {
        Ok(serde_json::to_value(&self.metadata)?)
    }

    /// The whole table as a Parquet file, encoded on first use and shared by
    /// the download route, the query engine and the offline bundle.
    pub fn parquet_bytes(&self) -> Result<Bytes, DatasetError> {
        self.parquet
            .get_or_try_init(|| self.encode_parquet().map(Bytes::from))
            .cloned()
    }

    fn encode_parquet(&self) -> Result<Vec<u8>, DatasetError> {
        let props = WriterProperties::builder()
            .set_compression(Compression::ZSTD(ZstdLevel::try_new(3)?))
            .build();

        let mut buffer = Vec::new();
        {
            let mut writer = ArrowWriter::try_new(&mut buffer, self.table.schema(), Some(props))?;
            writer.write(&self.table)?;
            writer.close()?;
        }
        Ok(buffer)
    }

    /// Build the offline bundle: dataset, frozen metadata, static assets and
    /// whatever the session cache holds right now.
    pub fn package(&self, static_dir: &Path) -> Result<Vec<u8>, DatasetError> {
        let mut metadata = self.metadata_json()?;
        if let Some(object) = metadata.as_object_mut() {
            object.insert("is_static".to_string(), serde_json::Value::Bool(true));
            object.insert("database".to_string(), DatabaseMode::Wasm.descriptor());
        }

        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

        zip.start_file("data/metadata.json", options)?;
        zip.write_all(&serde_json::to_vec(&metadata)?)?;

        zip.start_file("data/dataset.parquet", options)?;
        zip.write_all(&self.parquet_bytes()?)?;

        let static_files = add_tree(&mut zip, static_dir, "", options)?;
        let cache_files = add_tree(&mut zip, &self.session_dir, "data/cache", options)?;

        let bytes = zip.finish()?.into_inner();
        tracing::info!(
            identifier = %self.identifier,
            static_files,
            cache_files,
            bytes = bytes.len(),
            "Built offline archive"
        );
        Ok(bytes)
    }
}

/// Copy every regular file under `dir` into the archive below `prefix`.
/// A missing directory contributes nothing.
fn add_tree(
    zip: &mut ZipWriter<Cursor<Vec<u8>>>,
    dir: &Path,
    prefix: &str,
    options: SimpleFileOptions,
) -> Result<usize, DatasetError> {
    if !dir.is_dir() {
        return Ok(0);
    }
    let mut count = 0;
    for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        // In-flight session writes.
        if entry.file_name().to_string_lossy().starts_with(WRITE_PREFIX) {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(dir) else {
            continue;
        };
        let mut parts: Vec<String> = Vec::new();
        if !prefix.is_empty() {
            parts.push(prefix.to_string());
        }
        parts.extend(
            relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned()),
        );

        zip.start_file(parts.join("/"), options)?;
        let mut file = File::open(entry.path())?;
        std::io::copy(&mut file, zip)?;
        count += 1;
    }
    Ok(count)
}

/// Pick `candidate`, or `candidate_1`, `candidate_2`, ... if taken.
pub fn find_column_name(schema: &Schema, candidate: &str) -> String {
    if schema.column_with_name(candidate).is_none() {
        return candidate.to_string();
    }
    (1..)
        .map(|i| format!("{}_{}", candidate, i))
        .find(|name| schema.column_with_name(name).is_none())
        .unwrap_or_else(|| candidate.to_string())
}

/// Append columns to the right of an existing table.
pub fn append_columns(
    table: &RecordBatch,
    columns: Vec<(Field, ArrayRef)>,
) -> Result<RecordBatch, DatasetError> {
    let schema = table.schema();
    let mut fields: Vec<Field> = schema.fields().iter().map(|f| f.as_ref().clone()).collect();
    let mut arrays: Vec<ArrayRef> = table.columns().to_vec();
    for (field, array) in columns {
        if schema.column_with_name(field.name()).is_some() {
            return Err(DatasetError::DuplicateColumn(field.name().clone()));
        }
        fields.push(field);
        arrays.push(array);
    }
    let schema = Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone()));
    Ok(RecordBatch::try_new(schema, arrays)?)
}

/// Append a zero-based row id column. Returns the table and the column name.
pub fn with_row_index(table: &RecordBatch) -> Result<(RecordBatch, String), DatasetError> {
    let name = find_column_name(&table.schema(), ROW_INDEX_COLUMN);
    let ids: ArrayRef = Arc::new(Int64Array::from_iter_values(0..table.num_rows() as i64));
    let table = append_columns(table, vec![(Field::new(&name, DataType::Int64, false), ids)])?;
    Ok((table, name))
}

/// Load and concatenate Parquet inputs, tagging each row with its source file.
pub fn read_parquet_files(paths: &[PathBuf]) -> Result<RecordBatch, DatasetError> {
    let mut loaded: Vec<(String, Vec<RecordBatch>)> = Vec::new();
    for path in paths {
        tracing::info!(path = %path.display(), "Loading data");
        let file = File::open(path)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
        let batches = reader.collect::<Result<Vec<_>, ArrowError>>()?;
        loaded.push((path.display().to_string(), batches));
    }

    let Some(first) = loaded.iter().flat_map(|(_, b)| b.iter()).next() else {
        return Err(DatasetError::NoInput);
    };
    let base_schema = first.schema();
    let file_column = find_column_name(&base_schema, FILE_NAME_COLUMN);

    let mut tagged = Vec::new();
    for (source, batches) in &loaded {
        for batch in batches {
            if batch.schema().fields().len() != base_schema.fields().len() {
                return Err(DatasetError::SchemaMismatch(source.clone()));
            }
            let sources: ArrayRef =
                Arc::new(StringArray::from(vec![source.as_str(); batch.num_rows()]));
            tagged.push(append_columns(
                batch,
                vec![(Field::new(&file_column, DataType::Utf8, false), sources)],
            )?);
        }
    }

    let schema = tagged[0].schema();
    Ok(arrow::compute::concat_batches(&schema, &tagged)?)
}

/// Dataset errors
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("no rows found in the given inputs")]
    NoInput,

    #[error("column {0:?} named in metadata is missing from the dataset")]
    MissingColumn(String),

    #[error("column {0:?} already exists")]
    DuplicateColumn(String),

    #[error("table has {table} rows but the projection has {artifact}")]
    RowCountMismatch { table: usize, artifact: usize },

    #[error("schema of {0} does not match the first input")]
    SchemaMismatch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),
}
