// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Shared fixtures for unit tests.

use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;

use crate::dataset::{ColumnRoles, DatasetMetadata, DatasetStore};

pub const PRICES: [f64; 8] = [12.5, 150.0, 99.99, 100.0, 250.0, 101.0, 5.0, 300.0];

/// Eight products; four of them cost more than 100.
pub fn sample_table() -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("_row_index", DataType::Int64, false),
        Field::new("name", DataType::Utf8, false),
        Field::new("price", DataType::Float64, false),
        Field::new("category", DataType::Utf8, false),
    ]));
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from_iter_values(0..PRICES.len() as i64)),
        Arc::new(StringArray::from(vec![
            "pen", "chair", "lamp", "desk mat", "monitor", "keyboard", "eraser", "desk",
        ])),
        Arc::new(Float64Array::from(PRICES.to_vec())),
        Arc::new(StringArray::from(vec![
            "office", "furniture", "home", "office", "tech", "tech", "office", "furniture",
        ])),
    ];
    RecordBatch::try_new(schema, columns).unwrap()
}

pub fn sample_metadata() -> DatasetMetadata {
    DatasetMetadata {
        columns: ColumnRoles {
            id: "_row_index".to_string(),
            text: Some("name".to_string()),
            embedding: None,
            neighbors: None,
        },
    }
}

pub fn sample_store(session_dir: &Path) -> Arc<DatasetStore> {
    let metadata = sample_metadata();
    let id = DatasetStore::identifier_for(&["products.parquet".to_string()], &metadata).unwrap();
    Arc::new(DatasetStore::new(id, sample_table(), metadata, session_dir.to_path_buf()).unwrap())
}
