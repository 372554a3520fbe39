// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Glue between text columns, the projection model, and the artifact cache.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, Float32Array, Float32Builder, Int64Builder, ListBuilder, StringArray,
    StructArray,
};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Fields};
use arrow::record_batch::RecordBatch;
use serde_json::json;

use crate::artifact::{Artifact, ArtifactCache};
use crate::dataset::{DatasetError, append_columns};
use crate::fingerprint::{Fingerprint, HashValue};

pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";

/// Bumped when the projection output changes for the same inputs.
const PROJECTION_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectionParams {
    /// Embedding model; [`DEFAULT_MODEL`] when unset.
    pub model: Option<String>,
    pub umap_args: serde_json::Map<String, serde_json::Value>,
}

impl ProjectionParams {
    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }
}

/// Embeds items and reduces them to 2-D with a k-NN table.
///
/// A model-backed implementation is passed to [`projection_for_texts`] in
/// place of [`CacheOnly`]; its result is saved to the [`ArtifactCache`] and
/// later runs over the same texts and parameters load it from there.
pub trait Projector {
    fn project(&self, items: &[String], params: &ProjectionParams) -> anyhow::Result<Artifact>;
}

/// Projector for runs without a model: only cached artifacts can be served.
pub struct CacheOnly;

impl Projector for CacheOnly {
    fn project(&self, items: &[String], _params: &ProjectionParams) -> anyhow::Result<Artifact> {
        anyhow::bail!(
            "no projection model available for {} items and no cached artifact",
            items.len()
        )
    }
}

pub fn projection_fingerprint(texts: &[String], params: &ProjectionParams) -> Fingerprint {
    crate::fingerprint::fingerprint(&HashValue::from(json!({
        "version": PROJECTION_VERSION,
        "texts": texts,
        "model": params.model(),
        "umap_args": params.umap_args,
    })))
}

/// Return the artifact for `texts`, computing it at most once per distinct input.
pub fn projection_for_texts(
    texts: &[String],
    params: &ProjectionParams,
    projector: &dyn Projector,
    cache: &ArtifactCache,
) -> anyhow::Result<Artifact> {
    let fingerprint = projection_fingerprint(texts, params);
    if cache.exists(&fingerprint) {
        tracing::info!(fingerprint = %fingerprint, "Using cached projection");
        return Ok(cache.load(&fingerprint)?);
    }

    tracing::info!(
        fingerprint = %fingerprint,
        items = texts.len(),
        model = params.model(),
        "Running embedding and projection"
    );
    let artifact = projector.project(texts, params)?;
    cache.save(&fingerprint, &artifact)?;
    Ok(artifact)
}

/// Values of column `name` as text, nulls as empty strings.
pub fn column_texts(table: &RecordBatch, name: &str) -> Result<Vec<String>, DatasetError> {
    let column = table
        .column_by_name(name)
        .ok_or_else(|| DatasetError::MissingColumn(name.to_string()))?;
    let strings = cast(column, &DataType::Utf8)?;
    let strings = strings
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| DatasetError::MissingColumn(name.to_string()))?;
    Ok(strings
        .iter()
        .map(|value| value.unwrap_or_default().to_string())
        .collect())
}

/// Append `x`, `y` and optionally a `neighbors` struct column built from the artifact.
pub fn append_projection_columns(
    table: &RecordBatch,
    artifact: &Artifact,
    x: &str,
    y: &str,
    neighbors: Option<&str>,
) -> Result<RecordBatch, DatasetError> {
    if artifact.len() != table.num_rows() {
        return Err(DatasetError::RowCountMismatch {
            table: table.num_rows(),
            artifact: artifact.len(),
        });
    }

    let points = artifact.projection.as_slice();
    let xs: ArrayRef = Arc::new(Float32Array::from_iter_values(points.iter().step_by(2).copied()));
    let ys: ArrayRef = Arc::new(Float32Array::from_iter_values(
        points.iter().skip(1).step_by(2).copied(),
    ));

    let mut columns = vec![
        (Field::new(x, DataType::Float32, false), xs),
        (Field::new(y, DataType::Float32, false), ys),
    ];
    if let Some(name) = neighbors {
        let array = neighbors_array(artifact);
        columns.push((Field::new(name, array.data_type().clone(), false), Arc::new(array)));
    }
    append_columns(table, columns)
}

fn neighbors_array(artifact: &Artifact) -> StructArray {
    let mut ids = ListBuilder::new(Int64Builder::new());
    let mut distances = ListBuilder::new(Float32Builder::new());
    for row in 0..artifact.len() {
        ids.values().append_slice(artifact.knn_indices.row(row));
        ids.append(true);
        distances.values().append_slice(artifact.knn_distances.row(row));
        distances.append(true);
    }
    let ids: ArrayRef = Arc::new(ids.finish());
    let distances: ArrayRef = Arc::new(distances.finish());

    let fields = Fields::from(vec![
        Field::new("ids", ids.data_type().clone(), true),
        Field::new("distances", distances.data_type().clone(), true),
    ]);
    StructArray::new(fields, vec![ids, distances], None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::Matrix;
    use crate::test_utils::sample_table;
    use arrow::array::ListArray;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Places item `i` at `(i, -i)` with neighbors `i+1` and `-1`.
    #[derive(Default)]
    struct CountingProjector {
        calls: AtomicUsize,
    }

    impl Projector for CountingProjector {
        fn project(
            &self,
            items: &[String],
            _params: &ProjectionParams,
        ) -> anyhow::Result<Artifact> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(line_artifact(items.len()))
        }
    }

    fn line_artifact(n: usize) -> Artifact {
        let projection = (0..n).flat_map(|i| [i as f32, -(i as f32)]).collect();
        let indices = (0..n as i64).flat_map(|i| [i + 1, -1]).collect();
        let distances = (0..n).flat_map(|_| [0.5f32, f32::INFINITY]).collect();
        Artifact {
            projection: Matrix::new(n, 2, projection).unwrap(),
            knn_indices: Matrix::new(n, 2, indices).unwrap(),
            knn_distances: Matrix::new(n, 2, distances).unwrap(),
        }
    }

    fn texts() -> Vec<String> {
        ["alpha", "beta", "gamma"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_second_run_hits_cache() {
        let tmp = TempDir::new().unwrap();
        let cache = ArtifactCache::new(tmp.path());
        let projector = CountingProjector::default();
        let params = ProjectionParams::default();

        let first = projection_for_texts(&texts(), &params, &projector, &cache).unwrap();
        let second = projection_for_texts(&texts(), &params, &projector, &cache).unwrap();

        assert_eq!(projector.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
    }

    #[test]
    fn test_params_change_fingerprint() {
        let tmp = TempDir::new().unwrap();
        let cache = ArtifactCache::new(tmp.path());
        let projector = CountingProjector::default();

        let mut params = ProjectionParams::default();
        projection_for_texts(&texts(), &params, &projector, &cache).unwrap();

        params.umap_args.insert("n_neighbors".into(), json!(30));
        projection_for_texts(&texts(), &params, &projector, &cache).unwrap();

        params.model = Some("other-model".into());
        projection_for_texts(&texts(), &params, &projector, &cache).unwrap();

        assert_eq!(projector.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_default_model_is_explicit() {
        let implicit = ProjectionParams::default();
        let explicit = ProjectionParams {
            model: Some(DEFAULT_MODEL.to_string()),
            ..Default::default()
        };
        assert_eq!(
            projection_fingerprint(&texts(), &implicit),
            projection_fingerprint(&texts(), &explicit)
        );
    }

    #[test]
    fn test_cache_only_serves_hits() {
        let tmp = TempDir::new().unwrap();
        let cache = ArtifactCache::new(tmp.path());
        let params = ProjectionParams::default();

        assert!(projection_for_texts(&texts(), &params, &CacheOnly, &cache).is_err());

        let projector = CountingProjector::default();
        let computed = projection_for_texts(&texts(), &params, &projector, &cache).unwrap();
        let cached = projection_for_texts(&texts(), &params, &CacheOnly, &cache).unwrap();
        assert_eq!(computed, cached);
    }

    #[test]
    fn test_append_projection_columns() {
        let table = sample_table();
        let artifact = line_artifact(table.num_rows());

        let out = append_projection_columns(
            &table,
            &artifact,
            "projection_x",
            "projection_y",
            Some("__neighbors"),
        )
        .unwrap();
        assert_eq!(out.num_columns(), table.num_columns() + 3);

        let xs = out
            .column_by_name("projection_x")
            .unwrap()
            .as_any()
            .downcast_ref::<Float32Array>()
            .unwrap();
        let ys = out
            .column_by_name("projection_y")
            .unwrap()
            .as_any()
            .downcast_ref::<Float32Array>()
            .unwrap();
        assert_eq!(xs.value(3), 3.0);
        assert_eq!(ys.value(3), -3.0);

        let neighbors = out
            .column_by_name("__neighbors")
            .unwrap()
            .as_any()
            .downcast_ref::<StructArray>()
            .unwrap();
        let ids = neighbors
            .column_by_name("ids")
            .unwrap()
            .as_any()
            .downcast_ref::<ListArray>()
            .unwrap();
        let row = ids.value(2);
        let row = row.as_any().downcast_ref::<arrow::array::Int64Array>().unwrap();
        assert_eq!(row.values().to_vec(), vec![3, -1]);
        assert_eq!(neighbors.len(), table.num_rows());
    }

    #[test]
    fn test_append_without_neighbors() {
        let table = sample_table();
        let artifact = line_artifact(table.num_rows());
        let out = append_projection_columns(&table, &artifact, "x", "y", None).unwrap();
        assert_eq!(out.num_columns(), table.num_columns() + 2);
    }

    #[test]
    fn test_column_texts() {
        let table = sample_table();
        let names = column_texts(&table, "name").unwrap();
        assert_eq!(names[0], "pen");
        assert_eq!(names.len(), table.num_rows());

        let prices = column_texts(&table, "price").unwrap();
        assert_eq!(prices[0], "12.5");

        assert!(matches!(column_texts(&table, "missing"), Err(DatasetError::MissingColumn(_))));
    }

    #[test]
    fn test_row_count_mismatch() {
        let table = sample_table();
        let result = append_projection_columns(&table, &line_artifact(2), "x", "y", None);
        assert!(matches!(result, Err(DatasetError::RowCountMismatch { .. })));
    }
}
