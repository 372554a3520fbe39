// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Local data server for embedding atlas datasets.
//!
//! Serves one tabular dataset to a browser visualization frontend: the
//! dataset itself as Parquet with byte-range support, SQL queries against an
//! embedded DuckDB database, filtered exports, per-dataset UI state, and an
//! offline bundle of all of it.
//!
//! ## Architecture
//!
//! 1. **Fingerprints** (`fingerprint`) - stable SHA-256 keys over structured
//!    inputs, used to name cache entries.
//!
//! 2. **Caches** (`artifact`, `session`) - projection results keyed by
//!    fingerprint, and JSON UI state keyed by dataset and name.
//!
//! 3. **Dataset** (`dataset`, `projection`) - the Arrow table, its column
//!    roles, and the projection columns appended at load time.
//!
//! 4. **Serving** (`query`, `server`, `ranged`) - the axum router, the shared
//!    analytic database, and byte-range delivery.
//!
//! ## Usage
//!
//! ```bash
//! atlas-server reviews.parquet --text review --port 5055
//! atlas-server points.parquet --x umap_x --y umap_y --duckdb server
//! atlas-server reviews.parquet --text review --export-application atlas.zip
//! ```

pub mod artifact;
pub mod config;
pub mod dataset;
pub mod fingerprint;
pub mod projection;
pub mod query;
pub mod ranged;
pub mod server;
pub mod session;

#[cfg(test)]
mod test_utils;
