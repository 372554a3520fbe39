// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! CLI binary for the atlas data server.
//!
//! # Usage
//!
//! ```bash
//! atlas-server reviews.parquet --text review
//! atlas-server a.parquet b.parquet --x umap_x --y umap_y --port 8080
//! atlas-server reviews.parquet --duckdb server
//! atlas-server reviews.parquet --export-application atlas.zip
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use atlas_server::artifact::ArtifactCache;
use atlas_server::config::{DatabaseMode, ServerConfig, default_cache_root};
use atlas_server::dataset::{
    ColumnRoles, DatasetMetadata, DatasetStore, EmbeddingColumns, find_column_name,
    read_parquet_files, with_row_index,
};
use atlas_server::projection::{
    CacheOnly, ProjectionParams, append_projection_columns, column_texts, projection_for_texts,
};
use atlas_server::server::{AppState, run_server};
use atlas_server::session::SessionCache;
use clap::Parser;
use serde_json::json;

#[derive(Parser, Debug)]
#[command(name = "atlas-server")]
#[command(about = "Serve a dataset to the embedding atlas frontend")]
#[command(version)]
struct Args {
    /// Input parquet file(s)
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Column holding the text shown for each point
    #[arg(long)]
    text: Option<String>,

    /// Column holding precomputed X coordinates
    #[arg(long)]
    x: Option<String>,

    /// Column holding precomputed Y coordinates
    #[arg(long)]
    y: Option<String>,

    /// Column holding precomputed neighbors as {"ids": [...], "distances": [...]}
    #[arg(long)]
    neighbors: Option<String>,

    /// Embedding model recorded in the projection fingerprint
    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    umap_n_neighbors: Option<u64>,

    #[arg(long)]
    umap_min_dist: Option<f64>,

    #[arg(long)]
    umap_metric: Option<String>,

    #[arg(long)]
    umap_random_state: Option<u64>,

    /// Where the frontend runs queries: wasm, server, http(s)://... or ws(s)://...
    #[arg(long, default_value = "wasm")]
    duckdb: String,

    #[arg(long, default_value = "localhost")]
    host: String,

    #[arg(short, long, default_value = "5055")]
    port: u16,

    /// Fail instead of trying the next ports when the port is taken
    #[arg(long)]
    no_auto_port: bool,

    /// Directory of the pre-built frontend
    #[arg(long = "static", env = "ATLAS_STATIC_DIR", default_value = "static")]
    static_dir: PathBuf,

    /// Cache root for projections and session state
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Upper bound of the blocking worker pool
    #[arg(long, default_value = "16")]
    worker_threads: usize,

    /// Write the offline bundle to this file and exit
    #[arg(long)]
    export_application: Option<PathBuf>,
}

impl Args {
    fn projection_params(&self) -> ProjectionParams {
        let mut umap_args = serde_json::Map::new();
        if let Some(v) = self.umap_min_dist {
            umap_args.insert("min_dist".into(), json!(v));
        }
        if let Some(v) = self.umap_n_neighbors {
            umap_args.insert("n_neighbors".into(), json!(v));
        }
        if let Some(v) = self.umap_random_state {
            umap_args.insert("random_state".into(), json!(v));
        }
        if let Some(v) = &self.umap_metric {
            umap_args.insert("metric".into(), json!(v));
        }
        ProjectionParams {
            model: self.model.clone(),
            umap_args,
        }
    }
}

fn main() -> Result<()> {
    // Initialize tracing - RUST_LOG takes precedence, fallback to info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // Invalid database URIs are fatal before anything is loaded or bound.
    let database: DatabaseMode = args.duckdb.parse()?;

    let config = ServerConfig {
        host: args.host.clone(),
        port: args.port,
        auto_port: !args.no_auto_port,
        static_dir: args.static_dir.clone(),
        database,
        cache_root: args.cache_dir.clone().unwrap_or_else(default_cache_root),
        worker_threads: args.worker_threads.max(1),
        ..Default::default()
    };

    tracing::info!(
        inputs = args.inputs.len(),
        database = %config.database,
        cache_root = %config.cache_root.display(),
        worker_threads = config.worker_threads,
        "Starting atlas-server"
    );

    let store = load_dataset(&args, &config)?;

    if let Some(output) = &args.export_application {
        let bundle = store.package(&config.static_dir)?;
        std::fs::write(output, &bundle)
            .with_context(|| format!("failed to write {}", output.display()))?;
        tracing::info!(path = %output.display(), bytes = bundle.len(), "Exported application");
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(config.worker_threads)
        .build()?;

    runtime.block_on(async {
        let state = Arc::new(AppState::new(Arc::new(store), &config));
        run_server(state, &config, shutdown_signal()).await
    })
}

fn load_dataset(args: &Args, config: &ServerConfig) -> Result<DatasetStore> {
    let mut table = read_parquet_files(&args.inputs)?;
    eprintln!("Loaded {} rows, {} columns", table.num_rows(), table.num_columns());

    let mut x = args.x.clone();
    let mut y = args.y.clone();
    let mut neighbors = args.neighbors.clone();

    if let (Some(text), true) = (&args.text, x.is_none() || y.is_none()) {
        let texts = column_texts(&table, text)?;
        let cache = ArtifactCache::new(&config.cache_root);
        match projection_for_texts(&texts, &args.projection_params(), &CacheOnly, &cache) {
            Ok(artifact) => {
                let schema = table.schema();
                let px = find_column_name(&schema, "projection_x");
                let py = find_column_name(&schema, "projection_y");
                // Keep a user-supplied neighbors column.
                let new_neighbors = match neighbors {
                    Some(_) => None,
                    None => Some(find_column_name(&schema, "__neighbors")),
                };
                table = append_projection_columns(
                    &table,
                    &artifact,
                    &px,
                    &py,
                    new_neighbors.as_deref(),
                )?;
                x = Some(px);
                y = Some(py);
                if new_neighbors.is_some() {
                    neighbors = new_neighbors;
                }
            }
            Err(e) => tracing::warn!(error = %e, "Serving without a projection"),
        }
    }

    let (table, id) = with_row_index(&table)?;
    let metadata = DatasetMetadata {
        columns: ColumnRoles {
            id,
            text: args.text.clone(),
            embedding: x.zip(y).map(|(x, y)| EmbeddingColumns { x, y }),
            neighbors,
        },
    };

    let inputs: Vec<String> = args.inputs.iter().map(|p| p.display().to_string()).collect();
    let identifier = DatasetStore::identifier_for(&inputs, &metadata)?;
    let session_dir = SessionCache::new(&config.cache_root).dataset_dir(identifier.as_str());
    Ok(DatasetStore::new(identifier, table, metadata, session_dir)?)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
