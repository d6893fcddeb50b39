//! Visage-DB CLI
//!
//! Exact cosine-similarity search over a bounded, persistent entity store.
//!
//! # Usage
//!
//! ```bash
//! # Start the server on the default SQLite catalog
//! visage-db serve --db ./persons.db --port 8080
//!
//! # Bulk-load entities from JSON
//! visage-db import --input people.json --db ./persons.db
//!
//! # Query a running server
//! visage-db search --query "0.1,0.2,..." --top-n 5
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use visage_db::model::{AddPersonRequest, SimilarPersonsResponse};
use visage_db::server::{serve, AppState};
use visage_db::catalog::inspect_store;
use visage_db::{open_backend, ServerConfig, StorageKind};
use visage_core::{Entity, SimilarityEngine, StoreConfig, StoreError, VectorStore};

#[derive(Parser)]
#[command(name = "visage-db")]
#[command(about = "Exact cosine-similarity search over a bounded, persistent entity store")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct StorageArgs {
    /// Persistence backend
    #[arg(long, value_enum, default_value = "sqlite")]
    storage: StorageKind,

    /// Path to the SQLite database or entity log
    #[arg(long, default_value = "./persons.db")]
    db: PathBuf,

    /// Feature vector length
    #[arg(long, default_value = "256")]
    dim: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        #[command(flatten)]
        storage: StorageArgs,

        /// Server port
        #[arg(short, long, default_value = "8080")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Maximum number of stored entities
        #[arg(long, default_value = "10000")]
        capacity: usize,

        /// Scoring threads (defaults to half the available cores, at most 4)
        #[arg(long)]
        threads: Option<usize>,

        /// Snapshots smaller than this are scored on a single thread
        #[arg(long, default_value = "512")]
        sequential_threshold: usize,

        /// top_n used when a query does not specify one
        #[arg(long, default_value = "3")]
        default_top_n: usize,
    },

    /// Display statistics about a store (read-only)
    Stats {
        #[command(flatten)]
        storage: StorageArgs,
    },

    /// Add entities from a JSON file
    ///
    /// Input format: JSON array of {"name": "...", "features": [0.1, ...]}
    Import {
        #[command(flatten)]
        storage: StorageArgs,

        /// Input JSON file
        #[arg(short, long)]
        input: PathBuf,

        /// Maximum number of stored entities
        #[arg(long, default_value = "10000")]
        capacity: usize,
    },

    /// Query a running server for similar entities
    Search {
        /// Server URL
        #[arg(long, default_value = "http://localhost:8080")]
        server: String,

        /// Query vector (comma separated floats)
        #[arg(short, long, value_parser = parse_vector)]
        query: QueryVector,

        /// Number of results
        #[arg(short = 'n', long, default_value = "3")]
        top_n: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            storage,
            port,
            host,
            capacity,
            threads,
            sequential_threshold,
            default_top_n,
        } => {
            let defaults = ServerConfig::default();
            let config = ServerConfig {
                host,
                port,
                storage: storage.storage,
                db_path: storage.db,
                capacity,
                dim: storage.dim,
                threads: threads.unwrap_or(defaults.threads),
                sequential_threshold,
                default_top_n,
            };
            config.validate()?;

            tracing::info!(
                "Opening {:?} storage at {:?}",
                config.storage,
                config.db_path
            );
            let backend = open_backend(config.storage, &config.db_path, config.dim)?;
            let store = Arc::new(
                VectorStore::open(backend, config.store_config())
                    .context("loading persisted entities")?,
            );
            let engine = Arc::new(
                SimilarityEngine::new(config.engine_config()).context("building scoring pool")?,
            );
            tracing::info!(
                "Store ready: {}/{} entities of dimension {}, {} scoring threads",
                store.count(),
                store.capacity(),
                store.dim(),
                config.threads
            );

            let state = Arc::new(AppState::new(store, engine, config.default_top_n));
            serve(state, config.socket_addr()?).await?;
        }

        Commands::Stats { storage } => {
            let stats = inspect_store(storage.storage, &storage.db, storage.dim)?;
            println!("Store: {:?} ({:?})", storage.db, storage.storage);
            println!("  Entities: {}", stats.entities);
            println!("  Dimensions: {}", stats.dim);
            if let Some(name) = stats.invalid {
                println!("  Warning: entity {:?} fails validation", name);
            }
            if stats.torn_tail_bytes > 0 {
                println!(
                    "  Warning: {} trailing bytes form no complete record (dropped on next serve)",
                    stats.torn_tail_bytes
                );
            }
        }

        Commands::Import {
            storage,
            input,
            capacity,
        } => {
            tracing::info!("Reading entities from {:?}", input);
            let file = std::fs::File::open(&input)
                .with_context(|| format!("opening {:?}", input))?;
            let records: Vec<AddPersonRequest> =
                serde_json::from_reader(std::io::BufReader::new(file))?;
            if records.is_empty() {
                anyhow::bail!("No entities found in input");
            }

            let backend = open_backend(storage.storage, &storage.db, storage.dim)?;
            let store = VectorStore::open(
                backend,
                StoreConfig {
                    capacity,
                    dim: storage.dim,
                },
            )?;

            let total = records.len();
            let progress_interval = (total / 10).max(1);
            let mut added = 0usize;
            for (i, record) in records.into_iter().enumerate() {
                let entity = Entity::from(record);
                match store.add(entity) {
                    Ok(()) => added += 1,
                    Err(StoreError::Validation(e)) => {
                        tracing::warn!("Skipping entity #{}: {}", i, e);
                    }
                    Err(e @ StoreError::Capacity { .. }) => {
                        tracing::warn!("Stopping import at entity #{}: {}", i, e);
                        break;
                    }
                    Err(e) => return Err(e.into()),
                }

                if i % progress_interval == 0 {
                    tracing::info!("Importing: {}/{}", i + 1, total);
                }
            }
            tracing::info!(
                "Imported {} of {} entities ({} stored)",
                added,
                total,
                store.count()
            );
        }

        Commands::Search {
            server,
            query,
            top_n,
        } => {
            let client = reqwest::Client::new();
            let url = format!("{}/get_similar_person", server.trim_end_matches('/'));

            let mut params: Vec<(&str, String)> =
                query.0.iter().map(|f| ("features", f.to_string())).collect();
            params.push(("top_n", top_n.to_string()));

            let response = client.get(&url).query(&params).send().await?;

            if !response.status().is_success() {
                let error: serde_json::Value = response.json().await?;
                eprintln!("Error: {}", error);
                std::process::exit(1);
            }

            let result: SimilarPersonsResponse = response.json().await?;
            println!("Results:");
            for m in result.persons {
                println!("  {}: {:.4}", m.person.name, m.score);
            }
        }
    }

    Ok(())
}

#[derive(Clone, Debug)]
struct QueryVector(Vec<f64>);

fn parse_vector(s: &str) -> Result<QueryVector, String> {
    s.split(',')
        .map(|v| v.trim().parse::<f64>().map_err(|e| e.to_string()))
        .collect::<Result<Vec<_>, _>>()
        .map(QueryVector)
}
