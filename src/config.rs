use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use visage_core::{EngineConfig, StoreConfig, DEFAULT_DIM};

/// Where entities are made durable
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageKind {
    /// SQLite database (`persons` table)
    Sqlite,
    /// Append-only binary log file
    Log,
    /// Nothing is persisted
    Memory,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub storage: StorageKind,
    pub db_path: PathBuf,
    pub capacity: usize,
    pub dim: usize,
    pub threads: usize,
    pub sequential_threshold: usize,
    pub default_top_n: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        let store = StoreConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            storage: StorageKind::Sqlite,
            db_path: PathBuf::from("./persons.db"),
            capacity: store.capacity,
            dim: DEFAULT_DIM,
            threads: engine.threads,
            sequential_threshold: engine.sequential_threshold,
            default_top_n: 3,
        }
    }
}

impl ServerConfig {
    /// Reject settings the server cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.default_top_n == 0 {
            bail!("default_top_n must be > 0");
        }
        if self.dim == 0 {
            bail!("dim must be > 0");
        }
        if self.threads == 0 {
            bail!("threads must be > 0");
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            capacity: self.capacity,
            dim: self.dim,
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            threads: self.threads,
            sequential_threshold: self.sequential_threshold,
        }
    }
}
