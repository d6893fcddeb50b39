//! Visage-DB: exact similarity search over a bounded, persistent entity store
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      HTTP API (axum)                        │
//! │        POST /add_person, GET /get_similar_person            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │        SimilarityEngine (rayon pool, exact cosine)          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ snapshot
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │               VectorStore (bounded, RwLock)                 │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ load_all / append
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │          Backend: SQLite · append-only log · memory         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod catalog;
pub mod config;
pub mod model;
pub mod server;

pub use catalog::{open_backend, SqliteBackend};
pub use config::{ServerConfig, StorageKind};
pub use server::{create_router, serve, AppState};
pub use visage_core::{
    Backend, Entity, MatchResult, SimilarityEngine, StoreConfig, StoreError, VectorStore,
};
