//! Visage Core – bounded entity store, feature codec and exact cosine ranking
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     SimilarityEngine                        │
//! │      parallel cosine scoring · deterministic top-N          │
//! ├─────────────────────────────────────────────────────────────┤
//! │                       VectorStore                           │
//! │    capacity bound · RwLock snapshots · persist-then-commit  │
//! ├─────────────────────────────────────────────────────────────┤
//! │           Backend (memory · append-only log file)           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod backend;
pub mod engine;
pub mod entity;
pub mod format;
pub mod simd;
pub mod store;

pub use backend::{Backend, BackendError, LogBackend, MemoryBackend};
pub use engine::{EngineConfig, SimilarityEngine};
pub use entity::{Entity, MatchResult, ValidationError, DEFAULT_DIM, MAX_NAME_LEN};
pub use simd::cosine_similarity;
pub use store::{StoreConfig, StoreError, VectorStore};
