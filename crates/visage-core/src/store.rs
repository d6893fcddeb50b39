//! Bounded in-memory entity store
//!
//! The store owns the authoritative collection and hands readers independent
//! snapshots.
//!
//! # Concurrency Model
//!
//! - **Readers** (`snapshot`, `count`) take the entity `RwLock` in shared
//!   mode and copy out before releasing it.
//! - **Writers** (`add`) are serialized by the `commit` mutex, which is held
//!   across capacity check, backend append and in-memory push. The entity
//!   lock is taken exclusively only for the push itself, so readers are not
//!   blocked while a write is being made durable.
//!
//! A reader therefore sees either the state before or after an `add`, and the
//! in-memory view never contains an entity whose append failed.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use crate::backend::{Backend, BackendError};
use crate::entity::{Entity, ValidationError, DEFAULT_DIM};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid entity: {0}")]
    Validation(#[from] ValidationError),

    #[error("Store is full: capacity of {capacity} entities reached")]
    Capacity { capacity: usize },

    #[error("Persistence failed: {0}")]
    Persistence(#[from] BackendError),
}

#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    /// Maximum number of entities
    pub capacity: usize,
    /// Feature vector length
    pub dim: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            dim: DEFAULT_DIM,
        }
    }
}

pub struct VectorStore {
    config: StoreConfig,
    backend: Arc<dyn Backend>,
    entities: RwLock<Vec<Arc<Entity>>>,
    commit: Mutex<()>,
}

impl VectorStore {
    /// Create the store and hydrate it from `backend`.
    ///
    /// Any load failure is fatal: the store refuses to start from an unknown
    /// state.
    pub fn open(backend: Arc<dyn Backend>, config: StoreConfig) -> Result<Self, StoreError> {
        let loaded = backend.load_all()?;

        if loaded.len() > config.capacity {
            tracing::error!(
                "Backend holds {} entities, more than the configured capacity {}",
                loaded.len(),
                config.capacity
            );
            return Err(StoreError::Capacity {
                capacity: config.capacity,
            });
        }

        let mut entities = Vec::with_capacity(loaded.len());
        for (position, entity) in loaded.into_iter().enumerate() {
            if let Err(err) = entity.validate(config.dim) {
                return Err(StoreError::Persistence(BackendError::other(format!(
                    "persisted entity #{position} ({:?}) is invalid: {err}",
                    entity.name
                ))));
            }
            entities.push(Arc::new(entity));
        }

        tracing::info!(
            "Loaded {} entities (dim={}, capacity={})",
            entities.len(),
            config.dim,
            config.capacity
        );

        Ok(Self {
            config,
            backend,
            entities: RwLock::new(entities),
            commit: Mutex::new(()),
        })
    }

    /// Persist `entity`, then make it visible to readers.
    pub fn add(&self, entity: Entity) -> Result<(), StoreError> {
        entity.validate(self.config.dim)?;

        let _commit = self.commit.lock();

        if self.entities.read().len() >= self.config.capacity {
            return Err(StoreError::Capacity {
                capacity: self.config.capacity,
            });
        }

        if let Err(err) = self.backend.append(&entity) {
            tracing::warn!("Failed to persist entity {:?}: {}", entity.name, err);
            return Err(err.into());
        }

        self.entities.write().push(Arc::new(entity));
        Ok(())
    }

    /// Point-in-time copy of the collection, in insertion order.
    pub fn snapshot(&self) -> Vec<Arc<Entity>> {
        self.entities.read().clone()
    }

    pub fn count(&self) -> usize {
        self.entities.read().len()
    }

    pub fn is_full(&self) -> bool {
        self.count() >= self.config.capacity
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn dim(&self) -> usize {
        self.config.dim
    }
}
