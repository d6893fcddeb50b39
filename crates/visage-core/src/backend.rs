//! Persistence backends
//!
//! The store delegates durability to a [`Backend`]: `load_all` runs once when
//! the store is opened, `append` runs inside every `VectorStore::add` before
//! the entity becomes visible in memory.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use thiserror::Error;

use crate::entity::Entity;
use crate::format::{encode_record, scan_log, FormatError, LogHeader, HEADER_SIZE};

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl BackendError {
    /// Wrap an error from a backend implemented outside this crate.
    pub fn other<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Other(err.into())
    }
}

/// Durable record storage consumed by `VectorStore`.
pub trait Backend: Send + Sync {
    /// Load every persisted entity in insertion order.
    fn load_all(&self) -> Result<Vec<Entity>, BackendError>;

    /// Durably persist one entity.
    fn append(&self, entity: &Entity) -> Result<(), BackendError>;
}

/// Volatile backend; nothing survives the process.
#[derive(Default)]
pub struct MemoryBackend {
    entities: Mutex<Vec<Entity>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from previously "persisted" entities.
    pub fn with_entities(entities: Vec<Entity>) -> Self {
        Self {
            entities: Mutex::new(entities),
        }
    }

    pub fn entities(&self) -> Vec<Entity> {
        self.entities.lock().clone()
    }
}

impl Backend for MemoryBackend {
    fn load_all(&self) -> Result<Vec<Entity>, BackendError> {
        Ok(self.entities.lock().clone())
    }

    fn append(&self, entity: &Entity) -> Result<(), BackendError> {
        self.entities.lock().push(entity.clone());
        Ok(())
    }
}

struct LogWriter {
    file: File,
    len: u64,
}

/// Append-only log file backend
///
/// Every append is flushed and `sync_data`'d before it returns. A record torn
/// by a crash mid-append is truncated on the next open: that entity was never
/// committed to memory, so dropping it keeps disk and memory in agreement.
pub struct LogBackend {
    path: PathBuf,
    dim: usize,
    writer: Mutex<LogWriter>,
}

impl LogBackend {
    /// Open or create the log at `path` for vectors of dimension `dim`.
    pub fn open<P: AsRef<Path>>(path: P, dim: usize) -> Result<Self, BackendError> {
        let path = path.as_ref().to_path_buf();
        let header = LogHeader::new(dim)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let existing = file.metadata()?.len();

        let len = if existing == 0 {
            file.write_all(&header.to_bytes())?;
            file.sync_all()?;
            tracing::info!("Created entity log {:?} (dim={})", path, dim);
            HEADER_SIZE as u64
        } else {
            let bytes = std::fs::read(&path)?;
            let scanned = scan_log(&bytes, dim)?;
            if scanned.torn_tail {
                tracing::warn!(
                    "Entity log {:?} has a torn trailing record ({} bytes); truncating",
                    path,
                    bytes.len() - scanned.valid_len
                );
                file.set_len(scanned.valid_len as u64)?;
                file.sync_all()?;
            }
            scanned.valid_len as u64
        };

        Ok(Self {
            path,
            dim,
            writer: Mutex::new(LogWriter { file, len }),
        })
    }
}

impl Backend for LogBackend {
    fn load_all(&self) -> Result<Vec<Entity>, BackendError> {
        // Hold the writer lock so no append interleaves with the read.
        let _writer = self.writer.lock();
        let bytes = std::fs::read(&self.path)?;
        let scanned = scan_log(&bytes, self.dim)?;
        Ok(scanned.entities)
    }

    fn append(&self, entity: &Entity) -> Result<(), BackendError> {
        if entity.features.len() != self.dim {
            return Err(FormatError::DimensionMismatch {
                expected: self.dim,
                actual: entity.features.len(),
            }
            .into());
        }

        let record = encode_record(entity)?;
        let mut writer = self.writer.lock();
        let start = writer.len;

        let result = (|| -> io::Result<()> {
            use std::io::{Seek, SeekFrom};
            writer.file.seek(SeekFrom::Start(start))?;
            writer.file.write_all(&record)?;
            writer.file.sync_data()
        })();

        match result {
            Ok(()) => {
                writer.len = start + record.len() as u64;
                Ok(())
            }
            Err(err) => {
                // Roll back a partial write so later appends stay aligned.
                if let Err(rollback) = writer.file.set_len(start) {
                    tracing::error!(
                        "Failed to roll back entity log {:?} to {} bytes: {}",
                        self.path,
                        start,
                        rollback
                    );
                }
                Err(err.into())
            }
        }
    }
}
