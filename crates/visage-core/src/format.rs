//! Durable encodings
//!
//! # Feature blob
//!
//! A feature vector is stored as exactly `D` consecutive IEEE-754 doubles in
//! little-endian byte order, `D * 8` bytes in total. Both the SQLite and the
//! log backend use this blob.
//!
//! # Log file
//!
//! ```text
//! Offset   Size    Type        Description
//! ─────────────────────────────────────────────
//! 0x00     8       [u8; 8]     Magic: "VISLOG01"
//! 0x08     4       u32 LE      D: Dimensions
//! 0x0C     4       u32 LE      Reserved (0)
//! 0x10     ...     records
//!
//! Record:
//!          4       u32 LE      L: name length in bytes
//!          L       [u8]        UTF-8 name
//!          D*8     [f64]       Feature blob
//! ```

use std::io;

use thiserror::Error;

pub use crate::entity::MAX_NAME_LEN;
use crate::entity::Entity;

/// Magic bytes identifying a log file: "VISLOG01"
pub const MAGIC: [u8; 8] = *b"VISLOG01";

/// Header size in bytes: 8 (magic) + 4 (dims) + 4 (reserved) = 16
pub const HEADER_SIZE: usize = 16;

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("Invalid magic bytes: expected VISLOG01")]
    InvalidMagic,

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Dimension {0} does not fit the log header")]
    DimensionTooLarge(usize),

    #[error("Feature blob length {actual} is not {expected} bytes")]
    BlobLength { expected: usize, actual: usize },

    #[error("Record name length {0} exceeds limit")]
    NameTooLong(usize),

    #[error("Record name is not valid UTF-8")]
    InvalidName,

    #[error("Truncated record at offset {offset}")]
    Truncated { offset: usize },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Encode a feature vector into its `D * 8` byte blob.
pub fn encode_features(features: &[f64]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(std::mem::size_of_val(features));
    for &value in features {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode a blob produced by [`encode_features`], requiring exactly `dim` values.
pub fn decode_features(blob: &[u8], dim: usize) -> Result<Vec<f64>, FormatError> {
    let expected = dim * std::mem::size_of::<f64>();
    if blob.len() != expected {
        return Err(FormatError::BlobLength {
            expected,
            actual: blob.len(),
        });
    }

    Ok(blob
        .chunks_exact(8)
        .map(|chunk| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            f64::from_le_bytes(raw)
        })
        .collect())
}

/// Parsed log file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogHeader {
    pub dimensions: u32,
}

impl LogHeader {
    pub fn new(dim: usize) -> Result<Self, FormatError> {
        let dimensions = u32::try_from(dim).map_err(|_| FormatError::DimensionTooLarge(dim))?;
        Ok(Self { dimensions })
    }

    /// Parse header from the first 16 bytes of a log file
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FormatError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "File too small for header",
            )));
        }

        if bytes[0..8] != MAGIC {
            return Err(FormatError::InvalidMagic);
        }

        let mut dims = [0u8; 4];
        dims.copy_from_slice(&bytes[8..12]);
        Ok(Self {
            dimensions: u32::from_le_bytes(dims),
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(&MAGIC);
        buf[8..12].copy_from_slice(&self.dimensions.to_le_bytes());
        buf
    }
}

/// Encode one log record.
///
/// Names longer than [`MAX_NAME_LEN`] are refused here so nothing is written
/// that [`scan_log`] would reject on the next open.
pub fn encode_record(entity: &Entity) -> Result<Vec<u8>, FormatError> {
    let name = entity.name.as_bytes();
    if name.len() > MAX_NAME_LEN {
        return Err(FormatError::NameTooLong(name.len()));
    }
    let mut buf = Vec::with_capacity(4 + name.len() + entity.features.len() * 8);
    buf.extend_from_slice(&(name.len() as u32).to_le_bytes());
    buf.extend_from_slice(name);
    buf.extend_from_slice(&encode_features(&entity.features));
    Ok(buf)
}

/// Result of scanning the record region of a log file.
#[derive(Debug)]
pub struct ScannedLog {
    pub entities: Vec<Entity>,
    /// Byte offset (relative to the file start) just past the last complete record.
    pub valid_len: usize,
    /// Whether trailing bytes were found that do not form a complete record.
    pub torn_tail: bool,
}

/// Decode every complete record in `bytes`, which must start at the header.
///
/// An incomplete final record is reported through `torn_tail` instead of an
/// error. Corruption inside a complete record is still an error.
pub fn scan_log(bytes: &[u8], dim: usize) -> Result<ScannedLog, FormatError> {
    let header = LogHeader::from_bytes(bytes)?;
    if header.dimensions as usize != dim {
        return Err(FormatError::DimensionMismatch {
            expected: dim,
            actual: header.dimensions as usize,
        });
    }

    let blob_len = dim * 8;
    let mut entities = Vec::new();
    let mut offset = HEADER_SIZE;

    while offset < bytes.len() {
        let rest = &bytes[offset..];
        if rest.len() < 4 {
            break;
        }
        let mut len_raw = [0u8; 4];
        len_raw.copy_from_slice(&rest[0..4]);
        let name_len = u32::from_le_bytes(len_raw) as usize;
        if name_len > MAX_NAME_LEN {
            return Err(FormatError::NameTooLong(name_len));
        }

        let record_len = 4 + name_len + blob_len;
        if rest.len() < record_len {
            break;
        }

        let name = std::str::from_utf8(&rest[4..4 + name_len])
            .map_err(|_| FormatError::InvalidName)?
            .to_string();
        let features = decode_features(&rest[4 + name_len..record_len], dim)?;
        entities.push(Entity { name, features });
        offset += record_len;
    }

    Ok(ScannedLog {
        entities,
        valid_len: offset,
        torn_tail: offset < bytes.len(),
    })
}
