//! Container files: a header followed by sync-marker-framed blocks of
//! encoded records.
//!
//! ```no_run
//! use std::sync::Arc;
//! use recbox::container::{Reader, Writer};
//! use recbox::record::Record;
//! use recbox::schema::Schema;
//!
//! let schema = Arc::new(Schema::from_path("demos/user.avsc")?);
//! let mut user = Record::new(Arc::clone(&schema));
//! user.set("name", "India")?;
//!
//! let mut writer = Writer::create(Arc::clone(&schema), Vec::new())?;
//! writer.append(&user.finalize()?)?;
//! let bytes = writer.into_inner()?;
//!
//! for record in Reader::open(bytes.as_slice())? {
//!     println!("{}", record?);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! The byte layout is documented in [`crate::header`] and [`crate::block`].

use std::io;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::binary::{DecodeError, EncodeError};
use crate::block::BlockError;
use crate::codec::{CodecError, CodecId};
use crate::header::{HeaderError, SyncMarker};
use crate::record::RecordError;
use crate::schema::{Schema, SchemaError};

mod input;
mod reader;
mod writer;

pub use reader::{Reader, ReaderState};
pub use writer::{Writer, WriterState};

/// Default uncompressed block size: 64 KiB.
pub const DEFAULT_BLOCK_SIZE:        usize = 64 * 1024;
/// Default compression level for codecs that take one.
pub const DEFAULT_COMPRESSION_LEVEL: i32   = 3;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("Corrupt header: {0}")]
    HeaderCorrupt(String),
    #[error("Sync marker mismatch at offset {offset}")]
    SyncMarkerMismatch { offset: u64 },
    #[error("Input truncated at offset {offset}")]
    Truncated { offset: u64 },
    #[error("Invalid encoding at offset {offset}: {reason}")]
    InvalidEncoding { offset: u64, reason: String },
    #[error("Record does not match the container schema")]
    SchemaMismatch,
    #[error("Writer is closed")]
    Closed,
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error("Record error: {0}")]
    Record(#[from] RecordError),
    #[error("Encode error: {0}")]
    Encode(EncodeError),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ContainerError {
    /// Errors caused by damaged or incomplete data, as opposed to misuse or
    /// I/O failure.  These are the ones recovery mode skips over.
    pub fn is_data_integrity(&self) -> bool {
        matches!(
            self,
            ContainerError::SyncMarkerMismatch { .. }
                | ContainerError::Truncated { .. }
                | ContainerError::InvalidEncoding { .. }
        )
    }
}

impl From<EncodeError> for ContainerError {
    fn from(e: EncodeError) -> Self {
        match e {
            EncodeError::SchemaMismatch => ContainerError::SchemaMismatch,
            other => ContainerError::Encode(other),
        }
    }
}

/// Wire-level parse failures that can be placed at a file offset.
pub(crate) trait WireError {
    /// The input ended before the item did.
    fn is_truncated(&self) -> bool;
    /// Convert, given the absolute offset of the item being parsed.
    fn at(self, offset: u64) -> ContainerError;
}

impl WireError for DecodeError {
    fn is_truncated(&self) -> bool {
        matches!(self, DecodeError::Truncated)
    }

    fn at(self, offset: u64) -> ContainerError {
        match self {
            DecodeError::Truncated => ContainerError::Truncated { offset },
            DecodeError::InvalidEncoding(reason) => ContainerError::InvalidEncoding { offset, reason },
        }
    }
}

impl WireError for BlockError {
    fn is_truncated(&self) -> bool {
        matches!(self, BlockError::Truncated)
    }

    fn at(self, offset: u64) -> ContainerError {
        match self {
            BlockError::Truncated => ContainerError::Truncated { offset },
            BlockError::SyncMarkerMismatch { position } => {
                ContainerError::SyncMarkerMismatch { offset: offset + position as u64 }
            }
            BlockError::InvalidEncoding(reason) => ContainerError::InvalidEncoding { offset, reason },
            other @ (BlockError::ChecksumMismatch { .. } | BlockError::Codec(_)) => {
                ContainerError::InvalidEncoding { offset, reason: other.to_string() }
            }
        }
    }
}

impl WireError for HeaderError {
    fn is_truncated(&self) -> bool {
        matches!(self, HeaderError::Truncated)
    }

    fn at(self, offset: u64) -> ContainerError {
        match self {
            HeaderError::Truncated => ContainerError::Truncated { offset },
            HeaderError::Codec(e)  => ContainerError::Codec(e),
            other => ContainerError::HeaderCorrupt(other.to_string()),
        }
    }
}

// ── Options ──────────────────────────────────────────────────────────────────

/// Configuration for [`Writer::with_options`].
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Block codec.  Anything but `None` produces a version 2 file.
    pub codec:       CodecId,
    pub level:       i32,
    /// A block is flushed once its encoded records reach this many bytes.
    pub block_size:  usize,
    /// Fixed sync marker; a random one is generated when unset.
    pub sync_marker: Option<SyncMarker>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            codec:       CodecId::None,
            level:       DEFAULT_COMPRESSION_LEVEL,
            block_size:  DEFAULT_BLOCK_SIZE,
            sync_marker: None,
        }
    }
}

/// Configuration for [`Reader::with_options`].
#[derive(Debug, Clone, Default)]
pub struct ReaderOptions {
    /// Skip damaged blocks instead of failing.
    pub recovery:        bool,
    /// Fail the open unless the embedded schema equals this one.
    pub expected_schema: Option<Arc<Schema>>,
}

/// What recovery mode skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryStats {
    pub blocks_skipped:   u64,
    pub bytes_skipped:    u64,
    /// The data ended without a terminal block.
    pub missing_terminal: bool,
}
