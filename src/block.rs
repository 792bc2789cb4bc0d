//! Block framing.
//!
//! Version 1 (uncompressed):
//!
//! ```text
//! RECORD_COUNT (varint) | ENCODED_RECORDS | SYNC (16)
//! ```
//!
//! Version 2 (codec-tagged):
//!
//! ```text
//! RECORD_COUNT (varint) | PAYLOAD_SIZE (varint) | PAYLOAD | CRC32 (4, LE) | SYNC (16)
//! ```
//!
//! `PAYLOAD` is the concatenated record encodings compressed with the file's
//! codec; the CRC32 covers the compressed bytes.  In both versions the
//! terminal block written on close is just `0 | SYNC`.
//!
//! All readers here work on a byte slice and return the number of bytes
//! they consumed.  `Truncated` always means the slice ended too early, so a
//! streaming caller can pull more input and try again.

use byteorder::{ByteOrder, LittleEndian};
use crc32fast::Hasher;
use thiserror::Error;

use crate::binary::varint::{read_long, write_long};
use crate::binary::DecodeError;
use crate::codec::{Codec, CodecError};
use crate::header::{Header, SyncMarker, SYNC_SIZE, VERSION_CODEC};

#[derive(Error, Debug)]
pub enum BlockError {
    #[error("Block is truncated")]
    Truncated,
    /// `position` is relative to the start of the parsed slice.
    #[error("Sync marker mismatch")]
    SyncMarkerMismatch { position: usize },
    #[error("Invalid block: {0}")]
    InvalidEncoding(String),
    #[error("Block checksum mismatch: stored {stored:08x}, computed {computed:08x}")]
    ChecksumMismatch { stored: u32, computed: u32 },
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

impl From<DecodeError> for BlockError {
    fn from(e: DecodeError) -> Self {
        match e {
            DecodeError::Truncated => BlockError::Truncated,
            DecodeError::InvalidEncoding(r) => BlockError::InvalidEncoding(r),
        }
    }
}

pub fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

// ── Writing ──────────────────────────────────────────────────────────────────

/// Frame `count` encoded records as one block of the file described by
/// `header`.
pub fn encode_block(
    header:  &Header,
    codec:   &dyn Codec,
    level:   i32,
    count:   u64,
    records: &[u8],
) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(records.len() + 32);
    write_long(&mut out, count as i64);
    if header.version == VERSION_CODEC {
        let payload = codec.compress(records, level)?;
        write_long(&mut out, payload.len() as i64);
        out.extend_from_slice(&payload);
        let mut crc = [0u8; 4];
        LittleEndian::write_u32(&mut crc, checksum(&payload));
        out.extend_from_slice(&crc);
    } else {
        out.extend_from_slice(records);
    }
    out.extend_from_slice(&header.sync);
    Ok(out)
}

/// The empty block that marks the end of the data.
pub fn encode_terminal(header: &Header) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + SYNC_SIZE);
    write_long(&mut out, 0);
    out.extend_from_slice(&header.sync);
    out
}

// ── Reading ──────────────────────────────────────────────────────────────────

/// Record count of a block.  Zero marks the terminal block.
pub fn read_count(input: &[u8]) -> Result<(u64, usize), BlockError> {
    let (count, used) = read_long(input)?;
    let count = u64::try_from(count)
        .map_err(|_| BlockError::InvalidEncoding(format!("negative record count {count}")))?;
    Ok((count, used))
}

/// Check the sync marker at the front of `input`.
pub fn read_sync(input: &[u8], sync: &SyncMarker) -> Result<usize, BlockError> {
    let marker = input.get(..SYNC_SIZE).ok_or(BlockError::Truncated)?;
    if marker != sync {
        return Err(BlockError::SyncMarkerMismatch { position: 0 });
    }
    Ok(SYNC_SIZE)
}

/// A version 2 block whose checksum and sync marker have been verified.
#[derive(Debug)]
pub struct Frame {
    pub count:   u64,
    /// Compressed payload; empty for the terminal block.
    pub payload: Vec<u8>,
}

/// Read one whole version 2 block.
pub fn read_frame(input: &[u8], sync: &SyncMarker) -> Result<(Frame, usize), BlockError> {
    let (count, mut pos) = read_count(input)?;
    let mut payload = Vec::new();
    if count > 0 {
        let (size, used) = read_long(&input[pos..])?;
        pos += used;
        let size = usize::try_from(size)
            .map_err(|_| BlockError::InvalidEncoding(format!("negative payload size {size}")))?;
        let end = pos.checked_add(size).ok_or(BlockError::Truncated)?;
        let body = input.get(pos..end).ok_or(BlockError::Truncated)?;
        let stored = input.get(end..end + 4).map(LittleEndian::read_u32).ok_or(BlockError::Truncated)?;
        let computed = checksum(body);
        // the payload is only trusted once the marker behind it matches too
        let marker_at = end + 4;
        read_sync(&input[marker_at..], sync)
            .map_err(|e| shift(e, marker_at))?;
        if stored != computed {
            return Err(BlockError::ChecksumMismatch { stored, computed });
        }
        payload.extend_from_slice(body);
        pos = marker_at;
    } else {
        read_sync(&input[pos..], sync).map_err(|e| shift(e, pos))?;
    }
    Ok((Frame { count, payload }, pos + SYNC_SIZE))
}

/// Decompress a verified frame's payload.
pub fn decode_payload(frame: &Frame, codec: &dyn Codec) -> Result<Vec<u8>, BlockError> {
    if frame.payload.is_empty() {
        return Ok(Vec::new());
    }
    Ok(codec.decompress(&frame.payload)?)
}

fn shift(e: BlockError, by: usize) -> BlockError {
    match e {
        BlockError::SyncMarkerMismatch { position } => BlockError::SyncMarkerMismatch { position: position + by },
        other => other,
    }
}
