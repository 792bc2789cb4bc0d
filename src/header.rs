//! Container file header.
//!
//! ```text
//! MAGIC "RBOX" (4) | VERSION (1) | SCHEMA_BLOB | [CODEC_UUID (16)] | SYNC (16)
//! ```
//!
//! `SCHEMA_BLOB` is a zig-zag varint byte length followed by the schema as
//! UTF-8 JSON.  Version 1 files are uncompressed and carry no codec tag.
//! Version 2 files name the block codec by its frozen UUID (see
//! [`crate::codec`]) and use checksummed block framing (see [`crate::block`]).
//! The sync marker closes every block and is what recovery scans for.

use std::io::{self, Cursor, Read, Write};
use std::sync::Arc;

use byteorder::ReadBytesExt;
use thiserror::Error;
use uuid::Uuid;

use crate::binary::varint::{read_long, write_long};
use crate::binary::DecodeError;
use crate::codec::{get_codec_by_uuid, CodecError, CodecId};
use crate::schema::{Schema, SchemaError};

pub const MAGIC: &[u8; 4] = b"RBOX";
/// Uncompressed layout.
pub const VERSION_PLAIN: u8 = 1;
/// Codec-tagged layout with checksummed blocks.
pub const VERSION_CODEC: u8 = 2;
pub const SYNC_SIZE: usize = 16;
/// Largest schema blob a reader accepts.
pub const MAX_SCHEMA_LEN: usize = 16 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("Header is truncated")]
    Truncated,
    #[error("Invalid magic number")]
    InvalidMagic,
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u8),
    #[error("Invalid schema blob: {0}")]
    InvalidSchemaBlob(String),
    #[error("Embedded schema: {0}")]
    Schema(#[from] SchemaError),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

pub type SyncMarker = [u8; SYNC_SIZE];

#[derive(Debug, Clone)]
pub struct Header {
    pub version: u8,
    pub schema:  Arc<Schema>,
    pub codec:   CodecId,
    pub sync:    SyncMarker,
}

impl Header {
    /// Header with a fresh random sync marker.
    pub fn new(schema: Arc<Schema>, codec: CodecId) -> Self {
        Self::with_sync(schema, codec, Uuid::new_v4().into_bytes())
    }

    pub fn with_sync(schema: Arc<Schema>, codec: CodecId, sync: SyncMarker) -> Self {
        let version = if codec == CodecId::None { VERSION_PLAIN } else { VERSION_CODEC };
        Self { version, schema, codec, sync }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let blob = self.schema.to_json().to_string();
        let mut out = Vec::with_capacity(4 + 1 + 10 + blob.len() + 2 * SYNC_SIZE);
        out.extend_from_slice(MAGIC);
        out.push(self.version);
        write_long(&mut out, blob.len() as i64);
        out.extend_from_slice(blob.as_bytes());
        if self.version == VERSION_CODEC {
            out.extend_from_slice(&self.codec.uuid());
        }
        out.extend_from_slice(&self.sync);
        out
    }

    /// Write the header, returning its length in bytes.
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<usize> {
        let bytes = self.to_bytes();
        writer.write_all(&bytes)?;
        Ok(bytes.len())
    }

    /// Parse a header from the front of `input`.  Returns the header and
    /// its length.  [`HeaderError::Truncated`] means `input` ends before
    /// the header does.
    pub fn parse(input: &[u8]) -> Result<(Header, usize), HeaderError> {
        let mut cur = Cursor::new(input);

        let mut magic = [0u8; 4];
        cur.read_exact(&mut magic).map_err(eof)?;
        if &magic != MAGIC {
            return Err(HeaderError::InvalidMagic);
        }
        let version = cur.read_u8().map_err(eof)?;
        if version != VERSION_PLAIN && version != VERSION_CODEC {
            return Err(HeaderError::UnsupportedVersion(version));
        }

        let mut pos = cur.position() as usize;
        let (len, used) = read_long(&input[pos..]).map_err(|e| match e {
            DecodeError::Truncated => HeaderError::Truncated,
            DecodeError::InvalidEncoding(r) => HeaderError::InvalidSchemaBlob(r),
        })?;
        pos += used;
        let len = usize::try_from(len)
            .ok()
            .filter(|&n| n <= MAX_SCHEMA_LEN)
            .ok_or_else(|| HeaderError::InvalidSchemaBlob(format!("bad length {len}")))?;
        let blob = input.get(pos..pos + len).ok_or(HeaderError::Truncated)?;
        let text = std::str::from_utf8(blob)
            .map_err(|e| HeaderError::InvalidSchemaBlob(e.to_string()))?;
        let schema = Schema::parse(text)?;
        pos += len;

        let mut cur = Cursor::new(&input[pos..]);
        let codec = if version == VERSION_CODEC {
            let mut uuid = [0u8; 16];
            cur.read_exact(&mut uuid).map_err(eof)?;
            get_codec_by_uuid(&uuid)?.codec_id()
        } else {
            CodecId::None
        };
        let mut sync = [0u8; SYNC_SIZE];
        cur.read_exact(&mut sync).map_err(eof)?;
        pos += cur.position() as usize;

        let header = Header { version, schema: Arc::new(schema), codec, sync };
        Ok((header, pos))
    }
}

fn eof(_: io::Error) -> HeaderError {
    HeaderError::Truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::parse(r#"{"type":"record","name":"P","fields":[{"name":"x","type":"long"}]}"#).unwrap())
    }

    #[test]
    fn plain_header_layout() {
        let h = Header::with_sync(schema(), CodecId::None, [7u8; SYNC_SIZE]);
        let bytes = h.to_bytes();
        assert_eq!(&bytes[..4], MAGIC);
        assert_eq!(bytes[4], VERSION_PLAIN);
        assert_eq!(&bytes[bytes.len() - SYNC_SIZE..], &[7u8; SYNC_SIZE]);

        let (back, used) = Header::parse(&bytes).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(back.version, VERSION_PLAIN);
        assert_eq!(back.codec, CodecId::None);
        assert_eq!(back.sync, [7u8; SYNC_SIZE]);
        assert!(back.schema.is_same(&h.schema));
    }

    #[test]
    fn codec_header_carries_uuid() {
        let h = Header::new(schema(), CodecId::Zstd);
        assert_eq!(h.version, VERSION_CODEC);
        let bytes = h.to_bytes();
        let (back, used) = Header::parse(&bytes).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(back.codec, CodecId::Zstd);
        assert_eq!(back.sync, h.sync);
    }

    #[test]
    fn every_prefix_is_truncated() {
        for codec in [CodecId::None, CodecId::Lz4] {
            let bytes = Header::new(schema(), codec).to_bytes();
            for cut in 0..bytes.len() {
                assert!(
                    matches!(Header::parse(&bytes[..cut]), Err(HeaderError::Truncated)),
                    "{codec} cut at {cut}"
                );
            }
        }
    }

    #[test]
    fn rejects_bad_magic_version_and_codec() {
        let mut bytes = Header::new(schema(), CodecId::Zstd).to_bytes();
        let mut bad = bytes.clone();
        bad[0] = b'X';
        assert!(matches!(Header::parse(&bad), Err(HeaderError::InvalidMagic)));
        let mut bad = bytes.clone();
        bad[4] = 9;
        assert!(matches!(Header::parse(&bad), Err(HeaderError::UnsupportedVersion(9))));

        let uuid_at = bytes.len() - 2 * SYNC_SIZE;
        bytes[uuid_at] ^= 0xff;
        assert!(matches!(
            Header::parse(&bytes),
            Err(HeaderError::Codec(CodecError::UnavailableCodec { .. }))
        ));
    }
}
