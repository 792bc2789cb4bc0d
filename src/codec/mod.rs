//! Block compression codecs.
//!
//! # Identity rules
//! Every codec is identified by a frozen 16-byte UUID.  The UUID is written
//! into the header of every compressed (format version 2) container file and
//! is the only on-disk identity of the codec.  Uncompressed files (format
//! version 1) carry no codec tag at all.
//!
//! A reader that does not recognise the UUID in a header fails the open with
//! [`CodecError::UnavailableCodec`]; it never guesses a fallback.

use std::io::{Cursor, Read, Write};

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;
use uuid::Uuid;

// ── Frozen codec UUIDs ──────────────────────────────────────────────────────
//
// Never reuse a value, even after a codec is retired.

/// Records stored verbatim.
pub const UUID_NONE:   [u8; 16] = [0u8; 16];
/// Zstandard.  6f1d2c84-93a7-4b51-a0e2-5c8d17f3b946
pub const UUID_ZSTD:   [u8; 16] = [
    0x6f,0x1d,0x2c,0x84, 0x93,0xa7, 0x4b,0x51,
    0xa0,0xe2, 0x5c,0x8d,0x17,0xf3,0xb9,0x46,
];
/// LZ4 block format with a prepended size.  d43a0e7b-28c5-4f96-8b1d-e27c5a09f314
pub const UUID_LZ4:    [u8; 16] = [
    0xd4,0x3a,0x0e,0x7b, 0x28,0xc5, 0x4f,0x96,
    0x8b,0x1d, 0xe2,0x7c,0x5a,0x09,0xf3,0x14,
];
/// Brotli.  1b86f5e2-7d49-4ca3-9e07-43b2d8c61a5f
pub const UUID_BROTLI: [u8; 16] = [
    0x1b,0x86,0xf5,0xe2, 0x7d,0x49, 0x4c,0xa3,
    0x9e,0x07, 0x43,0xb2,0xd8,0xc6,0x1a,0x5f,
];
/// LZMA.  a25c9f13-6e08-4d7b-b4f8-0d61e93a27c5
pub const UUID_LZMA:   [u8; 16] = [
    0xa2,0x5c,0x9f,0x13, 0x6e,0x08, 0x4d,0x7b,
    0xb4,0xf8, 0x0d,0x61,0xe9,0x3a,0x27,0xc5,
];

// ── CodecId ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecId {
    None,
    Zstd,
    Lz4,
    Brotli,
    Lzma,
}

impl CodecId {
    pub const ALL: [CodecId; 5] = [
        CodecId::None, CodecId::Zstd, CodecId::Lz4, CodecId::Brotli, CodecId::Lzma,
    ];

    /// The frozen UUID written to compressed file headers.
    #[inline]
    pub fn uuid(self) -> [u8; 16] {
        match self {
            CodecId::None   => UUID_NONE,
            CodecId::Zstd   => UUID_ZSTD,
            CodecId::Lz4    => UUID_LZ4,
            CodecId::Brotli => UUID_BROTLI,
            CodecId::Lzma   => UUID_LZMA,
        }
    }

    /// Returns `None` if this build does not know the UUID.
    pub fn from_uuid(uuid: &[u8; 16]) -> Option<Self> {
        CodecId::ALL.into_iter().find(|c| &c.uuid() == uuid)
    }

    /// Diagnostics name, also accepted by [`CodecId::from_name`].
    pub fn name(self) -> &'static str {
        match self {
            CodecId::None   => "none",
            CodecId::Zstd   => "zstd",
            CodecId::Lz4    => "lz4",
            CodecId::Brotli => "brotli",
            CodecId::Lzma   => "lzma",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        let s = s.to_lowercase();
        CodecId::ALL.into_iter().find(|c| c.name() == s)
    }

    pub fn uuid_str(self) -> String {
        uuid_to_string(&self.uuid())
    }
}

impl std::fmt::Display for CodecId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Hyphenated rendering of a raw codec UUID.
pub fn uuid_to_string(bytes: &[u8; 16]) -> String {
    Uuid::from_bytes(*bytes).hyphenated().to_string()
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Decompression error: {0}")]
    Decompression(String),
    /// The header names a codec this build cannot decode.
    #[error("Required codec not available (UUID {uuid})")]
    UnavailableCodec { uuid: String },
}

// ── Codec trait ──────────────────────────────────────────────────────────────

pub trait Codec: Send + Sync {
    fn codec_id(&self) -> CodecId;
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
}

/// Largest decompressed payload any codec will produce for one block.
pub const MAX_PAYLOAD: usize = 1 << 30;

/// Largest output-to-input ratio an lz4 block can reach.
const LZ4_MAX_RATIO: usize = 255;

fn compress_err(e: impl std::fmt::Display) -> CodecError {
    CodecError::Compression(e.to_string())
}

fn decompress_err(e: impl std::fmt::Display) -> CodecError {
    CodecError::Decompression(e.to_string())
}

/// Pull at most [`MAX_PAYLOAD`] bytes out of a decoding stream.
fn read_bounded<R: Read>(stream: R) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    stream.take(MAX_PAYLOAD as u64 + 1).read_to_end(&mut out).map_err(decompress_err)?;
    if out.len() > MAX_PAYLOAD {
        return Err(decompress_err(format!("payload expands past {MAX_PAYLOAD} bytes")));
    }
    Ok(out)
}

pub struct NoneCodec;
impl Codec for NoneCodec {
    fn codec_id(&self) -> CodecId { CodecId::None }
    fn compress(&self, data: &[u8], _: i32) -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
    fn decompress(&self, data: &[u8])        -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
}

pub struct ZstdCodec;
impl Codec for ZstdCodec {
    fn codec_id(&self) -> CodecId { CodecId::Zstd }
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError> {
        zstd::encode_all(data, level).map_err(compress_err)
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        read_bounded(zstd::Decoder::new(data).map_err(decompress_err)?)
    }
}

/// Block format with the uncompressed size prepended as a LE `u32`.
pub struct Lz4Codec;
impl Codec for Lz4Codec {
    fn codec_id(&self) -> CodecId { CodecId::Lz4 }
    fn compress(&self, data: &[u8], _: i32) -> Result<Vec<u8>, CodecError> {
        Ok(lz4_flex::compress_prepend_size(data))
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        // the prefix sizes the output buffer, so check it first
        let claimed = data.get(..4).map(LittleEndian::read_u32)
            .ok_or_else(|| decompress_err("missing size prefix"))?;
        if claimed as usize > MAX_PAYLOAD {
            return Err(decompress_err(format!("size prefix {claimed} exceeds {MAX_PAYLOAD}")));
        }
        // one lz4 input byte expands to at most 255 output bytes
        if claimed as usize > data.len().saturating_mul(LZ4_MAX_RATIO) {
            return Err(decompress_err(format!("size prefix {claimed} is too large for {} input bytes", data.len())));
        }
        lz4_flex::decompress_size_prepended(data).map_err(decompress_err)
    }
}

/// `level` is the brotli quality, clamped to 0..=11.
pub struct BrotliCodec;
impl Codec for BrotliCodec {
    fn codec_id(&self) -> CodecId { CodecId::Brotli }
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        let mut w = brotli::CompressorWriter::new(&mut out, BROTLI_BUFFER, level.clamp(0, 11) as u32, BROTLI_WINDOW);
        w.write_all(data).map_err(compress_err)?;
        drop(w);
        Ok(out)
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        read_bounded(brotli::Decompressor::new(data, BROTLI_BUFFER))
    }
}

const BROTLI_BUFFER: usize = 4096;
const BROTLI_WINDOW: u32   = 22;

pub struct LzmaCodec;
impl Codec for LzmaCodec {
    fn codec_id(&self) -> CodecId { CodecId::Lzma }
    fn compress(&self, data: &[u8], _: i32) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        lzma_rs::lzma_compress(&mut Cursor::new(data), &mut out).map_err(compress_err)?;
        Ok(out)
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut sink = BoundedSink(Vec::new());
        lzma_rs::lzma_decompress(&mut Cursor::new(data), &mut sink).map_err(decompress_err)?;
        Ok(sink.0)
    }
}

/// Output buffer that refuses to grow past [`MAX_PAYLOAD`].
struct BoundedSink(Vec<u8>);

impl Write for BoundedSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.0.len() + buf.len() > MAX_PAYLOAD {
            return Err(std::io::Error::new(
                std::io::ErrorKind::OutOfMemory,
                format!("payload expands past {MAX_PAYLOAD} bytes"),
            ));
        }
        self.0.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

// ── Factory ──────────────────────────────────────────────────────────────────

/// Resolve a header codec UUID.  Unknown UUIDs are a hard failure.
pub fn get_codec_by_uuid(uuid: &[u8; 16]) -> Result<Box<dyn Codec>, CodecError> {
    match CodecId::from_uuid(uuid) {
        Some(id) => Ok(get_codec(id)),
        None => Err(CodecError::UnavailableCodec {
            uuid: uuid_to_string(uuid),
        }),
    }
}

pub fn get_codec(id: CodecId) -> Box<dyn Codec> {
    match id {
        CodecId::None   => Box::new(NoneCodec),
        CodecId::Zstd   => Box::new(ZstdCodec),
        CodecId::Lz4    => Box::new(Lz4Codec),
        CodecId::Brotli => Box::new(BrotliCodec),
        CodecId::Lzma   => Box::new(LzmaCodec),
    }
}
