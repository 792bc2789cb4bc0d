//! Whole-file damage scan and salvage.
//!
//! # How it works
//!
//! The scanner opens the file with a recovery-mode [`Reader`] and drains
//! it.  The reader already knows how to skip a damaged block (scan forward
//! to the next sync marker) and how to stop quietly when the data ends
//! early; the scanner only asks it to journal each block's outcome and then
//! grades the result.
//!
//! ## Block health
//!
//! | Health | Meaning |
//! |--------|---------|
//! | `Healthy` | framing, checksum, records and sync marker all valid |
//! | `Corrupt` | something failed; the reader resynchronised on the next marker |
//! | `Truncated` | the data ended before another marker was found |
//!
//! Records decoded from a block before it broke are counted as recovered.
//!
//! ## Progress
//!
//! `scan()` accepts an optional callback called after every block with
//! `(blocks_scanned, bytes_scanned)`.  Pass `None` to disable it.

use std::io::{Read, Write};
use std::path::Path;

use crate::container::{ContainerError, Reader, ReaderOptions, RecoveryStats, WriteOptions, Writer};
use crate::datafile;

use super::{grade, BlockHealth, RecoveryReport};

/// Grade every block of the container in `source`.
///
/// Corrupt data never makes this fail; it is reported block by block.  An
/// unreadable header and I/O errors are returned as errors.
pub fn scan<R, F>(source: R, mut progress: Option<&mut F>) -> Result<RecoveryReport, ContainerError>
where
    R: Read,
    F: FnMut(u64, u64),
{
    let mut reader = Reader::with_options(source, ReaderOptions { recovery: true, expected_schema: None })?;
    reader.enable_journal();

    let mut records_recovered = 0u64;
    let mut blocks_seen = 0usize;
    loop {
        let more = reader.next_record()?.is_some();
        if more {
            records_recovered += 1;
        }
        if let Some(cb) = progress.as_mut() {
            let blocks = reader.journal_len();
            if blocks > blocks_seen {
                blocks_seen = blocks;
                cb(blocks as u64, reader.offset());
            }
        }
        if !more {
            break;
        }
    }

    let stats = reader.recovery_stats();
    let block_log = reader.take_journal();
    let count = |want: fn(&BlockHealth) -> bool| block_log.iter().filter(|b| want(&b.health)).count();
    let healthy_blocks   = count(|h| matches!(h, BlockHealth::Healthy));
    let corrupt_blocks   = count(|h| matches!(h, BlockHealth::Corrupt { .. }));
    let truncated_blocks = count(|h| matches!(h, BlockHealth::Truncated));
    let terminated = !stats.missing_terminal;

    Ok(RecoveryReport {
        codec:          reader.header().codec.name().to_owned(),
        format_version: reader.header().version,
        healthy_blocks,
        corrupt_blocks,
        truncated_blocks,
        records_recovered,
        bytes_scanned:  reader.offset(),
        bytes_skipped:  stats.bytes_skipped,
        terminated,
        quality:        grade(healthy_blocks, block_log.len(), terminated),
        block_log,
    })
}

/// Convenience: scan the file at `path` and return the report.
pub fn scan_file<P: AsRef<Path>>(path: P) -> Result<RecoveryReport, ContainerError> {
    let file = std::fs::File::open(path)?;
    scan::<_, fn(u64, u64)>(file, None)
}

/// Copy every recoverable record of `source` into a new container on
/// `dest`, written with `opts` and the source's schema.
///
/// Returns the number of records copied and what had to be skipped.
pub fn salvage<R, W>(source: R, dest: W, opts: WriteOptions) -> Result<(u64, RecoveryStats), ContainerError>
where
    R: Read,
    W: Write,
{
    let mut reader = Reader::with_options(source, ReaderOptions { recovery: true, expected_schema: None })?;
    let mut writer = Writer::with_options(std::sync::Arc::clone(reader.schema()), dest, opts)?;
    let mut copied = 0u64;
    while let Some(record) = reader.next_record()? {
        writer.append(&record)?;
        copied += 1;
    }
    writer.close()?;
    Ok((copied, reader.recovery_stats()))
}

/// [`salvage`] from one path to another.
pub fn salvage_file<P: AsRef<Path>, Q: AsRef<Path>>(
    src:  P,
    dst:  Q,
    opts: WriteOptions,
) -> Result<(u64, RecoveryStats), ContainerError> {
    let source = std::fs::File::open(src)?;
    let dest = datafile::create_buffered(dst)?;
    salvage(source, dest, opts)
}
