//! Damage assessment and salvage for container files.
//!
//! [`scan`] walks a whole file in recovery mode and grades every block;
//! [`salvage`] copies whatever records survive into a fresh container.
//! Neither fails because of corrupt data; damage is reported in the
//! [`RecoveryReport`].  Only I/O errors and an unreadable header propagate.

use serde::Serialize;

mod scanner;

pub use scanner::{salvage, salvage_file, scan, scan_file};

/// The verdict for one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BlockHealth {
    /// Framing, checksum and every record decoded cleanly.
    Healthy,
    /// Skipped up to the next sync marker.
    Corrupt { reason: String },
    /// The data ended inside this block.
    Truncated,
}

impl BlockHealth {
    pub fn is_usable(&self) -> bool {
        matches!(self, BlockHealth::Healthy)
    }
}

/// Diagnostic record for one block position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScannedBlock {
    /// Absolute byte offset where the block starts.
    pub offset:  u64,
    /// Bytes from `offset` through the block's sync marker (or through the
    /// point where scanning gave up).
    pub length:  u64,
    /// Records read from the block before it ended or broke.
    pub records: u64,
    pub health:  BlockHealth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecoveryQuality {
    /// Every block healthy and the terminal block present.
    Full,
    /// Some blocks lost or the tail missing.
    Partial,
    /// Fewer than half the blocks healthy.
    Catastrophic,
}

/// Complete report produced by [`scan`].
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryReport {
    pub codec:             String,
    pub format_version:    u8,
    pub healthy_blocks:    usize,
    pub corrupt_blocks:    usize,
    pub truncated_blocks:  usize,
    /// Records that decoded cleanly, including those read from a block
    /// before it broke.
    pub records_recovered: u64,
    pub bytes_scanned:     u64,
    pub bytes_skipped:     u64,
    /// The terminal block was found.
    pub terminated:        bool,
    pub block_log:         Vec<ScannedBlock>,
    pub quality:           RecoveryQuality,
}

impl RecoveryReport {
    pub fn total_blocks(&self) -> usize {
        self.block_log.len()
    }

    /// Percentage of blocks that are healthy (0.0–100.0).
    pub fn health_pct(&self) -> f64 {
        if self.block_log.is_empty() { return 100.0; }
        self.healthy_blocks as f64 / self.block_log.len() as f64 * 100.0
    }

    /// Summary line for display.
    pub fn summary(&self) -> String {
        format!(
            "{:?} recovery: {}/{} blocks healthy ({:.1}%), {} record(s) recovered, \
             {} byte(s) skipped{}",
            self.quality,
            self.healthy_blocks,
            self.total_blocks(),
            self.health_pct(),
            self.records_recovered,
            self.bytes_skipped,
            if self.terminated { "" } else { ", terminal block missing" },
        )
    }
}

pub(crate) fn grade(healthy: usize, total: usize, terminated: bool) -> RecoveryQuality {
    if healthy == total && terminated {
        RecoveryQuality::Full
    } else if healthy * 2 < total {
        RecoveryQuality::Catastrophic
    } else {
        RecoveryQuality::Partial
    }
}
