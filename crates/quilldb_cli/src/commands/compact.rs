//! Compact command implementation.

use super::Target;
use std::io::Write;
use tracing::info;

/// Size of the store file around a compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactStats {
    /// Bytes before compaction.
    pub bytes_before: u64,
    /// Bytes after compaction.
    pub bytes_after: u64,
}

impl CompactStats {
    /// Bytes reclaimed.
    pub fn saved(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

/// Runs the compact command.
pub fn run(target: &Target, out: &mut impl Write) -> Result<(), Box<dyn std::error::Error>> {
    writeln!(out, "Compacting {}", target.path.display())?;
    let stats = compact(target)?;

    writeln!(out, "  Size before: {} bytes", stats.bytes_before)?;
    writeln!(out, "  Size after:  {} bytes", stats.bytes_after)?;
    let percent = if stats.bytes_before > 0 {
        stats.saved() as f64 / stats.bytes_before as f64 * 100.0
    } else {
        0.0
    };
    writeln!(out, "  Space saved: {} bytes ({percent:.1}%)", stats.saved())?;
    Ok(())
}

/// Compacts the store and reports its size before and after.
pub fn compact(target: &Target) -> Result<CompactStats, Box<dyn std::error::Error>> {
    let bytes_before = target.file_size()?;
    let db = target.open()?;
    db.compact()?;
    db.close()?;
    let stats = CompactStats {
        bytes_before,
        bytes_after: target.file_size()?,
    };
    info!(before = stats.bytes_before, after = stats.bytes_after, "store compacted");
    Ok(stats)
}
