//! Heap diagnostics

use crate::header::{Header, HEADER_SIZE};

/// Snapshot of one region's block layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Report {
    /// Bytes spent on block headers
    pub header_overhead: usize,

    /// Number of free blocks
    pub free_blocks: usize,

    /// Payload bytes held by free blocks
    pub free_bytes: usize,

    /// Number of allocated blocks
    pub used_blocks: usize,

    /// Size of the region
    pub total_bytes: usize,
}

impl Report {
    /// Report for a region with nothing walked yet
    pub const fn new(total_bytes: usize) -> Self {
        Self {
            header_overhead: 0,
            free_blocks: 0,
            free_bytes: 0,
            used_blocks: 0,
            total_bytes,
        }
    }

    /// Account for one block
    pub fn record(&mut self, header: &Header) {
        self.header_overhead += HEADER_SIZE;
        if header.is_free() {
            self.free_blocks += 1;
            self.free_bytes += header.size;
        } else {
            self.used_blocks += 1;
        }
    }

    /// Everything that is not free payload, headers included
    pub const fn used_bytes(&self) -> usize {
        self.total_bytes.saturating_sub(self.free_bytes)
    }

    /// Total number of blocks walked
    pub const fn blocks(&self) -> usize {
        self.free_blocks + self.used_blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_accumulates() {
        let mut report = Report::new(1024);
        report.record(&Header::used(100));
        report.record(&Header::free(916));

        assert_eq!(report.header_overhead, 8);
        assert_eq!(report.used_blocks, 1);
        assert_eq!(report.free_blocks, 1);
        assert_eq!(report.free_bytes, 916);
        assert_eq!(report.used_bytes(), 108);
        assert_eq!(report.blocks(), 2);
    }

    #[test]
    fn test_empty_report() {
        let report = Report::default();
        assert_eq!(report.total_bytes, 0);
        assert_eq!(report.used_bytes(), 0);
    }
}
