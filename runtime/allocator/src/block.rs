//! First-fit block allocator
//!
//! Manages one region's bytes as a sequence of blocks that tile the region
//! exactly: `[header][payload][header][payload]...`. There is no side table;
//! the only metadata is the header word in front of each payload.
//!
//! # Design
//! - First-fit scan in address order from offset 0
//! - Scan-time coalescing: a free block absorbs every free block right after
//!   it before it is tested for a fit
//! - A block is only split when the leftover exceeds two headers
//! - Free merges with both neighbours, so with no live allocations the region
//!   is always a single free block
//!
//! # Implementation Notes
//! - All positions are region-relative byte offsets; every header access is
//!   bounds-checked against the region size
//! - Payload offsets handed out are always `header offset + HEADER_SIZE`, so
//!   offset 0 is never a payload

use log::{debug, trace, warn};
use zoneheap_platform::BulkCopy;

use crate::header::{align_up, Header, HEADER_SIZE, MAX_BLOCK_SIZE};
use crate::report::Report;
use crate::{AllocatorError, Result};

/// Leftover at or below this size is handed out with the block instead of
/// becoming a separate free block
pub const SPLIT_THRESHOLD: usize = HEADER_SIZE * 2;

/// One block as seen by a header walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// Region offset of the header
    pub offset: usize,

    /// Decoded header
    pub header: Header,
}

impl Block {
    /// Region offset of the payload
    pub const fn payload(&self) -> usize {
        self.offset + HEADER_SIZE
    }

    /// Region offset one past the payload
    pub const fn end(&self) -> usize {
        self.offset + self.header.span()
    }
}

/// Iterator over the blocks of a region in address order
///
/// Stops at the region end, or at the first header whose extent would leave
/// the region.
pub struct Blocks<'m> {
    memory: &'m [u8],
    offset: usize,
}

impl Iterator for Blocks<'_> {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        let header = Header::read(self.memory, self.offset)?;
        let block = Block {
            offset: self.offset,
            header,
        };
        if block.end() > self.memory.len() {
            self.offset = self.memory.len();
            return None;
        }
        self.offset = block.end();
        Some(block)
    }
}

/// A live block located from a payload offset, with its predecessor
#[derive(Debug, Clone, Copy)]
struct Located {
    block: Block,
    previous: Option<Block>,
}

/// Block allocator over one region's memory
pub struct BlockAllocator<'a> {
    memory: &'a mut [u8],
}

impl<'a> BlockAllocator<'a> {
    /// Take over `memory` and format it as a single free block
    ///
    /// The length is rounded down to a multiple of 4. Any previous contents
    /// are discarded.
    ///
    /// # Errors
    /// - `RegionTooSmall` if no payload byte fits after the header
    /// - `RegionTooLarge` if the initial block size does not fit 31 bits
    pub fn new(memory: &'a mut [u8]) -> Result<Self> {
        let size = memory.len() & !(HEADER_SIZE - 1);
        if size <= HEADER_SIZE {
            return Err(AllocatorError::RegionTooSmall { size });
        }
        if size - HEADER_SIZE > MAX_BLOCK_SIZE {
            return Err(AllocatorError::RegionTooLarge { size });
        }

        let memory = &mut memory[..size];
        Header::free(size - HEADER_SIZE).write(memory, 0);
        debug!("block allocator: formatted {} bytes", size);

        Ok(Self { memory })
    }

    /// Region size in bytes
    pub fn len(&self) -> usize {
        self.memory.len()
    }

    /// Always false; a formatted region holds at least one block
    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    /// Walk every block in address order
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            memory: self.memory,
            offset: 0,
        }
    }

    /// Allocate `size` bytes, returning the payload offset
    ///
    /// Returns `None` when no free run large enough exists.
    pub fn malloc(&mut self, size: usize) -> Option<usize> {
        let Some(request) = align_up(size).filter(|request| *request <= MAX_BLOCK_SIZE) else {
            debug!("block allocator: request of {} bytes exceeds block limit", size);
            return None;
        };

        let mut offset = 0;
        while let Some(header) = self.header(offset) {
            if header.is_free() {
                let merged = self.coalesce_forward(offset);
                if merged.size >= request {
                    self.fit(offset, merged.size, request);
                    trace!("block allocator: {} bytes at offset {:#x}", request, offset);
                    return Some(offset + HEADER_SIZE);
                }
                offset += merged.span();
            } else {
                offset += header.span();
            }
        }

        debug!("block allocator: out of memory for {} bytes", request);
        None
    }

    /// Release the block whose payload starts at `payload`
    ///
    /// Null, out-of-range, misaligned and interior offsets are ignored, as is
    /// freeing a block that is already free.
    pub fn free(&mut self, payload: usize) {
        let Some(located) = self.locate(payload) else {
            warn!("block allocator: ignoring free of invalid offset {:#x}", payload);
            return;
        };
        if located.block.header.is_free() {
            trace!("block allocator: ignoring double free at {:#x}", payload);
            return;
        }

        let offset = located.block.offset;
        Header::free(located.block.header.size).write(self.memory, offset);
        self.coalesce_forward(offset);

        if let Some(previous) = located.previous.filter(|block| block.header.is_free()) {
            self.coalesce_forward(previous.offset);
        }
        trace!("block allocator: freed offset {:#x}", offset);
    }

    /// Resize the block at `payload` to `size` bytes
    ///
    /// The block grows in place when the free run behind it is large enough,
    /// keeping its offset. Failing that, a free block directly in front takes
    /// it over and the payload slides down. Otherwise a new block is
    /// allocated, the old payload is moved with `copier` and the old block is
    /// freed. Returns `None` and
    /// leaves the original untouched if `payload` is invalid or no space is
    /// left. A `size` of 0 frees the block and returns `None`.
    pub fn realloc<C: BulkCopy>(&mut self, payload: usize, size: usize, copier: &mut C) -> Option<usize> {
        if size == 0 {
            self.free(payload);
            return None;
        }

        let located = self.locate(payload)?;
        if located.block.header.is_free() {
            warn!("block allocator: realloc of free block at {:#x}", payload);
            return None;
        }
        let request = align_up(size).filter(|request| *request <= MAX_BLOCK_SIZE)?;

        // Captured before any header changes; the copy length depends on it
        let offset = located.block.offset;
        let original_size = located.block.header.size;

        let run = self.forward_run(offset);
        if run >= request {
            self.fit(offset, run, request);
            trace!("block allocator: resized {:#x} in place to {} bytes", offset, request);
            return Some(payload);
        }

        // A free block right in front can absorb this one and its forward run
        if let Some(previous) = located.previous.filter(|block| block.header.is_free()) {
            let available = previous.header.span() + run;
            if available >= request {
                let destination = previous.payload();
                self.copy_payload(payload, destination, original_size, copier);
                self.fit(previous.offset, available, request);
                trace!("block allocator: slid {:#x} down to {:#x}", payload, destination);
                return Some(destination);
            }
        }

        let relocated = self.malloc(request)?;
        self.copy_payload(payload, relocated, original_size, copier);
        self.free(payload);
        trace!("block allocator: moved {:#x} to {:#x}", payload, relocated);
        Some(relocated)
    }

    /// Usable payload size of the live block at `payload`
    pub fn usable_size(&self, payload: usize) -> Option<usize> {
        let located = self.locate(payload)?;
        (!located.block.header.is_free()).then_some(located.block.header.size)
    }

    /// Bytes of the live block at `payload`
    pub fn payload(&self, payload: usize) -> Option<&[u8]> {
        let size = self.usable_size(payload)?;
        self.memory.get(payload..payload + size)
    }

    /// Mutable bytes of the live block at `payload`
    pub fn payload_mut(&mut self, payload: usize) -> Option<&mut [u8]> {
        let size = self.usable_size(payload)?;
        self.memory.get_mut(payload..payload + size)
    }

    /// Classify every block
    pub fn report(&self) -> Report {
        self.blocks().fold(Report::new(self.len()), |mut report, block| {
            report.record(&block.header);
            report
        })
    }

    fn header(&self, offset: usize) -> Option<Header> {
        let header = Header::read(self.memory, offset)?;
        (offset + header.span() <= self.memory.len()).then_some(header)
    }

    /// Merge the free block at `offset` with every free block right after it
    fn coalesce_forward(&mut self, offset: usize) -> Header {
        let Some(mut merged) = self.header(offset) else {
            return Header::free(0);
        };
        if !merged.is_free() {
            return merged;
        }

        let mut next = offset + merged.span();
        while let Some(header) = self.header(next).filter(Header::is_free) {
            merged.size += header.span();
            next += header.span();
        }
        Header::free(merged.size).write(self.memory, offset);
        merged
    }

    /// Size the block at `offset` would have after absorbing the free blocks
    /// behind it, without changing anything
    fn forward_run(&self, offset: usize) -> usize {
        let Some(header) = self.header(offset) else {
            return 0;
        };
        let mut size = header.size;
        let mut next = offset + header.span();
        while let Some(header) = self.header(next).filter(Header::is_free) {
            size += header.span();
            next += header.span();
        }
        size
    }

    /// Mark `available` bytes at `offset` as a used block of at least
    /// `request` bytes, splitting off the rest when it is worth a block
    fn fit(&mut self, offset: usize, available: usize, request: usize) {
        let leftover = available - request;
        if leftover <= SPLIT_THRESHOLD {
            Header::used(available).write(self.memory, offset);
        } else {
            Header::used(request).write(self.memory, offset);
            Header::free(leftover - HEADER_SIZE).write(self.memory, offset + HEADER_SIZE + request);
        }
    }

    /// Find the block owning `payload` by walking from the region start
    fn locate(&self, payload: usize) -> Option<Located> {
        if payload == 0 || payload >= self.len() || payload % HEADER_SIZE != 0 {
            return None;
        }
        let offset = payload - HEADER_SIZE;

        let mut previous = None;
        for block in self.blocks() {
            if block.offset == offset {
                return Some(Located { block, previous });
            }
            if block.offset > offset {
                break;
            }
            previous = Some(block);
        }
        None
    }

    /// Move `len` payload bytes; overlapping moves stay on the CPU
    fn copy_payload<C: BulkCopy>(&mut self, from: usize, to: usize, len: usize, copier: &mut C) {
        if from.abs_diff(to) < len {
            self.memory.copy_within(from..from + len, to);
            return;
        }
        if from < to {
            let (low, high) = self.memory.split_at_mut(to);
            copier.copy(&mut high[..len], &low[from..from + len]);
        } else {
            let (low, high) = self.memory.split_at_mut(from);
            copier.copy(&mut low[to..to + len], &high[..len]);
        }
        copier.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec;
    use std::vec::Vec;
    use zoneheap_platform::mock::RecordingCopy;
    use zoneheap_platform::CpuCopy;

    fn states(allocator: &BlockAllocator<'_>) -> Vec<(usize, bool, usize)> {
        allocator
            .blocks()
            .map(|block| (block.offset, block.header.is_free(), block.header.size))
            .collect()
    }

    #[test]
    fn test_initialize_single_free_block() {
        let mut memory = vec![0u8; 1024];
        let allocator = BlockAllocator::new(&mut memory).unwrap();
        assert_eq!(states(&allocator), vec![(0, true, 1020)]);
    }

    #[test]
    fn test_initialize_rejects_tiny_region() {
        let mut memory = vec![0u8; 7];
        assert!(matches!(
            BlockAllocator::new(&mut memory),
            Err(AllocatorError::RegionTooSmall { size: 4 })
        ));
    }

    #[test]
    fn test_initialize_rounds_length_down() {
        let mut memory = vec![0u8; 1027];
        let allocator = BlockAllocator::new(&mut memory).unwrap();
        assert_eq!(allocator.len(), 1024);
    }

    #[test]
    fn test_malloc_splits_block() {
        let mut memory = vec![0u8; 1024];
        let mut allocator = BlockAllocator::new(&mut memory).unwrap();

        assert_eq!(allocator.malloc(100), Some(4));
        assert_eq!(states(&allocator), vec![(0, false, 100), (104, true, 916)]);
    }

    #[test]
    fn test_malloc_rounds_to_word() {
        let mut memory = vec![0u8; 1024];
        let mut allocator = BlockAllocator::new(&mut memory).unwrap();

        let payload = allocator.malloc(5).unwrap();
        assert_eq!(allocator.usable_size(payload), Some(8));
        assert_eq!(allocator.malloc(1), Some(16));
    }

    #[test]
    fn test_malloc_absorbs_small_leftover() {
        let mut memory = vec![0u8; 64];
        let mut allocator = BlockAllocator::new(&mut memory).unwrap();

        // 60 - 52 = 8 bytes left over: not worth a block
        let payload = allocator.malloc(52).unwrap();
        assert_eq!(allocator.usable_size(payload), Some(60));
        assert_eq!(states(&allocator), vec![(0, false, 60)]);
        assert_eq!(allocator.malloc(1), None);
    }

    #[test]
    fn test_malloc_splits_when_leftover_exceeds_two_headers() {
        let mut memory = vec![0u8; 64];
        let mut allocator = BlockAllocator::new(&mut memory).unwrap();

        allocator.malloc(48).unwrap();
        assert_eq!(states(&allocator), vec![(0, false, 48), (52, true, 8)]);
    }

    #[test]
    fn test_malloc_out_of_memory() {
        let mut memory = vec![0u8; 1024];
        let mut allocator = BlockAllocator::new(&mut memory).unwrap();

        assert_eq!(allocator.malloc(2000), None);
        assert_eq!(allocator.malloc(usize::MAX), None);
        assert_eq!(states(&allocator), vec![(0, true, 1020)]);
    }

    #[test]
    fn test_free_merges_forward_and_backward() {
        let mut memory = vec![0u8; 1024];
        let mut allocator = BlockAllocator::new(&mut memory).unwrap();

        let a = allocator.malloc(16).unwrap();
        let b = allocator.malloc(16).unwrap();
        let c = allocator.malloc(16).unwrap();

        allocator.free(a);
        allocator.free(c);
        assert_eq!(
            states(&allocator),
            vec![(0, true, 16), (20, false, 16), (40, true, 980)]
        );

        allocator.free(b);
        assert_eq!(states(&allocator), vec![(0, true, 1020)]);
    }

    #[test]
    fn test_free_ignores_invalid_offsets() {
        let mut memory = vec![0u8; 1024];
        let mut allocator = BlockAllocator::new(&mut memory).unwrap();
        let a = allocator.malloc(100).unwrap();
        let before = states(&allocator);

        allocator.free(0);
        allocator.free(a + 1);
        allocator.free(a + 8);
        allocator.free(1024);
        allocator.free(usize::MAX - 3);
        assert_eq!(states(&allocator), before);
    }

    #[test]
    fn test_double_free_is_noop() {
        let mut memory = vec![0u8; 1024];
        let mut allocator = BlockAllocator::new(&mut memory).unwrap();
        let a = allocator.malloc(100).unwrap();
        let b = allocator.malloc(100).unwrap();

        allocator.free(a);
        let after_first = states(&allocator);
        allocator.free(a);
        assert_eq!(states(&allocator), after_first);
        assert_eq!(allocator.usable_size(b), Some(100));
    }

    #[test]
    fn test_realloc_grows_in_place() {
        let mut memory = vec![0u8; 1024];
        let mut allocator = BlockAllocator::new(&mut memory).unwrap();
        let a = allocator.malloc(16).unwrap();

        let grown = allocator.realloc(a, 200, &mut CpuCopy);
        assert_eq!(grown, Some(a));
        assert_eq!(allocator.usable_size(a), Some(200));
    }

    #[test]
    fn test_realloc_shrinks_in_place() {
        let mut memory = vec![0u8; 1024];
        let mut allocator = BlockAllocator::new(&mut memory).unwrap();
        let a = allocator.malloc(200).unwrap();
        let _b = allocator.malloc(16).unwrap();

        assert_eq!(allocator.realloc(a, 100, &mut CpuCopy), Some(a));
        assert_eq!(allocator.usable_size(a), Some(100));
        assert_eq!(states(&allocator)[1], (104, true, 96));
    }

    #[test]
    fn test_realloc_relocates_and_copies() {
        let mut memory = vec![0u8; 1024];
        let mut allocator = BlockAllocator::new(&mut memory).unwrap();
        let a = allocator.malloc(8).unwrap();
        let _fence = allocator.malloc(8).unwrap();
        allocator.payload_mut(a).unwrap().copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);

        let moved = allocator.realloc(a, 64, &mut CpuCopy).unwrap();
        assert_ne!(moved, a);
        assert_eq!(&allocator.payload(moved).unwrap()[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        // Vacated block is free again
        assert_eq!(allocator.usable_size(a), None);
        assert!(allocator.blocks().next().unwrap().header.is_free());
    }

    #[test]
    fn test_realloc_absorbs_free_block_in_front() {
        let mut memory = vec![0u8; 80];
        let mut allocator = BlockAllocator::new(&mut memory).unwrap();
        let a = allocator.malloc(16).unwrap();
        let b = allocator.malloc(16).unwrap();
        let _c = allocator.malloc(16).unwrap();
        allocator.free(a);
        allocator.payload_mut(b).unwrap().copy_from_slice(b"sixteen byte run");
        assert_eq!(
            states(&allocator),
            vec![(0, true, 16), (20, false, 16), (40, false, 16), (60, true, 16)]
        );

        let mut copier = RecordingCopy::new();
        let moved = allocator.realloc(b, 32, &mut copier).unwrap();

        assert_eq!(moved, a);
        assert_eq!(&allocator.payload(moved).unwrap()[..16], b"sixteen byte run");
        assert_eq!(
            states(&allocator),
            vec![(0, false, 36), (40, false, 16), (60, true, 16)]
        );
        assert_eq!(copier.transfers(), &[16]);
        assert!(!copier.is_pending());
    }

    #[test]
    fn test_realloc_slide_handles_overlap() {
        let mut memory = vec![0u8; 128];
        let mut allocator = BlockAllocator::new(&mut memory).unwrap();
        let a = allocator.malloc(8).unwrap();
        let b = allocator.malloc(32).unwrap();
        let _c = allocator.malloc(8).unwrap();
        allocator.free(a);
        let pattern: Vec<u8> = (0..32).collect();
        allocator.payload_mut(b).unwrap().copy_from_slice(&pattern);

        let mut copier = RecordingCopy::new();
        let moved = allocator.realloc(b, 40, &mut copier).unwrap();

        assert_eq!(moved, a);
        assert_eq!(&allocator.payload(moved).unwrap()[..32], pattern.as_slice());
        assert_eq!(states(&allocator)[0], (0, false, 44));
        // Source and destination overlap, so the copy engine is not used
        assert!(copier.transfers().is_empty());
    }

    #[test]
    fn test_realloc_failure_keeps_original() {
        let mut memory = vec![0u8; 128];
        let mut allocator = BlockAllocator::new(&mut memory).unwrap();
        let a = allocator.malloc(16).unwrap();
        let _fence = allocator.malloc(16).unwrap();
        allocator.payload_mut(a).unwrap().fill(0xAB);

        assert_eq!(allocator.realloc(a, 4096, &mut CpuCopy), None);
        assert_eq!(allocator.usable_size(a), Some(16));
        assert!(allocator.payload(a).unwrap().iter().all(|byte| *byte == 0xAB));
    }

    #[test]
    fn test_realloc_zero_frees() {
        let mut memory = vec![0u8; 1024];
        let mut allocator = BlockAllocator::new(&mut memory).unwrap();
        let a = allocator.malloc(16).unwrap();

        assert_eq!(allocator.realloc(a, 0, &mut CpuCopy), None);
        assert_eq!(states(&allocator), vec![(0, true, 1020)]);
    }

    #[test]
    fn test_scan_time_coalescing_survives_stale_neighbours() {
        let mut memory = vec![0u8; 64];
        // Hand-built layout with two adjacent free blocks
        Header::free(12).write(&mut memory, 0);
        Header::free(44).write(&mut memory, 16);
        let mut allocator = BlockAllocator { memory: &mut memory };

        assert_eq!(allocator.malloc(40), Some(4));
        assert_eq!(states(&allocator), vec![(0, false, 40), (44, true, 16)]);
    }

    #[test]
    fn test_walk_stops_at_corrupt_header() {
        let mut memory = vec![0u8; 64];
        Header::used(12).write(&mut memory, 0);
        Header::free(4096).write(&mut memory, 16);
        let allocator = BlockAllocator { memory: &mut memory };

        assert_eq!(allocator.blocks().count(), 1);
        assert_eq!(allocator.report().used_blocks, 1);
    }
}
