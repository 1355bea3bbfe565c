//! zoneheap allocator - First-fit heap over several memory regions
//!
//! # Purpose
//! Provides malloc/free/realloc for a freestanding target whose RAM is split
//! into physically separate regions: Main work RAM, Auxiliary work RAM and an
//! optional expansion board. Each region is carved into blocks described by a
//! single 4-byte header word stored in the region itself.
//!
//! # Integration Points
//! - Depends on: `zoneheap-platform` for the memory map, expansion bus and
//!   bulk-copy engine
//! - Provides to: firmware and applications through [`MemoryContext`], or
//!   through [`LockedContext`] as the `#[global_allocator]`
//!
//! # Architecture
//! - [`header`]: the Used/Size header word
//! - [`block`]: per-region first-fit allocator with coalescing and splitting
//! - [`expansion`]: expansion board identification and destructive self-test
//! - [`manager`]: binds an allocator to a region's absolute addresses
//! - [`dispatch`]: routes every call to the right region
//! - [`global`]: spin-locked `GlobalAlloc` adapter
//!
//! # Testing Strategy
//! - Unit tests: header encoding, block layout, routing, detection against
//!   the mock bus
//! - Integration tests: allocation properties and a full bring-up in
//!   `tests/`
//! - Benchmarks: allocation churn with criterion

#![no_std]

#[cfg(test)]
extern crate std;

pub mod block;
pub mod dispatch;
pub mod expansion;
pub mod global;
pub mod header;
pub mod manager;
pub mod region;
pub mod report;

pub use block::{Block, BlockAllocator, Blocks, SPLIT_THRESHOLD};
pub use dispatch::MemoryContext;
pub use expansion::{DetectorState, ExpansionDetector, ExpansionKind, SelfTestFault};
pub use global::LockedContext;
pub use header::{BlockState, Header, HEADER_SIZE, MAX_BLOCK_SIZE};
pub use manager::RegionManager;
pub use region::{Address, RegionId};
pub use report::Report;

pub use zoneheap_platform::{BulkCopy, CpuCopy, ExpansionBus, MemoryMap, Region};

use thiserror::Error;

/// Errors raised while setting up a region
///
/// Allocation itself never errors; exhaustion and bad addresses surface as
/// `None` or are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocatorError {
    #[error("Region base {base:#x} is not word aligned")]
    MisalignedBase { base: usize },

    #[error("Region of {size} bytes cannot hold a header and a payload")]
    RegionTooSmall { size: usize },

    #[error("Region of {size} bytes exceeds the largest encodable block")]
    RegionTooLarge { size: usize },

    #[error("Region at {base:#x} of {size} bytes wraps the address space")]
    AddressOverflow { base: usize, size: usize },
}

pub type Result<T> = core::result::Result<T, AllocatorError>;
