//! Region manager
//!
//! Binds a block allocator to the absolute addresses of one region and
//! translates between caller addresses and region offsets. A region whose
//! hardware is missing has no allocator and fails every request the same
//! way an exhausted region does.

use log::debug;
use zoneheap_platform::memory_map::WORD_ALIGN;
use zoneheap_platform::BulkCopy;

use crate::block::BlockAllocator;
use crate::region::{Address, Region, RegionId};
use crate::report::Report;
use crate::{AllocatorError, Result};

/// One region and its allocator
pub struct RegionManager<'a> {
    id: RegionId,
    region: Region,
    allocator: Option<BlockAllocator<'a>>,
}

impl<'a> RegionManager<'a> {
    /// Manage `memory`, which callers address starting at `base`
    ///
    /// On the target `base` is the address of `memory` itself; hosted users
    /// may pick any aligned base to model the board's address map.
    ///
    /// # Errors
    /// - `MisalignedBase` if `base` is not 4-byte aligned
    /// - `AddressOverflow` if the region would wrap the address space
    /// - any error from [`BlockAllocator::new`]
    pub fn new(id: RegionId, base: Address, memory: &'a mut [u8]) -> Result<Self> {
        if base % WORD_ALIGN != 0 {
            return Err(AllocatorError::MisalignedBase { base });
        }
        if base.checked_add(memory.len()).is_none() {
            return Err(AllocatorError::AddressOverflow {
                base,
                size: memory.len(),
            });
        }

        let region = Region::new(base, memory.len());
        let allocator = BlockAllocator::new(memory)?;
        debug!(
            "{} region: {:#010x}..{:#010x} ({} bytes)",
            id,
            region.base(),
            region.end(),
            region.size()
        );

        Ok(Self {
            id,
            region,
            allocator: Some(allocator),
        })
    }

    /// Region with no hardware behind it
    pub fn absent(id: RegionId) -> Self {
        debug!("{} region: not available", id);
        Self {
            id,
            region: Region::EMPTY,
            allocator: None,
        }
    }

    /// Manage the raw span described by `region`
    ///
    /// An empty region yields an absent manager.
    ///
    /// # Safety
    /// - `region` must describe RAM that is valid for reads and writes for
    ///   the rest of the program
    /// - Nothing else may access that RAM except through the returned
    ///   manager and the addresses it hands out
    pub unsafe fn from_region(id: RegionId, region: Region) -> Result<RegionManager<'static>> {
        if region.is_empty() {
            return Ok(RegionManager::absent(id));
        }
        if !region.is_aligned() {
            return Err(AllocatorError::MisalignedBase {
                base: region.base(),
            });
        }
        // SAFETY: caller guarantees exclusive, program-long access to the span
        let memory = unsafe { core::slice::from_raw_parts_mut(region.base() as *mut u8, region.size()) };
        RegionManager::new(id, region.base(), memory)
    }

    pub fn id(&self) -> RegionId {
        self.id
    }

    /// Span managed here; empty when absent
    pub fn region(&self) -> Region {
        self.region
    }

    /// Whether this region has memory to allocate from
    pub fn is_available(&self) -> bool {
        self.allocator.is_some() && !self.region.is_empty()
    }

    /// Whether `address` falls inside this region
    pub fn contains(&self, address: Address) -> bool {
        self.region.contains(address)
    }

    /// Allocate `size` bytes; zero-size requests return `None`
    pub fn malloc(&mut self, size: usize) -> Option<Address> {
        if size == 0 {
            return None;
        }
        let base = self.region.base();
        self.allocator.as_mut()?.malloc(size).map(|offset| base + offset)
    }

    /// Release the allocation at `address`; anything not owned here is ignored
    pub fn free(&mut self, address: Address) {
        let Some(offset) = self.region.offset_of(address) else {
            return;
        };
        if let Some(allocator) = self.allocator.as_mut() {
            allocator.free(offset);
        }
    }

    /// Resize the allocation at `address`
    ///
    /// `None` allocates fresh; a `size` of 0 frees and returns `None`.
    pub fn realloc<C: BulkCopy>(&mut self, address: Option<Address>, size: usize, copier: &mut C) -> Option<Address> {
        let Some(address) = address else {
            return self.malloc(size);
        };
        let offset = self.region.offset_of(address)?;
        let base = self.region.base();
        self.allocator
            .as_mut()?
            .realloc(offset, size, copier)
            .map(|offset| base + offset)
    }

    /// Payload capacity of the live allocation at `address`
    pub fn usable_size(&self, address: Address) -> Option<usize> {
        let offset = self.region.offset_of(address)?;
        self.allocator.as_ref()?.usable_size(offset)
    }

    /// Bytes of the live allocation at `address`
    pub fn payload(&self, address: Address) -> Option<&[u8]> {
        let offset = self.region.offset_of(address)?;
        self.allocator.as_ref()?.payload(offset)
    }

    /// Mutable bytes of the live allocation at `address`
    pub fn payload_mut(&mut self, address: Address) -> Option<&mut [u8]> {
        let offset = self.region.offset_of(address)?;
        self.allocator.as_mut()?.payload_mut(offset)
    }

    pub fn report(&self) -> Report {
        self.allocator
            .as_ref()
            .map_or(Report::new(self.region.size()), BlockAllocator::report)
    }

    /// Total size of the region
    pub fn size(&self) -> usize {
        self.region.size()
    }

    /// Free payload bytes
    pub fn free_space(&self) -> usize {
        self.report().free_bytes
    }

    /// Everything that is not free payload
    pub fn used_space(&self) -> usize {
        self.report().used_bytes()
    }
}
