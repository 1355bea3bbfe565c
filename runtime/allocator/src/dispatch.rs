//! Multi-region dispatcher
//!
//! [`MemoryContext`] owns one manager per region plus the copier used when a
//! reallocation has to move. Region selection happens here and nowhere else:
//! allocations go to Main unless the caller names a region, and frees or
//! resizes go to whichever region contains the address.

use log::{debug, warn};
use zoneheap_platform::{BulkCopy, CpuCopy, ExpansionBus, Region};

use crate::expansion::ExpansionDetector;
use crate::manager::RegionManager;
use crate::region::{Address, RegionId};
use crate::report::Report;
use crate::Result;

/// The whole heap: three regions and a copier
pub struct MemoryContext<'a, C: BulkCopy = CpuCopy> {
    regions: [RegionManager<'a>; 3],
    copier: C,
}

impl<'a, C: BulkCopy> MemoryContext<'a, C> {
    /// Assemble a context from already-built managers
    pub fn new(main: RegionManager<'a>, auxiliary: RegionManager<'a>, expansion: RegionManager<'a>, copier: C) -> Self {
        debug_assert_eq!(main.id(), RegionId::Main);
        debug_assert_eq!(auxiliary.id(), RegionId::Auxiliary);
        debug_assert_eq!(expansion.id(), RegionId::Expansion);

        Self {
            regions: [main, auxiliary, expansion],
            copier,
        }
    }

    pub fn manager(&self, id: RegionId) -> &RegionManager<'a> {
        &self.regions[id.index()]
    }

    fn manager_mut(&mut self, id: RegionId) -> &mut RegionManager<'a> {
        &mut self.regions[id.index()]
    }

    /// First region, in priority order, whose span contains `address`
    pub fn region_of(&self, address: Address) -> Option<RegionId> {
        RegionId::ALL
            .into_iter()
            .find(|id| self.manager(*id).contains(address))
    }

    /// Allocate from Main
    pub fn malloc(&mut self, size: usize) -> Option<Address> {
        self.malloc_in(size, RegionId::Main)
    }

    /// Allocate from a specific region
    ///
    /// Never falls back to another region.
    pub fn malloc_in(&mut self, size: usize, id: RegionId) -> Option<Address> {
        let address = self.manager_mut(id).malloc(size);
        if address.is_none() && size != 0 {
            debug!("{}: out of memory for {} bytes", id, size);
        }
        address
    }

    /// Allocate from the region that holds `hint`, or Main if none does
    pub fn malloc_near(&mut self, size: usize, hint: Address) -> Option<Address> {
        let id = self.region_of(hint).unwrap_or_default();
        self.malloc_in(size, id)
    }

    /// Release `address` into its owning region
    ///
    /// Null and addresses outside every region are ignored.
    pub fn free(&mut self, address: Address) {
        if address == 0 {
            return;
        }
        match self.region_of(address) {
            Some(id) => self.manager_mut(id).free(address),
            None => warn!("free: {:#010x} is outside every region", address),
        }
    }

    /// Resize an allocation within its own region
    ///
    /// `None` allocates `size` bytes from Main. An address outside every
    /// region yields `None` and changes nothing.
    pub fn realloc(&mut self, address: Option<Address>, size: usize) -> Option<Address> {
        let Some(address) = address.filter(|address| *address != 0) else {
            return self.malloc(size);
        };
        let Some(id) = self.region_of(address) else {
            warn!("realloc: {:#010x} is outside every region", address);
            return None;
        };
        let Self { regions, copier } = self;
        regions[id.index()].realloc(Some(address), size, copier)
    }

    pub fn report(&self, id: RegionId) -> Report {
        self.manager(id).report()
    }

    pub fn is_region_available(&self, id: RegionId) -> bool {
        self.manager(id).is_available()
    }

    pub fn size(&self, id: RegionId) -> usize {
        self.manager(id).size()
    }

    pub fn free_space(&self, id: RegionId) -> usize {
        self.manager(id).free_space()
    }

    pub fn used_space(&self, id: RegionId) -> usize {
        self.manager(id).used_space()
    }

    /// Payload capacity of the live allocation at `address`
    pub fn usable_size(&self, address: Address) -> Option<usize> {
        self.manager(self.region_of(address)?).usable_size(address)
    }

    pub fn payload(&self, address: Address) -> Option<&[u8]> {
        self.manager(self.region_of(address)?).payload(address)
    }

    pub fn payload_mut(&mut self, address: Address) -> Option<&mut [u8]> {
        let id = self.region_of(address)?;
        self.manager_mut(id).payload_mut(address)
    }

    pub fn copier(&self) -> &C {
        &self.copier
    }
}

impl<C: BulkCopy> MemoryContext<'static, C> {
    /// Bring the heap up on the target
    ///
    /// Runs expansion detection once, then places a manager over Main,
    /// Auxiliary and whatever expansion region the detector verified.
    ///
    /// # Safety
    /// - `main` and the detector's auxiliary and expansion regions must be
    ///   RAM valid for reads and writes for the rest of the program
    /// - Nothing else may touch that RAM afterwards
    pub unsafe fn bring_up<B: ExpansionBus>(main: Region, detector: &mut ExpansionDetector<B>, copier: C) -> Result<Self> {
        let expansion = detector.detect().region();
        let auxiliary = detector.map().auxiliary;

        // SAFETY: forwarded from the caller
        let (main, auxiliary, expansion) = unsafe {
            (
                RegionManager::from_region(RegionId::Main, main)?,
                RegionManager::from_region(RegionId::Auxiliary, auxiliary)?,
                RegionManager::from_region(RegionId::Expansion, expansion)?,
            )
        };

        Ok(Self::new(main, auxiliary, expansion, copier))
    }

    /// [`bring_up`](Self::bring_up) on the board itself: linker-provided
    /// Main heap, board memory map and the real expansion bus
    ///
    /// # Safety
    /// Must run once, on the target, before anything else touches the heap
    /// regions or the expansion slot.
    #[cfg(feature = "hardware")]
    pub unsafe fn bring_up_board(copier: C) -> Result<Self> {
        use zoneheap_platform::mmio::{linker_heap, MmioBus};
        use zoneheap_platform::MemoryMap;

        // SAFETY: forwarded from the caller
        unsafe {
            let mut detector = ExpansionDetector::new(MmioBus::new(), MemoryMap::BOARD);
            Self::bring_up(linker_heap(), &mut detector, copier)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec;
    use std::vec::Vec;

    const MAIN_BASE: Address = 0x0600_0000;
    const AUX_BASE: Address = 0x0020_0000;
    const EXP_BASE: Address = 0x2240_0000;

    fn context<'a>(main: &'a mut [u8], auxiliary: &'a mut [u8], expansion: Option<&'a mut [u8]>) -> MemoryContext<'a> {
        MemoryContext::new(
            RegionManager::new(RegionId::Main, MAIN_BASE, main).unwrap(),
            RegionManager::new(RegionId::Auxiliary, AUX_BASE, auxiliary).unwrap(),
            match expansion {
                Some(memory) => RegionManager::new(RegionId::Expansion, EXP_BASE, memory).unwrap(),
                None => RegionManager::absent(RegionId::Expansion),
            },
            CpuCopy,
        )
    }

    #[test]
    fn test_default_malloc_uses_main() {
        let (mut main, mut aux) = (vec![0u8; 1024], vec![0u8; 512]);
        let mut ctx = context(&mut main, &mut aux, None);

        let address = ctx.malloc(64).unwrap();
        assert_eq!(ctx.region_of(address), Some(RegionId::Main));
    }

    #[test]
    fn test_named_region_has_no_fallback() {
        let (mut main, mut aux) = (vec![0u8; 1024], vec![0u8; 128]);
        let mut ctx = context(&mut main, &mut aux, None);

        assert_eq!(ctx.malloc_in(256, RegionId::Auxiliary), None);
        assert_eq!(ctx.malloc_in(16, RegionId::Expansion), None);
        assert_eq!(ctx.report(RegionId::Main).used_blocks, 0);
    }

    #[test]
    fn test_free_routes_by_address() {
        let (mut main, mut aux) = (vec![0u8; 1024], vec![0u8; 512]);
        let mut ctx = context(&mut main, &mut aux, None);

        let in_aux = ctx.malloc_in(32, RegionId::Auxiliary).unwrap();
        let in_main = ctx.malloc(32).unwrap();
        ctx.free(in_aux);

        assert_eq!(ctx.report(RegionId::Auxiliary).used_blocks, 0);
        assert_eq!(ctx.report(RegionId::Main).used_blocks, 1);
        assert_eq!(ctx.usable_size(in_main), Some(32));
    }

    #[test]
    fn test_unowned_addresses_are_ignored() {
        let (mut main, mut aux) = (vec![0u8; 1024], vec![0u8; 512]);
        let mut ctx = context(&mut main, &mut aux, None);
        let before: Vec<Report> = RegionId::ALL.iter().map(|id| ctx.report(*id)).collect();

        ctx.free(0);
        ctx.free(0x1000_0000);
        assert_eq!(ctx.realloc(Some(0x1000_0000), 16), None);

        let after: Vec<Report> = RegionId::ALL.iter().map(|id| ctx.report(*id)).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_main_routing_limited_to_heap_span() {
        let (mut main, mut aux) = (vec![0u8; 1024], vec![0u8; 512]);
        let mut ctx = context(&mut main, &mut aux, None);
        let live = ctx.malloc(16).unwrap();

        // Same work RAM, past the managed heap
        let beyond = MAIN_BASE + 1024;
        assert_eq!(ctx.region_of(beyond - 4), Some(RegionId::Main));
        assert_eq!(ctx.region_of(beyond), None);
        ctx.free(beyond);
        assert_eq!(ctx.usable_size(live), Some(16));
    }

    #[test]
    fn test_realloc_none_allocates_from_main() {
        let (mut main, mut aux) = (vec![0u8; 1024], vec![0u8; 512]);
        let mut ctx = context(&mut main, &mut aux, None);

        let address = ctx.realloc(None, 40).unwrap();
        assert_eq!(ctx.region_of(address), Some(RegionId::Main));
    }

    #[test]
    fn test_realloc_stays_in_region() {
        let (mut main, mut aux, mut exp) = (vec![0u8; 1024], vec![0u8; 512], vec![0u8; 2048]);
        let mut ctx = context(&mut main, &mut aux, Some(&mut exp));

        let first = ctx.malloc_in(16, RegionId::Expansion).unwrap();
        let _pin = ctx.malloc_in(16, RegionId::Expansion).unwrap();
        ctx.payload_mut(first).unwrap().copy_from_slice(b"expansion region");

        let moved = ctx.realloc(Some(first), 600).unwrap();
        assert_ne!(moved, first);
        assert_eq!(ctx.region_of(moved), Some(RegionId::Expansion));
        assert_eq!(&ctx.payload(moved).unwrap()[..16], b"expansion region");
    }

    #[test]
    fn test_malloc_near_follows_hint() {
        let (mut main, mut aux) = (vec![0u8; 1024], vec![0u8; 512]);
        let mut ctx = context(&mut main, &mut aux, None);

        let anchor = ctx.malloc_in(8, RegionId::Auxiliary).unwrap();
        let near = ctx.malloc_near(8, anchor).unwrap();
        assert_eq!(ctx.region_of(near), Some(RegionId::Auxiliary));

        let unowned = ctx.malloc_near(8, 0x1000_0000).unwrap();
        assert_eq!(ctx.region_of(unowned), Some(RegionId::Main));
    }

    #[test]
    fn test_availability_and_sizes() {
        let (mut main, mut aux) = (vec![0u8; 1024], vec![0u8; 512]);
        let ctx = context(&mut main, &mut aux, None);

        assert!(ctx.is_region_available(RegionId::Main));
        assert!(ctx.is_region_available(RegionId::Auxiliary));
        assert!(!ctx.is_region_available(RegionId::Expansion));
        assert_eq!(ctx.size(RegionId::Auxiliary), 512);
        assert_eq!(ctx.free_space(RegionId::Auxiliary), 508);
        assert_eq!(ctx.used_space(RegionId::Expansion), 0);
    }
}
