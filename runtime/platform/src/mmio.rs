//! Volatile MMIO backend
//!
//! Direct register and slot access for the target. Every access is a single
//! volatile load or store at the absolute address given by the memory map.

use crate::bus::{ConfigRegister, ExpansionBus};
use crate::memory_map::EXPANSION_ID_ADDRESS;

/// Expansion bus backed by the real address space
pub struct MmioBus {
    _private: (),
}

impl MmioBus {
    /// Create the bus handle
    ///
    /// # Safety
    /// - Must only be used on the target, where the memory map addresses are
    ///   valid device and DRAM locations
    /// - No other code may access the expansion slot or the bus configuration
    ///   registers while the handle is in use
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl ExpansionBus for MmioBus {
    fn read_config(&mut self, register: ConfigRegister) -> u32 {
        // SAFETY: register addresses come from the memory map (see `new`)
        unsafe { core::ptr::read_volatile(register.address() as *const u32) }
    }

    fn write_config(&mut self, register: ConfigRegister, value: u32) {
        // SAFETY: register addresses come from the memory map (see `new`)
        unsafe { core::ptr::write_volatile(register.address() as *mut u32, value) }
    }

    fn read_id(&mut self) -> u8 {
        // SAFETY: fixed identification address (see `new`)
        unsafe { core::ptr::read_volatile(EXPANSION_ID_ADDRESS as *const u8) }
    }

    fn read_word(&mut self, address: usize) -> u32 {
        // SAFETY: callers only pass slot addresses derived from the memory map
        unsafe { core::ptr::read_volatile(address as *const u32) }
    }

    fn write_word(&mut self, address: usize, value: u32) {
        // SAFETY: callers only pass slot addresses derived from the memory map
        unsafe { core::ptr::write_volatile(address as *mut u32, value) }
    }
}

#[cfg(feature = "hardware")]
extern "C" {
    static _heap_start: u8;
    static _heap_end: u8;
}

/// Main heap span as laid out by the linker script
///
/// # Safety
/// The binary must be linked with a script that defines `_heap_start` and
/// `_heap_end` around otherwise unused work RAM.
#[cfg(feature = "hardware")]
pub unsafe fn linker_heap() -> crate::memory_map::Region {
    let start = core::ptr::addr_of!(_heap_start) as usize;
    let end = core::ptr::addr_of!(_heap_end) as usize;
    crate::memory_map::Region::new(start, end.saturating_sub(start))
}
