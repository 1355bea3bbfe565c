//! # zoneheap Platform Abstraction Layer
//!
//! Everything the heap needs from the board, behind one crate:
//! - **Memory map**: fixed region addresses, expansion candidates and
//!   register constants
//! - **Expansion bus**: identification byte, slot memory and the two bus
//!   configuration registers
//! - **Bulk copy**: the copy engine used to relocate payloads
//!
//! ## Backends
//!
//! ```bash
//! # Mock (default - host development and tests)
//! cargo build
//!
//! # Hardware (linker-provided main heap)
//! cargo build --no-default-features --features hardware
//! ```
//!
//! [`mmio::MmioBus`] and [`copy::CpuCopy`] are always available; the mock
//! backend only adds host-side doubles.

#![no_std]

#[cfg(test)]
extern crate std;

#[cfg(feature = "mock")]
extern crate alloc;

pub mod bus;
pub mod copy;
pub mod memory_map;
pub mod mmio;

#[cfg(feature = "mock")]
pub mod mock;

pub use bus::{ConfigRegister, ExpansionBus};
pub use copy::{BulkCopy, CpuCopy};
pub use memory_map::{MemoryMap, Region};

/// Platform configuration and detection
pub mod config {
    /// Which backend this build was configured for
    pub fn platform_mode() -> &'static str {
        if cfg!(feature = "hardware") {
            "hardware"
        } else if cfg!(feature = "mock") {
            "mock"
        } else {
            "bare"
        }
    }

    /// Check if the mock backend is compiled in
    pub const fn is_mock() -> bool {
        cfg!(feature = "mock")
    }

    /// Check if the linker-provided heap is compiled in
    pub const fn is_hardware() -> bool {
        cfg!(feature = "hardware")
    }
}
