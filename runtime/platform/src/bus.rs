//! Expansion slot bus access
//!
//! The expansion detector is the only code that talks to the slot directly.
//! Everything it needs goes through [`ExpansionBus`] so the destructive
//! self-test can run against [`crate::mmio::MmioBus`] on the target or a
//! recording mock on the host.

use crate::memory_map::{SCU_ADDRESS_SPACE_CONTROL, SCU_BUS_REFRESH};

/// The two scalar bus configuration registers that govern the slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigRegister {
    /// Address-space control (wait states)
    AddressSpaceControl,

    /// Bus refresh control
    BusRefresh,
}

impl ConfigRegister {
    /// Both registers, in save/restore order
    pub const ALL: [ConfigRegister; 2] = [
        ConfigRegister::AddressSpaceControl,
        ConfigRegister::BusRefresh,
    ];

    /// Memory-mapped address of the register
    pub const fn address(self) -> usize {
        match self {
            ConfigRegister::AddressSpaceControl => SCU_ADDRESS_SPACE_CONTROL,
            ConfigRegister::BusRefresh => SCU_BUS_REFRESH,
        }
    }
}

/// Raw access to the expansion slot and its configuration registers
///
/// Implementations must perform every access exactly once and in program
/// order; the self-test depends on a write being visible to the next read.
pub trait ExpansionBus {
    /// Read a configuration register
    fn read_config(&mut self, register: ConfigRegister) -> u32;

    /// Write a configuration register
    fn write_config(&mut self, register: ConfigRegister, value: u32);

    /// Read the identification byte
    fn read_id(&mut self) -> u8;

    /// Read a 32-bit word from slot memory
    fn read_word(&mut self, address: usize) -> u32;

    /// Write a 32-bit word to slot memory
    fn write_word(&mut self, address: usize, value: u32);
}

impl<B: ExpansionBus + ?Sized> ExpansionBus for &mut B {
    fn read_config(&mut self, register: ConfigRegister) -> u32 {
        (**self).read_config(register)
    }

    fn write_config(&mut self, register: ConfigRegister, value: u32) {
        (**self).write_config(register, value)
    }

    fn read_id(&mut self) -> u8 {
        (**self).read_id()
    }

    fn read_word(&mut self, address: usize) -> u32 {
        (**self).read_word(address)
    }

    fn write_word(&mut self, address: usize, value: u32) {
        (**self).write_word(address, value)
    }
}
