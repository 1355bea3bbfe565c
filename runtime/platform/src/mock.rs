//! Mock platform backend
//!
//! # WARNING: no real hardware behind this module
//!
//! Host-side stand-ins for the expansion slot and the copy engine. The mock
//! bus models just enough of the slot for detection tests:
//! - the identification byte only reads back once both configuration
//!   registers hold the values the slot needs, otherwise the bus floats high
//! - slot memory is a sparse word map; individual words can be marked faulty
//!   so their writes are lost
//! - every write (register or memory) is recorded in order

use alloc::collections::BTreeMap;
use alloc::collections::BTreeSet;
use alloc::vec::Vec;

use crate::bus::{ConfigRegister, ExpansionBus};
use crate::copy::BulkCopy;
use crate::memory_map::{EXPANSION_ADDRESS_SPACE_CONTROL, EXPANSION_BUS_REFRESH};

/// Value read from an unconnected slot
pub const FLOATING_BUS: u8 = 0xFF;

/// Power-on value of the address-space control register
pub const RESET_ADDRESS_SPACE_CONTROL: u32 = 0x1FF0_1FF0;

/// Power-on value of the bus refresh register
pub const RESET_BUS_REFRESH: u32 = 0x0000_0000;

/// One recorded bus write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusWrite {
    /// Configuration register write
    Config { register: ConfigRegister, value: u32 },

    /// Slot memory write
    Word { address: usize, value: u32 },
}

/// In-memory expansion slot
#[derive(Debug, Clone)]
pub struct MockBus {
    id: Option<u8>,
    address_space_control: u32,
    bus_refresh: u32,
    memory: BTreeMap<usize, u32>,
    faulty: BTreeSet<usize>,
    writes: Vec<BusWrite>,
}

impl MockBus {
    /// Slot with nothing inserted
    pub fn empty() -> Self {
        Self {
            id: None,
            address_space_control: RESET_ADDRESS_SPACE_CONTROL,
            bus_refresh: RESET_BUS_REFRESH,
            memory: BTreeMap::new(),
            faulty: BTreeSet::new(),
            writes: Vec::new(),
        }
    }

    /// Slot holding a board that answers with `id`
    pub fn with_id(id: u8) -> Self {
        Self {
            id: Some(id),
            ..Self::empty()
        }
    }

    /// Drop every write to the word at `address`, as a dead DRAM cell would
    pub fn with_faulty_word(mut self, address: usize) -> Self {
        self.faulty.insert(address);
        self
    }

    /// Current value of a configuration register (not recorded)
    pub fn config(&self, register: ConfigRegister) -> u32 {
        match register {
            ConfigRegister::AddressSpaceControl => self.address_space_control,
            ConfigRegister::BusRefresh => self.bus_refresh,
        }
    }

    /// Every write performed so far, in order
    pub fn writes(&self) -> &[BusWrite] {
        &self.writes
    }

    /// Only the slot memory writes
    pub fn word_writes(&self) -> impl Iterator<Item = (usize, u32)> + '_ {
        self.writes.iter().filter_map(|write| match *write {
            BusWrite::Word { address, value } => Some((address, value)),
            BusWrite::Config { .. } => None,
        })
    }

    fn slot_configured(&self) -> bool {
        self.address_space_control == EXPANSION_ADDRESS_SPACE_CONTROL
            && self.bus_refresh == EXPANSION_BUS_REFRESH
    }
}

impl Default for MockBus {
    fn default() -> Self {
        Self::empty()
    }
}

impl ExpansionBus for MockBus {
    fn read_config(&mut self, register: ConfigRegister) -> u32 {
        self.config(register)
    }

    fn write_config(&mut self, register: ConfigRegister, value: u32) {
        self.writes.push(BusWrite::Config { register, value });
        match register {
            ConfigRegister::AddressSpaceControl => self.address_space_control = value,
            ConfigRegister::BusRefresh => self.bus_refresh = value,
        }
    }

    fn read_id(&mut self) -> u8 {
        match self.id {
            Some(id) if self.slot_configured() => id,
            _ => FLOATING_BUS,
        }
    }

    fn read_word(&mut self, address: usize) -> u32 {
        if self.id.is_none() {
            return u32::MAX;
        }
        self.memory.get(&address).copied().unwrap_or(0)
    }

    fn write_word(&mut self, address: usize, value: u32) {
        self.writes.push(BusWrite::Word { address, value });
        if self.id.is_some() && !self.faulty.contains(&address) {
            self.memory.insert(address, value);
        }
    }
}

/// Copy engine that records transfers and tracks completion
#[derive(Debug, Default, Clone)]
pub struct RecordingCopy {
    transfers: Vec<usize>,
    pending: bool,
    waits: usize,
}

impl RecordingCopy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lengths of every transfer started, in order
    pub fn transfers(&self) -> &[usize] {
        &self.transfers
    }

    /// Whether a transfer was started and not yet waited on
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Number of completed waits
    pub fn waits(&self) -> usize {
        self.waits
    }
}

impl BulkCopy for RecordingCopy {
    fn copy(&mut self, dst: &mut [u8], src: &[u8]) {
        let len = dst.len().min(src.len());
        dst[..len].copy_from_slice(&src[..len]);
        self.transfers.push(len);
        self.pending = true;
    }

    fn wait(&mut self) {
        self.pending = false;
        self.waits += 1;
    }
}
