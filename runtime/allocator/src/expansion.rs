//! Expansion memory detection
//!
//! Decides whether the optional expansion board exists before any of its
//! memory is handed to an allocator.
//!
//! # Procedure
//! 1. Save both bus configuration registers and program the values the slot
//!    needs to respond
//! 2. Read the identification byte; anything but the two known signatures
//!    means no board
//! 3. Destructive self-test: for each of the four sub-banks, write a distinct
//!    pattern to the sub-bank's copy in both primary banks and read both back
//! 4. On success keep the new bus configuration and publish the region for
//!    the detected kind; on any failure restore the saved registers
//!
//! Register restoration is tied to a scope guard, so every early return
//! restores the bus. Detection is not interrupt safe; callers run it with
//! interrupts serialized around it.

use core::ops::{Deref, DerefMut};

use log::{debug, info, warn};
use thiserror::Error;
use zoneheap_platform::memory_map::{
    expansion_dram_address, EXPANSION_ADDRESS_SPACE_CONTROL, EXPANSION_BUS_REFRESH,
    EXPANSION_BANK_COUNT, EXPANSION_ID_LARGE, EXPANSION_ID_SMALL, EXPANSION_SUB_BANK_COUNT,
    SELF_TEST_PATTERNS,
};
use zoneheap_platform::{ConfigRegister, ExpansionBus, MemoryMap, Region};

/// Expansion board variants, keyed by identification byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpansionKind {
    /// 1 MiB board, mapped at an aliased base for contiguous access
    SmallCapacity,

    /// 4 MiB board
    LargeCapacity,
}

impl ExpansionKind {
    /// Match an identification byte against the known signatures
    pub const fn from_id(id: u8) -> Option<Self> {
        match id {
            EXPANSION_ID_SMALL => Some(ExpansionKind::SmallCapacity),
            EXPANSION_ID_LARGE => Some(ExpansionKind::LargeCapacity),
            _ => None,
        }
    }

    /// Identification byte reported by this kind of board
    pub const fn id(self) -> u8 {
        match self {
            ExpansionKind::SmallCapacity => EXPANSION_ID_SMALL,
            ExpansionKind::LargeCapacity => EXPANSION_ID_LARGE,
        }
    }

    /// Span this kind of board provides under `map`
    pub const fn region(self, map: &MemoryMap) -> Region {
        match self {
            ExpansionKind::SmallCapacity => map.expansion_small,
            ExpansionKind::LargeCapacity => map.expansion_large,
        }
    }
}

/// Detector state machine: `Unknown -> {Detected, Absent}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectorState {
    /// No probe has run yet
    #[default]
    Unknown,

    /// Signature or self-test failed
    Absent,

    /// Board present and verified
    Detected { kind: ExpansionKind, region: Region },
}

impl DetectorState {
    /// Published region; empty unless a board was detected
    pub const fn region(&self) -> Region {
        match self {
            DetectorState::Detected { region, .. } => *region,
            _ => Region::EMPTY,
        }
    }

    pub const fn kind(&self) -> Option<ExpansionKind> {
        match self {
            DetectorState::Detected { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub const fn is_detected(&self) -> bool {
        matches!(self, DetectorState::Detected { .. })
    }
}

/// Self-test mismatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("expansion self-test failed at {address:#010x}: wrote {expected:#010x}, read {actual:#010x}")]
pub struct SelfTestFault {
    pub address: usize,
    pub expected: u32,
    pub actual: u32,
}

/// Holds the bus in the expansion configuration; restores the saved
/// registers on drop unless committed
struct BusConfigGuard<'b, B: ExpansionBus> {
    bus: &'b mut B,
    saved: [u32; 2],
    committed: bool,
}

impl<'b, B: ExpansionBus> BusConfigGuard<'b, B> {
    fn acquire(bus: &'b mut B) -> Self {
        let saved = ConfigRegister::ALL.map(|register| bus.read_config(register));
        bus.write_config(
            ConfigRegister::AddressSpaceControl,
            EXPANSION_ADDRESS_SPACE_CONTROL,
        );
        bus.write_config(ConfigRegister::BusRefresh, EXPANSION_BUS_REFRESH);
        Self {
            bus,
            saved,
            committed: false,
        }
    }

    /// Keep the expansion configuration
    fn commit(mut self) {
        self.committed = true;
    }
}

impl<B: ExpansionBus> Deref for BusConfigGuard<'_, B> {
    type Target = B;

    fn deref(&self) -> &B {
        self.bus
    }
}

impl<B: ExpansionBus> DerefMut for BusConfigGuard<'_, B> {
    fn deref_mut(&mut self) -> &mut B {
        self.bus
    }
}

impl<B: ExpansionBus> Drop for BusConfigGuard<'_, B> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for (register, value) in ConfigRegister::ALL.into_iter().zip(self.saved) {
            self.bus.write_config(register, value);
        }
        debug!("expansion: bus configuration restored");
    }
}

/// Write and verify the test patterns in every sub-bank of every bank
fn self_test<B: ExpansionBus>(bus: &mut B) -> Result<(), SelfTestFault> {
    for sub_bank in 0..EXPANSION_SUB_BANK_COUNT {
        // All banks are written before any is read back so aliasing shows up
        for bank in 0..EXPANSION_BANK_COUNT {
            bus.write_word(expansion_dram_address(bank, sub_bank, 0), SELF_TEST_PATTERNS[bank as usize]);
        }

        for bank in 0..EXPANSION_BANK_COUNT {
            let address = expansion_dram_address(bank, sub_bank, 0);
            let expected = SELF_TEST_PATTERNS[bank as usize];
            let actual = bus.read_word(address);
            if actual != expected {
                return Err(SelfTestFault {
                    address,
                    expected,
                    actual,
                });
            }
        }
    }
    Ok(())
}

/// Probes the expansion slot and publishes the verified region
pub struct ExpansionDetector<B: ExpansionBus> {
    bus: B,
    map: MemoryMap,
    state: DetectorState,
    last_id: Option<u8>,
    last_fault: Option<SelfTestFault>,
}

impl<B: ExpansionBus> ExpansionDetector<B> {
    pub fn new(bus: B, map: MemoryMap) -> Self {
        Self {
            bus,
            map,
            state: DetectorState::Unknown,
            last_id: None,
            last_fault: None,
        }
    }

    /// Probe from scratch and publish the outcome
    ///
    /// Each call repeats the full procedure, including the destructive
    /// self-test; only the published state survives between calls.
    pub fn detect(&mut self) -> DetectorState {
        self.last_fault = None;

        let mut guard = BusConfigGuard::acquire(&mut self.bus);
        let id = guard.read_id();
        self.last_id = Some(id);

        let Some(kind) = ExpansionKind::from_id(id) else {
            info!("expansion: no board (id {:#04x})", id);
            self.state = DetectorState::Absent;
            return self.state;
        };

        if let Err(fault) = self_test(&mut *guard) {
            warn!("expansion: {:?} board rejected: {}", kind, fault);
            self.last_fault = Some(fault);
            self.state = DetectorState::Absent;
            return self.state;
        }

        guard.commit();
        let region = kind.region(&self.map);
        info!(
            "expansion: {:?} board at {:#010x} ({} bytes)",
            kind,
            region.base(),
            region.size()
        );
        self.state = DetectorState::Detected { kind, region };
        self.state
    }

    /// Last published state
    pub fn state(&self) -> DetectorState {
        self.state
    }

    /// Identification byte seen by the last probe
    pub fn last_id(&self) -> Option<u8> {
        self.last_id
    }

    /// Mismatch that rejected the last probe, if the self-test failed
    pub fn last_fault(&self) -> Option<SelfTestFault> {
        self.last_fault
    }

    /// Board layout the detector resolves regions against
    pub fn map(&self) -> &MemoryMap {
        &self.map
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}
