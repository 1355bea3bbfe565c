//! Platform memory map
//!
//! Fixed addresses and sizes of every memory window the heap touches, plus the
//! register addresses and magic values the expansion slot needs. None of these
//! are computed at runtime; they describe the board.
//!
//! # Layout
//! - Main region: work RAM between the linker's `_heap_start` and `_heap_end`
//!   (window `0x0600_0000..0x07FF_FFFF`)
//! - Auxiliary region: slower work RAM at `0x0020_0000`, 1 MiB
//! - Expansion region: cartridge DRAM, 1 MiB at `0x2258_0000` or 4 MiB at
//!   `0x2240_0000` depending on the identification byte

/// Required alignment of region bases, region sizes and every block
pub const WORD_ALIGN: usize = 4;

/// One contiguous physical memory span `{base, size}`
///
/// The size is always rounded down to [`WORD_ALIGN`]. A region with size 0 is
/// empty and contains no address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Region {
    base: usize,
    size: usize,
}

impl Region {
    /// Region with no backing memory
    pub const EMPTY: Region = Region { base: 0, size: 0 };

    /// Describe a span; `size` is rounded down to a multiple of 4
    pub const fn new(base: usize, size: usize) -> Self {
        Self {
            base,
            size: size & !(WORD_ALIGN - 1),
        }
    }

    /// First address of the span
    pub const fn base(&self) -> usize {
        self.base
    }

    /// Usable size in bytes
    pub const fn size(&self) -> usize {
        self.size
    }

    /// One past the last address of the span
    pub const fn end(&self) -> usize {
        self.base.saturating_add(self.size)
    }

    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Whether `base` satisfies the word alignment requirement
    pub const fn is_aligned(&self) -> bool {
        self.base % WORD_ALIGN == 0
    }

    /// Half-open membership test `[base, base + size)`
    pub const fn contains(&self, address: usize) -> bool {
        address >= self.base && address < self.end()
    }

    /// Region-relative offset of `address`, if it lies inside the span
    pub const fn offset_of(&self, address: usize) -> Option<usize> {
        if self.contains(address) {
            Some(address - self.base)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Work RAM
// ---------------------------------------------------------------------------

/// Auxiliary (low) work RAM base address
pub const AUXILIARY_BASE: usize = 0x0020_0000;

/// Auxiliary (low) work RAM size
pub const AUXILIARY_SIZE: usize = 0x0010_0000;

/// Auxiliary work RAM as a region
pub const AUXILIARY: Region = Region::new(AUXILIARY_BASE, AUXILIARY_SIZE);

// ---------------------------------------------------------------------------
// Expansion slot
// ---------------------------------------------------------------------------

/// Chip-select 0 window: cartridge DRAM banks
pub const CS0_BASE: usize = 0x2200_0000;

/// Chip-select 1 window: cartridge identification
pub const CS1_BASE: usize = 0x2400_0000;

/// Address of the expansion identification byte
pub const EXPANSION_ID_ADDRESS: usize = CS1_BASE + 0x00FF_FFFF;

/// Identification byte of the 1 MiB expansion
pub const EXPANSION_ID_SMALL: u8 = 0x5A;

/// Identification byte of the 4 MiB expansion
pub const EXPANSION_ID_LARGE: u8 = 0x5C;

/// Base of the 1 MiB expansion; aliased so its four sub-banks appear contiguous
pub const EXPANSION_SMALL_BASE: usize = 0x2258_0000;

/// Size of the 1 MiB expansion
pub const EXPANSION_SMALL_SIZE: usize = 0x0010_0000;

/// Base of the 4 MiB expansion
pub const EXPANSION_LARGE_BASE: usize = 0x2240_0000;

/// Size of the 4 MiB expansion
pub const EXPANSION_LARGE_SIZE: usize = 0x0040_0000;

/// Primary DRAM banks on an expansion board
pub const EXPANSION_BANK_COUNT: u32 = 2;

/// Redundant sub-banks per primary bank
pub const EXPANSION_SUB_BANK_COUNT: u32 = 4;

/// Self-test pattern per primary bank, written to that bank's copy of every
/// sub-bank
pub const SELF_TEST_PATTERNS: [u32; EXPANSION_BANK_COUNT as usize] = [0x55AA_1122, 0xAA55_CCDD];

/// Absolute address of `offset` inside `sub_bank` of primary `bank`
///
/// Only the low bit of `bank` and the low two bits of `sub_bank` are decoded.
pub const fn expansion_dram_address(bank: u32, sub_bank: u32, offset: usize) -> usize {
    (CS0_BASE + offset)
        | ((((bank & 0x01) + 2) as usize) << 21)
        | (((sub_bank & 0x03) as usize) << 19)
}

// ---------------------------------------------------------------------------
// Bus configuration
// ---------------------------------------------------------------------------

/// System control unit register window
pub const SCU_BASE: usize = 0x25FE_0000;

/// Address-space control register governing the expansion slot wait states
pub const SCU_ADDRESS_SPACE_CONTROL: usize = SCU_BASE + 0x03C0;

/// Expansion bus refresh control register
pub const SCU_BUS_REFRESH: usize = SCU_BASE + 0x0380;

/// Wait-state setting the expansion hardware needs before it responds
pub const EXPANSION_ADDRESS_SPACE_CONTROL: u32 = 0x2330_1FF0;

/// Refresh setting the expansion DRAM needs before it responds
pub const EXPANSION_BUS_REFRESH: u32 = 0x0000_0013;

/// Board description consumed by heap bring-up
///
/// Bundles the fixed auxiliary span with the two expansion candidates so the
/// same bring-up path runs against the real board or a synthetic test layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryMap {
    /// Auxiliary work RAM
    pub auxiliary: Region,

    /// Expansion span used when the 1 MiB board is detected
    pub expansion_small: Region,

    /// Expansion span used when the 4 MiB board is detected
    pub expansion_large: Region,
}

impl MemoryMap {
    /// The board's own layout
    pub const BOARD: MemoryMap = MemoryMap {
        auxiliary: AUXILIARY,
        expansion_small: Region::new(EXPANSION_SMALL_BASE, EXPANSION_SMALL_SIZE),
        expansion_large: Region::new(EXPANSION_LARGE_BASE, EXPANSION_LARGE_SIZE),
    };
}

impl Default for MemoryMap {
    fn default() -> Self {
        Self::BOARD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_rounds_size_down() {
        let region = Region::new(0x1000, 1023);
        assert_eq!(region.size(), 1020);
        assert_eq!(region.end(), 0x1000 + 1020);
    }

    #[test]
    fn test_region_membership_is_half_open() {
        let region = Region::new(0x1000, 0x100);
        assert!(region.contains(0x1000));
        assert!(region.contains(0x10FF));
        assert!(!region.contains(0x1100));
        assert!(!region.contains(0x0FFF));
        assert_eq!(region.offset_of(0x1010), Some(0x10));
        assert_eq!(region.offset_of(0x1100), None);
    }

    #[test]
    fn test_empty_region_contains_nothing() {
        assert!(Region::EMPTY.is_empty());
        assert!(!Region::EMPTY.contains(0));
    }

    #[test]
    fn test_expansion_dram_addresses() {
        assert_eq!(expansion_dram_address(0, 0, 0), 0x2240_0000);
        assert_eq!(expansion_dram_address(1, 0, 0), 0x2260_0000);
        assert_eq!(expansion_dram_address(0, 3, 0), 0x2258_0000);
        assert_eq!(expansion_dram_address(1, 3, 0), 0x2278_0000);
        // Out-of-range indices wrap onto decoded bits
        assert_eq!(expansion_dram_address(2, 4, 0), expansion_dram_address(0, 0, 0));
    }

    #[test]
    fn test_board_map_windows() {
        let map = MemoryMap::default();
        assert_eq!(map.auxiliary.base(), 0x0020_0000);
        assert_eq!(map.auxiliary.size(), 0x0010_0000);
        assert!(map.expansion_small.is_aligned());
        assert!(map.expansion_large.is_aligned());
    }
}
