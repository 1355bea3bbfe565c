//! Packed block header codec
//!
//! Every block starts with one 32-bit word: the top bit is the state flag,
//! the low 31 bits the payload size in bytes (header excluded). The word is
//! stored in native byte order at a 4-byte aligned region offset.

use bitflags::bitflags;
use static_assertions::const_assert_eq;

/// Bytes occupied by a header in front of every payload
pub const HEADER_SIZE: usize = core::mem::size_of::<u32>();

/// Largest payload a single header can describe
pub const MAX_BLOCK_SIZE: usize = HeaderBits::SIZE.bits() as usize;

const_assert_eq!(HEADER_SIZE, 4);
const_assert_eq!(HEADER_SIZE % zoneheap_platform::memory_map::WORD_ALIGN, 0);

bitflags! {
    /// Raw header word
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct HeaderBits: u32 {
        /// Block is handed out to a caller
        const USED = 1 << 31;

        /// Payload size mask
        const SIZE = 0x7FFF_FFFF;
    }
}

const_assert_eq!(HeaderBits::USED.bits() & HeaderBits::SIZE.bits(), 0);

/// Block state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Free,
    Used,
}

/// Decoded block header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub state: BlockState,
    pub size: usize,
}

impl Header {
    pub const fn free(size: usize) -> Self {
        Self {
            state: BlockState::Free,
            size,
        }
    }

    pub const fn used(size: usize) -> Self {
        Self {
            state: BlockState::Used,
            size,
        }
    }

    pub const fn is_free(&self) -> bool {
        matches!(self.state, BlockState::Free)
    }

    /// Header plus payload
    pub const fn span(&self) -> usize {
        HEADER_SIZE + self.size
    }

    /// Pack into the on-memory word; sizes above 31 bits are truncated
    pub fn encode(self) -> u32 {
        let mut bits = HeaderBits::from_bits_retain(self.size as u32) & HeaderBits::SIZE;
        if self.state == BlockState::Used {
            bits |= HeaderBits::USED;
        }
        bits.bits()
    }

    /// Unpack an on-memory word
    pub fn decode(word: u32) -> Self {
        let bits = HeaderBits::from_bits_retain(word);
        let state = if bits.contains(HeaderBits::USED) {
            BlockState::Used
        } else {
            BlockState::Free
        };
        Self {
            state,
            size: (bits & HeaderBits::SIZE).bits() as usize,
        }
    }

    /// Read the header at `offset`, if a whole header fits in `memory`
    pub fn read(memory: &[u8], offset: usize) -> Option<Self> {
        let end = offset.checked_add(HEADER_SIZE)?;
        let bytes: [u8; HEADER_SIZE] = memory.get(offset..end)?.try_into().ok()?;
        Some(Self::decode(u32::from_ne_bytes(bytes)))
    }

    /// Write the header at `offset`; returns false if it would not fit
    pub fn write(self, memory: &mut [u8], offset: usize) -> bool {
        let Some(end) = offset.checked_add(HEADER_SIZE) else {
            return false;
        };
        match memory.get_mut(offset..end) {
            Some(slot) => {
                slot.copy_from_slice(&self.encode().to_ne_bytes());
                true
            }
            None => false,
        }
    }
}

/// Round `size` up to the next multiple of the header alignment
pub const fn align_up(size: usize) -> Option<usize> {
    match size.checked_add(HEADER_SIZE - 1) {
        Some(padded) => Some(padded & !(HEADER_SIZE - 1)),
        None => None,
    }
}
