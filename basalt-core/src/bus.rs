//! The memory capability the interpreter executes against.
//!
//! The interpreter does not own a memory implementation; it holds any type
//! implementing [`Bus`] and performs all loads, stores, and instruction
//! fetches through it. Hosts compose a concrete bus (see
//! [`crate::system_bus::SystemBus`]) out of backing RAM and MMIO devices.

use crate::{Alignment, unit};
use thiserror::Error;

/// Access widths supported by the bus. All multi-byte accesses are
/// little-endian and must be naturally aligned.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AccessWidth {
    Byte,
    Halfword,
    Word,
}

impl AccessWidth {
    /// Returns the width expressed in bytes.
    pub fn bytes(self) -> u32 {
        match self {
            Self::Byte => unit::BYTE,
            Self::Halfword => unit::HALFWORD,
            Self::Word => unit::WORD,
        }
    }

    /// Returns the natural alignment for this width.
    pub fn alignment(self) -> Alignment {
        match self {
            Self::Byte => Alignment::BYTE,
            Self::Halfword => Alignment::HALFWORD,
            Self::Word => Alignment::WORD,
        }
    }
}

/// Errors that can occur when accessing memory through a [`Bus`].
///
/// The interpreter maps these onto the architectural trap causes appropriate
/// for the access that failed (load, store, or instruction fetch).
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
pub enum MemoryError {
    /// The address is not naturally aligned for the access width.
    #[error("misaligned access")]
    Misaligned,
    /// The address range is unmapped, or the device at that address does not
    /// support the access.
    #[error("access fault")]
    AccessFault,
}

/// Byte-addressable memory as seen by the core.
///
/// Values are zero-extended to 32 bits on read and truncated to the access
/// width on write. Implementations decide which `(address, width)` pairs are
/// mapped; everything else must fail with [`MemoryError::AccessFault`], and
/// non-naturally-aligned addresses with [`MemoryError::Misaligned`], without
/// changing any state.
pub trait Bus {
    /// Reads `width` bytes at `address`, combined little-endian and
    /// zero-extended to 32 bits.
    fn read(&mut self, address: u32, width: AccessWidth) -> Result<u32, MemoryError>;

    /// Writes the low `width` bytes of `value` at `address`, little-endian.
    fn write(&mut self, address: u32, width: AccessWidth, value: u32) -> Result<(), MemoryError>;

    /// Fetches the 32-bit instruction word at `address`.
    ///
    /// Equivalent to `read(address, AccessWidth::Word)`; the caller maps
    /// failures onto instruction-side traps rather than load-side traps.
    fn read_instruction(&mut self, address: u32) -> Result<u32, MemoryError> {
        self.read(address, AccessWidth::Word)
    }
}
