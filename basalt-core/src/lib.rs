//! Core of the basalt emulator: an RV32I + Zicsr assembler and interpreter.
//!
//! The crate is UI-agnostic. A host assembles source text with
//! [`asm::assemble`], copies the resulting image into a [`system_bus::SystemBus`]
//! (or any other [`bus::Bus`] implementation), and drives an
//! [`interp::Interpreter`] one [`interp::Interpreter::step`] at a time,
//! inspecting state through [`interp::Interpreter::dump_state`].

#[macro_use]
extern crate static_assertions;

use std::fmt;

pub mod address_range;
pub mod asm;
pub mod bus;
pub mod instruction;
pub mod interp;
pub mod registers;
pub mod resources;
pub mod system_bus;

/// Re-export of [`AddressRange`](address_range::AddressRange) for convenience.
pub use address_range::AddressRange;
pub use bus::{AccessWidth, Bus, MemoryError};
pub use interp::{Interpreter, StateDump, StepResult};

/// List of privilege levels supported by this machine.
///
/// A privilege level is always referenced by two bits. The full RISC-V scheme
/// defines levels `0` (User), `1` (Supervisor), and `3` (Machine); this
/// machine implements only the two mandatory-plus-application levels.
///
/// > The machine level has the highest privileges and is the only mandatory
/// > privilege level for a RISC-V hardware platform. Code run in machine-mode
/// > (M-mode) is usually inherently trusted, as it has low-level access to the
/// > machine implementation.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum PrivilegeLevel {
    /// User/application (abbreviated `U`) is the lower privilege level.
    User = 0,
    /// Machine (abbreviated `M`) is the highest privilege level.
    Machine = 3,
}

impl PrivilegeLevel {
    /// Convert a 2-bit value into a [`PrivilegeLevel`].
    ///
    /// Returns `None` for the Supervisor and reserved encodings, which this
    /// machine does not implement.
    pub fn from_u2(value_u2: u8) -> Option<Self> {
        match value_u2 {
            0 => Some(Self::User),
            3 => Some(Self::Machine),
            _ => None,
        }
    }
}

impl fmt::Display for PrivilegeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            PrivilegeLevel::User => "U",
            PrivilegeLevel::Machine => "M",
        })
    }
}

pub mod unit {
    //! Collection of the units in which memory can be addressed (in bytes).

    /// A _byte_ is 8 bits.
    pub const BYTE: u32 = 1;

    /// A _halfword_ is 16 bits (2 bytes).
    pub const HALFWORD: u32 = 2;

    /// A _word_ is 32 bits (4 bytes).
    pub const WORD: u32 = 4;
}

/// Natural address alignment for the access units of this machine.
// Maintains the invariant that self.0 is a power of two.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Alignment(u32);

impl Alignment {
    /// Byte alignment is equivalent to no alignment.
    pub const BYTE: Self = Self(1);

    /// Halfword alignment means the address is a multiple of 2 (`address & 0b1 == 0`).
    pub const HALFWORD: Self = Self(2);

    /// Word alignment means the address is a multiple of 4 (`address & 0b11 == 0`).
    pub const WORD: Self = Self(4);

    /// Creates the natural alignment for a unit of size `size`. Returns `None`
    /// if `size` is not a power of two.
    pub fn natural_for_size(size: u32) -> Option<Self> {
        size.is_power_of_two().then_some(Self(size))
    }

    /// Returns the alignment as a power of two.
    pub fn as_power_of_two(self) -> u32 {
        self.0
    }

    /// Returns `true` if `address` is aligned to this alignment.
    pub fn is_aligned(self, address: u32) -> bool {
        address & self.0.wrapping_sub(1) == 0
    }
}
