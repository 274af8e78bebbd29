//! Specifiers for all supported CSRs.
//!
//! This machine implements exactly ten CSRs: the M-mode status, scratch, and
//! trap-handling registers, plus the unprivileged read-only cycle/instret
//! counters (with their RV32 high halves). Every other specifier in the
//! 12-bit space is unsupported and accessing it raises an illegal-instruction
//! trap.

use crate::PrivilegeLevel;

/// General 12-bit value representing a CSR specifier. Note that this can hold
/// any 12-bit value, even if the value represents an unsupported or
/// non-existent CSR.
pub type CsrSpecifier = u16;

//
// Machine trap setup (`0x300..=0x305`).
//
/// Machine status register. Only the MPP field is implemented.
pub const MSTATUS: CsrSpecifier = 0x300;
/// Machine trap-handler base address. Only direct mode is supported.
pub const MTVEC: CsrSpecifier = 0x305;

//
// Machine trap handling (`0x340..=0x343`).
//
/// Scratch register for machine trap handlers.
pub const MSCRATCH: CsrSpecifier = 0x340;
/// Machine exception program counter.
pub const MEPC: CsrSpecifier = 0x341;
/// Machine trap cause.
pub const MCAUSE: CsrSpecifier = 0x342;
/// Machine bad address or instruction.
pub const MTVAL: CsrSpecifier = 0x343;

//
// Unprivileged counters (`0xC00..`, `0xC80..`).
//
/// Cycle counter for RDCYCLE instruction.
pub const CYCLE: CsrSpecifier = 0xC00;
/// Instructions-retired counter for RDINSTRET instruction.
pub const INSTRET: CsrSpecifier = 0xC02;
/// Upper 32 bits of [`CYCLE`], RV32 only.
pub const CYCLEH: CsrSpecifier = 0xC80;
/// Upper 32 bits of [`INSTRET`], RV32 only.
pub const INSTRETH: CsrSpecifier = 0xC82;

/// All implemented specifiers paired with their names, used by the assembler
/// (CSR name operands) and the disassembler.
const NAMES: [(CsrSpecifier, &str); 10] = [
    (MSTATUS, "mstatus"),
    (MTVEC, "mtvec"),
    (MSCRATCH, "mscratch"),
    (MEPC, "mepc"),
    (MCAUSE, "mcause"),
    (MTVAL, "mtval"),
    (CYCLE, "cycle"),
    (INSTRET, "instret"),
    (CYCLEH, "cycleh"),
    (INSTRETH, "instreth"),
];

/// Returns `true` if `specifier` addresses an implemented CSR.
pub fn is_valid(specifier: CsrSpecifier) -> bool {
    NAMES.iter().any(|(valid, _)| *valid == specifier)
}

/// Returns `true` if `specifier` addresses a read-only CSR.
///
/// > The top two bits (csr\[11:10]) indicate whether the register is
/// > read/write (00, 01, or 10) or read-only (11).
pub fn is_read_only(specifier: CsrSpecifier) -> bool {
    specifier >> 10 == 0b11
}

/// Returns the lowest privilege level allowed to access the CSR.
///
/// > The next two bits (csr\[9:8]) encode the lowest privilege level that can
/// > access the CSR.
pub fn required_privilege_level(specifier: CsrSpecifier) -> PrivilegeLevel {
    match (specifier >> 8) & 0b11 {
        0b00 => PrivilegeLevel::User,
        // The S- and H-level encodings don't occur among the implemented
        // CSRs, but any specifier can be probed; requiring M for them is
        // always correct on a two-level machine.
        _ => PrivilegeLevel::Machine,
    }
}

/// The name of an implemented CSR, or `None` for any other specifier.
pub fn name(specifier: CsrSpecifier) -> Option<&'static str> {
    NAMES
        .iter()
        .find(|(valid, _)| *valid == specifier)
        .map(|(_, name)| *name)
}

/// Looks up an implemented CSR by name (case-insensitive).
pub fn specifier_for_name(name: &str) -> Option<CsrSpecifier> {
    let name = name.to_ascii_lowercase();
    NAMES
        .iter()
        .find(|(_, valid)| *valid == name)
        .map(|(specifier, _)| *specifier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(is_valid(MSTATUS));
        assert!(is_valid(INSTRETH));
        assert!(!is_valid(0x306));
        assert!(!is_valid(0xC01)); // time is not implemented

        assert!(is_read_only(CYCLE));
        assert!(is_read_only(INSTRETH));
        assert!(!is_read_only(MSTATUS));
        assert!(!is_read_only(MEPC));

        assert_eq!(PrivilegeLevel::Machine, required_privilege_level(MSTATUS));
        assert_eq!(PrivilegeLevel::User, required_privilege_level(CYCLE));
    }

    #[test]
    fn test_names() {
        assert_eq!(Some(MTVEC), specifier_for_name("mtvec"));
        assert_eq!(Some(MTVEC), specifier_for_name("MTVEC"));
        assert_eq!(None, specifier_for_name("satp"));
        assert_eq!(Some("mcause"), name(MCAUSE));
        assert_eq!(None, name(0x344));
    }
}
