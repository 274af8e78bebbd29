//! The RV32I + Zicsr interpreter: an architectural state machine stepped one
//! instruction at a time.

mod counters;
pub mod csr;
mod execute;
mod status;
mod trap;

use crate::bus::{Bus, MemoryError};
use crate::instruction::Instruction;
use crate::registers::Registers;
use crate::{Alignment, PrivilegeLevel};
use counters::Counters;
use log::{debug, trace};
use status::Status;
use thiserror::Error;
use trap::TrapCsrs;

pub use csr::CsrSpecifier;

/// Result of executing a single instruction. [`Ok`] if execution went normal,
/// [`Err`] if an exception occurred.
pub type ExecutionResult<T = ()> = Result<T, Exception>;

/// The interpreter: all architectural state of the hart, plus the memory
/// capability it executes against.
///
/// Construction leaves every register zero, `pc = 0`, and the privilege mode
/// at Machine; hosts position `pc` (and conventionally `sp`) through
/// [`registers_mut`](Self::registers_mut) before the first step.
///
/// The interpreter is strictly synchronous: [`step`](Self::step) runs one
/// fetch/decode/execute sequence to completion and returns a [`StepResult`]
/// describing what happened. Traps are architectural events, not errors: the
/// M-mode CSRs are updated and control is redirected to the trap handler, and
/// the guest may handle the trap and resume with `mret`.
#[derive(Debug)]
pub struct Interpreter<B: Bus> {
    bus: B,
    registers: Registers,
    privilege_mode: PrivilegeLevel,
    status: Status,
    trap_csrs: TrapCsrs,
    counters: Counters,
}

/// Outcome of a single [`Interpreter::step`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StepResult {
    /// The instruction retired normally.
    Retired,
    /// The instruction (or its fetch) raised a synchronous exception; the
    /// trap has been delivered and `pc` now points at the handler.
    Trap {
        cause: Exception,
        /// The pc of the faulting instruction, as saved to `mepc`.
        epc: u32,
    },
    /// The instruction was `ebreak`: a debugger breakpoint asking the host to
    /// pause. No state besides `cycle` changed, and no trap was delivered.
    Halted,
}

impl<B: Bus> Interpreter<B> {
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            registers: Registers::new(0),
            privilege_mode: PrivilegeLevel::Machine,
            status: Status::new(),
            trap_csrs: TrapCsrs::new(),
            counters: Counters::new(),
        }
    }

    /// Returns the current privilege mode.
    pub fn privilege_mode(&self) -> PrivilegeLevel {
        self.privilege_mode
    }

    /// Provides immutable access to the general purpose (x) registers, and
    /// the pc register.
    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    /// Provides mutable access to the general purpose (x) registers, and the
    /// pc register.
    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.registers
    }

    /// The memory capability this interpreter executes against.
    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Fetch the next instruction at pc and execute it.
    ///
    /// A single step performs, in order: increment `cycle`; check pc
    /// alignment; fetch; decode; execute; and on normal completion advance
    /// `pc` (control transfers set it directly) and increment `instret`.
    pub fn step(&mut self) -> StepResult {
        self.counters.increment_cycle();
        let pc = self.registers.pc();
        if !Alignment::WORD.is_aligned(pc) {
            return self.trap(Exception::InstructionAddressMisaligned(pc));
        }
        let raw = match self.fetch_instruction(pc) {
            Ok(raw) => raw,
            Err(exception) => return self.trap(exception),
        };
        let instruction = match Instruction::decode(raw) {
            Ok(instruction) => instruction,
            Err(_) => return self.trap(Exception::IllegalInstruction(Some(raw))),
        };
        if let Instruction::Ebreak = instruction {
            trace!("Executing ebreak");
            return StepResult::Halted;
        }
        match self.execute_instruction(instruction) {
            Ok(()) => {
                self.counters.increment_instret();
                StepResult::Retired
            }
            // Execution-time illegal-instruction exceptions (CSR violations,
            // mret from U-mode) don't carry the raw word; patch it in so
            // mtval is populated.
            Err(Exception::IllegalInstruction(None)) => {
                self.trap(Exception::IllegalInstruction(Some(raw)))
            }
            Err(exception) => self.trap(exception),
        }
    }

    /// Returns a snapshot of all architectural state.
    ///
    /// The dump is a plain value; comparing successive dumps (e.g. to
    /// highlight changed registers) is the host's responsibility.
    pub fn dump_state(&self) -> StateDump {
        StateDump {
            pc: self.registers.pc(),
            regs: self.registers.x_all(),
            privilege: self.privilege_mode,
            mpp: self.status.mpp(),
            mscratch: self.trap_csrs.read_mscratch(),
            mtvec: self.trap_csrs.read_mtvec(),
            mepc: self.trap_csrs.read_mepc(),
            mtval: self.trap_csrs.read_mtval(),
            mcause: self.trap_csrs.read_mcause(),
            cycle: self.counters.cycle(),
            instret: self.counters.instret(),
        }
    }

    /// "Independent instruction fetch unit"
    ///
    /// > The base RISC-V ISA has fixed-length 32-bit instructions that must
    /// > be naturally aligned on 32-bit boundaries.
    fn fetch_instruction(&mut self, address: u32) -> ExecutionResult<u32> {
        self.bus.read_instruction(address).map_err(|err| match err {
            MemoryError::Misaligned => Exception::InstructionAddressMisaligned(address),
            MemoryError::AccessFault => Exception::InstructionAccessFault(address),
        })
    }

    /// Read the value of a CSR by its specifier.
    ///
    /// `privilege_level` indicates at what privilege level the read is
    /// performed. If the CSR that is being read requires a higher privilege
    /// level (see [`csr::required_privilege_level`]), then a
    /// [`CsrAccessError::Privileged`] will be given.
    pub fn read_csr(
        &self,
        specifier: CsrSpecifier,
        privilege_level: PrivilegeLevel,
    ) -> Result<u32, CsrAccessError> {
        Self::check_csr_access(specifier, privilege_level)?;
        match specifier {
            csr::MSTATUS => Ok(self.status.read()),
            csr::MTVEC => Ok(self.trap_csrs.read_mtvec()),
            csr::MSCRATCH => Ok(self.trap_csrs.read_mscratch()),
            csr::MEPC => Ok(self.trap_csrs.read_mepc()),
            csr::MCAUSE => Ok(self.trap_csrs.read_mcause()),
            csr::MTVAL => Ok(self.trap_csrs.read_mtval()),
            csr::CYCLE => Ok(self.counters.read_cycle()),
            csr::CYCLEH => Ok(self.counters.read_cycleh()),
            csr::INSTRET => Ok(self.counters.read_instret()),
            csr::INSTRETH => Ok(self.counters.read_instreth()),
            _ => Err(CsrAccessError::CsrUnsupported(specifier)),
        }
    }

    /// Write a (masked) value to a CSR by its specifier.
    ///
    /// Only the bits of `value` for which the corresponding bit in `mask` is
    /// `1` will be written. Writes to the read-only counters fail with
    /// [`CsrWriteError::WriteToReadOnly`] regardless of the mask.
    pub fn write_csr(
        &mut self,
        specifier: CsrSpecifier,
        privilege_level: PrivilegeLevel,
        value: u32,
        mask: u32,
    ) -> Result<(), CsrWriteError> {
        Self::check_csr_access(specifier, privilege_level)?;
        if csr::is_read_only(specifier) {
            return Err(CsrWriteError::WriteToReadOnly);
        }
        match specifier {
            csr::MSTATUS => self.status.write(value, mask),
            csr::MTVEC => self.trap_csrs.write_mtvec(value, mask),
            csr::MSCRATCH => self.trap_csrs.write_mscratch(value, mask),
            csr::MEPC => self.trap_csrs.write_mepc(value, mask),
            csr::MCAUSE => self.trap_csrs.write_mcause(value, mask),
            csr::MTVAL => self.trap_csrs.write_mtval(value, mask),
            _ => Err(CsrAccessError::CsrUnsupported(specifier))?,
        }
        Ok(())
    }

    fn check_csr_access(
        specifier: CsrSpecifier,
        privilege_level: PrivilegeLevel,
    ) -> Result<(), CsrAccessError> {
        if !csr::is_valid(specifier) {
            return Err(CsrAccessError::CsrUnsupported(specifier));
        }
        let required_level = csr::required_privilege_level(specifier);
        if privilege_level < required_level {
            return Err(CsrAccessError::Privileged {
                specifier,
                required_level,
                actual_level: privilege_level,
            });
        }
        Ok(())
    }

    /// Delivers a trap for `cause` and reports it as a [`StepResult`].
    ///
    /// Trap delivery saves `pc` to mepc, the cause number to mcause, the
    /// trap-specific value to mtval, and the pre-trap privilege to
    /// mstatus.MPP; then enters Machine mode and redirects `pc` to the
    /// (direct-mode) handler address in mtvec. `instret` is not incremented.
    fn trap(&mut self, cause: Exception) -> StepResult {
        let epc = self.registers.pc();
        debug!("Trap: {cause:?} at pc {epc:#010x}");
        let tval = match cause {
            Exception::IllegalInstruction(raw_instruction) => raw_instruction.unwrap_or(0),
            Exception::InstructionAddressMisaligned(address)
            | Exception::InstructionAccessFault(address)
            | Exception::LoadAddressMisaligned(address)
            | Exception::LoadAccessFault(address)
            | Exception::StoreAddressMisaligned(address)
            | Exception::StoreAccessFault(address) => address,
            Exception::EnvironmentCallFromUMode | Exception::EnvironmentCallFromMMode => 0,
        };
        self.trap_csrs.write_mepc(epc, 0xFFFF_FFFF);
        self.trap_csrs.write_mcause(cause.code(), 0xFFFF_FFFF);
        self.trap_csrs.write_mtval(tval, 0xFFFF_FFFF);
        self.status.set_mpp(self.privilege_mode);
        self.privilege_mode = PrivilegeLevel::Machine;
        *self.registers.pc_mut() = self.trap_csrs.trap_handler_address();
        StepResult::Trap { cause, epc }
    }
}

/// Snapshot of all architectural state, as returned by
/// [`Interpreter::dump_state`].
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct StateDump {
    pub pc: u32,
    /// All x registers, indexed by register number. `regs[0]` is always 0.
    pub regs: [u32; 32],
    pub privilege: PrivilegeLevel,
    pub mpp: PrivilegeLevel,
    pub mscratch: u32,
    pub mtvec: u32,
    pub mepc: u32,
    pub mtval: u32,
    pub mcause: u32,
    pub cycle: u64,
    pub instret: u64,
}

/// Errors that can occur when attempting to access a CSR.
#[derive(Error, Debug)]
pub enum CsrAccessError {
    #[error("unsupported CSR: {0:#05X}")]
    CsrUnsupported(CsrSpecifier),
    /// Attempt to access a CSR that requires a higher privilege level.
    #[error(
        "cannot access CSR {specifier:#05X} from privilege level {actual_level}, \
             since it requires privilege level {required_level}"
    )]
    Privileged {
        /// The CSR for which access was requested.
        specifier: CsrSpecifier,
        /// The minimum required privilege level to access that CSR.
        required_level: PrivilegeLevel,
        /// The actual privilege level from which the access was performed.
        actual_level: PrivilegeLevel,
    },
}

/// Errors that can occur when attempting to write to a CSR.
#[derive(Error, Debug)]
pub enum CsrWriteError {
    /// A non-write specific access error. See [`CsrAccessError`].
    #[error("{0}")]
    AccessError(#[from] CsrAccessError),
    /// Attempt to write to a read-only register.
    #[error("writing to read-only CSR is invalid")]
    WriteToReadOnly,
}

/// All synchronous exceptions this machine can raise.
///
/// Note that `ebreak` does *not* raise a breakpoint exception on this
/// machine: it is surfaced to the host as [`StepResult::Halted`] instead.
/// Only the [`Exception::BREAKPOINT`] cause code remains defined, since it
/// is part of the architectural cause numbering.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Exception {
    /// Instruction address is not on a four-byte aligned boundary in memory.
    ///
    /// The inner value is the faulting address.
    InstructionAddressMisaligned(u32),
    /// The inner value is the faulting address.
    InstructionAccessFault(u32),
    /// Generic exception used to communicate one of many possible scenarios:
    ///
    /// - Attempt to decode a reserved or unsupported instruction.
    /// - Attempt to access a non-existent CSR.
    /// - Attempt to access a CSR without the appropriate privilege level.
    /// - Attempt to write to a read-only CSR.
    /// - Attempt to execute `mret` from User mode.
    ///
    /// The inner value is the raw instruction if that data was available.
    IllegalInstruction(Option<u32>),
    /// The inner value is the faulting address.
    LoadAddressMisaligned(u32),
    /// The inner value is the faulting address.
    LoadAccessFault(u32),
    /// The inner value is the faulting address.
    StoreAddressMisaligned(u32),
    /// The inner value is the faulting address.
    StoreAccessFault(u32),
    EnvironmentCallFromUMode,
    EnvironmentCallFromMMode,
}

impl Exception {
    pub const INSTRUCTION_ADDRESS_MISALIGNED: u32 = 0;
    pub const INSTRUCTION_ACCESS_FAULT: u32 = 1;
    pub const ILLEGAL_INSTRUCTION: u32 = 2;
    /// Never raised: `ebreak` halts the host loop instead of trapping. The
    /// code is kept because it is part of the architectural cause numbering.
    pub const BREAKPOINT: u32 = 3;
    pub const LOAD_ADDRESS_MISALIGNED: u32 = 4;
    pub const LOAD_ACCESS_FAULT: u32 = 5;
    pub const STORE_ADDRESS_MISALIGNED: u32 = 6;
    pub const STORE_ACCESS_FAULT: u32 = 7;
    pub const ENVIRONMENT_CALL_FROM_U_MODE: u32 = 8;
    pub const ENVIRONMENT_CALL_FROM_M_MODE: u32 = 11;

    /// Returns the exception code (cause) for this exception, as written to
    /// mcause (interrupt bit clear, since these are all synchronous).
    pub const fn code(&self) -> u32 {
        match self {
            Self::InstructionAddressMisaligned(_) => Self::INSTRUCTION_ADDRESS_MISALIGNED,
            Self::InstructionAccessFault(_) => Self::INSTRUCTION_ACCESS_FAULT,
            Self::IllegalInstruction(_) => Self::ILLEGAL_INSTRUCTION,
            Self::LoadAddressMisaligned(_) => Self::LOAD_ADDRESS_MISALIGNED,
            Self::LoadAccessFault(_) => Self::LOAD_ACCESS_FAULT,
            Self::StoreAddressMisaligned(_) => Self::STORE_ADDRESS_MISALIGNED,
            Self::StoreAccessFault(_) => Self::STORE_ACCESS_FAULT,
            Self::EnvironmentCallFromUMode => Self::ENVIRONMENT_CALL_FROM_U_MODE,
            Self::EnvironmentCallFromMMode => Self::ENVIRONMENT_CALL_FROM_M_MODE,
        }
    }
}
