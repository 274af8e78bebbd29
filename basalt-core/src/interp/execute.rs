//! Instruction semantics.

use super::{CsrSpecifier, Exception, ExecutionResult, Interpreter};
use crate::bus::{AccessWidth, Bus, MemoryError};
use crate::instruction::{
    BranchCondition, CsrOp, Instruction, LoadWidth, RegImmOp, RegRegOp, RegShiftImmOp, StoreWidth,
};
use crate::registers::{Registers, Specifier};
use crate::PrivilegeLevel;
use log::trace;

impl<B: Bus> Interpreter<B> {
    /// Execute a single (decoded) instruction.
    ///
    /// This only takes care of the instruction-specific operations: updating
    /// `x` registers, memory, the `pc` register, and CSRs. Counter updates
    /// and trap delivery happen in [`Interpreter::step`].
    pub(super) fn execute_instruction(&mut self, instruction: Instruction) -> ExecutionResult {
        match instruction {
            Instruction::OpImm {
                op,
                dest,
                src,
                immediate,
            } => {
                let op = match op {
                    RegImmOp::Addi => Self::addi,
                    RegImmOp::Slti => Self::slti,
                    RegImmOp::Sltiu => Self::sltiu,
                    RegImmOp::Xori => Self::xori,
                    RegImmOp::Ori => Self::ori,
                    RegImmOp::Andi => Self::andi,
                };
                op(self, dest, src, immediate)
            }
            Instruction::OpShiftImm {
                op,
                dest,
                src,
                shift_amount_u5,
            } => {
                let op = match op {
                    RegShiftImmOp::Slli => Self::slli,
                    RegShiftImmOp::Srli => Self::srli,
                    RegShiftImmOp::Srai => Self::srai,
                };
                op(self, dest, src, shift_amount_u5)
            }
            Instruction::Auipc { dest, immediate } => self.auipc(dest, immediate),
            Instruction::Lui { dest, immediate } => self.lui(dest, immediate),
            Instruction::Op {
                op,
                dest,
                src1,
                src2,
            } => {
                let op = match op {
                    RegRegOp::Add => Self::add,
                    RegRegOp::Slt => Self::slt,
                    RegRegOp::Sltu => Self::sltu,
                    RegRegOp::And => Self::and,
                    RegRegOp::Or => Self::or,
                    RegRegOp::Xor => Self::xor,
                    RegRegOp::Sll => Self::sll,
                    RegRegOp::Srl => Self::srl,
                    RegRegOp::Sub => Self::sub,
                    RegRegOp::Sra => Self::sra,
                };
                op(self, dest, src1, src2)
            }
            Instruction::Jal { dest, offset } => self.jal(dest, offset),
            Instruction::Jalr { dest, base, offset } => self.jalr(dest, base, offset),
            Instruction::Branch {
                condition,
                src1,
                src2,
                offset,
            } => {
                let op = match condition {
                    BranchCondition::Beq => Self::beq,
                    BranchCondition::Bne => Self::bne,
                    BranchCondition::Blt => Self::blt,
                    BranchCondition::Bltu => Self::bltu,
                    BranchCondition::Bge => Self::bge,
                    BranchCondition::Bgeu => Self::bgeu,
                };
                op(self, src1, src2, offset)
            }
            Instruction::Load {
                width,
                dest,
                base,
                offset,
            } => {
                let op = match width {
                    LoadWidth::Lb => Self::lb,
                    LoadWidth::Lh => Self::lh,
                    LoadWidth::Lw => Self::lw,
                    LoadWidth::Lbu => Self::lbu,
                    LoadWidth::Lhu => Self::lhu,
                };
                op(self, dest, base, offset)
            }
            Instruction::Store {
                width,
                src,
                base,
                offset,
            } => {
                let op = match width {
                    StoreWidth::Sb => Self::sb,
                    StoreWidth::Sh => Self::sh,
                    StoreWidth::Sw => Self::sw,
                };
                op(self, src, base, offset)
            }
            Instruction::Fence => self.fence(),
            Instruction::Ecall => self.ecall(),
            // ebreak is intercepted in step() and never reaches execution.
            Instruction::Ebreak => Ok(()),
            Instruction::Mret => self.mret(),
            Instruction::Csr { op, dest, csr, src } => self.csr_reg_op(op, dest, csr, src),
            Instruction::Csri {
                op,
                dest,
                csr,
                immediate,
            } => self.csr_imm_op(op, dest, csr, immediate),
        }
    }

    /// Executes an `addi` instruction.
    ///
    /// > ADDI adds the sign-extended 12-bit immediate to register rs1.
    /// > Arithmetic overflow is ignored and the result is simply the low XLEN
    /// > bits of the result.
    fn addi(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        trace!("Executing addi {dest} {src} {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| s.wrapping_add_signed(imm))
    }

    /// > SLTI (set less than immediate) places the value 1 in register rd if
    /// > register rs1 is less than the sign-extended immediate when both are
    /// > treated as signed numbers, else 0 is written to rd.
    fn slti(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        trace!("Executing slti {dest} {src} {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| ((s as i32) < imm) as u32)
    }

    /// > SLTIU is similar but compares the values as unsigned numbers (i.e.,
    /// > the immediate is first sign-extended to XLEN bits then treated as an
    /// > unsigned number). Note, SLTIU rd, rs1, 1 sets rd to 1 if rs1 equals
    /// > zero, otherwise sets rd to 0 (assembler pseudoinstruction SEQZ rd, rs).
    fn sltiu(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        trace!("Executing sltiu {dest} {src} {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| (s < (imm as u32)) as u32)
    }

    fn xori(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        trace!("Executing xori {dest} {src} {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| s ^ (imm as u32))
    }

    fn ori(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        trace!("Executing ori {dest} {src} {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| s | (imm as u32))
    }

    fn andi(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        trace!("Executing andi {dest} {src} {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| s & (imm as u32))
    }

    fn slli(&mut self, dest: Specifier, src: Specifier, shift_amount_u5: u32) -> ExecutionResult {
        trace!("Executing slli {dest} {src} {shift_amount_u5}");
        self.reg_shamt_op(dest, src, shift_amount_u5, |s, shamt| s << shamt)
    }

    fn srli(&mut self, dest: Specifier, src: Specifier, shift_amount_u5: u32) -> ExecutionResult {
        trace!("Executing srli {dest} {src} {shift_amount_u5}");
        self.reg_shamt_op(dest, src, shift_amount_u5, |s, shamt| s >> shamt)
    }

    /// > SRAI is an arithmetic right shift (the original sign bit is copied
    /// > into the vacated upper bits).
    fn srai(&mut self, dest: Specifier, src: Specifier, shift_amount_u5: u32) -> ExecutionResult {
        trace!("Executing srai {dest} {src} {shift_amount_u5}");
        self.reg_shamt_op(dest, src, shift_amount_u5, |s, shamt| {
            ((s as i32) >> shamt) as u32
        })
    }

    /// Executes a `lui` instruction.
    ///
    /// > LUI (load upper immediate) is used to build 32-bit constants and
    /// > uses the U-type format. LUI places the U-immediate value in the top
    /// > 20 bits of the destination register rd, filling in the lowest 12
    /// > bits with zeros.
    fn lui(&mut self, dest: Specifier, immediate: i32) -> ExecutionResult {
        trace!("Executing lui {dest} {immediate}");
        let result = immediate as u32 & !0xFFF;
        self.registers_mut().set_x(dest, result);
        increment_pc(self.registers_mut());
        Ok(())
    }

    /// Executes an `auipc` instruction.
    ///
    /// > AUIPC (add upper immediate to pc) is used to build pc-relative
    /// > addresses and uses the U-type format. AUIPC forms a 32-bit offset
    /// > from the 20-bit U-immediate, filling in the lowest 12 bits with
    /// > zeros, adds this offset to the address of the AUIPC instruction,
    /// > then places the result in register rd.
    fn auipc(&mut self, dest: Specifier, immediate: i32) -> ExecutionResult {
        trace!("Executing auipc {dest} {immediate}");
        let registers = self.registers_mut();
        let result = registers.pc().wrapping_add_signed(immediate & !0xFFF);
        registers.set_x(dest, result);
        increment_pc(registers);
        Ok(())
    }

    fn add(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing add {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1.wrapping_add(s2))
    }

    fn sub(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing sub {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1.wrapping_sub(s2))
    }

    /// > SLT and SLTU perform signed and unsigned compares respectively,
    /// > writing 1 to rd if rs1 < rs2, 0 otherwise.
    fn slt(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing slt {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            ((s1 as i32) < (s2 as i32)) as u32
        })
    }

    fn sltu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing sltu {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| (s1 < s2) as u32)
    }

    fn and(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing and {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 & s2)
    }

    fn or(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing or {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 | s2)
    }

    fn xor(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing xor {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 ^ s2)
    }

    /// > SLL, SRL, and SRA perform logical left, logical right, and
    /// > arithmetic right shifts on the value in register rs1 by the shift
    /// > amount held in the lower 5 bits of register rs2.
    fn sll(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing sll {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 << (s2 & 0x1F))
    }

    fn srl(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing srl {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 >> (s2 & 0x1F))
    }

    fn sra(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing sra {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            ((s1 as i32) >> (s2 & 0x1F)) as u32
        })
    }

    /// Executes a `jal` instruction.
    ///
    /// The target address is not checked for alignment here: a misaligned
    /// target is caught by the alignment check at the start of the next step,
    /// which reports the target itself in mepc/mtval.
    fn jal(&mut self, dest: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing jal {dest} {offset}");
        self.jump_op(dest, |registers| registers.pc().wrapping_add_signed(offset))
    }

    /// Executes a `jalr` instruction.
    ///
    /// > The target address is obtained by adding the sign-extended 12-bit
    /// > I-immediate to the register rs1, then setting the least-significant
    /// > bit of the result to zero.
    fn jalr(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing jalr {dest} {base} {offset}");
        self.jump_op(dest, |registers| {
            registers.x(base).wrapping_add_signed(offset) & !1
        })
    }

    fn beq(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing beq {src1} {src2} {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| s1 == s2)
    }

    fn bne(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing bne {src1} {src2} {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| s1 != s2)
    }

    fn blt(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing blt {src1} {src2} {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| (s1 as i32) < (s2 as i32))
    }

    fn bltu(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing bltu {src1} {src2} {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| s1 < s2)
    }

    fn bge(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing bge {src1} {src2} {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| (s1 as i32) >= (s2 as i32))
    }

    fn bgeu(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing bgeu {src1} {src2} {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| s1 >= s2)
    }

    fn lb(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing lb {dest} {offset}({base})");
        self.load_op(dest, base, offset, AccessWidth::Byte, |value| {
            value as u8 as i8 as u32
        })
    }

    fn lbu(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing lbu {dest} {offset}({base})");
        self.load_op(dest, base, offset, AccessWidth::Byte, |value| value)
    }

    fn lh(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing lh {dest} {offset}({base})");
        self.load_op(dest, base, offset, AccessWidth::Halfword, |value| {
            value as u16 as i16 as u32
        })
    }

    fn lhu(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing lhu {dest} {offset}({base})");
        self.load_op(dest, base, offset, AccessWidth::Halfword, |value| value)
    }

    fn lw(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing lw {dest} {offset}({base})");
        self.load_op(dest, base, offset, AccessWidth::Word, |value| value)
    }

    fn sb(&mut self, src: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing sb {src} {offset}({base})");
        self.store_op(src, base, offset, AccessWidth::Byte)
    }

    fn sh(&mut self, src: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing sh {src} {offset}({base})");
        self.store_op(src, base, offset, AccessWidth::Halfword)
    }

    fn sw(&mut self, src: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("Executing sw {src} {offset}({base})");
        self.store_op(src, base, offset, AccessWidth::Word)
    }

    fn fence(&mut self) -> ExecutionResult {
        trace!("Executing fence");
        // Since only one hart is supported, this is equivalent to a nop
        // instruction.
        increment_pc(self.registers_mut());
        Ok(())
    }

    fn ecall(&mut self) -> ExecutionResult {
        trace!("Executing ecall");
        match self.privilege_mode() {
            PrivilegeLevel::User => Err(Exception::EnvironmentCallFromUMode),
            PrivilegeLevel::Machine => Err(Exception::EnvironmentCallFromMMode),
        }
    }

    /// Executes an `mret` instruction.
    ///
    /// Returns from a machine-mode trap handler: `pc` is restored from mepc
    /// (not advanced past the mret), the privilege mode is restored from
    /// mstatus.MPP, and MPP is reset to the least-privileged supported mode
    /// (User). Executing `mret` from User mode is an illegal instruction.
    fn mret(&mut self) -> ExecutionResult {
        trace!("Executing mret");
        if self.privilege_mode() < PrivilegeLevel::Machine {
            return Err(Exception::IllegalInstruction(None));
        }
        let pp = self.status.mpp();
        self.status.set_mpp(PrivilegeLevel::User);
        self.privilege_mode = pp;
        *self.registers_mut().pc_mut() = self.trap_csrs.read_mepc();
        Ok(())
    }

    // Private generic implementations

    fn reg_imm_op<F>(
        &mut self,
        dest: Specifier,
        src: Specifier,
        immediate: i32,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u32, i32) -> u32,
    {
        let registers = self.registers_mut();
        registers.set_x(dest, op(registers.x(src), immediate));
        increment_pc(registers);
        Ok(())
    }

    fn reg_shamt_op<F>(
        &mut self,
        dest: Specifier,
        src: Specifier,
        shift_amount_u5: u32,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u32, u32) -> u32,
    {
        if shift_amount_u5 > 31 {
            panic!("out of range u5 used");
        }
        let registers = self.registers_mut();
        registers.set_x(dest, op(registers.x(src), shift_amount_u5));
        increment_pc(registers);
        Ok(())
    }

    fn reg_reg_op<F>(
        &mut self,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u32, u32) -> u32,
    {
        let registers = self.registers_mut();
        registers.set_x(dest, op(registers.x(src1), registers.x(src2)));
        increment_pc(registers);
        Ok(())
    }

    fn jump_op<F>(&mut self, dest: Specifier, compute_target: F) -> ExecutionResult
    where
        F: FnOnce(&Registers) -> u32,
    {
        let registers = self.registers_mut();
        let new_pc = compute_target(registers);
        let old_pc = std::mem::replace(registers.pc_mut(), new_pc);
        // Write incremented old pc to `dest` register
        registers.set_x(dest, old_pc.wrapping_add(4));
        Ok(())
    }

    // Takes the branch if `predicate` returns `true`.
    fn cond_branch<P>(
        &mut self,
        src1: Specifier,
        src2: Specifier,
        offset: i32,
        predicate: P,
    ) -> ExecutionResult
    where
        P: FnOnce(u32, u32) -> bool,
    {
        let registers = self.registers_mut();
        if predicate(registers.x(src1), registers.x(src2)) {
            let new_pc = registers.pc().wrapping_add_signed(offset);
            *registers.pc_mut() = new_pc;
        } else {
            increment_pc(registers);
        }
        Ok(())
    }

    fn load_op<F>(
        &mut self,
        dest: Specifier,
        base: Specifier,
        offset: i32,
        width: AccessWidth,
        extend: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u32) -> u32,
    {
        let address = self.registers().x(base).wrapping_add_signed(offset);
        let value = self.bus_mut().read(address, width).map_err(|err| match err {
            MemoryError::Misaligned => Exception::LoadAddressMisaligned(address),
            MemoryError::AccessFault => Exception::LoadAccessFault(address),
        })?;
        let registers = self.registers_mut();
        registers.set_x(dest, extend(value));
        increment_pc(registers);
        Ok(())
    }

    fn store_op(
        &mut self,
        src: Specifier,
        base: Specifier,
        offset: i32,
        width: AccessWidth,
    ) -> ExecutionResult {
        let registers = self.registers();
        let value = registers.x(src);
        let address = registers.x(base).wrapping_add_signed(offset);
        self.bus_mut()
            .write(address, width, value)
            .map_err(|err| match err {
                MemoryError::Misaligned => Exception::StoreAddressMisaligned(address),
                MemoryError::AccessFault => Exception::StoreAccessFault(address),
            })?;
        increment_pc(self.registers_mut());
        Ok(())
    }

    fn csr_reg_op(
        &mut self,
        op: CsrOp,
        dest: Specifier,
        csr: CsrSpecifier,
        src: Specifier,
    ) -> ExecutionResult {
        trace!("Executing csr op {op:?} {dest} {csr:#05x} {src}");
        // > For both CSRRS and CSRRC, if rs1=x0, then the instruction will
        // > not write to the CSR at all, and so shall not cause any of the
        // > side effects that might otherwise occur on a CSR write, such as
        // > raising illegal instruction exceptions on accesses to read-only
        // > CSRs.
        let src_value = (op == CsrOp::ReadWrite || src != Specifier::X0)
            .then(|| self.registers().x(src));
        self.csr_op(op, dest, csr, src_value)
    }

    fn csr_imm_op(
        &mut self,
        op: CsrOp,
        dest: Specifier,
        csr: CsrSpecifier,
        immediate: u32,
    ) -> ExecutionResult {
        trace!("Executing csr immediate op {op:?} {dest} {csr:#05x} {immediate}");
        // > For CSRRSI and CSRRCI, if the uimm[4:0] field is zero, then these
        // > instructions will not write to the CSR, and shall not cause any
        // > of the side effects that might otherwise occur on a CSR write.
        let src_value = (op == CsrOp::ReadWrite || immediate != 0).then_some(immediate);
        self.csr_op(op, dest, csr, src_value)
    }

    /// Common implementation of the Zicsr instructions.
    ///
    /// > The CSRRW (Atomic Read/Write CSR) instruction atomically swaps
    /// > values in the CSRs and integer registers. [...] If rd=x0, then the
    /// > instruction shall not read the CSR and shall not cause any of the
    /// > side effects that might occur on a CSR read.
    ///
    /// `src_value` is `None` when the write side is suppressed.
    fn csr_op(
        &mut self,
        op: CsrOp,
        dest: Specifier,
        csr: CsrSpecifier,
        src_value: Option<u32>,
    ) -> ExecutionResult {
        let privilege_level = self.privilege_mode();
        // > For CSRRWI, if rd=x0, then the instruction shall not read the CSR
        // > and shall not cause any of the side effects that might occur on a
        // > CSR read.
        let old_value = match op != CsrOp::ReadWrite || dest != Specifier::X0 {
            true => Some(
                self.read_csr(csr, privilege_level)
                    .map_err(|_| Exception::IllegalInstruction(None))?,
            ),
            false => None,
        };
        if let Some(src_value) = src_value {
            let (value, mask) = match op {
                CsrOp::ReadWrite => (src_value, 0xFFFF_FFFF),
                CsrOp::ReadSet => (0xFFFF_FFFF, src_value),
                CsrOp::ReadClear => (0x0000_0000, src_value),
            };
            self.write_csr(csr, privilege_level, value, mask)
                .map_err(|_| Exception::IllegalInstruction(None))?;
        }
        // rd is only committed once both halves of the operation are known to
        // be legal, keeping a trapping CSR instruction free of side effects.
        if let Some(old_value) = old_value {
            self.registers_mut().set_x(dest, old_value);
        }
        increment_pc(self.registers_mut());
        Ok(())
    }
}

fn increment_pc(registers: &mut Registers) {
    let pc = registers.pc_mut();
    *pc = pc.wrapping_add(4);
}
