//! Bit-exact encoding of instructions and pseudo-instruction expansion.
//!
//! The bit layouts here are the exact inverses of the extractors in
//! [`crate::instruction`]: encoding a word and decoding it again yields the
//! same fields.

use super::parser::{hi20, lo12, Expr, Operand, SourceInstruction};
use super::ErrorKind;
use crate::interp::csr::{self, CsrSpecifier};
use crate::registers::Specifier;
use std::collections::HashMap;

const OPCODE_LOAD: u32 = 0b00_000_11;
const OPCODE_OP_IMM: u32 = 0b00_100_11;
const OPCODE_AUIPC: u32 = 0b00_101_11;
const OPCODE_STORE: u32 = 0b01_000_11;
const OPCODE_OP: u32 = 0b01_100_11;
const OPCODE_LUI: u32 = 0b01_101_11;
const OPCODE_BRANCH: u32 = 0b11_000_11;
const OPCODE_JALR: u32 = 0b11_001_11;
const OPCODE_JAL: u32 = 0b11_011_11;
const OPCODE_SYSTEM: u32 = 0b11_100_11;

/// `fence` with all predecessor/successor bits set (`fence iorw, iorw`).
const FENCE_IORW: u32 = 0x0FF0_000F;
const ECALL: u32 = 0x0000_0073;
const EBREAK: u32 = 0x0010_0073;
const MRET: u32 = 0x3020_0073;

/// The number of bytes the instruction will occupy, decided from syntax
/// alone so that pass 1 and pass 2 always agree.
///
/// `li` takes a single `addi` only when its operand is a constant fitting a
/// signed 12-bit immediate; every other operand form reserves the worst-case
/// `lui`+`addi` pair. `la` and `call` always expand to two instructions.
pub fn instruction_size(instruction: &SourceInstruction) -> Result<u32, ErrorKind> {
    match instruction.mnemonic.as_str() {
        "li" => Ok(match li_short_value(expr_operand(instruction, 1)?) {
            Some(_) => 4,
            None => 8,
        }),
        "la" | "call" => Ok(8),
        "add" | "sub" | "sll" | "slt" | "sltu" | "xor" | "srl" | "sra" | "or" | "and" | "addi"
        | "slti" | "sltiu" | "xori" | "ori" | "andi" | "slli" | "srli" | "srai" | "lui"
        | "auipc" | "beq" | "bne" | "blt" | "bge" | "bltu" | "bgeu" | "jal" | "jalr" | "lb"
        | "lh" | "lw" | "lbu" | "lhu" | "sb" | "sh" | "sw" | "fence" | "ecall" | "ebreak"
        | "mret" | "csrrw" | "csrrs" | "csrrc" | "csrrwi" | "csrrsi" | "csrrci" | "nop" | "mv"
        | "j" | "jr" | "ret" | "beqz" | "bnez" | "bltz" | "bgez" | "blez" | "bgtz" | "not"
        | "neg" | "seqz" | "snez" | "csrr" | "csrw" => Ok(4),
        other => Err(ErrorKind::UnknownMnemonic(other.to_string())),
    }
}

/// Encodes one source instruction (expanding pseudos) into its words.
pub fn encode_instruction(
    instruction: &SourceInstruction,
    address: u32,
    symbols: &HashMap<String, u32>,
) -> Result<Vec<u32>, ErrorKind> {
    let ctx = Context {
        instruction,
        address,
        symbols,
    };
    ctx.encode()
}

struct Context<'a> {
    instruction: &'a SourceInstruction,
    address: u32,
    symbols: &'a HashMap<String, u32>,
}

impl Context<'_> {
    fn encode(&self) -> Result<Vec<u32>, ErrorKind> {
        let x0 = Specifier::X0;
        let ra = Specifier::RA;
        match self.instruction.mnemonic.as_str() {
            mnemonic @ ("add" | "sub" | "sll" | "slt" | "sltu" | "xor" | "srl" | "sra" | "or"
            | "and") => {
                self.expect_operands(3)?;
                let (funct7, funct3) = match mnemonic {
                    "add" => (0b0000000, 0b000),
                    "sll" => (0b0000000, 0b001),
                    "slt" => (0b0000000, 0b010),
                    "sltu" => (0b0000000, 0b011),
                    "xor" => (0b0000000, 0b100),
                    "srl" => (0b0000000, 0b101),
                    "or" => (0b0000000, 0b110),
                    "and" => (0b0000000, 0b111),
                    "sub" => (0b0100000, 0b000),
                    _ => (0b0100000, 0b101), // sra
                };
                Ok(vec![encode_r(
                    funct7,
                    funct3,
                    self.reg(0)?,
                    self.reg(1)?,
                    self.reg(2)?,
                )])
            }
            mnemonic @ ("addi" | "slti" | "sltiu" | "xori" | "ori" | "andi") => {
                self.expect_operands(3)?;
                let funct3 = match mnemonic {
                    "addi" => 0b000,
                    "slti" => 0b010,
                    "sltiu" => 0b011,
                    "xori" => 0b100,
                    "ori" => 0b110,
                    _ => 0b111, // andi
                };
                let immediate = check_signed(self.eval(2)?, 12, "I-type immediate")?;
                Ok(vec![encode_i(
                    OPCODE_OP_IMM,
                    funct3,
                    self.reg(0)?,
                    self.reg(1)?,
                    immediate,
                )])
            }
            mnemonic @ ("slli" | "srli" | "srai") => {
                self.expect_operands(3)?;
                let (funct7, funct3) = match mnemonic {
                    "slli" => (0b0000000, 0b001),
                    "srli" => (0b0000000, 0b101),
                    _ => (0b0100000, 0b101), // srai
                };
                let shamt = check_unsigned(self.eval(2)?, 5, "shift amount")?;
                Ok(vec![encode_i(
                    OPCODE_OP_IMM,
                    funct3,
                    self.reg(0)?,
                    self.reg(1)?,
                    (funct7 << 5 | shamt) as i32,
                )])
            }
            mnemonic @ ("lui" | "auipc") => {
                self.expect_operands(2)?;
                let opcode = match mnemonic {
                    "lui" => OPCODE_LUI,
                    _ => OPCODE_AUIPC,
                };
                // The low 12 bits of the operand are truncated away, matching
                // the disassembler's rendition of U-type immediates.
                let value = check_word(self.eval(1)?, "U-type immediate")?;
                Ok(vec![encode_u(opcode, self.reg(0)?, value)])
            }
            mnemonic @ ("beq" | "bne" | "blt" | "bge" | "bltu" | "bgeu") => {
                self.expect_operands(3)?;
                let funct3 = branch_funct3(mnemonic);
                let offset = self.branch_offset(2)?;
                Ok(vec![encode_b(
                    funct3,
                    self.reg(0)?,
                    self.reg(1)?,
                    check_offset(offset, 13, "branch offset")?,
                )])
            }
            "jal" => {
                self.expect_operands(2)?;
                let offset = self.branch_offset(1)?;
                Ok(vec![encode_j(
                    self.reg(0)?,
                    check_offset(offset, 21, "jump offset")?,
                )])
            }
            "jalr" => {
                self.expect_operands(3)?;
                let immediate = check_signed(self.eval(2)?, 12, "I-type immediate")?;
                Ok(vec![encode_i(
                    OPCODE_JALR,
                    0b000,
                    self.reg(0)?,
                    self.reg(1)?,
                    immediate,
                )])
            }
            mnemonic @ ("lb" | "lh" | "lw" | "lbu" | "lhu") => {
                self.expect_operands(2)?;
                let funct3 = match mnemonic {
                    "lb" => 0b000,
                    "lh" => 0b001,
                    "lw" => 0b010,
                    "lbu" => 0b100,
                    _ => 0b101, // lhu
                };
                let (offset, base) = self.mem(1)?;
                let offset = check_signed(offset, 12, "load offset")?;
                Ok(vec![encode_i(OPCODE_LOAD, funct3, self.reg(0)?, base, offset)])
            }
            mnemonic @ ("sb" | "sh" | "sw") => {
                self.expect_operands(2)?;
                let funct3 = match mnemonic {
                    "sb" => 0b000,
                    "sh" => 0b001,
                    _ => 0b010, // sw
                };
                let (offset, base) = self.mem(1)?;
                let offset = check_signed(offset, 12, "store offset")?;
                Ok(vec![encode_s(funct3, base, self.reg(0)?, offset)])
            }
            "fence" => {
                self.expect_operands(0)?;
                Ok(vec![FENCE_IORW])
            }
            "ecall" => {
                self.expect_operands(0)?;
                Ok(vec![ECALL])
            }
            "ebreak" => {
                self.expect_operands(0)?;
                Ok(vec![EBREAK])
            }
            "mret" => {
                self.expect_operands(0)?;
                Ok(vec![MRET])
            }
            mnemonic @ ("csrrw" | "csrrs" | "csrrc") => {
                self.expect_operands(3)?;
                Ok(vec![encode_i(
                    OPCODE_SYSTEM,
                    csr_funct3(mnemonic),
                    self.reg(0)?,
                    self.reg(2)?,
                    self.csr(1)? as i32,
                )])
            }
            mnemonic @ ("csrrwi" | "csrrsi" | "csrrci") => {
                self.expect_operands(3)?;
                let uimm = check_unsigned(self.eval(2)?, 5, "CSR immediate")?;
                Ok(vec![encode_i(
                    OPCODE_SYSTEM,
                    csr_funct3(mnemonic),
                    self.reg(0)?,
                    Specifier::from_u5(uimm as u8),
                    self.csr(1)? as i32,
                )])
            }
            //
            // Pseudo-instructions
            //
            "nop" => {
                self.expect_operands(0)?;
                Ok(vec![encode_i(OPCODE_OP_IMM, 0b000, x0, x0, 0)])
            }
            "mv" => {
                self.expect_operands(2)?;
                Ok(vec![encode_i(
                    OPCODE_OP_IMM,
                    0b000,
                    self.reg(0)?,
                    self.reg(1)?,
                    0,
                )])
            }
            "li" => {
                self.expect_operands(2)?;
                let rd = self.reg(0)?;
                let expression = expr_operand(self.instruction, 1)?;
                match li_short_value(expression) {
                    Some(value) => {
                        Ok(vec![encode_i(OPCODE_OP_IMM, 0b000, rd, x0, value as i32)])
                    }
                    None => {
                        let value = check_word(self.eval(1)?, "li constant")?;
                        Ok(vec![
                            encode_u(OPCODE_LUI, rd, hi20(value)),
                            encode_i(OPCODE_OP_IMM, 0b000, rd, rd, lo12(value)),
                        ])
                    }
                }
            }
            "la" => {
                self.expect_operands(2)?;
                let rd = self.reg(0)?;
                let target = check_word(self.eval(1)?, "la target")?;
                let delta = target.wrapping_sub(self.address);
                Ok(vec![
                    encode_u(OPCODE_AUIPC, rd, hi20(delta)),
                    encode_i(OPCODE_OP_IMM, 0b000, rd, rd, lo12(delta)),
                ])
            }
            "call" => {
                self.expect_operands(1)?;
                let target = check_word(self.eval(0)?, "call target")?;
                let delta = target.wrapping_sub(self.address);
                Ok(vec![
                    encode_u(OPCODE_AUIPC, ra, hi20(delta)),
                    encode_i(OPCODE_JALR, 0b000, ra, ra, lo12(delta)),
                ])
            }
            "j" => {
                self.expect_operands(1)?;
                let offset = self.branch_offset(0)?;
                Ok(vec![encode_j(x0, check_offset(offset, 21, "jump offset")?)])
            }
            "jr" => {
                self.expect_operands(1)?;
                Ok(vec![encode_i(OPCODE_JALR, 0b000, x0, self.reg(0)?, 0)])
            }
            "ret" => {
                self.expect_operands(0)?;
                Ok(vec![encode_i(OPCODE_JALR, 0b000, x0, ra, 0)])
            }
            mnemonic @ ("beqz" | "bnez" | "bltz" | "bgez" | "blez" | "bgtz") => {
                self.expect_operands(2)?;
                let rs = self.reg(0)?;
                let offset = check_offset(self.branch_offset(1)?, 13, "branch offset")?;
                // blez/bgtz compare from the other side, with x0 as rs1.
                let word = match mnemonic {
                    "beqz" => encode_b(0b000, rs, x0, offset),
                    "bnez" => encode_b(0b001, rs, x0, offset),
                    "bltz" => encode_b(0b100, rs, x0, offset),
                    "bgez" => encode_b(0b101, rs, x0, offset),
                    "blez" => encode_b(0b101, x0, rs, offset),
                    _ => encode_b(0b100, x0, rs, offset), // bgtz
                };
                Ok(vec![word])
            }
            "not" => {
                self.expect_operands(2)?;
                Ok(vec![encode_i(
                    OPCODE_OP_IMM,
                    0b100,
                    self.reg(0)?,
                    self.reg(1)?,
                    -1,
                )])
            }
            "neg" => {
                self.expect_operands(2)?;
                Ok(vec![encode_r(
                    0b0100000,
                    0b000,
                    self.reg(0)?,
                    x0,
                    self.reg(1)?,
                )])
            }
            "seqz" => {
                self.expect_operands(2)?;
                Ok(vec![encode_i(
                    OPCODE_OP_IMM,
                    0b011,
                    self.reg(0)?,
                    self.reg(1)?,
                    1,
                )])
            }
            "snez" => {
                self.expect_operands(2)?;
                Ok(vec![encode_r(
                    0b0000000,
                    0b011,
                    self.reg(0)?,
                    x0,
                    self.reg(1)?,
                )])
            }
            "csrr" => {
                self.expect_operands(2)?;
                Ok(vec![encode_i(
                    OPCODE_SYSTEM,
                    0b010,
                    self.reg(0)?,
                    x0,
                    self.csr(1)? as i32,
                )])
            }
            "csrw" => {
                self.expect_operands(2)?;
                Ok(vec![encode_i(
                    OPCODE_SYSTEM,
                    0b001,
                    x0,
                    self.reg(1)?,
                    self.csr(0)? as i32,
                )])
            }
            other => Err(ErrorKind::UnknownMnemonic(other.to_string())),
        }
    }

    fn expect_operands(&self, count: usize) -> Result<(), ErrorKind> {
        match self.instruction.operands.len() == count {
            true => Ok(()),
            false => Err(ErrorKind::WrongOperandCount(
                self.instruction.mnemonic.clone(),
            )),
        }
    }

    fn reg(&self, index: usize) -> Result<Specifier, ErrorKind> {
        match self.instruction.operands.get(index) {
            Some(Operand::Register(register)) => Ok(*register),
            _ => Err(ErrorKind::Expected("register operand")),
        }
    }

    fn eval(&self, index: usize) -> Result<i64, ErrorKind> {
        expr_operand(self.instruction, index)?.eval(self.symbols, self.address)
    }

    fn mem(&self, index: usize) -> Result<(i64, Specifier), ErrorKind> {
        match self.instruction.operands.get(index) {
            Some(Operand::Memory { offset, base }) => {
                Ok((offset.eval(self.symbols, self.address)?, *base))
            }
            _ => Err(ErrorKind::Expected("offset(register) operand")),
        }
    }

    /// Resolves a branch or jump target operand to a byte offset from this
    /// instruction. A bare constant is the offset itself; anything involving
    /// a symbol is an absolute target address.
    fn branch_offset(&self, index: usize) -> Result<i64, ErrorKind> {
        let expression = expr_operand(self.instruction, index)?;
        match expression.constant_value() {
            Some(offset) => Ok(offset),
            None => {
                let target = expression.eval(self.symbols, self.address)? as u32;
                Ok(i64::from(target.wrapping_sub(self.address) as i32))
            }
        }
    }

    /// Resolves a CSR operand: a symbolic CSR name, or any constant
    /// expression yielding a 12-bit specifier.
    fn csr(&self, index: usize) -> Result<CsrSpecifier, ErrorKind> {
        let expression = expr_operand(self.instruction, index)?;
        if let Expr::Symbol(name) = expression {
            if let Some(specifier) = csr::specifier_for_name(name) {
                return Ok(specifier);
            }
            if !self.symbols.contains_key(name) {
                return Err(ErrorKind::UnknownCsr(name.clone()));
            }
        }
        let value = expression.eval(self.symbols, self.address)?;
        check_unsigned(value, 12, "CSR specifier").map(|specifier| specifier as CsrSpecifier)
    }
}

fn expr_operand(instruction: &SourceInstruction, index: usize) -> Result<&Expr, ErrorKind> {
    match instruction.operands.get(index) {
        Some(Operand::Expression(expression)) => Ok(expression),
        _ => Err(ErrorKind::Expected("expression operand")),
    }
}

/// The constant value of a `li` operand if it fits a single `addi`.
fn li_short_value(expression: &Expr) -> Option<i64> {
    expression
        .constant_value()
        .filter(|value| (-2048..=2047).contains(value))
}

fn branch_funct3(mnemonic: &str) -> u32 {
    match mnemonic {
        "beq" => 0b000,
        "bne" => 0b001,
        "blt" => 0b100,
        "bge" => 0b101,
        "bltu" => 0b110,
        _ => 0b111, // bgeu
    }
}

fn csr_funct3(mnemonic: &str) -> u32 {
    match mnemonic {
        "csrrw" => 0b001,
        "csrrs" => 0b010,
        "csrrc" => 0b011,
        "csrrwi" => 0b101,
        "csrrsi" => 0b110,
        _ => 0b111, // csrrci
    }
}

fn check_signed(value: i64, bits: u32, context: &'static str) -> Result<i32, ErrorKind> {
    let bound = 1i64 << (bits - 1);
    match (-bound..bound).contains(&value) {
        true => Ok(value as i32),
        false => Err(ErrorKind::ImmediateOutOfRange { value, context }),
    }
}

fn check_unsigned(value: i64, bits: u32, context: &'static str) -> Result<u32, ErrorKind> {
    match (0..1i64 << bits).contains(&value) {
        true => Ok(value as u32),
        false => Err(ErrorKind::ImmediateOutOfRange { value, context }),
    }
}

/// Accepts any value representable in 32 bits, signed or unsigned.
fn check_word(value: i64, context: &'static str) -> Result<u32, ErrorKind> {
    match (i64::from(i32::MIN)..=i64::from(u32::MAX)).contains(&value) {
        true => Ok(value as u32),
        false => Err(ErrorKind::ImmediateOutOfRange { value, context }),
    }
}

/// Checks a signed branch/jump displacement: in range and even.
fn check_offset(value: i64, bits: u32, context: &'static str) -> Result<i32, ErrorKind> {
    if value & 1 != 0 {
        return Err(ErrorKind::MisalignedTarget(value));
    }
    check_signed(value, bits, context)
}

fn encode_r(funct7: u32, funct3: u32, rd: Specifier, rs1: Specifier, rs2: Specifier) -> u32 {
    funct7 << 25
        | u32::from(rs2) << 20
        | u32::from(rs1) << 15
        | funct3 << 12
        | u32::from(rd) << 7
        | OPCODE_OP
}

fn encode_i(opcode: u32, funct3: u32, rd: Specifier, rs1: Specifier, immediate: i32) -> u32 {
    (immediate as u32 & 0xFFF) << 20
        | u32::from(rs1) << 15
        | funct3 << 12
        | u32::from(rd) << 7
        | opcode
}

fn encode_s(funct3: u32, rs1: Specifier, rs2: Specifier, immediate: i32) -> u32 {
    let immediate = immediate as u32 & 0xFFF;
    (immediate >> 5) << 25
        | u32::from(rs2) << 20
        | u32::from(rs1) << 15
        | funct3 << 12
        | (immediate & 0x1F) << 7
        | OPCODE_STORE
}

fn encode_b(funct3: u32, rs1: Specifier, rs2: Specifier, offset: i32) -> u32 {
    let offset = offset as u32;
    ((offset >> 12) & 0b1) << 31
        | ((offset >> 5) & 0x3F) << 25
        | u32::from(rs2) << 20
        | u32::from(rs1) << 15
        | funct3 << 12
        | ((offset >> 1) & 0xF) << 8
        | ((offset >> 11) & 0b1) << 7
        | OPCODE_BRANCH
}

/// U-type: the operand is a full 32-bit value whose low 12 bits are dropped.
fn encode_u(opcode: u32, rd: Specifier, value: u32) -> u32 {
    value & 0xFFFF_F000 | u32::from(rd) << 7 | opcode
}

fn encode_j(rd: Specifier, offset: i32) -> u32 {
    let offset = offset as u32;
    ((offset >> 20) & 0b1) << 31
        | ((offset >> 1) & 0x3FF) << 21
        | ((offset >> 11) & 0b1) << 20
        | ((offset >> 12) & 0xFF) << 12
        | u32::from(rd) << 7
        | OPCODE_JAL
}
