//! Line grammar: labels, directives, instructions, operands, expressions.

use super::lexer::Token;
use super::ErrorKind;
use crate::registers::Specifier;
use std::collections::HashMap;

/// A directive with its parsed arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Byte(Vec<Expr>),
    Half(Vec<Expr>),
    Word(Vec<Expr>),
    Ascii(Vec<u8>),
    Asciz(Vec<u8>),
    Zero(Expr),
    Align(Expr),
    Equ(String, Expr),
    /// Recorded but otherwise unused: the assembler emits a single image
    /// with a flat symbol table, so there is no external linkage to declare.
    Globl(String),
}

/// An instruction as written, before pseudo expansion and encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInstruction {
    /// Lowercased mnemonic.
    pub mnemonic: String,
    pub operands: Vec<Operand>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Register(Specifier),
    Expression(Expr),
    /// The `offset(base)` addressing form of loads, stores, and `jalr`.
    Memory { offset: Expr, base: Specifier },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Directive(Directive),
    Instruction(SourceInstruction),
}

/// A constant expression: integer and character literals, symbols, the
/// location counter `.`, relocation functions, and `+`/`-` combinations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Number(i64),
    Symbol(String),
    Reloc(RelocFunc, Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RelocFunc {
    /// `%hi(expr)`: bits 31:12 of the value, rounded so that adding the
    /// sign-extended `%lo` part reconstructs the original.
    Hi,
    /// `%lo(expr)`: bits 11:0 of the value, sign-extended.
    Lo,
    /// `%pcrel_hi(expr)`: `%hi` of the distance from the current instruction.
    PcrelHi,
    /// `%pcrel_lo(expr)`: `%lo` of the distance from the *previous*
    /// instruction (the `auipc` of the pair).
    PcrelLo,
}

impl Expr {
    /// Evaluates the expression. `location` is the address of the statement
    /// being assembled; it resolves the `.` symbol and anchors the pc-relative
    /// relocation functions.
    pub fn eval(&self, symbols: &HashMap<String, u32>, location: u32) -> Result<i64, ErrorKind> {
        match self {
            Expr::Number(value) => Ok(*value),
            Expr::Symbol(name) if name == "." => Ok(i64::from(location)),
            Expr::Symbol(name) => symbols
                .get(name)
                .map(|address| i64::from(*address))
                .ok_or_else(|| ErrorKind::UndefinedSymbol(name.clone())),
            Expr::Reloc(func, argument) => {
                let value = argument.eval(symbols, location)? as u32;
                Ok(match func {
                    RelocFunc::Hi => i64::from(hi20(value)),
                    RelocFunc::Lo => i64::from(lo12(value)),
                    RelocFunc::PcrelHi => i64::from(hi20(value.wrapping_sub(location))),
                    RelocFunc::PcrelLo => {
                        i64::from(lo12(value.wrapping_sub(location.wrapping_sub(4))))
                    }
                })
            }
            Expr::Add(lhs, rhs) => {
                Ok(lhs.eval(symbols, location)?.wrapping_add(rhs.eval(symbols, location)?))
            }
            Expr::Sub(lhs, rhs) => {
                Ok(lhs.eval(symbols, location)?.wrapping_sub(rhs.eval(symbols, location)?))
            }
            Expr::Neg(argument) => Ok(argument.eval(symbols, location)?.wrapping_neg()),
        }
    }

    /// Folds the expression to a plain integer if it involves no symbols or
    /// relocation functions. Used where layout decisions must not depend on
    /// symbol values (the `li` width choice) and to distinguish numeric
    /// branch offsets from symbolic branch targets.
    pub fn constant_value(&self) -> Option<i64> {
        match self {
            Expr::Number(value) => Some(*value),
            Expr::Symbol(_) | Expr::Reloc(..) => None,
            Expr::Add(lhs, rhs) => Some(lhs.constant_value()?.wrapping_add(rhs.constant_value()?)),
            Expr::Sub(lhs, rhs) => Some(lhs.constant_value()?.wrapping_sub(rhs.constant_value()?)),
            Expr::Neg(argument) => Some(argument.constant_value()?.wrapping_neg()),
        }
    }
}

/// `%hi`: the value with its low 12 bits cleared, rounded up by one unit when
/// bit 11 is set so `hi + sext(lo) == value`.
pub(super) fn hi20(value: u32) -> u32 {
    value.wrapping_add(0x800) & 0xFFFF_F000
}

/// `%lo`: the low 12 bits of the value, sign-extended.
pub(super) fn lo12(value: u32) -> i32 {
    (value as i32) << 20 >> 20
}

/// Parses one tokenized line into its labels and optional statement.
pub fn parse_line(tokens: Vec<Token>) -> Result<(Vec<String>, Option<Statement>), ErrorKind> {
    let mut parser = Parser {
        tokens,
        position: 0,
    };
    let mut labels = Vec::new();
    while let (Some(Token::Ident(name)), Some(Token::Colon)) =
        (parser.peek(), parser.peek_second())
    {
        labels.push(name.clone());
        parser.advance();
        parser.advance();
    }
    let statement = match parser.peek() {
        None => None,
        Some(Token::Ident(name)) if name.starts_with('.') && name.len() > 1 => {
            let name = name.clone();
            parser.advance();
            Some(Statement::Directive(parser.parse_directive(&name)?))
        }
        Some(Token::Ident(name)) => {
            let mnemonic = name.to_ascii_lowercase();
            parser.advance();
            Some(Statement::Instruction(
                parser.parse_instruction(mnemonic)?,
            ))
        }
        Some(_) => return Err(ErrorKind::Expected("label, directive, or instruction")),
    };
    match parser.peek() {
        None => Ok((labels, statement)),
        Some(_) => Err(ErrorKind::Expected("end of line")),
    }
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn peek_second(&self) -> Option<&Token> {
        self.tokens.get(self.position + 1)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    fn expect_comma(&mut self) -> Result<(), ErrorKind> {
        match self.advance() {
            Some(Token::Comma) => Ok(()),
            _ => Err(ErrorKind::Expected("`,`")),
        }
    }

    fn expect_ident(&mut self) -> Result<String, ErrorKind> {
        match self.advance() {
            Some(Token::Ident(name)) => Ok(name),
            _ => Err(ErrorKind::Expected("identifier")),
        }
    }

    fn expect_string(&mut self) -> Result<Vec<u8>, ErrorKind> {
        match self.advance() {
            Some(Token::Str(bytes)) => Ok(bytes),
            _ => Err(ErrorKind::Expected("string literal")),
        }
    }

    fn parse_directive(&mut self, name: &str) -> Result<Directive, ErrorKind> {
        match name.to_ascii_lowercase().as_str() {
            ".byte" => Ok(Directive::Byte(self.parse_expr_list()?)),
            ".half" => Ok(Directive::Half(self.parse_expr_list()?)),
            ".word" => Ok(Directive::Word(self.parse_expr_list()?)),
            ".ascii" => Ok(Directive::Ascii(self.expect_string()?)),
            ".asciz" | ".string" => Ok(Directive::Asciz(self.expect_string()?)),
            ".zero" => Ok(Directive::Zero(self.parse_expr()?)),
            ".align" => Ok(Directive::Align(self.parse_expr()?)),
            ".equ" => {
                let symbol = self.expect_ident()?;
                self.expect_comma()?;
                Ok(Directive::Equ(symbol, self.parse_expr()?))
            }
            ".globl" => Ok(Directive::Globl(self.expect_ident()?)),
            _ => Err(ErrorKind::UnknownDirective(name.to_string())),
        }
    }

    fn parse_instruction(&mut self, mnemonic: String) -> Result<SourceInstruction, ErrorKind> {
        let mut operands = Vec::new();
        if self.peek().is_some() {
            operands.push(self.parse_operand()?);
            while let Some(Token::Comma) = self.peek() {
                self.advance();
                operands.push(self.parse_operand()?);
            }
        }
        Ok(SourceInstruction { mnemonic, operands })
    }

    fn parse_operand(&mut self) -> Result<Operand, ErrorKind> {
        // A lone identifier naming a register is a register operand;
        // registers take precedence over equally-named symbols.
        if let Some(Token::Ident(name)) = self.peek() {
            if let Some(register) = Specifier::from_name(name) {
                self.advance();
                return Ok(Operand::Register(register));
            }
        }
        // `(base)` with the offset omitted.
        if let Some(Token::LParen) = self.peek() {
            return self.parse_memory(Expr::Number(0));
        }
        let expression = self.parse_expr()?;
        match self.peek() {
            Some(Token::LParen) => self.parse_memory(expression),
            _ => Ok(Operand::Expression(expression)),
        }
    }

    fn parse_memory(&mut self, offset: Expr) -> Result<Operand, ErrorKind> {
        match self.advance() {
            Some(Token::LParen) => {}
            _ => return Err(ErrorKind::Expected("`(`")),
        }
        let name = self.expect_ident()?;
        let base = Specifier::from_name(&name)
            .ok_or_else(|| ErrorKind::Expected("register"))?;
        match self.advance() {
            Some(Token::RParen) => Ok(Operand::Memory { offset, base }),
            _ => Err(ErrorKind::Expected("`)`")),
        }
    }

    fn parse_expr_list(&mut self) -> Result<Vec<Expr>, ErrorKind> {
        let mut values = vec![self.parse_expr()?];
        while let Some(Token::Comma) = self.peek() {
            self.advance();
            values.push(self.parse_expr()?);
        }
        Ok(values)
    }

    fn parse_expr(&mut self) -> Result<Expr, ErrorKind> {
        let mut expression = self.parse_term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.advance();
                    expression = Expr::Add(Box::new(expression), Box::new(self.parse_term()?));
                }
                Some(Token::Minus) => {
                    self.advance();
                    expression = Expr::Sub(Box::new(expression), Box::new(self.parse_term()?));
                }
                _ => return Ok(expression),
            }
        }
    }

    fn parse_term(&mut self) -> Result<Expr, ErrorKind> {
        match self.advance() {
            Some(Token::Int(value)) => Ok(Expr::Number(value)),
            Some(Token::Char(value)) => Ok(Expr::Number(i64::from(value))),
            Some(Token::Ident(name)) => Ok(Expr::Symbol(name)),
            Some(Token::Minus) => Ok(Expr::Neg(Box::new(self.parse_term()?))),
            Some(Token::Plus) => self.parse_term(),
            Some(Token::Reloc(name)) => {
                let func = match name.as_str() {
                    "hi" => RelocFunc::Hi,
                    "lo" => RelocFunc::Lo,
                    "pcrel_hi" => RelocFunc::PcrelHi,
                    "pcrel_lo" => RelocFunc::PcrelLo,
                    _ => return Err(ErrorKind::UnknownRelocation(name)),
                };
                match self.advance() {
                    Some(Token::LParen) => {}
                    _ => return Err(ErrorKind::Expected("`(`")),
                }
                let argument = self.parse_expr()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(Expr::Reloc(func, Box::new(argument))),
                    _ => Err(ErrorKind::Expected("`)`")),
                }
            }
            _ => Err(ErrorKind::Expected("expression")),
        }
    }
}
