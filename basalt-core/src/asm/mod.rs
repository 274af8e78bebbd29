//! Two-pass assembler for the RV32I + Zicsr assembly language.
//!
//! The assembler is a pure function from source text and an origin address to
//! either a [`Program`] or the complete list of [`SourceError`]s. Pass 1 lays
//! out labels and computes the size of every statement; pass 2 evaluates
//! expressions against the full symbol table and emits bytes. Mnemonics,
//! register names, directives, and CSR names are case-insensitive; labels are
//! case-sensitive.

mod disasm;
mod encode;
mod lexer;
mod parser;

use log::debug;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;

use parser::{Directive, Statement};

/// The output of a successful assembly.
#[derive(Debug, Clone)]
pub struct Program {
    /// The assembled bytes, to be loaded at [`origin`](Self::origin).
    pub image: Vec<u8>,
    /// The load address the program was assembled for.
    pub origin: u32,
    /// Every label and `.equ` symbol, mapped to its absolute value.
    pub symbols: HashMap<String, u32>,
    /// Maps the address of every emitted instruction to the 1-based source
    /// line it came from. When a pseudo-instruction expands to multiple
    /// instructions, each emitted instruction maps to the original line.
    pub line_map: BTreeMap<u32, u32>,
    /// Human-readable disassembly listing of the image.
    pub dump: String,
}

impl Program {
    /// The entry point: the address bound to the symbol `_start`, or the
    /// origin if that symbol is absent.
    pub fn entry(&self) -> u32 {
        self.symbols.get("_start").copied().unwrap_or(self.origin)
    }
}

/// An assembly error, carrying the 1-based source line it occurred on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {kind}")]
pub struct SourceError {
    pub line: u32,
    pub kind: ErrorKind,
}

/// Everything that can go wrong in a source line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[error("invalid character {0:?}")]
    InvalidCharacter(char),
    #[error("malformed integer literal")]
    MalformedInteger,
    #[error("unterminated string or character literal")]
    UnterminatedLiteral,
    #[error("unknown escape sequence")]
    UnknownEscape,
    #[error("expected {0}")]
    Expected(&'static str),
    #[error("unknown directive `{0}`")]
    UnknownDirective(String),
    #[error("unknown mnemonic `{0}`")]
    UnknownMnemonic(String),
    #[error("unknown CSR `{0}`")]
    UnknownCsr(String),
    #[error("unknown relocation function `%{0}`")]
    UnknownRelocation(String),
    #[error("duplicate label `{0}`")]
    DuplicateLabel(String),
    #[error("undefined symbol `{0}`")]
    UndefinedSymbol(String),
    #[error("wrong number of operands for `{0}`")]
    WrongOperandCount(String),
    #[error("immediate {value} out of range for {context}")]
    ImmediateOutOfRange { value: i64, context: &'static str },
    #[error("branch or jump offset {0} is odd")]
    MisalignedTarget(i64),
    #[error("`{directive}` at location {location:#x} breaks {required}-byte alignment")]
    MisalignedData {
        directive: &'static str,
        required: u32,
        location: u32,
    },
}

/// A parsed source line: zero or more labels followed by at most one
/// statement.
#[derive(Debug)]
struct Line {
    number: u32,
    labels: Vec<String>,
    statement: Option<Statement>,
}

/// A statement placed by pass 1, awaiting emission in pass 2.
#[derive(Debug)]
struct Item<'a> {
    address: u32,
    size: u32,
    line: u32,
    statement: &'a Statement,
}

/// Assembles `source` into a flat byte image based at `origin`.
///
/// On failure the full list of errors is returned in source order; the
/// assembler never stops at the first problem.
pub fn assemble(source: &str, origin: u32) -> Result<Program, Vec<SourceError>> {
    let mut errors: Vec<SourceError> = Vec::new();

    let mut lines: Vec<Line> = Vec::new();
    for (index, text) in source.lines().enumerate() {
        let number = index as u32 + 1;
        match lexer::tokenize(text).and_then(parser::parse_line) {
            Ok((labels, statement)) => lines.push(Line {
                number,
                labels,
                statement,
            }),
            Err(kind) => errors.push(SourceError { line: number, kind }),
        }
    }

    // Pass 1: bind labels and lay out every statement. Sizes never depend on
    // symbol values that are still unknown, so the layout is final.
    let mut symbols: HashMap<String, u32> = HashMap::new();
    let mut items: Vec<Item> = Vec::new();
    let mut location = origin;
    for line in &lines {
        for label in &line.labels {
            match symbols.entry(label.clone()) {
                Entry::Occupied(_) => errors.push(SourceError {
                    line: line.number,
                    kind: ErrorKind::DuplicateLabel(label.clone()),
                }),
                Entry::Vacant(entry) => {
                    entry.insert(location);
                }
            }
        }
        let Some(statement) = &line.statement else {
            continue;
        };
        // Symbol definitions and declarations occupy no space and are fully
        // handled here.
        match statement {
            Statement::Directive(Directive::Equ(name, expression)) => {
                match expression.eval(&symbols, location) {
                    Ok(value) => match symbols.entry(name.clone()) {
                        Entry::Occupied(_) => errors.push(SourceError {
                            line: line.number,
                            kind: ErrorKind::DuplicateLabel(name.clone()),
                        }),
                        Entry::Vacant(entry) => {
                            entry.insert(value as u32);
                        }
                    },
                    Err(kind) => errors.push(SourceError {
                        line: line.number,
                        kind,
                    }),
                }
                continue;
            }
            Statement::Directive(Directive::Globl(_)) => continue,
            _ => {}
        }
        match measure(statement, location, &symbols) {
            Ok(size) => {
                items.push(Item {
                    address: location,
                    size,
                    line: line.number,
                    statement,
                });
                location = location.wrapping_add(size);
            }
            Err(kind) => errors.push(SourceError {
                line: line.number,
                kind,
            }),
        }
    }

    // Pass 2: evaluate and emit. Failed items still occupy their measured
    // size so later addresses stay correct and error reporting can continue.
    let mut image: Vec<u8> = Vec::with_capacity(location.wrapping_sub(origin) as usize);
    let mut line_map: BTreeMap<u32, u32> = BTreeMap::new();
    for item in &items {
        let start_len = image.len();
        let result = match item.statement {
            Statement::Directive(directive) => {
                emit_directive(directive, item.address, &symbols, &mut image)
            }
            Statement::Instruction(instruction) => {
                encode::encode_instruction(instruction, item.address, &symbols).map(|words| {
                    for (index, word) in words.iter().enumerate() {
                        line_map.insert(item.address + 4 * index as u32, item.line);
                        image.extend_from_slice(&word.to_le_bytes());
                    }
                })
            }
        };
        if let Err(kind) = result {
            errors.push(SourceError {
                line: item.line,
                kind,
            });
        }
        image.resize(start_len + item.size as usize, 0);
    }

    if !errors.is_empty() {
        debug!("assembly failed with {} error(s)", errors.len());
        errors.sort_by_key(|error| error.line);
        return Err(errors);
    }

    let dump = disasm::listing(&image, origin);
    Ok(Program {
        image,
        origin,
        symbols,
        line_map,
        dump,
    })
}

/// Computes the emitted size of a statement in bytes.
fn measure(
    statement: &Statement,
    location: u32,
    symbols: &HashMap<String, u32>,
) -> Result<u32, ErrorKind> {
    match statement {
        Statement::Instruction(instruction) => encode::instruction_size(instruction),
        Statement::Directive(directive) => match directive {
            Directive::Byte(values) => Ok(values.len() as u32),
            Directive::Half(values) => {
                check_data_alignment(".half", 2, location)?;
                Ok(2 * values.len() as u32)
            }
            Directive::Word(values) => {
                check_data_alignment(".word", 4, location)?;
                Ok(4 * values.len() as u32)
            }
            Directive::Ascii(bytes) => Ok(bytes.len() as u32),
            Directive::Asciz(bytes) => Ok(bytes.len() as u32 + 1),
            Directive::Zero(expression) => {
                let count = expression.eval(symbols, location)?;
                u32::try_from(count).map_err(|_| ErrorKind::ImmediateOutOfRange {
                    value: count,
                    context: ".zero",
                })
            }
            Directive::Align(expression) => {
                let exponent = expression.eval(symbols, location)?;
                if !(0..=31).contains(&exponent) {
                    return Err(ErrorKind::ImmediateOutOfRange {
                        value: exponent,
                        context: ".align",
                    });
                }
                let alignment = 1u32 << exponent;
                Ok(location.wrapping_neg() & (alignment - 1))
            }
            // Handled during pass 1.
            Directive::Equ(..) | Directive::Globl(_) => Ok(0),
        },
    }
}

fn check_data_alignment(
    directive: &'static str,
    required: u32,
    location: u32,
) -> Result<(), ErrorKind> {
    match location % required == 0 {
        true => Ok(()),
        false => Err(ErrorKind::MisalignedData {
            directive,
            required,
            location,
        }),
    }
}

/// Emits the bytes of a data directive. Padding directives (`.zero`,
/// `.align`) emit nothing here; the caller zero-fills up to the measured
/// size.
fn emit_directive(
    directive: &Directive,
    address: u32,
    symbols: &HashMap<String, u32>,
    image: &mut Vec<u8>,
) -> Result<(), ErrorKind> {
    match directive {
        Directive::Byte(values) => {
            for expression in values {
                let value = expression.eval(symbols, address)?;
                image.push(value as u8);
            }
        }
        Directive::Half(values) => {
            for expression in values {
                let value = expression.eval(symbols, address)?;
                image.extend_from_slice(&(value as u16).to_le_bytes());
            }
        }
        Directive::Word(values) => {
            for expression in values {
                let value = expression.eval(symbols, address)?;
                image.extend_from_slice(&(value as u32).to_le_bytes());
            }
        }
        Directive::Ascii(bytes) => image.extend_from_slice(bytes),
        Directive::Asciz(bytes) => {
            image.extend_from_slice(bytes);
            image.push(0);
        }
        Directive::Zero(_) | Directive::Align(_) => {}
        Directive::Equ(..) | Directive::Globl(_) => {}
    }
    Ok(())
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dump)
    }
}
