//! Lexer for one line of assembly source.
//!
//! Comments (`#` or `;` to end of line) are stripped here; newlines never
//! appear since the assembler is line-oriented.

use super::ErrorKind;

/// A single token of the assembly grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// `[A-Za-z_.$][A-Za-z0-9_.$]*` — mnemonics, register names, labels,
    /// directives (leading `.`), and the location counter `.`.
    Ident(String),
    /// An unsigned integer literal; signs are applied by the expression
    /// parser. Decimal, `0x` hex, `0b` binary, `0o` or leading-`0` octal.
    Int(i64),
    /// A character literal, already unescaped.
    Char(u8),
    /// A string literal, already unescaped.
    Str(Vec<u8>),
    /// A relocation function name: `%` followed by an identifier, lowercased
    /// and stored without the `%`.
    Reloc(String),
    Comma,
    Colon,
    LParen,
    RParen,
    Plus,
    Minus,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || matches!(c, '_' | '.' | '$')
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$')
}

/// Tokenizes one source line.
pub fn tokenize(line: &str) -> Result<Vec<Token>, ErrorKind> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            '#' | ';' => break,
            c if c.is_whitespace() => {
                chars.next();
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            ':' => {
                chars.next();
                tokens.push(Token::Colon);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '%' => {
                chars.next();
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if !is_ident_continue(c) {
                        break;
                    }
                    name.push(c);
                    chars.next();
                }
                if name.is_empty() {
                    return Err(ErrorKind::InvalidCharacter('%'));
                }
                tokens.push(Token::Reloc(name.to_ascii_lowercase()));
            }
            '\'' => {
                chars.next();
                tokens.push(Token::Char(lex_char(&mut chars)?));
            }
            '"' => {
                chars.next();
                tokens.push(Token::Str(lex_string(&mut chars)?));
            }
            c if c.is_ascii_digit() => tokens.push(lex_number(&mut chars)?),
            c if is_ident_start(c) => {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if !is_ident_continue(c) {
                        break;
                    }
                    name.push(c);
                    chars.next();
                }
                tokens.push(Token::Ident(name));
            }
            c => return Err(ErrorKind::InvalidCharacter(c)),
        }
    }
    Ok(tokens)
}

type Chars<'a> = std::iter::Peekable<std::str::Chars<'a>>;

fn lex_number(chars: &mut Chars) -> Result<Token, ErrorKind> {
    let mut digits = String::new();
    while let Some(&c) = chars.peek() {
        // Consume the whole alphanumeric run so "0xZZ" fails instead of
        // lexing as `0x` followed by an identifier.
        if !c.is_ascii_alphanumeric() && c != '_' {
            break;
        }
        digits.push(c);
        chars.next();
    }
    let digits = digits.replace('_', "");
    let (radix, digits) = if let Some(rest) = digits.strip_prefix("0x").or(digits.strip_prefix("0X"))
    {
        (16, rest)
    } else if let Some(rest) = digits.strip_prefix("0b").or(digits.strip_prefix("0B")) {
        (2, rest)
    } else if let Some(rest) = digits.strip_prefix("0o").or(digits.strip_prefix("0O")) {
        (8, rest)
    } else if digits.len() > 1 && digits.starts_with('0') {
        (8, &digits[1..])
    } else {
        (10, digits.as_str())
    };
    i64::from_str_radix(digits, radix)
        .map(Token::Int)
        .map_err(|_| ErrorKind::MalformedInteger)
}

/// The escape sequences shared by character and string literals:
/// `\n \r \t \\ \' \" \0 \xHH`.
fn lex_escape(chars: &mut Chars) -> Result<u8, ErrorKind> {
    match chars.next().ok_or(ErrorKind::UnterminatedLiteral)? {
        'n' => Ok(b'\n'),
        'r' => Ok(b'\r'),
        't' => Ok(b'\t'),
        '\\' => Ok(b'\\'),
        '\'' => Ok(b'\''),
        '"' => Ok(b'"'),
        '0' => Ok(0),
        'x' => {
            let hi = chars.next().ok_or(ErrorKind::UnterminatedLiteral)?;
            let lo = chars.next().ok_or(ErrorKind::UnterminatedLiteral)?;
            let hi = hi.to_digit(16).ok_or(ErrorKind::UnknownEscape)?;
            let lo = lo.to_digit(16).ok_or(ErrorKind::UnknownEscape)?;
            Ok((hi * 16 + lo) as u8)
        }
        _ => Err(ErrorKind::UnknownEscape),
    }
}

fn lex_char(chars: &mut Chars) -> Result<u8, ErrorKind> {
    let value = match chars.next().ok_or(ErrorKind::UnterminatedLiteral)? {
        '\\' => lex_escape(chars)?,
        '\'' => return Err(ErrorKind::UnterminatedLiteral),
        c if c.is_ascii() => c as u8,
        _ => return Err(ErrorKind::UnknownEscape),
    };
    match chars.next() {
        Some('\'') => Ok(value),
        _ => Err(ErrorKind::UnterminatedLiteral),
    }
}

fn lex_string(chars: &mut Chars) -> Result<Vec<u8>, ErrorKind> {
    let mut bytes = Vec::new();
    loop {
        match chars.next().ok_or(ErrorKind::UnterminatedLiteral)? {
            '"' => return Ok(bytes),
            '\\' => bytes.push(lex_escape(chars)?),
            c if c.is_ascii() => bytes.push(c as u8),
            _ => return Err(ErrorKind::UnknownEscape),
        }
    }
}
