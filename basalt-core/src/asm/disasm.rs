//! Disassembly listing of an assembled image.

use crate::instruction::Instruction;
use std::fmt::Write;

/// Renders `image` as one line per 32-bit word: address, raw encoding, and
/// the decoded instruction. Words that do not decode (data) render as
/// `.word`, and a trailing remainder shorter than a word renders as `.byte`.
///
/// Decoded lines use the assembler's own grammar, so a listing can be fed
/// back through the assembler and produce the same image.
pub fn listing(image: &[u8], origin: u32) -> String {
    let mut out = String::new();
    let mut chunks = image.chunks_exact(4);
    for (index, chunk) in chunks.by_ref().enumerate() {
        let address = origin.wrapping_add(4 * index as u32);
        let word = u32::from_le_bytes(chunk.try_into().unwrap());
        match Instruction::decode(word) {
            Ok(instruction) => {
                let _ = writeln!(out, "{address:08x}: {word:08x}  {instruction}");
            }
            Err(_) => {
                let _ = writeln!(out, "{address:08x}: {word:08x}  .word {word:#010x}");
            }
        }
    }
    let remainder = chunks.remainder();
    if !remainder.is_empty() {
        let address = origin.wrapping_add((image.len() - remainder.len()) as u32);
        let _ = write!(out, "{address:08x}:           .byte ");
        for (index, byte) in remainder.iter().enumerate() {
            if index > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{byte:#04x}");
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_shape() {
        // addi a0, zero, 42; ebreak; one data word; one stray byte.
        let mut image = Vec::new();
        image.extend_from_slice(&0x02A0_0513_u32.to_le_bytes());
        image.extend_from_slice(&0x0010_0073_u32.to_le_bytes());
        image.extend_from_slice(&0xFFFF_FFFF_u32.to_le_bytes());
        image.push(0x41);
        let text = listing(&image, 0x1000);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(4, lines.len());
        assert_eq!("00001000: 02a00513  addi a0, zero, 42", lines[0]);
        assert_eq!("00001004: 00100073  ebreak", lines[1]);
        assert_eq!("00001008: ffffffff  .word 0xffffffff", lines[2]);
        assert_eq!("0000100c:           .byte 0x41", lines[3]);
    }
}
