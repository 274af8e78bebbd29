//! End-to-end assembler tests: layout, symbols, pseudo expansion, error
//! reporting, and listing round-trips.

use basalt_core::asm::{assemble, ErrorKind};

#[test]
fn minimal_program() {
    let program = assemble("_start: li a0, 42\n        ebreak\n", 0).unwrap();
    assert_eq!(8, program.image.len());
    assert_eq!(
        0x02A0_0513_u32.to_le_bytes(),
        program.image[0..4],
        "li a0, 42"
    );
    assert_eq!(0x0010_0073_u32.to_le_bytes(), program.image[4..8], "ebreak");
    assert_eq!(Some(&0), program.symbols.get("_start"));
    assert_eq!(0, program.entry());
}

#[test]
fn entry_defaults_to_origin() {
    let program = assemble("nop\n", 0x8000_0000).unwrap();
    assert_eq!(0x8000_0000, program.entry());
}

#[test]
fn data_directives_layout() {
    let source = "\
start:
    .byte 1, 2, 0xFF, 'A'
    .align 2
words:
    .word 0x11223344, words
    .half 0xBEEF
    .zero 2
text:
    .asciz \"ok\"
";
    let program = assemble(source, 0x1000).unwrap();
    assert_eq!(Some(&0x1000), program.symbols.get("start"));
    // 4 bytes, then padding to the next multiple of 4.
    assert_eq!(Some(&0x1004), program.symbols.get("words"));
    assert_eq!(Some(&0x1010), program.symbols.get("text"));
    assert_eq!(&[1, 2, 0xFF, b'A'], &program.image[0..4]);
    assert_eq!(0x1122_3344_u32.to_le_bytes(), program.image[4..8]);
    // `.word words` resolves to the symbol's own address.
    assert_eq!(0x0000_1004_u32.to_le_bytes(), program.image[8..12]);
    assert_eq!(0xBEEF_u16.to_le_bytes(), program.image[12..14]);
    assert_eq!(&[0, 0], &program.image[14..16]);
    assert_eq!(b"ok\0", &program.image[16..19]);
}

#[test]
fn equ_and_expressions() {
    let source = "\
.equ console, 0x10000000
.equ console_end, console + 4
    .word console, console_end, console_end - console, -1
";
    let program = assemble(source, 0).unwrap();
    assert_eq!(0x1000_0000_u32.to_le_bytes(), program.image[0..4]);
    assert_eq!(0x1000_0004_u32.to_le_bytes(), program.image[4..8]);
    assert_eq!(4_u32.to_le_bytes(), program.image[8..12]);
    assert_eq!(0xFFFF_FFFF_u32.to_le_bytes(), program.image[12..16]);
}

#[test]
fn misaligned_data_directive_is_an_error() {
    let errors = assemble(".byte 1\n.word 2\n", 0).unwrap_err();
    assert_eq!(1, errors.len());
    assert_eq!(2, errors[0].line);
    assert!(matches!(
        errors[0].kind,
        ErrorKind::MisalignedData { required: 4, .. }
    ));
}

#[test]
fn line_map_covers_pseudo_expansion() {
    let source = "\
_start:
    li a0, 0x12345678
    nop
";
    let program = assemble(source, 0x2000).unwrap();
    // Both words of the li expansion map to line 2.
    assert_eq!(Some(&2), program.line_map.get(&0x2000));
    assert_eq!(Some(&2), program.line_map.get(&0x2004));
    assert_eq!(Some(&3), program.line_map.get(&0x2008));
    assert_eq!(3, program.line_map.len());
}

#[test]
fn forward_references_resolve() {
    let source = "\
_start:
    j end
    nop
end:
    ebreak
";
    let program = assemble(source, 0).unwrap();
    // jal x0, +8
    assert_eq!(0x0080_006F_u32.to_le_bytes(), program.image[0..4]);
}

#[test]
fn error_list_is_complete_and_in_source_order() {
    let source = "\
_start:
    nop
    j missing
    nop
dup:
    nop
dup:
";
    let errors = assemble(source, 0).unwrap_err();
    assert_eq!(2, errors.len());
    assert_eq!(3, errors[0].line);
    assert_eq!(
        ErrorKind::UndefinedSymbol("missing".to_string()),
        errors[0].kind
    );
    assert_eq!(7, errors[1].line);
    assert_eq!(ErrorKind::DuplicateLabel("dup".to_string()), errors[1].kind);
}

#[test]
fn errors_do_not_shift_later_addresses() {
    let source = "\
    addi a0, a0, 99999
after:
    nop
";
    let errors = assemble(source, 0).unwrap_err();
    assert_eq!(1, errors.len());
    assert_eq!(1, errors[0].line);
    // A second assembly with the bad line fixed shows `after` where the
    // failing assembly placed it.
    let fixed = assemble("    addi a0, a0, 0\nafter:\n    nop\n", 0).unwrap();
    assert_eq!(Some(&4), fixed.symbols.get("after"));
}

#[test]
fn labels_are_case_sensitive_mnemonics_are_not() {
    let program = assemble("Loop: NOP\nloop: nop\n", 0).unwrap();
    assert_eq!(Some(&0), program.symbols.get("Loop"));
    assert_eq!(Some(&4), program.symbols.get("loop"));
}

#[test]
fn globl_is_recorded_and_ignored() {
    let program = assemble(".globl _start\n_start: nop\n", 0).unwrap();
    assert_eq!(0, program.entry());
}

#[test]
fn explicit_hi_lo_pair() {
    let source = "\
.equ value, 0xDEADBEEF
    lui a0, %hi(value)
    addi a0, a0, %lo(value)
";
    let program = assemble(source, 0).unwrap();
    let lui = u32::from_le_bytes(program.image[0..4].try_into().unwrap());
    let addi = u32::from_le_bytes(program.image[4..8].try_into().unwrap());
    let hi = lui & 0xFFFF_F000;
    let lo = (addi as i32) >> 20;
    assert_eq!(0xDEAD_BEEF_u32, hi.wrapping_add_signed(lo));
}

#[test]
fn pcrel_pair_reaches_target() {
    let source = "\
_start:
    auipc a0, %pcrel_hi(data)
    addi a0, a0, %pcrel_lo(data)
    ebreak
data:
    .word 0
";
    let program = assemble(source, 0x4000).unwrap();
    let auipc = u32::from_le_bytes(program.image[0..4].try_into().unwrap());
    let addi = u32::from_le_bytes(program.image[4..8].try_into().unwrap());
    let hi = auipc & 0xFFFF_F000;
    let lo = (addi as i32) >> 20;
    let data = program.symbols["data"];
    assert_eq!(data, 0x4000_u32.wrapping_add(hi).wrapping_add_signed(lo));
}

#[test]
fn dump_reassembles_to_the_same_image() {
    let source = "\
_start:
    li t0, 10
    li t1, 0x12345678
loop:
    addi t0, t0, -1
    bnez t0, loop
    la a0, data
    lw a1, 0(a0)
    sw a1, 4(a0)
    csrw mtvec, t1
    csrr t2, mepc
    fence
    ecall
    ebreak
data:
    .word 0xCAFEBABE
";
    let program = assemble(source, 0x1000).unwrap();
    // Each listing line is `AAAAAAAA: WWWWWWWW  <text>`; the text after
    // column 20 is valid assembler input.
    let recovered: String = program
        .dump
        .lines()
        .map(|line| format!("{}\n", &line[20..]))
        .collect();
    let reassembled = assemble(&recovered, 0x1000).unwrap();
    assert_eq!(program.image, reassembled.image);
}

#[test]
fn char_literals_in_immediates() {
    let program = assemble("    li a0, 'H'\n    li a1, '\\n'\n", 0).unwrap();
    let first = u32::from_le_bytes(program.image[0..4].try_into().unwrap());
    let second = u32::from_le_bytes(program.image[4..8].try_into().unwrap());
    assert_eq!(u32::from(b'H'), first >> 20);
    assert_eq!(u32::from(b'\n'), second >> 20);
}

#[test]
fn lexical_errors_carry_line_numbers() {
    let errors = assemble("nop\n    li a0, 0xZZ\n    .ascii \"open\n", 0).unwrap_err();
    assert_eq!(2, errors.len());
    assert_eq!(2, errors[0].line);
    assert_eq!(ErrorKind::MalformedInteger, errors[0].kind);
    assert_eq!(3, errors[1].line);
    assert_eq!(ErrorKind::UnterminatedLiteral, errors[1].kind);
}
