//! End-to-end interpreter tests: assemble small programs, run them against
//! the default system bus, and assert on the architectural state.

use basalt_core::asm::assemble;
use basalt_core::interp::Exception;
use basalt_core::registers::Specifier;
use basalt_core::system_bus::SystemBus;
use basalt_core::{Interpreter, PrivilegeLevel, StepResult};

const ORIGIN: u32 = 0x0000_1000;
const MEMORY: usize = 0x1_0000;

/// Assembles `source`, loads it into a fresh system bus, and returns an
/// interpreter positioned at the entry point with sp at the top of RAM.
fn boot(source: &str) -> Interpreter<SystemBus> {
    let program = assemble(source, ORIGIN).expect("program should assemble");
    let mut bus = SystemBus::new(ORIGIN, MEMORY).unwrap();
    assert!(bus.load_image(ORIGIN, &program.image));
    let mut interp = Interpreter::new(bus);
    *interp.registers_mut().pc_mut() = program.entry();
    interp
        .registers_mut()
        .set_x(Specifier::SP, ORIGIN + MEMORY as u32);
    interp
}

/// Steps until Halted, with a bound so a broken test fails instead of
/// spinning.
fn run_to_halt(interp: &mut Interpreter<SystemBus>) {
    for _ in 0..100_000 {
        if interp.step() == StepResult::Halted {
            return;
        }
    }
    panic!("program never halted");
}

fn x(interp: &Interpreter<SystemBus>, index: u8) -> u32 {
    interp.registers().x(Specifier::new(index).unwrap())
}

#[test]
fn scenario_minimal_program() {
    let mut interp = boot("_start: li a0, 42\n        ebreak\n");
    assert_eq!(StepResult::Retired, interp.step());
    assert_eq!(42, x(&interp, 10));
    assert_eq!(StepResult::Halted, interp.step());
    let dump = interp.dump_state();
    assert_eq!(2, dump.cycle);
    assert_eq!(1, dump.instret);
}

#[test]
fn scenario_loop_and_counters() {
    let source = "\
_start:
    li t0, 0
    li t1, 10
loop:
    addi t0, t0, 1
    bne t0, t1, loop
    ebreak
";
    let mut interp = boot(source);
    run_to_halt(&mut interp);
    let dump = interp.dump_state();
    assert_eq!(10, dump.regs[5]);
    // Two setup instructions plus ten loop iterations of (addi, bne); the
    // final ebreak counts a cycle but does not retire.
    assert_eq!(22, dump.instret);
    assert_eq!(23, dump.cycle);
}

#[test]
fn scenario_mmio_output() {
    let source = "\
_start:
    li t0, 0x10000000
    li t1, 'H'
    sb t1, 0(t0)
    li t1, 'i'
    sb t1, 0(t0)
    li t1, '\\n'
    sb t1, 0(t0)
    ebreak
";
    let mut interp = boot(source);
    run_to_halt(&mut interp);
    assert_eq!(b"Hi\n", interp.bus().console().output());
}

#[test]
fn mmio_word_write_emits_one_character() {
    let source = "\
_start:
    li t0, 0x10000000
    li t1, 'A'
    sw t1, 0(t0)
    ebreak
";
    let mut interp = boot(source);
    run_to_halt(&mut interp);
    assert_eq!(b"A", interp.bus().console().output());
}

#[test]
fn scenario_trap_and_return() {
    let source = "\
_start:
    la t0, handler
    csrw mtvec, t0
    ecall
    ebreak
handler:
    li a0, 7
    csrr t1, mepc
    addi t1, t1, 4
    csrw mepc, t1
    mret
";
    let program = assemble(source, ORIGIN).unwrap();
    let ecall_address = *program
        .line_map
        .iter()
        .find_map(|(address, line)| (*line == 4).then_some(address))
        .unwrap();

    let mut interp = boot(source);
    // Step to the trap.
    let trap = loop {
        match interp.step() {
            StepResult::Trap { cause, epc } => break (cause, epc),
            StepResult::Retired => {}
            StepResult::Halted => panic!("halted before trapping"),
        }
    };
    assert_eq!(Exception::EnvironmentCallFromMMode, trap.0);
    assert_eq!(ecall_address, trap.1);
    let dump = interp.dump_state();
    assert_eq!(11, dump.mcause);
    assert_eq!(ecall_address, dump.mepc);
    assert_eq!(0, dump.mtval);
    assert_eq!(PrivilegeLevel::Machine, dump.mpp);

    run_to_halt(&mut interp);
    let dump = interp.dump_state();
    assert_eq!(7, dump.regs[10]);
    assert_eq!(11, dump.mcause);
    assert_eq!(PrivilegeLevel::Machine, dump.privilege);
}

#[test]
fn scenario_misaligned_jalr_target() {
    let source = "\
_start:
    la t0, target
    addi t0, t0, 2
    jr t0
target:
    nop
";
    let mut interp = boot(source);
    let target = ORIGIN + 16 + 2; // past la (8), addi (4), jr (4), plus 2
    // la (two instructions), addi, and jr all retire; the jump itself does
    // not fault.
    for _ in 0..4 {
        assert_eq!(StepResult::Retired, interp.step());
    }
    assert_eq!(target, interp.registers().pc());
    // The next fetch traps on the misaligned pc.
    assert_eq!(
        StepResult::Trap {
            cause: Exception::InstructionAddressMisaligned(target),
            epc: target,
        },
        interp.step()
    );
    let dump = interp.dump_state();
    assert_eq!(0, dump.mcause);
    assert_eq!(target, dump.mepc);
    assert_eq!(target, dump.mtval);
}

#[test]
fn scenario_assembler_error_reporting() {
    let source = "\
_start:
    nop
    j missing
    nop
dup:
    nop
dup:
";
    let errors = assemble(source, ORIGIN).unwrap_err();
    assert_eq!(2, errors.len());
    assert_eq!(3, errors[0].line);
    assert_eq!(7, errors[1].line);
}

#[test]
fn x0_is_pinned_to_zero() {
    let source = "\
_start:
    addi zero, zero, 5
    lui zero, 0xFFFFF000
    li t0, 1
    add zero, t0, t0
    ebreak
";
    let mut interp = boot(source);
    loop {
        let result = interp.step();
        assert_eq!(0, interp.dump_state().regs[0]);
        match result {
            StepResult::Halted => break,
            _ => {}
        }
    }
}

#[test]
fn counters_track_each_step() {
    let mut interp = boot("_start: nop\n        nop\n        ebreak\n");
    let mut previous = interp.dump_state();
    loop {
        let result = interp.step();
        let dump = interp.dump_state();
        assert_eq!(previous.cycle + 1, dump.cycle);
        assert!(dump.cycle >= dump.instret);
        match result {
            StepResult::Retired => assert_eq!(previous.instret + 1, dump.instret),
            _ => assert_eq!(previous.instret, dump.instret),
        }
        if result == StepResult::Halted {
            break;
        }
        previous = dump;
    }
}

#[test]
fn branch_offsets_move_pc_relative() {
    for offset in [8i32, -8, 256, 4094, -4096] {
        let source = format!("_start: beq zero, zero, {offset}\n");
        let program = assemble(&source, ORIGIN).unwrap();
        let mut bus = SystemBus::new(ORIGIN, MEMORY).unwrap();
        // Base the branch in the middle of RAM so negative targets stay
        // mapped.
        let base = ORIGIN + 0x8000;
        assert!(bus.load_image(base, &program.image));
        let mut interp = Interpreter::new(bus);
        *interp.registers_mut().pc_mut() = base;
        assert_eq!(StepResult::Retired, interp.step(), "offset {offset}");
        assert_eq!(
            base.wrapping_add_signed(offset),
            interp.registers().pc(),
            "offset {offset}"
        );
    }
}

#[test]
fn branch_to_halfword_target_traps_on_next_step() {
    let mut interp = boot("_start: beq zero, zero, 6\n");
    assert_eq!(StepResult::Retired, interp.step());
    let target = ORIGIN + 6;
    assert_eq!(
        StepResult::Trap {
            cause: Exception::InstructionAddressMisaligned(target),
            epc: target,
        },
        interp.step()
    );
}

#[test]
fn taken_and_untaken_branches() {
    let source = "\
_start:
    li t0, 1
    li t1, 2
    blt t1, t0, bad
    bge t1, t0, good
bad:
    ebreak
good:
    li a0, 1
    ebreak
";
    let mut interp = boot(source);
    run_to_halt(&mut interp);
    assert_eq!(1, x(&interp, 10));
}

#[test]
fn mret_restores_privilege_and_pc() {
    let source = "\
_start:
    la t0, user
    csrw mepc, t0
    li t1, 0
    csrw mstatus, t1
    mret
user:
    ecall
";
    let mut interp = boot(source);
    let user = assemble(source, ORIGIN).unwrap().symbols["user"];
    // la (two instructions), csrw, li, csrw, mret.
    for _ in 0..6 {
        assert_eq!(StepResult::Retired, interp.step());
    }
    assert_eq!(PrivilegeLevel::User, interp.privilege_mode());
    assert_eq!(user, interp.registers().pc());
    // The ecall now comes from User mode.
    match interp.step() {
        StepResult::Trap { cause, epc } => {
            assert_eq!(Exception::EnvironmentCallFromUMode, cause);
            assert_eq!(user, epc);
        }
        other => panic!("expected trap, got {other:?}"),
    }
    let dump = interp.dump_state();
    assert_eq!(8, dump.mcause);
    assert_eq!(PrivilegeLevel::Machine, dump.privilege);
    assert_eq!(PrivilegeLevel::User, dump.mpp);
}

#[test]
fn mret_from_user_mode_is_illegal() {
    let source = "\
_start:
    la t0, user
    csrw mepc, t0
    csrw mstatus, zero
    mret
user:
    mret
";
    let mut interp = boot(source);
    for _ in 0..5 {
        assert_eq!(StepResult::Retired, interp.step());
    }
    assert_eq!(PrivilegeLevel::User, interp.privilege_mode());
    match interp.step() {
        StepResult::Trap { cause, .. } => {
            assert_eq!(Exception::IllegalInstruction(Some(0x3020_0073)), cause);
        }
        other => panic!("expected trap, got {other:?}"),
    }
    assert_eq!(0x3020_0073, interp.dump_state().mtval);
}

#[test]
fn user_mode_cannot_touch_machine_csrs() {
    let source = "\
_start:
    la t0, user
    csrw mepc, t0
    csrw mstatus, zero
    mret
user:
    csrr t0, mscratch
";
    let mut interp = boot(source);
    for _ in 0..5 {
        assert_eq!(StepResult::Retired, interp.step());
    }
    match interp.step() {
        StepResult::Trap { cause, .. } => {
            assert!(matches!(cause, Exception::IllegalInstruction(Some(_))));
        }
        other => panic!("expected trap, got {other:?}"),
    }
}

#[test]
fn counter_csrs_are_readable_but_not_writable() {
    let source = "\
_start:
    csrr t0, cycle
    csrr t1, instret
    csrw cycle, t0
";
    let mut interp = boot(source);
    assert_eq!(StepResult::Retired, interp.step());
    assert_eq!(StepResult::Retired, interp.step());
    // cycle was 1 when the first csrr executed.
    assert_eq!(1, x(&interp, 5));
    assert_eq!(1, x(&interp, 6));
    match interp.step() {
        StepResult::Trap { cause, .. } => {
            assert!(matches!(cause, Exception::IllegalInstruction(Some(_))));
        }
        other => panic!("expected trap, got {other:?}"),
    }
    assert_eq!(2, interp.dump_state().mcause);
}

#[test]
fn csrrs_with_x0_reads_read_only_csrs() {
    // csrrs with rs1=x0 suppresses the write side entirely, so reading the
    // read-only counters through it is legal even in the rs-form.
    let mut interp = boot("_start: csrrs t0, instret, zero\n        ebreak\n");
    assert_eq!(StepResult::Retired, interp.step());
    assert_eq!(0, x(&interp, 5));
}

#[test]
fn csr_bit_operations() {
    let source = "\
_start:
    li t0, 0xF0
    csrw mscratch, t0
    csrrsi zero, mscratch, 0xF
    csrrci zero, mscratch, 0x11
    csrr t1, mscratch
    ebreak
";
    let mut interp = boot(source);
    run_to_halt(&mut interp);
    // 0xF0 | 0x0F = 0xFF, then cleared bits 0 and 4: 0xEE.
    assert_eq!(0xEE, x(&interp, 6));
    assert_eq!(0xEE, interp.dump_state().mscratch);
}

#[test]
fn misaligned_load_traps_without_side_effects() {
    let source = "\
_start:
    li a0, 0xAAAAAAAA
    lw a0, 2(zero)
";
    let mut interp = boot(source);
    assert_eq!(StepResult::Retired, interp.step());
    assert_eq!(StepResult::Retired, interp.step());
    let before = interp.registers().pc();
    match interp.step() {
        StepResult::Trap { cause, epc } => {
            assert_eq!(Exception::LoadAddressMisaligned(2), cause);
            assert_eq!(before, epc);
        }
        other => panic!("expected trap, got {other:?}"),
    }
    let dump = interp.dump_state();
    assert_eq!(4, dump.mcause);
    assert_eq!(2, dump.mtval);
    // The destination register is untouched.
    assert_eq!(0xAAAA_AAAA, dump.regs[10]);
}

#[test]
fn misaligned_store_traps_before_memory_changes() {
    let source = "\
_start:
    li t0, 0x5555
    sh t0, 1(sp)
";
    let mut interp = boot(source);
    // sp points at the top of RAM; aim the store at a known word instead.
    interp.registers_mut().set_x(Specifier::SP, ORIGIN + 0x100);
    assert_eq!(StepResult::Retired, interp.step());
    assert_eq!(StepResult::Retired, interp.step());
    match interp.step() {
        StepResult::Trap { cause, .. } => {
            assert_eq!(Exception::StoreAddressMisaligned(ORIGIN + 0x101), cause);
        }
        other => panic!("expected trap, got {other:?}"),
    }
    let dump = interp.dump_state();
    assert_eq!(6, dump.mcause);
    // The bytes around the target are still zero.
    use basalt_core::{AccessWidth, Bus};
    assert_eq!(
        Ok(0),
        interp.bus_mut().read(ORIGIN + 0x100, AccessWidth::Word)
    );
}

#[test]
fn unmapped_access_faults() {
    let source = "\
_start:
    li t0, 0x20000000
    lw a0, 0(t0)
";
    let mut interp = boot(source);
    assert_eq!(StepResult::Retired, interp.step());
    assert_eq!(StepResult::Retired, interp.step());
    match interp.step() {
        StepResult::Trap { cause, .. } => {
            assert_eq!(Exception::LoadAccessFault(0x2000_0000), cause);
        }
        other => panic!("expected trap, got {other:?}"),
    }
    assert_eq!(5, interp.dump_state().mcause);
}

#[test]
fn li_builds_arbitrary_constants() {
    for value in [
        0u32,
        1,
        0x7FF,
        0x800,
        0xFFF,
        0x1000,
        0x1234_5678,
        0x7FFF_FFFF,
        0x8000_0000,
        0xFFFF_F800,
        0xFFFF_FFFF,
    ] {
        let source = format!("_start: li a0, {value:#x}\n        ebreak\n");
        let mut interp = boot(&source);
        run_to_halt(&mut interp);
        assert_eq!(value, x(&interp, 10), "li a0, {value:#x}");
    }
}

#[test]
fn loads_and_stores_round_trip_through_ram() {
    let source = "\
_start:
    la t0, buffer
    li t1, 0x80
    sb t1, 0(t0)
    lb t2, 0(t0)
    lbu t3, 0(t0)
    li t4, 0xBEEF
    sh t4, 2(t0)
    lh t5, 2(t0)
    lhu t6, 2(t0)
    ebreak
buffer:
    .word 0
";
    let mut interp = boot(source);
    run_to_halt(&mut interp);
    // lb sign-extends, lbu does not.
    assert_eq!(0xFFFF_FF80, x(&interp, 7));
    assert_eq!(0x80, x(&interp, 28));
    assert_eq!(0xFFFF_BEEF, x(&interp, 30));
    assert_eq!(0xBEEF, x(&interp, 31));
}

#[test]
fn shift_and_compare_semantics() {
    let source = "\
_start:
    li t0, -8
    srai t1, t0, 1
    srli t2, t0, 1
    li t3, 33
    li t4, 1
    sll t5, t4, t3
    slti s0, t0, 0
    sltiu s1, t0, 0
    ebreak
";
    let mut interp = boot(source);
    run_to_halt(&mut interp);
    assert_eq!((-4i32) as u32, x(&interp, 6));
    assert_eq!(0x7FFF_FFFC, x(&interp, 7));
    // Shift amounts use only the low five bits of rs2: 33 & 31 == 1.
    assert_eq!(2, x(&interp, 30));
    assert_eq!(1, x(&interp, 8));
    assert_eq!(0, x(&interp, 9));
}

#[test]
fn guest_handles_trap_on_unmapped_store() {
    // The host is not required to stop on traps: the guest installs a
    // handler, takes a store fault, and resumes past it.
    let source = "\
_start:
    la t0, handler
    csrw mtvec, t0
    li t1, 0x20000000
    sw t1, 0(t1)
    li a1, 1
    ebreak
handler:
    li a0, 7
    csrr t2, mepc
    addi t2, t2, 4
    csrw mepc, t2
    mret
";
    let mut interp = boot(source);
    for _ in 0..100 {
        match interp.step() {
            StepResult::Halted => break,
            StepResult::Retired | StepResult::Trap { .. } => {}
        }
    }
    let dump = interp.dump_state();
    assert_eq!(7, dump.regs[10]);
    assert_eq!(1, dump.regs[11]);
    assert_eq!(7, dump.mcause);
    assert_eq!(0x2000_0000, dump.mtval);
}
