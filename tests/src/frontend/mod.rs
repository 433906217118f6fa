//! RISC-V instruction semantics, checked by running small programs.

use xlat_core::GuestCpu;
use xlat_exec::VCpu;
use xlat_frontend::riscv::cpu::{
    Priv, EXCP_BREAKPOINT, EXCP_ECALL_M, EXCP_ECALL_U, EXCP_ILLEGAL_INSN, EXCP_INSN_MISALIGNED,
    EXCP_STORE_MISALIGNED,
};
use xlat_frontend::riscv::csr::{CSR_MEPC, CSR_MHARTID, CSR_MSCRATCH, CSR_MSTATUS, CSR_MTVEC};
use xlat_frontend::riscv::RiscvCpu;

use crate::common::asm::*;
use crate::common::machine::*;

const A4: u32 = 14;
const A5: u32 = 15;

/// Trap handler used by tests that let exceptions reach M-mode.
const HANDLER: u64 = 0x3000;
/// U-mode entry point for privilege tests.
const USER: u64 = 0x4000;

fn prog(parts: &[&[u32]]) -> Vec<u32> {
    parts.concat()
}

/// Run `code` at `CODE` on hart 0 up to its terminating `ecall`.
fn run(m: &Machine, code: &[u32]) -> VCpu<RiscvCpu> {
    m.load(CODE, code);
    let mut cpu = m.hart(CODE);
    run_to_ecall(&mut cpu);
    cpu
}

fn reg(cpu: &VCpu<RiscvCpu>, r: u32) -> u64 {
    cpu.cpu().gpr(r as usize)
}

/// Install `HANDLER` as the trap vector; the handler just `ecall`s.
fn with_handler(m: &Machine, body: &[u32]) -> Vec<u32> {
    m.load(HANDLER, &[ecall()]);
    prog(&[&li(T0, HANDLER as i32), &[csrrw(ZERO, CSR_MTVEC, T0)], body])
}

#[test]
fn writes_to_x0_are_dropped() {
    let m = Machine::new();
    let cpu = run(
        &m,
        &[addi(ZERO, ZERO, 5), lui(ZERO, 0x1000), add(A0, ZERO, ZERO), addi(A1, ZERO, 3), ecall()],
    );
    assert_eq!(reg(&cpu, ZERO), 0);
    assert_eq!(reg(&cpu, A0), 0);
    assert_eq!(reg(&cpu, A1), 3);
}

#[test]
fn branches_and_compares() {
    let m = Machine::new();
    let cpu = run(
        &m,
        &[
            addi(A0, ZERO, -1),
            addi(A1, ZERO, 1),
            addi(A2, ZERO, 0),
            blt(A0, A1, 8),
            addi(A2, A2, 1),
            bltu(A0, A1, 8),
            addi(A2, A2, 2),
            bge(A1, A0, 8),
            addi(A2, A2, 4),
            slt(A3, A0, A1),
            sltu(A4, A0, A1),
            sltiu(A5, A0, -1),
            ecall(),
        ],
    );
    assert_eq!(reg(&cpu, A2), 2);
    assert_eq!(reg(&cpu, A3), 1);
    assert_eq!(reg(&cpu, A4), 0);
    assert_eq!(reg(&cpu, A5), 0);
}

#[test]
fn shifts_use_low_bits_of_the_amount() {
    let m = Machine::new();
    let cpu = run(
        &m,
        &[
            addi(A0, ZERO, -16),
            addi(A1, ZERO, 65),
            sll(A2, A0, A1),
            sra(A3, A0, A1),
            srli(A4, A0, 60),
            srai(A5, A0, 2),
            ecall(),
        ],
    );
    assert_eq!(reg(&cpu, A2), (-32i64) as u64);
    assert_eq!(reg(&cpu, A3), (-8i64) as u64);
    assert_eq!(reg(&cpu, A4), 0xf);
    assert_eq!(reg(&cpu, A5), (-4i64) as u64);
}

#[test]
fn word_ops_sign_extend() {
    let m = Machine::new();
    let cpu = run(
        &m,
        &prog(&[
            &li(A0, i32::MAX),
            &[
                addiw(A1, A0, 1),
                sraiw(A2, A1, 4),
                addw(A3, A0, A0),
                addi(T0, ZERO, 33),
                sllw(A4, A0, T0),
                ecall(),
            ],
        ]),
    );
    assert_eq!(reg(&cpu, A0), i32::MAX as u64);
    assert_eq!(reg(&cpu, A1), 0xffff_ffff_8000_0000);
    assert_eq!(reg(&cpu, A2), (i32::MIN >> 4) as i64 as u64);
    assert_eq!(reg(&cpu, A3), (-2i64) as u64);
    // Shift amount is taken mod 32.
    assert_eq!(reg(&cpu, A4), (-2i64) as u64);
}

#[test]
fn loads_extend_by_width() {
    let m = Machine::new();
    m.write_u64(DATA, 0x8000_0080);
    m.write_u64(DATA + 8, 0x1122_3344_5566_7788);
    m.write_u64(DATA + 16, 0x99aa_bbcc_ddee_ff00);
    let cpu = run(
        &m,
        &[
            lui(S0, DATA as i32),
            lb(A0, S0, 0),
            lbu(A1, S0, 0),
            lw(A2, S0, 0),
            lwu(A3, S0, 0),
            // Misaligned plain loads are allowed.
            ld(A4, S0, 11),
            ecall(),
        ],
    );
    assert_eq!(reg(&cpu, A0), (-128i64) as u64);
    assert_eq!(reg(&cpu, A1), 0x80);
    assert_eq!(reg(&cpu, A2), 0xffff_ffff_8000_0080);
    assert_eq!(reg(&cpu, A3), 0x8000_0080);
    assert_eq!(reg(&cpu, A4), 0xeeff_0011_2233_4455);
}

#[test]
fn division_edge_cases() {
    let m = Machine::new();
    let cpu = run(
        &m,
        &[
            addi(A0, ZERO, 7),
            div(A1, A0, ZERO),
            rem(A2, A0, ZERO),
            divu(A3, A0, ZERO),
            remu(A4, A0, ZERO),
            addi(S0, ZERO, 1),
            slli(S0, S0, 63),
            addi(S1, ZERO, -1),
            div(A5, S0, S1),
            rem(T1, S0, S1),
            addi(T2, ZERO, -9),
            rem(S1, T2, A0),
            ecall(),
        ],
    );
    assert_eq!(reg(&cpu, A1), u64::MAX);
    assert_eq!(reg(&cpu, A2), 7);
    assert_eq!(reg(&cpu, A3), u64::MAX);
    assert_eq!(reg(&cpu, A4), 7);
    assert_eq!(reg(&cpu, A5), 1 << 63);
    assert_eq!(reg(&cpu, T1), 0);
    // Remainder takes the dividend's sign.
    assert_eq!(reg(&cpu, S1), (-2i64) as u64);
}

#[test]
fn word_division_edge_cases() {
    let m = Machine::new();
    let cpu = run(
        &m,
        &[
            lui(A0, i32::MIN),
            addi(A1, ZERO, -1),
            divw(A2, A0, A1),
            remw(A3, A0, A1),
            divw(A4, A1, ZERO),
            addi(T0, ZERO, -9),
            remw(A5, T0, ZERO),
            ecall(),
        ],
    );
    assert_eq!(reg(&cpu, A2), i32::MIN as i64 as u64);
    assert_eq!(reg(&cpu, A3), 0);
    assert_eq!(reg(&cpu, A4), u64::MAX);
    assert_eq!(reg(&cpu, A5), (-9i64) as u64);
}

#[test]
fn multiply_high_halves() {
    let m = Machine::new();
    let cpu = run(
        &m,
        &[
            addi(A0, ZERO, -2),
            addi(A1, ZERO, 3),
            mul(A2, A0, A1),
            mulh(A3, A0, A1),
            mulhu(A4, A0, A1),
            mulhsu(A5, A0, A1),
            mulhsu(T0, A1, A0),
            ecall(),
        ],
    );
    let a = -2i64;
    let b = 3i64;
    let hi = |v: i128| (v >> 64) as u64;
    assert_eq!(reg(&cpu, A2), (a * b) as u64);
    assert_eq!(reg(&cpu, A3), hi(a as i128 * b as i128));
    assert_eq!(reg(&cpu, A4), hi((a as u64 as i128) * b as i128));
    assert_eq!(reg(&cpu, A5), hi(a as i128 * (b as u64 as i128)));
    assert_eq!(reg(&cpu, T0), hi(b as i128 * (a as u64 as i128)));
}

#[test]
fn reservation_pairs() {
    let m = Machine::new();
    m.write_u64(DATA, 10);
    let cpu = run(
        &m,
        &[
            lui(S0, DATA as i32),
            // Paired: succeeds.
            lr_d(A0, S0),
            addi(A0, A0, 1),
            sc_d(A1, A0, S0),
            // Reservation consumed: fails.
            sc_d(A2, ZERO, S0),
            // Value changed behind the reservation: fails.
            lr_d(A3, S0),
            addi(T0, ZERO, 99),
            sd(T0, S0, 0),
            sc_d(A4, ZERO, S0),
            ecall(),
        ],
    );
    assert_eq!(reg(&cpu, A1), 0);
    assert_eq!(reg(&cpu, A2), 1);
    assert_eq!(reg(&cpu, A3), 11);
    assert_eq!(reg(&cpu, A4), 1);
    assert_eq!(m.read_u64(DATA), 99);
}

#[test]
fn amos_return_the_old_value() {
    let m = Machine::new();
    m.write_u64(DATA, 5);
    m.write_u64(DATA + 8, 0xffff_fff0);
    let cpu = run(
        &m,
        &[
            lui(S0, DATA as i32),
            addi(A0, ZERO, 4),
            amoadd_d(A1, A0, S0),
            addi(A0, ZERO, -3),
            amomax_d(A2, A0, S0),
            amominu_d(A3, A0, S0),
            addi(S1, S0, 8),
            addi(A0, ZERO, 0x20),
            amoadd_w(A4, A0, S1),
            amoswap_w(A5, A0, S1),
            ecall(),
        ],
    );
    assert_eq!(reg(&cpu, A1), 5);
    assert_eq!(reg(&cpu, A2), 9);
    assert_eq!(reg(&cpu, A3), 9);
    assert_eq!(m.read_u64(DATA), 9);
    // Word AMOs sign-extend the old value and leave the upper word.
    assert_eq!(reg(&cpu, A4), (-16i64) as u64);
    assert_eq!(reg(&cpu, A5), 0x10);
    assert_eq!(m.read_u64(DATA + 8), 0x20);
}

#[test]
fn misaligned_amo_faults() {
    let m = Machine::new();
    m.write_u64(DATA, 1);
    m.load(
        CODE,
        &[lui(S0, DATA as i32), addi(S0, S0, 2), amoadd_w(A0, S0, S0), ecall()],
    );
    let mut cpu = m.hart_with(0, CODE, INTERCEPT_ECALL | 1 << EXCP_STORE_MISALIGNED);
    assert_eq!(run_to_exception(&mut cpu), (EXCP_STORE_MISALIGNED, CODE + 8));
    assert_eq!(m.read_u64(DATA), 1);
}

#[test]
fn csr_read_modify_write() {
    let m = Machine::new();
    m.load(
        CODE,
        &[
            addi(A0, ZERO, 0x55),
            csrrw(T0, CSR_MSCRATCH, A0),
            addi(A1, ZERO, 0xa),
            csrrs(T1, CSR_MSCRATCH, A1),
            csrrc(T2, CSR_MSCRATCH, A0),
            csrr(A2, CSR_MSCRATCH),
            csrrwi(ZERO, CSR_MSCRATCH, 0x1f),
            csrrsi(A3, CSR_MSCRATCH, 0),
            csrr(A4, CSR_MHARTID),
            ecall(),
        ],
    );
    let mut cpu = m.hart_with(3, CODE, INTERCEPT_ECALL);
    run_to_ecall(&mut cpu);
    assert_eq!(reg(&cpu, T0), 0);
    assert_eq!(reg(&cpu, T1), 0x55);
    assert_eq!(reg(&cpu, T2), 0x5f);
    assert_eq!(reg(&cpu, A2), 0x0a);
    assert_eq!(reg(&cpu, A3), 0x1f);
    assert_eq!(reg(&cpu, A4), 3);
    assert_eq!(cpu.cpu().env().mscratch, 0x1f);
}

#[test]
fn unknown_csr_traps_to_handler() {
    let m = Machine::new();
    let bad = csrr(A0, 0x7c0);
    let code = with_handler(&m, &[addi(A1, ZERO, 1), bad, addi(A1, ZERO, 2), ecall()]);
    let at = CODE + 4 * (code.len() as u64 - 3);
    let cpu = run(&m, &code);
    let env = cpu.cpu().env();
    assert_eq!(env.pc, HANDLER);
    assert_eq!(env.mcause, EXCP_ILLEGAL_INSN as u64);
    assert_eq!(env.mtval, bad as u64);
    assert_eq!(env.mepc, at);
    // Older insns retired, younger ones did not.
    assert_eq!(reg(&cpu, A1), 1);
}

#[test]
fn writing_read_only_csr_is_illegal() {
    let m = Machine::new();
    let code = with_handler(&m, &[csrrw(ZERO, CSR_MHARTID, T0), ecall()]);
    let cpu = run(&m, &code);
    assert_eq!(cpu.cpu().env().mcause, EXCP_ILLEGAL_INSN as u64);
    assert_eq!(cpu.cpu().env().pc, HANDLER);
}

#[test]
fn ebreak_reports_its_pc() {
    let m = Machine::new();
    let code = with_handler(&m, &[nop(), ebreak(), ecall()]);
    let at = CODE + 4 * (code.len() as u64 - 2);
    let cpu = run(&m, &code);
    let env = cpu.cpu().env();
    assert_eq!(env.mcause, EXCP_BREAKPOINT as u64);
    assert_eq!((env.mepc, env.mtval), (at, at));
}

#[test]
fn misaligned_jump_targets_fault() {
    let m = Machine::new();
    m.load(CODE, &[jal(RA, 6), ecall()]);
    let mut cpu = m.hart_with(0, CODE, INTERCEPT_ECALL | 1 << EXCP_INSN_MISALIGNED);
    assert_eq!(run_to_exception(&mut cpu), (EXCP_INSN_MISALIGNED, CODE));
    // No link on a faulting jump.
    assert_eq!(reg(&cpu, RA), 0);

    m.load(
        CODE + 0x100,
        &prog(&[&li(T0, (CODE + 0x202) as i32), &[jalr(RA, T0, 0), ecall()]]),
    );
    cpu.cpu_mut().set_pc(CODE + 0x100);
    assert_eq!(run_to_exception(&mut cpu), (EXCP_INSN_MISALIGNED, CODE + 0x108));

    // Bit 0 of a jalr target is ignored.
    m.load(CODE + 0x300, &prog(&[&li(T0, (CODE + 0x381) as i32), &[jalr(RA, T0, 0)]]));
    m.load(CODE + 0x380, &[ecall()]);
    cpu.cpu_mut().set_pc(CODE + 0x300);
    assert_eq!(run_to_ecall(&mut cpu), CODE + 0x380);
    assert_eq!(reg(&cpu, RA), CODE + 0x30c);
}

/// Drop to U-mode at `USER` via `mret` and run `user` there.
fn enter_user(m: &Machine, user: &[u32]) -> VCpu<RiscvCpu> {
    m.load(USER, user);
    let code = with_handler(
        m,
        &prog(&[&li(T0, USER as i32), &[csrrw(ZERO, CSR_MEPC, T0), mret()]]),
    );
    run(m, &code)
}

#[test]
fn mret_drops_to_user_mode() {
    let m = Machine::new();
    let cpu = enter_user(&m, &[addi(A0, ZERO, 9), ecall()]);
    assert_eq!(cpu.cpu().priv_mode(), Priv::User);
    assert_eq!(cpu.cpu().env().pc, USER + 4);
    assert_eq!(reg(&cpu, A0), 9);
}

#[test]
fn ecall_cause_depends_on_mode() {
    let m = Machine::new();
    m.load(USER, &[ecall()]);
    m.load(
        CODE,
        &prog(&[
            &li(T0, USER as i32),
            &[csrrw(ZERO, CSR_MEPC, T0), ecall(), mret()],
        ]),
    );
    let mut cpu = m.hart(CODE);
    assert_eq!(run_to_exception(&mut cpu), (EXCP_ECALL_M, CODE + 12));
    cpu.cpu_mut().set_pc(CODE + 16);
    assert_eq!(run_to_exception(&mut cpu), (EXCP_ECALL_U, USER));
}

#[test]
fn machine_only_insns_are_illegal_in_user_mode() {
    for insn in [wfi(), mret(), csrr(A0, CSR_MSTATUS)] {
        let m = Machine::new();
        let cpu = enter_user(&m, &[insn, ecall()]);
        let env = cpu.cpu().env();
        assert_eq!(cpu.cpu().priv_mode(), Priv::Machine, "{insn:#010x}");
        assert_eq!(env.mcause, EXCP_ILLEGAL_INSN as u64, "{insn:#010x}");
        assert_eq!((env.mepc, env.mtval), (USER, insn as u64));
        // Came from U-mode.
        assert_eq!(env.mstatus & (3 << 11), 0);
    }
}
