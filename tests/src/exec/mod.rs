//! Execution engine: lookup, translation, chaining, invalidation,
//! eviction and cross-thread control of vCPUs.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use xlat_core::{GuestCpu, GuestException};
use xlat_exec::{Engine, EngineConfig, ExecError, ExitReason, VCpuConfig};
use xlat_frontend::riscv::cpu::{
    mem_fault_cause, CAUSE_INTERRUPT, EXCP_INSN_ACCESS, EXCP_INSN_PAGE_FAULT, IRQ_M_EXT,
    IRQ_M_TIMER,
};
use xlat_frontend::riscv::csr::{CSR_MCAUSE, CSR_MEPC, CSR_MHARTID, CSR_MIE, CSR_MSTATUS, CSR_MTVEC};
use xlat_frontend::riscv::RiscvCpu;
use xlat_mmu::{AddressSpace, PAGE_SIZE, PROT_READ, PROT_RWX, PROT_WRITE};

use crate::common::asm::*;
use crate::common::machine::*;

const M_MODE: u32 = 3;

fn prog(parts: &[&[u32]]) -> Vec<u32> {
    parts.concat()
}

#[test]
fn load_add_store_uses_one_block() {
    let m = Machine::new();
    m.load(
        CODE,
        &[lui(A0, DATA as i32), ld(A1, A0, 0), addi(A1, A1, 1), sd(A1, A0, 0), ecall()],
    );
    m.write_u64(DATA, 41);

    let mut cpu = m.hart(CODE);
    assert_eq!(run_to_ecall(&mut cpu), CODE + 16);
    assert_eq!(m.read_u64(DATA), 42);
    assert!(m.engine.lookup_tb(CODE, M_MODE).is_some());
    assert_eq!(m.engine.stats().translations, 1);

    cpu.cpu_mut().set_pc(CODE);
    run_to_ecall(&mut cpu);
    assert_eq!(m.read_u64(DATA), 43);
    let stats = m.engine.stats();
    assert_eq!(stats.translations, 1);
    assert!(stats.hits >= 1);
}

#[test]
fn host_write_to_code_retranslates() {
    let m = Machine::new();
    m.load(CODE, &[addi(A0, ZERO, 1), ecall()]);
    let mut cpu = m.hart(CODE);
    run_to_ecall(&mut cpu);
    assert_eq!(cpu.cpu().gpr(A0 as usize), 1);

    m.load(CODE, &[addi(A0, ZERO, 2)]);
    assert!(m.engine.lookup_tb(CODE, M_MODE).is_none());

    cpu.cpu_mut().set_pc(CODE);
    run_to_ecall(&mut cpu);
    assert_eq!(cpu.cpu().gpr(A0 as usize), 2);
    let stats = m.engine.stats();
    assert_eq!(stats.translations, 2);
    assert!(stats.invalidations >= 1);
}

#[test]
fn guest_store_to_code_retranslates() {
    let m = Machine::new();
    m.load(
        CODE,
        &[sw(T1, T0, 12), fence_i(), nop(), addi(A0, ZERO, 1), ecall()],
    );
    let mut cpu = m.hart(CODE);
    cpu.cpu_mut().set_gpr(T0 as usize, CODE);
    cpu.cpu_mut().set_gpr(T1 as usize, addi(A0, ZERO, 1) as u64);
    run_to_ecall(&mut cpu);
    assert_eq!(cpu.cpu().gpr(A0 as usize), 1);

    cpu.cpu_mut().set_pc(CODE);
    cpu.cpu_mut().set_gpr(T1 as usize, addi(A0, ZERO, 7) as u64);
    run_to_ecall(&mut cpu);
    assert_eq!(cpu.cpu().gpr(A0 as usize), 7);
    assert_eq!(m.read_u32(CODE + 12), addi(A0, ZERO, 7));
    assert!(m.engine.stats().invalidations >= 1);
}

#[test]
fn loops_chain_blocks() {
    let m = Machine::new();
    m.load(
        CODE,
        &[
            addi(A0, ZERO, 0),
            addi(A1, ZERO, 10),
            add(A0, A0, A1),
            addi(A1, A1, -1),
            bne(A1, ZERO, -8),
            ecall(),
        ],
    );
    let mut cpu = m.hart(CODE);
    run_to_ecall(&mut cpu);
    assert_eq!(cpu.cpu().gpr(A0 as usize), 55);
    let stats = m.engine.stats();
    assert!(stats.chains >= 1);
    assert!(m.engine.lookup_tb(CODE + 8, M_MODE).is_some());
}

#[test]
fn explicit_invalidate_and_flush() {
    let m = Machine::new();
    m.load(CODE, &[addi(A0, A0, 1), ecall()]);
    let mut cpu = m.hart(CODE);
    run_to_ecall(&mut cpu);
    assert_eq!(m.engine.invalidate(CODE, 4), 1);
    assert!(m.engine.lookup_tb(CODE, M_MODE).is_none());
    assert_eq!(m.engine.invalidate(CODE, 4), 0);

    cpu.cpu_mut().set_pc(CODE);
    run_to_ecall(&mut cpu);
    assert!(m.engine.lookup_tb(CODE, M_MODE).is_some());
    m.engine.flush_all();
    assert!(m.engine.lookup_tb(CODE, M_MODE).is_none());
    assert_eq!(m.engine.stats().flushes, 1);

    cpu.cpu_mut().set_pc(CODE);
    run_to_ecall(&mut cpu);
    assert_eq!(cpu.cpu().gpr(A0 as usize), 3);
}

/// `n` two-instruction blocks, each jumping to the next.
fn block_chain(n: usize) -> Vec<u32> {
    let mut p = Vec::with_capacity(2 * n + 1);
    for _ in 0..n {
        p.push(addi(A0, A0, 1));
        p.push(jal(ZERO, 4));
    }
    p.push(ecall());
    p
}

#[test]
fn tiny_cache_evicts_and_stays_correct() {
    let config = EngineConfig {
        code_buffer_size: 2 * 4096,
        code_regions: 2,
        max_tbs: 64,
        max_insns_per_tb: 8,
        tlb_bits: 4,
    };
    let m = Machine::with_config(config);
    m.load(CODE, &block_chain(300));
    let mut cpu = m.hart(CODE);
    run_to_ecall(&mut cpu);
    assert_eq!(cpu.cpu().gpr(A0 as usize), 300);

    cpu.cpu_mut().set_pc(CODE);
    run_to_ecall(&mut cpu);
    assert_eq!(cpu.cpu().gpr(A0 as usize), 600);

    let stats = m.engine.stats();
    assert!(stats.evictions + stats.flushes >= 1, "{stats:?}");
    assert!(stats.translations > 301);
}

#[test]
fn bad_config_is_rejected() {
    let space = Arc::new(AddressSpace::identity());
    let config = EngineConfig {
        code_regions: 0,
        ..EngineConfig::default()
    };
    assert!(matches!(
        Engine::<RiscvCpu>::with_tci(config, space),
        Err(ExecError::InvalidConfig(_))
    ));
    assert!(matches!(
        EngineConfig::from_toml_str("max_insns_per_tb = 0"),
        Err(ExecError::InvalidConfig(_))
    ));
}

#[test]
fn config_from_toml_drives_engine() {
    let config = EngineConfig::from_toml_str(
        "code_buffer_size = 65536\ncode_regions = 2\nmax_insns_per_tb = 1\n",
    )
    .unwrap();
    assert_eq!(config.max_tbs, EngineConfig::default().max_tbs);
    let m = Machine::with_config(config);
    m.load(CODE, &[addi(A0, ZERO, 1), addi(A0, A0, 1), ecall()]);
    let mut cpu = m.hart(CODE);
    run_to_ecall(&mut cpu);
    assert_eq!(cpu.cpu().gpr(A0 as usize), 2);
    // One instruction per block.
    assert_eq!(m.engine.stats().translations, 3);
}

#[test]
fn fetch_fault_reaches_the_caller() {
    let m = Machine::new();
    m.load(CODE, &[lui(T0, 0x20_0000), jalr(ZERO, T0, 0)]);
    let mut cpu = m.hart_with(0, CODE, INTERCEPT_ECALL | 1 << EXCP_INSN_ACCESS);
    assert_eq!(run_to_exception(&mut cpu), (EXCP_INSN_ACCESS, 0x20_0000));
    assert_eq!(cpu.cpu().get_pc(), 0x20_0000);
}

#[test]
fn remapping_code_changes_what_runs() {
    init_logger();
    let space = Arc::new(AddressSpace::with_page_map());
    space.add_ram(0, RAM_SIZE).unwrap();
    space.map(CODE, CODE, PAGE_SIZE, PROT_RWX).unwrap();
    let words = |ws: &[u32]| ws.iter().flat_map(|w| w.to_le_bytes()).collect::<Vec<u8>>();
    space.write_phys(CODE, &words(&[addi(A0, ZERO, 1), ecall()])).unwrap();
    space.write_phys(0x3000, &words(&[addi(A0, ZERO, 2), ecall()])).unwrap();

    let engine = Engine::<RiscvCpu>::with_tci(small_config(), space.clone()).unwrap();
    let mut cpu = engine.create_vcpu(
        RiscvCpu::rv64(0, CODE),
        VCpuConfig {
            hart_id: 0,
            intercept: INTERCEPT_ECALL,
        },
    );
    run_to_ecall(&mut cpu);
    assert_eq!(cpu.cpu().gpr(A0 as usize), 1);

    space.map(CODE, 0x3000, PAGE_SIZE, PROT_RWX).unwrap();
    assert!(engine.lookup_tb(CODE, M_MODE).is_none());
    cpu.cpu_mut().set_pc(CODE);
    run_to_ecall(&mut cpu);
    assert_eq!(cpu.cpu().gpr(A0 as usize), 2);
}

#[test]
fn protect_reaches_a_spinning_hart() {
    init_logger();
    let space = Arc::new(AddressSpace::with_page_map());
    space.add_ram(0, RAM_SIZE).unwrap();
    space.map(CODE, CODE, PAGE_SIZE, PROT_RWX).unwrap();
    let words: Vec<u8> = [addi(A0, A0, 1), jal(ZERO, -4)]
        .iter()
        .flat_map(|w| w.to_le_bytes())
        .collect();
    space.write_phys(CODE, &words).unwrap();

    let engine = Engine::<RiscvCpu>::with_tci(small_config(), space.clone()).unwrap();
    let mut cpu = engine.create_vcpu(
        RiscvCpu::rv64(0, CODE),
        VCpuConfig {
            hart_id: 0,
            intercept: u64::MAX,
        },
    );
    let handle = cpu.handle();
    let t = thread::spawn(move || {
        let exit = cpu.run();
        (exit, cpu.cpu().gpr(A0 as usize))
    });
    thread::sleep(Duration::from_millis(50));

    // The loop is a single self-chained block; only a kick gets the
    // hart back to its loop to see the new protection.
    space.protect(CODE, PAGE_SIZE, PROT_READ | PROT_WRITE).unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while !t.is_finished() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    handle.request_stop();
    let (exit, spins) = t.join().unwrap();
    match exit {
        ExitReason::Exception {
            excp: GuestException::Mem(f),
            pc,
        } => {
            assert_eq!(mem_fault_cause(f.access, f.kind), EXCP_INSN_PAGE_FAULT);
            assert_eq!((pc, f.addr), (CODE, CODE));
        }
        other => panic!("hart kept running after protect: {other:?}"),
    }
    assert!(spins > 0);
}

// ── Cross-thread control ───────────────────────────────

#[test]
fn stop_before_run() {
    let m = Machine::new();
    m.load(CODE, &[jal(ZERO, 0)]);
    let mut cpu = m.hart(CODE);
    cpu.handle().request_stop();
    assert_eq!(cpu.run(), ExitReason::Stopped);
    assert_eq!(cpu.cpu().get_pc(), CODE);
}

#[test]
fn stop_breaks_a_spinning_hart() {
    let m = Machine::new();
    m.load(CODE, &[jal(ZERO, 0)]);
    let mut cpu = m.hart(CODE);
    let handle = cpu.handle();
    let t = thread::spawn(move || cpu.run());
    thread::sleep(Duration::from_millis(50));
    handle.request_stop();
    assert_eq!(t.join().unwrap(), ExitReason::Stopped);
}

#[test]
fn stop_wakes_a_halted_hart() {
    let m = Machine::new();
    m.load(CODE, &[wfi(), jal(ZERO, -4)]);
    let mut cpu = m.hart(CODE);
    let handle = cpu.handle();
    let t = thread::spawn(move || cpu.run());
    thread::sleep(Duration::from_millis(50));
    handle.request_stop();
    assert_eq!(t.join().unwrap(), ExitReason::Stopped);
}

#[test]
fn interrupt_wakes_wfi_without_trapping() {
    let m = Machine::new();
    m.load(
        CODE,
        &prog(&[
            &li(T0, 1 << IRQ_M_EXT),
            &[csrrw(ZERO, CSR_MIE, T0), wfi(), ecall()],
        ]),
    );
    let mut cpu = m.hart(CODE);
    let handle = cpu.handle();
    let t = thread::spawn(move || {
        let pc = run_to_ecall(&mut cpu);
        (pc, cpu)
    });
    thread::sleep(Duration::from_millis(50));
    handle.post_interrupt(IRQ_M_EXT);
    let (pc, cpu) = t.join().unwrap();
    assert_eq!(pc, CODE + 16);
    // Globally disabled: woken, but no handler entered.
    assert_eq!(cpu.cpu().env().mcause, 0);
}

#[test]
fn interrupt_enters_handler() {
    let m = Machine::new();
    let handler = 0x2000;
    m.load(
        CODE,
        &prog(&[
            &li(T0, (1 << IRQ_M_EXT) | (1 << IRQ_M_TIMER)),
            &[
                csrrw(ZERO, CSR_MIE, T0),
                lui(T1, handler),
                csrrw(ZERO, CSR_MTVEC, T1),
                csrrsi(ZERO, CSR_MSTATUS, 8),
                jal(ZERO, 0),
            ],
        ]),
    );
    m.load(handler as u64, &[csrr(A0, CSR_MCAUSE), csrr(A1, CSR_MEPC), ecall()]);

    let mut cpu = m.hart(CODE);
    let handle = cpu.handle();
    let t = thread::spawn(move || {
        run_to_ecall(&mut cpu);
        cpu
    });
    thread::sleep(Duration::from_millis(50));
    handle.post_interrupt(IRQ_M_TIMER);
    handle.post_interrupt(IRQ_M_EXT);
    let cpu = t.join().unwrap();
    let env = cpu.cpu().env();
    let cause = env.gpr[A0 as usize];
    // The timer may be taken before the external line is posted.
    assert!(
        cause == CAUSE_INTERRUPT | IRQ_M_EXT as u64 || cause == CAUSE_INTERRUPT | IRQ_M_TIMER as u64
    );
    assert_eq!(env.gpr[A1 as usize], CODE + 24);
    assert_eq!(env.mstatus & 8, 0);
    assert_eq!(handle.pending_events(), (1 << IRQ_M_EXT) | (1 << IRQ_M_TIMER));
}

#[test]
fn pending_external_beats_timer() {
    let m = Machine::new();
    let handler = 0x2000;
    m.load(
        CODE,
        &prog(&[
            &li(T0, (1 << IRQ_M_EXT) | (1 << IRQ_M_TIMER)),
            &[
                csrrw(ZERO, CSR_MIE, T0),
                lui(T1, handler),
                csrrw(ZERO, CSR_MTVEC, T1),
                csrrsi(ZERO, CSR_MSTATUS, 8),
                nop(),
            ],
        ]),
    );
    m.load(handler as u64, &[csrr(A0, CSR_MCAUSE), ecall()]);
    let mut cpu = m.hart(CODE);
    cpu.handle().post_interrupt(IRQ_M_TIMER);
    cpu.handle().post_interrupt(IRQ_M_EXT);
    run_to_ecall(&mut cpu);
    assert_eq!(cpu.cpu().gpr(A0 as usize), CAUSE_INTERRUPT | IRQ_M_EXT as u64);
}

// ── Shared engine ──────────────────────────────────────

/// Sum 1..=100 and store it at `DATA + 8 * mhartid`.
fn sum_program() -> Vec<u32> {
    vec![
        csrr(T0, CSR_MHARTID),
        slli(T0, T0, 3),
        lui(T1, DATA as i32),
        add(T1, T1, T0),
        addi(A0, ZERO, 0),
        addi(A1, ZERO, 100),
        add(A0, A0, A1),
        addi(A1, A1, -1),
        bne(A1, ZERO, -8),
        sd(A0, T1, 0),
        ecall(),
    ]
}

#[test]
fn harts_share_one_cache() {
    let single = Machine::new();
    single.load(CODE, &sum_program());
    run_to_ecall(&mut single.hart(CODE));
    let expected_translations = single.engine.stats().translations;

    let m = Machine::new();
    m.load(CODE, &sum_program());
    let harts: Vec<_> = (0..4)
        .map(|id| {
            let mut cpu = m.hart_with(id, CODE, INTERCEPT_ECALL);
            thread::spawn(move || run_to_ecall(&mut cpu))
        })
        .collect();
    for h in harts {
        assert_eq!(h.join().unwrap(), CODE + 40);
    }
    for id in 0..4 {
        assert_eq!(m.read_u64(DATA + 8 * id), 5050);
    }
    assert_eq!(m.engine.stats().translations, expected_translations);
}

#[test]
fn concurrent_invalidation_is_safe() {
    let m = Machine::new();
    m.load(CODE, &block_chain(64));
    let engine = m.engine.clone();
    let harts: Vec<_> = (0..3)
        .map(|id| {
            let mut cpu = m.hart_with(id, CODE, INTERCEPT_ECALL);
            thread::spawn(move || {
                for round in 1..=20u64 {
                    cpu.cpu_mut().set_pc(CODE);
                    cpu.cpu_mut().set_gpr(A0 as usize, 0);
                    run_to_ecall(&mut cpu);
                    assert_eq!(cpu.cpu().gpr(A0 as usize), 64, "round {round}");
                }
            })
        })
        .collect();
    for _ in 0..50 {
        engine.invalidate(CODE, 64 * 8);
        thread::yield_now();
    }
    engine.flush_all();
    for h in harts {
        h.join().unwrap();
    }
}
