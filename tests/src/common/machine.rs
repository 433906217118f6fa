//! A single address space with RAM at 0 and a RISC-V engine on top.

#![allow(dead_code)]

use std::sync::Arc;

use xlat_core::GuestException;
use xlat_exec::{Engine, EngineConfig, ExitReason, VCpu, VCpuConfig};
use xlat_frontend::riscv::cpu::{EXCP_ECALL_M, EXCP_ECALL_U};
use xlat_frontend::riscv::RiscvCpu;
use xlat_mmu::AddressSpace;

pub const RAM_SIZE: u64 = 0x10_0000;
/// Default entry point of test programs.
pub const CODE: u64 = 0x1000;
/// Scratch data, on a page of its own.
pub const DATA: u64 = 0x8000;

/// `ecall` from either mode returns control to the test.
pub const INTERCEPT_ECALL: u64 = (1 << EXCP_ECALL_M) | (1 << EXCP_ECALL_U);

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Engine config sized for tests: a small buffer and short blocks
/// are enough for hand-written programs.
pub fn small_config() -> EngineConfig {
    EngineConfig {
        code_buffer_size: 1 << 20,
        code_regions: 4,
        max_tbs: 1024,
        max_insns_per_tb: 64,
        tlb_bits: 6,
    }
}

pub struct Machine {
    pub engine: Engine<RiscvCpu>,
}

impl Machine {
    pub fn new() -> Self {
        Self::with_config(small_config())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        init_logger();
        let space = Arc::new(AddressSpace::identity());
        space.add_ram(0, RAM_SIZE).unwrap();
        let engine = Engine::with_tci(config, space).unwrap();
        Self { engine }
    }

    pub fn space(&self) -> &Arc<AddressSpace> {
        self.engine.space()
    }

    /// Write instruction words at `addr`.
    pub fn load(&self, addr: u64, prog: &[u32]) {
        let bytes: Vec<u8> = prog.iter().flat_map(|i| i.to_le_bytes()).collect();
        self.space().write_phys(addr, &bytes).unwrap();
    }

    pub fn write_u64(&self, addr: u64, val: u64) {
        self.space().write_phys(addr, &val.to_le_bytes()).unwrap();
    }

    pub fn read_u64(&self, addr: u64) -> u64 {
        let mut b = [0u8; 8];
        self.space().read_phys(addr, &mut b).unwrap();
        u64::from_le_bytes(b)
    }

    pub fn read_u32(&self, addr: u64) -> u32 {
        let mut b = [0u8; 4];
        self.space().read_phys(addr, &mut b).unwrap();
        u32::from_le_bytes(b)
    }

    /// Hart 0 in M-mode at `pc`, returning on `ecall`.
    pub fn hart(&self, pc: u64) -> VCpu<RiscvCpu> {
        self.hart_with(0, pc, INTERCEPT_ECALL)
    }

    pub fn hart_with(&self, hart_id: u64, pc: u64, intercept: u64) -> VCpu<RiscvCpu> {
        self.engine.create_vcpu(
            RiscvCpu::rv64(hart_id, pc),
            VCpuConfig { hart_id, intercept },
        )
    }
}

/// Run until an intercepted exception and return its cause and pc.
pub fn run_to_exception(vcpu: &mut VCpu<RiscvCpu>) -> (u32, u64) {
    match vcpu.run() {
        ExitReason::Exception {
            excp: GuestException::Trap { cause, .. },
            pc,
        } => (cause, pc),
        ExitReason::Exception {
            excp: GuestException::Mem(f),
            pc,
        } => (
            xlat_frontend::riscv::cpu::mem_fault_cause(f.access, f.kind),
            pc,
        ),
        other => panic!("unexpected exit {other:?}"),
    }
}

/// Run until the program's terminating `ecall`; returns its pc.
pub fn run_to_ecall(vcpu: &mut VCpu<RiscvCpu>) -> u64 {
    let (cause, pc) = run_to_exception(vcpu);
    assert!(
        cause == EXCP_ECALL_M || cause == EXCP_ECALL_U,
        "stopped with cause {cause} at {pc:#x}"
    );
    pc
}
