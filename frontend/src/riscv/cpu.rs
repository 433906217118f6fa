//! RISC-V hart state and its `GuestCpu` implementation.

use std::mem::offset_of;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use xlat_core::{
    AccessKind, BlockInfo, CodeFetch, Context, FaultKind, GuestCpu, GuestException, HelperInfo,
};

use super::csr::{MSTATUS_MIE, MSTATUS_MPIE, MSTATUS_MPP_SHIFT, MSTATUS_MPP};
use super::ext::RiscvCfg;
use super::helpers::HELPERS;
use super::{RiscvDisasContext, RiscvTranslator};
use crate::translator_loop;

/// Number of general-purpose registers (x0-x31).
pub const NUM_GPRS: usize = 32;

/// Privilege levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Priv {
    User = 0,
    Machine = 3,
}

impl Priv {
    /// Decode an `mstatus.MPP` value. The reserved encodings read as
    /// U-mode, matching the WARL behavior of the field.
    pub const fn from_bits(v: u64) -> Priv {
        match v & 3 {
            3 => Priv::Machine,
            _ => Priv::User,
        }
    }
}

// Exception causes.
pub const EXCP_INSN_MISALIGNED: u32 = 0;
pub const EXCP_INSN_ACCESS: u32 = 1;
pub const EXCP_ILLEGAL_INSN: u32 = 2;
pub const EXCP_BREAKPOINT: u32 = 3;
pub const EXCP_LOAD_MISALIGNED: u32 = 4;
pub const EXCP_LOAD_ACCESS: u32 = 5;
pub const EXCP_STORE_MISALIGNED: u32 = 6;
pub const EXCP_STORE_ACCESS: u32 = 7;
pub const EXCP_ECALL_U: u32 = 8;
pub const EXCP_ECALL_M: u32 = 11;
pub const EXCP_INSN_PAGE_FAULT: u32 = 12;
pub const EXCP_LOAD_PAGE_FAULT: u32 = 13;
pub const EXCP_STORE_PAGE_FAULT: u32 = 15;

// Interrupt lines, numbered as their `mip`/`mie` bits.
pub const IRQ_M_SOFT: u32 = 3;
pub const IRQ_M_TIMER: u32 = 7;
pub const IRQ_M_EXT: u32 = 11;

/// `mip` bits driven by external interrupt lines.
pub const MIP_EXTERNAL_MASK: u64 = (1 << IRQ_M_SOFT) | (1 << IRQ_M_TIMER) | (1 << IRQ_M_EXT);

/// `mcause` bit flagging an interrupt.
pub const CAUSE_INTERRUPT: u64 = 1 << 63;

/// RISC-V hart architectural state (RV64).
///
/// Layout must be `#[repr(C)]` so that IR globals can reference
/// fields at fixed offsets from the env pointer.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct RiscvEnv {
    /// General-purpose registers x0-x31. x0 is hardwired to zero by
    /// the translator.
    pub gpr: [u64; NUM_GPRS],
    pub pc: u64,
    /// LR reservation address (`u64::MAX` = none).
    pub load_res: u64,
    /// Value loaded by the last LR, compared by SC.
    pub load_val: u64,
    /// Host address of the vCPU's exit-request flag (`AtomicU32`),
    /// polled by generated code at every TB entry.
    pub exit_request: u64,
    /// Current privilege level (`Priv as u64`).
    pub priv_level: u64,
    pub mstatus: u64,
    pub misa: u64,
    pub mie: u64,
    pub mip: u64,
    pub mtvec: u64,
    pub mscratch: u64,
    pub mepc: u64,
    pub mcause: u64,
    pub mtval: u64,
    pub mhartid: u64,
}

/// Byte offset of `gpr[i]`.
pub const fn gpr_offset(i: usize) -> i64 {
    (offset_of!(RiscvEnv, gpr) + i * 8) as i64
}

pub const PC_OFFSET: i64 = offset_of!(RiscvEnv, pc) as i64;
pub const LOAD_RES_OFFSET: i64 = offset_of!(RiscvEnv, load_res) as i64;
pub const LOAD_VAL_OFFSET: i64 = offset_of!(RiscvEnv, load_val) as i64;
pub const EXIT_REQUEST_OFFSET: i64 = offset_of!(RiscvEnv, exit_request) as i64;

impl RiscvEnv {
    pub fn new(cfg: &RiscvCfg, hart_id: u64) -> Self {
        Self {
            gpr: [0; NUM_GPRS],
            pc: 0,
            load_res: u64::MAX,
            load_val: 0,
            exit_request: 0,
            priv_level: Priv::Machine as u64,
            mstatus: 0,
            misa: cfg.misa_csr(),
            mie: 0,
            mip: 0,
            mtvec: 0,
            mscratch: 0,
            mepc: 0,
            mcause: 0,
            mtval: 0,
            mhartid: hart_id,
        }
    }

    pub fn priv_mode(&self) -> Priv {
        Priv::from_bits(self.priv_level)
    }

    /// Enter M-mode trap handling for `cause`, raised at `pc`. Returns
    /// the handler address.
    pub fn trap_entry(&mut self, cause: u64, tval: u64) -> u64 {
        self.mepc = self.pc;
        self.mcause = cause;
        self.mtval = tval;
        let mie = self.mstatus & MSTATUS_MIE != 0;
        self.mstatus &= !(MSTATUS_MPIE | MSTATUS_MIE | MSTATUS_MPP);
        if mie {
            self.mstatus |= MSTATUS_MPIE;
        }
        self.mstatus |= self.priv_level << MSTATUS_MPP_SHIFT;
        self.priv_level = Priv::Machine as u64;
        self.load_res = u64::MAX;

        let base = self.mtvec & !3;
        let vectored = self.mtvec & 3 == 1;
        self.pc = if cause & CAUSE_INTERRUPT != 0 && vectored {
            base.wrapping_add(4 * (cause & !CAUSE_INTERRUPT))
        } else {
            base
        };
        self.pc
    }

    /// Return from an M-mode trap. Returns the resume address.
    pub fn mret(&mut self) -> u64 {
        let mpp = (self.mstatus & MSTATUS_MPP) >> MSTATUS_MPP_SHIFT;
        let mpie = self.mstatus & MSTATUS_MPIE != 0;
        self.mstatus &= !(MSTATUS_MIE | MSTATUS_MPP);
        if mpie {
            self.mstatus |= MSTATUS_MIE;
        }
        self.mstatus |= MSTATUS_MPIE;
        self.priv_level = Priv::from_bits(mpp) as u64;
        self.load_res = u64::MAX;
        self.mepc
    }
}

/// Cause code of a memory fault.
pub fn mem_fault_cause(access: AccessKind, kind: FaultKind) -> u32 {
    match (kind, access) {
        (FaultKind::Misaligned, AccessKind::Read) => EXCP_LOAD_MISALIGNED,
        (FaultKind::Misaligned, AccessKind::Write) => EXCP_STORE_MISALIGNED,
        (FaultKind::Misaligned, AccessKind::Execute) => EXCP_INSN_MISALIGNED,
        (FaultKind::PageFault | FaultKind::Permission, AccessKind::Read) => EXCP_LOAD_PAGE_FAULT,
        (FaultKind::PageFault | FaultKind::Permission, AccessKind::Write) => {
            EXCP_STORE_PAGE_FAULT
        }
        (FaultKind::PageFault | FaultKind::Permission, AccessKind::Execute) => {
            EXCP_INSN_PAGE_FAULT
        }
        (FaultKind::Unmapped | FaultKind::Unsupported, AccessKind::Read) => EXCP_LOAD_ACCESS,
        (FaultKind::Unmapped | FaultKind::Unsupported, AccessKind::Write) => EXCP_STORE_ACCESS,
        (FaultKind::Unmapped | FaultKind::Unsupported, AccessKind::Execute) => EXCP_INSN_ACCESS,
    }
}

/// A RISC-V hart.
pub struct RiscvCpu {
    env: Box<RiscvEnv>,
    cfg: RiscvCfg,
    /// Keeps the flag addressed by `env.exit_request` alive.
    exit_request: Option<Arc<AtomicU32>>,
}

impl RiscvCpu {
    pub fn new(cfg: RiscvCfg, hart_id: u64) -> Self {
        Self {
            env: Box::new(RiscvEnv::new(&cfg, hart_id)),
            cfg,
            exit_request: None,
        }
    }

    /// RV64IMA hart starting in M-mode at `pc`.
    pub fn rv64(hart_id: u64, pc: u64) -> Self {
        let mut cpu = Self::new(RiscvCfg::RV64IMA, hart_id);
        cpu.env.pc = pc;
        cpu
    }

    pub fn env(&self) -> &RiscvEnv {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut RiscvEnv {
        &mut self.env
    }

    pub fn cfg(&self) -> &RiscvCfg {
        &self.cfg
    }

    pub fn gpr(&self, i: usize) -> u64 {
        if i == 0 {
            0
        } else {
            self.env.gpr[i]
        }
    }

    pub fn set_gpr(&mut self, i: usize, val: u64) {
        if i != 0 {
            self.env.gpr[i] = val;
        }
    }

    pub fn priv_mode(&self) -> Priv {
        self.env.priv_mode()
    }

    pub fn set_priv(&mut self, p: Priv) {
        self.env.priv_level = p as u64;
    }

    /// Highest-priority interrupt that is pending, enabled in `mie`
    /// and globally enabled for the current privilege level.
    fn pending_irq(&self) -> Option<u32> {
        let pending = self.env.mip & self.env.mie;
        if pending == 0 {
            return None;
        }
        let enabled =
            self.priv_mode() < Priv::Machine || self.env.mstatus & MSTATUS_MIE != 0;
        if !enabled {
            return None;
        }
        [IRQ_M_EXT, IRQ_M_SOFT, IRQ_M_TIMER]
            .into_iter()
            .find(|&n| pending & (1 << n) != 0)
    }
}

impl std::fmt::Debug for RiscvCpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiscvCpu")
            .field("pc", &format_args!("{:#x}", self.env.pc))
            .field("priv", &self.priv_mode())
            .field("hart", &self.env.mhartid)
            .finish()
    }
}

impl GuestCpu for RiscvCpu {
    fn get_pc(&self) -> u64 {
        self.env.pc
    }

    fn set_pc(&mut self, pc: u64) {
        self.env.pc = pc;
    }

    fn get_flags(&self) -> u32 {
        self.env.priv_level as u32
    }

    fn mmu_index(&self) -> usize {
        self.env.priv_level as usize
    }

    fn env_ptr(&mut self) -> *mut u8 {
        &mut *self.env as *mut RiscvEnv as *mut u8
    }

    fn gen_code(
        &mut self,
        ir: &mut Context,
        pc: u64,
        flags: u32,
        max_insns: u32,
        fetch: &mut dyn CodeFetch,
    ) -> BlockInfo {
        let mut ctx = RiscvDisasContext::new(pc, flags, max_insns, self.cfg);
        translator_loop::<RiscvTranslator>(&mut ctx, ir, fetch)
    }

    fn helpers(&self) -> &'static [HelperInfo] {
        &HELPERS
    }

    fn bind_exit_request(&mut self, flag: Arc<AtomicU32>) {
        self.env.exit_request = Arc::as_ptr(&flag) as u64;
        self.exit_request = Some(flag);
    }

    fn exception_cause(&self, excp: &GuestException) -> u32 {
        match *excp {
            GuestException::Mem(f) => mem_fault_cause(f.access, f.kind),
            GuestException::Trap { cause, .. } => cause,
        }
    }

    fn do_exception(&mut self, excp: GuestException) {
        let cause = self.exception_cause(&excp) as u64;
        let tval = match excp {
            GuestException::Mem(f) => f.addr,
            GuestException::Trap { tval, .. } => tval,
        };
        self.env.trap_entry(cause, tval);
    }

    fn set_pending_interrupts(&mut self, lines: u64) {
        self.env.mip = (self.env.mip & !MIP_EXTERNAL_MASK) | (lines & MIP_EXTERNAL_MASK);
    }

    fn exec_interrupt(&mut self) -> bool {
        match self.pending_irq() {
            Some(n) => {
                self.env.trap_entry(CAUSE_INTERRUPT | n as u64, 0);
                true
            }
            None => false,
        }
    }

    fn has_work(&self) -> bool {
        self.env.mip & self.env.mie != 0
    }
}
