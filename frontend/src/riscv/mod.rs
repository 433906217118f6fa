//! RISC-V front end: RV64IMA + Zicsr + Zifencei with M and U modes.

pub mod cpu;
pub mod csr;
pub mod decode;
pub mod ext;
pub mod helpers;
mod trans;

use xlat_core::{CodeFetch, Context, GuestException, TempIdx, Type, TB_EXIT_NOCHAIN, TB_EXIT_REQUESTED};

use crate::{DisasContextBase, DisasJumpType, TranslatorOps};
use cpu::{
    gpr_offset, mem_fault_cause, Priv, EXIT_REQUEST_OFFSET, LOAD_RES_OFFSET, LOAD_VAL_OFFSET,
    NUM_GPRS, PC_OFFSET,
};
use ext::RiscvCfg;

pub use cpu::{RiscvCpu, RiscvEnv};

/// ABI names of x0-x31, used as global names in IR dumps.
const GPR_NAMES: [&str; NUM_GPRS] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4",
    "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4",
    "t5", "t6",
];

/// IR globals backing the hart state translated code touches directly.
#[derive(Debug, Clone, Copy)]
pub struct RiscvGlobals {
    pub gpr: [TempIdx; NUM_GPRS],
    pub pc: TempIdx,
    pub load_res: TempIdx,
    pub load_val: TempIdx,
}

impl RiscvGlobals {
    /// Register the globals in `ir`, or find them if an earlier block
    /// already did. Globals survive `Context::reset`.
    pub fn bind(ir: &mut Context) -> Self {
        let first = ir
            .globals()
            .iter()
            .position(|t| t.name == Some(GPR_NAMES[0]));
        if let Some(first) = first {
            let at = |i: usize| TempIdx((first + i) as u32);
            return Self {
                gpr: std::array::from_fn(at),
                pc: at(NUM_GPRS),
                load_res: at(NUM_GPRS + 1),
                load_val: at(NUM_GPRS + 2),
            };
        }

        let env = ir.env();
        let gpr = std::array::from_fn(|i| ir.new_global(Type::I64, env, gpr_offset(i), GPR_NAMES[i]));
        Self {
            gpr,
            pc: ir.new_global(Type::I64, env, PC_OFFSET, "pc"),
            load_res: ir.new_global(Type::I64, env, LOAD_RES_OFFSET, "load_res"),
            load_val: ir.new_global(Type::I64, env, LOAD_VAL_OFFSET, "load_val"),
        }
    }
}

// ---------------------------------------------------------------
// Disassembly context
// ---------------------------------------------------------------

/// RISC-V disassembly context (extends `DisasContextBase`).
pub struct RiscvDisasContext {
    /// Generic base fields (pc, is_jmp, counters).
    pub base: DisasContextBase,
    pub cfg: RiscvCfg,
    /// Privilege level the block is translated for.
    pub priv_mode: Priv,
    /// IR temp for the env pointer.
    pub env: TempIdx,
    pub g: RiscvGlobals,
    /// Raw instruction word being decoded.
    pub opcode: u32,
    /// Label of the exit-request path, bound in `tb_stop`.
    exit_label: u32,
}

impl RiscvDisasContext {
    /// Create a context for translating a TB starting at `pc` in the
    /// mode encoded by `flags`.
    pub fn new(pc: u64, flags: u32, max_insns: u32, cfg: RiscvCfg) -> Self {
        Self {
            base: DisasContextBase::new(pc, max_insns),
            cfg,
            priv_mode: Priv::from_bits(flags as u64),
            env: TempIdx(0),
            g: RiscvGlobals {
                gpr: [TempIdx(0); NUM_GPRS],
                pc: TempIdx(0),
                load_res: TempIdx(0),
                load_val: TempIdx(0),
            },
            opcode: 0,
            exit_label: 0,
        }
    }

    /// MMU index for data accesses in the translated mode.
    pub fn mem_idx(&self) -> u32 {
        self.priv_mode as u32
    }
}

// ---------------------------------------------------------------
// TranslatorOps implementation
// ---------------------------------------------------------------

/// Marker type for the RISC-V translator.
pub struct RiscvTranslator;

impl TranslatorOps for RiscvTranslator {
    type DisasContext = RiscvDisasContext;

    fn init_disas_context(ctx: &mut RiscvDisasContext, ir: &mut Context) {
        ctx.env = ir.env();
        ctx.g = RiscvGlobals::bind(ir);
    }

    /// Poll the exit-request flag so chained blocks still observe
    /// kicks.
    fn tb_start(ctx: &mut RiscvDisasContext, ir: &mut Context) {
        ctx.exit_label = ir.new_label();
        let ptr = ir.new_temp(Type::I64);
        ir.gen_ld(Type::I64, ptr, ctx.env, EXIT_REQUEST_OFFSET);
        let flag = ir.new_temp(Type::I32);
        ir.gen_ld32u(Type::I32, flag, ptr, 0);
        let zero = ir.new_const(Type::I32, 0);
        ir.gen_brcond(Type::I32, flag, zero, xlat_core::Cond::Ne, ctx.exit_label);
    }

    fn insn_start(ctx: &mut RiscvDisasContext, ir: &mut Context) {
        ir.gen_insn_start(ctx.base.pc_next);
        ctx.base.num_insns += 1;
    }

    fn translate_insn(ctx: &mut RiscvDisasContext, ir: &mut Context, fetch: &mut dyn CodeFetch) {
        let pc = ctx.base.pc_next;
        let insn = match fetch.fetch_u32(pc) {
            Ok(insn) => insn,
            Err(excp) if ctx.base.num_insns > 1 => {
                // Leave the fault to the lookup of `pc` itself.
                log::trace!("fetch at {pc:#x} failed ({excp}), closing block");
                ctx.base.num_insns -= 1;
                ctx.base.is_jmp = DisasJumpType::FetchFault;
                return;
            }
            Err(excp) => {
                let (cause, tval) = match excp {
                    GuestException::Mem(f) => (mem_fault_cause(f.access, f.kind), f.addr),
                    GuestException::Trap { cause, tval } => (cause, tval),
                };
                ir.gen_trap(cause, tval);
                ctx.base.pc_next += 4;
                ctx.base.is_jmp = DisasJumpType::NoReturn;
                return;
            }
        };

        ctx.opcode = insn;
        if !decode::decode(ctx, ir, insn) {
            ctx.gen_illegal(ir);
        }
        ctx.base.pc_next += 4;
    }

    fn tb_stop(ctx: &mut RiscvDisasContext, ir: &mut Context) {
        match ctx.base.is_jmp {
            DisasJumpType::NoReturn => {}
            DisasJumpType::Next | DisasJumpType::TooMany => {
                let next = ctx.base.pc_next;
                ctx.gen_goto_tb(ir, 0, next);
            }
            DisasJumpType::FetchFault => {
                let next = ir.new_const(Type::I64, ctx.base.pc_next);
                ir.gen_mov(Type::I64, ctx.g.pc, next);
                ir.gen_exit_tb(TB_EXIT_NOCHAIN);
            }
        }
        ir.gen_set_label(ctx.exit_label);
        ir.gen_exit_tb(TB_EXIT_REQUESTED);
    }

    fn base(ctx: &RiscvDisasContext) -> &DisasContextBase {
        &ctx.base
    }

    fn base_mut(ctx: &mut RiscvDisasContext) -> &mut DisasContextBase {
        &mut ctx.base
    }
}
