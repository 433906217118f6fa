//! RISC-V instruction translation: IR generation.
//!
//! Repetitive translation logic is factored into gen_arith,
//! gen_arith_imm, gen_shift_imm, gen_shiftw, gen_load, ..., each
//! parameterised by a `BinOp` function pointer or a `MemOp`.

use xlat_core::{
    AtomicOp, Cond, Context, MemOp, MemOpIdx, TempIdx, Type, TB_EXIT_HALT, TB_EXIT_NOCHAIN,
};

use super::cpu::{
    Priv, EXCP_BREAKPOINT, EXCP_ECALL_M, EXCP_ECALL_U, EXCP_ILLEGAL_INSN, EXCP_INSN_MISALIGNED,
};
use super::csr::CsrAccess;
use super::decode::*;
use super::ext::MisaExt;
use super::helpers::{HELPERS, HELPER_CSRRW, HELPER_MRET, HELPER_RAISE};
use super::RiscvDisasContext;
use crate::DisasJumpType;

/// Binary IR operation: `fn(ir, ty, dst, lhs, rhs) -> dst`.
type BinOp = fn(&mut Context, Type, TempIdx, TempIdx, TempIdx) -> TempIdx;

/// Full barrier argument of `mb`.
const MB_ALL: u32 = 0xf;

// ── Helpers ────────────────────────────────────────────────────

impl RiscvDisasContext {
    // -- GPR access ----------------------------------------

    /// Read GPR `idx`; x0 yields a constant zero.
    fn gpr_or_zero(&self, ir: &mut Context, idx: i64) -> TempIdx {
        if idx == 0 {
            ir.new_const(Type::I64, 0)
        } else {
            self.g.gpr[idx as usize]
        }
    }

    /// Write `val` into GPR `rd`; writes to x0 discarded.
    fn gen_set_gpr(&self, ir: &mut Context, rd: i64, val: TempIdx) {
        if rd != 0 {
            ir.gen_mov(Type::I64, self.g.gpr[rd as usize], val);
        }
    }

    /// Sign-extend a 32-bit value into a 64-bit GPR.
    fn gen_set_gpr_sx32(&self, ir: &mut Context, rd: i64, val: TempIdx) {
        if rd != 0 {
            ir.gen_ext_i32_i64(self.g.gpr[rd as usize], val);
        }
    }

    fn gen_set_pc(&self, ir: &mut Context, pc: u64) {
        let c = ir.new_const(Type::I64, pc);
        ir.gen_mov(Type::I64, self.g.pc, c);
    }

    fn has_ext(&self, ext: MisaExt) -> bool {
        self.cfg.misa.contains(ext)
    }

    // -- Block exits ---------------------------------------

    /// Leave the block for `dest`. Same-page targets go through
    /// patchable slot `n`; others exit unchained.
    pub(super) fn gen_goto_tb(&self, ir: &mut Context, n: u32, dest: u64) {
        if self.base.same_page(dest) {
            ir.gen_goto_tb(n);
            self.gen_set_pc(ir, dest);
            ir.gen_exit_tb(n);
        } else {
            self.gen_set_pc(ir, dest);
            ir.gen_exit_tb(TB_EXIT_NOCHAIN);
        }
    }

    /// Jump to a constant target, trapping if it is misaligned.
    fn gen_jump_to(&self, ir: &mut Context, n: u32, dest: u64) {
        if dest & 3 != 0 {
            ir.gen_trap(EXCP_INSN_MISALIGNED, dest);
        } else {
            self.gen_goto_tb(ir, n, dest);
        }
    }

    /// End the block after the current instruction and return to
    /// the execution loop, so state changes are observed before the
    /// next instruction runs.
    fn gen_exit_next(&mut self, ir: &mut Context) {
        self.gen_set_pc(ir, self.base.pc_next + 4);
        ir.gen_exit_tb(TB_EXIT_NOCHAIN);
        self.base.is_jmp = DisasJumpType::NoReturn;
    }

    fn gen_exception(&mut self, ir: &mut Context, cause: u32, tval: u64) {
        ir.gen_trap(cause, tval);
        self.base.is_jmp = DisasJumpType::NoReturn;
    }

    pub(super) fn gen_illegal(&mut self, ir: &mut Context) {
        self.gen_exception(ir, EXCP_ILLEGAL_INSN, self.opcode as u64);
    }

    // -- R-type helpers ------------------------------------

    /// R-type ALU: `rd = op(rs1, rs2)`.
    fn gen_arith(&self, ir: &mut Context, a: &ArgsR, op: BinOp) -> bool {
        let s1 = self.gpr_or_zero(ir, a.rs1);
        let s2 = self.gpr_or_zero(ir, a.rs2);
        let d = ir.new_temp(Type::I64);
        op(ir, Type::I64, d, s1, s2);
        self.gen_set_gpr(ir, a.rd, d);
        true
    }

    /// R-type setcond: `rd = (rs1 cond rs2) ? 1 : 0`.
    fn gen_setcond_rr(&self, ir: &mut Context, a: &ArgsR, cond: Cond) -> bool {
        let s1 = self.gpr_or_zero(ir, a.rs1);
        let s2 = self.gpr_or_zero(ir, a.rs2);
        let d = ir.new_temp(Type::I64);
        ir.gen_setcond(Type::I64, d, s1, s2, cond);
        self.gen_set_gpr(ir, a.rd, d);
        true
    }

    // -- I-type helpers ------------------------------------

    /// I-type ALU: `rd = op(rs1, sext(imm))`.
    fn gen_arith_imm(&self, ir: &mut Context, a: &ArgsI, op: BinOp) -> bool {
        let src = self.gpr_or_zero(ir, a.rs1);
        let imm = ir.new_const(Type::I64, a.imm as u64);
        let d = ir.new_temp(Type::I64);
        op(ir, Type::I64, d, src, imm);
        self.gen_set_gpr(ir, a.rd, d);
        true
    }

    /// I-type setcond: `rd = (rs1 cond imm) ? 1 : 0`.
    fn gen_setcond_imm(&self, ir: &mut Context, a: &ArgsI, cond: Cond) -> bool {
        let src = self.gpr_or_zero(ir, a.rs1);
        let imm = ir.new_const(Type::I64, a.imm as u64);
        let d = ir.new_temp(Type::I64);
        ir.gen_setcond(Type::I64, d, src, imm, cond);
        self.gen_set_gpr(ir, a.rd, d);
        true
    }

    // -- Shift helpers -------------------------------------

    /// Shift immediate: `rd = op(rs1, shamt)`.
    fn gen_shift_imm(&self, ir: &mut Context, a: &ArgsShift, op: BinOp) -> bool {
        let src = self.gpr_or_zero(ir, a.rs1);
        let sh = ir.new_const(Type::I64, a.shamt as u64);
        let d = ir.new_temp(Type::I64);
        op(ir, Type::I64, d, src, sh);
        self.gen_set_gpr(ir, a.rd, d);
        true
    }

    // -- W-suffix helpers (RV64) ---------------------------

    /// R-type W: `rd = sext32(op(rs1, rs2))`.
    fn gen_arith_w(&self, ir: &mut Context, a: &ArgsR, op: BinOp) -> bool {
        let s1 = self.gpr_or_zero(ir, a.rs1);
        let s2 = self.gpr_or_zero(ir, a.rs2);
        let d = ir.new_temp(Type::I64);
        op(ir, Type::I64, d, s1, s2);
        let d32 = ir.new_temp(Type::I32);
        ir.gen_extrl_i64_i32(d32, d);
        self.gen_set_gpr_sx32(ir, a.rd, d32);
        true
    }

    /// I-type W: `rd = sext32(op(rs1, imm))`.
    fn gen_arith_imm_w(&self, ir: &mut Context, a: &ArgsI, op: BinOp) -> bool {
        let src = self.gpr_or_zero(ir, a.rs1);
        let imm = ir.new_const(Type::I64, a.imm as u64);
        let d = ir.new_temp(Type::I64);
        op(ir, Type::I64, d, src, imm);
        let d32 = ir.new_temp(Type::I32);
        ir.gen_extrl_i64_i32(d32, d);
        self.gen_set_gpr_sx32(ir, a.rd, d32);
        true
    }

    /// R-type W on 32-bit operands: truncate, `op` as I32, sext.
    /// Used for shifts, multiplies and divides.
    fn gen_op32(&self, ir: &mut Context, a: &ArgsR, op: BinOp) -> bool {
        let s1 = self.gpr_or_zero(ir, a.rs1);
        let s2 = self.gpr_or_zero(ir, a.rs2);
        let a32 = ir.new_temp(Type::I32);
        ir.gen_extrl_i64_i32(a32, s1);
        let b32 = ir.new_temp(Type::I32);
        ir.gen_extrl_i64_i32(b32, s2);
        let d32 = ir.new_temp(Type::I32);
        op(ir, Type::I32, d32, a32, b32);
        self.gen_set_gpr_sx32(ir, a.rd, d32);
        true
    }

    /// Shift immediate W: truncate to I32, shift, sext.
    fn gen_shift_imm_w(&self, ir: &mut Context, a: &ArgsShift, op: BinOp) -> bool {
        let src = self.gpr_or_zero(ir, a.rs1);
        let s32 = ir.new_temp(Type::I32);
        ir.gen_extrl_i64_i32(s32, src);
        let sh = ir.new_const(Type::I32, a.shamt as u64);
        let d32 = ir.new_temp(Type::I32);
        op(ir, Type::I32, d32, s32, sh);
        self.gen_set_gpr_sx32(ir, a.rd, d32);
        true
    }

    // -- Memory helpers ------------------------------------

    fn gen_addr(&self, ir: &mut Context, rs1: i64, imm: i64) -> TempIdx {
        let base = self.gpr_or_zero(ir, rs1);
        if imm == 0 {
            return base;
        }
        let off = ir.new_const(Type::I64, imm as u64);
        let addr = ir.new_temp(Type::I64);
        ir.gen_add(Type::I64, addr, base, off)
    }

    fn oi(&self, memop: MemOp) -> MemOpIdx {
        MemOpIdx::new(memop, self.mem_idx())
    }

    /// `rd = mem[rs1 + imm]`, extended per `memop`.
    fn gen_load(&self, ir: &mut Context, a: &ArgsI, memop: MemOp) -> bool {
        let addr = self.gen_addr(ir, a.rs1, a.imm);
        let d = ir.new_temp(Type::I64);
        ir.gen_qemu_ld(Type::I64, d, addr, self.oi(memop));
        self.gen_set_gpr(ir, a.rd, d);
        true
    }

    /// `mem[rs1 + imm] = rs2`, truncated per `memop`.
    fn gen_store(&self, ir: &mut Context, a: &ArgsS, memop: MemOp) -> bool {
        let addr = self.gen_addr(ir, a.rs1, a.imm);
        let val = self.gpr_or_zero(ir, a.rs2);
        ir.gen_qemu_st(Type::I64, val, addr, self.oi(memop));
        true
    }

    fn atomic_memop(wide: bool) -> MemOp {
        let m = if wide { MemOp::uq() } else { MemOp::sl() };
        m.with(MemOp::ALIGN)
    }

    // -- Atomic helpers ------------------------------------

    fn gen_lr(&self, ir: &mut Context, a: &ArgsAtomic, wide: bool) -> bool {
        if !self.has_ext(MisaExt::A) {
            return false;
        }
        let addr = self.gpr_or_zero(ir, a.rs1);
        let d = ir.new_temp(Type::I64);
        ir.gen_qemu_ld(Type::I64, d, addr, self.oi(Self::atomic_memop(wide)));
        ir.gen_mov(Type::I64, self.g.load_res, addr);
        ir.gen_mov(Type::I64, self.g.load_val, d);
        self.gen_set_gpr(ir, a.rd, d);
        true
    }

    fn gen_sc(&self, ir: &mut Context, a: &ArgsAtomic, wide: bool) -> bool {
        if !self.has_ext(MisaExt::A) {
            return false;
        }
        let addr = self.gpr_or_zero(ir, a.rs1);
        let fail = ir.new_label();
        let done = ir.new_label();
        ir.gen_brcond(Type::I64, self.g.load_res, addr, Cond::Ne, fail);

        // Succeeds iff memory still holds the value LR observed.
        let src = self.gpr_or_zero(ir, a.rs2);
        let old = ir.new_temp(Type::I64);
        ir.gen_atomic_cmpxchg(
            Type::I64,
            old,
            addr,
            self.g.load_val,
            src,
            self.oi(Self::atomic_memop(wide)),
        );
        let res = ir.new_temp(Type::I64);
        ir.gen_setcond(Type::I64, res, old, self.g.load_val, Cond::Ne);
        self.gen_set_gpr(ir, a.rd, res);
        ir.gen_br(done);

        ir.gen_set_label(fail);
        let one = ir.new_const(Type::I64, 1);
        self.gen_set_gpr(ir, a.rd, one);

        ir.gen_set_label(done);
        let none = ir.new_const(Type::I64, u64::MAX);
        ir.gen_mov(Type::I64, self.g.load_res, none);
        true
    }

    fn gen_amo(&self, ir: &mut Context, a: &ArgsAtomic, wide: bool, op: AtomicOp) -> bool {
        if !self.has_ext(MisaExt::A) {
            return false;
        }
        let addr = self.gpr_or_zero(ir, a.rs1);
        let src = self.gpr_or_zero(ir, a.rs2);
        let d = ir.new_temp(Type::I64);
        ir.gen_atomic_rmw(Type::I64, d, addr, src, self.oi(Self::atomic_memop(wide)), op);
        self.gen_set_gpr(ir, a.rd, d);
        true
    }

    // -- CSR helper ----------------------------------------

    /// `rd = csr; csr = op(csr, src)`, where `src` is rs1 or, for the
    /// `*i` forms, the 5-bit immediate in the rs1 field. Set and clear
    /// with a zero source only read.
    fn gen_csr(&mut self, ir: &mut Context, a: &ArgsCsr, op: CsrAccess, imm: bool) -> bool {
        if !self.cfg.ext_zicsr {
            return false;
        }
        let src = if imm {
            ir.new_const(Type::I64, a.rs1 as u64)
        } else {
            self.gpr_or_zero(ir, a.rs1)
        };
        let access = match op {
            CsrAccess::Set | CsrAccess::Clear if a.rs1 == 0 => CsrAccess::Read,
            op => op,
        };
        let csr = ir.new_const(Type::I64, a.csr as u64);
        let access = ir.new_const(Type::I64, access as u64);
        let insn = ir.new_const(Type::I64, self.opcode as u64);
        let d = ir.new_temp(Type::I64);
        let flags = HELPERS[HELPER_CSRRW as usize].flags;
        ir.gen_call(d, HELPER_CSRRW, flags, &[csr, src, access, insn]);
        self.gen_set_gpr(ir, a.rd, d);
        // Interrupt enables may have changed.
        self.gen_exit_next(ir);
        true
    }

    // -- Branch helper -------------------------------------

    /// Conditional branch that terminates the TB.
    fn gen_branch(&mut self, ir: &mut Context, a: &ArgsB, cond: Cond) -> bool {
        let src1 = self.gpr_or_zero(ir, a.rs1);
        let src2 = self.gpr_or_zero(ir, a.rs2);

        let taken = ir.new_label();
        ir.gen_brcond(Type::I64, src1, src2, cond, taken);

        // Not taken: fall through to the next insn.
        self.gen_goto_tb(ir, 0, self.base.pc_next + 4);

        ir.gen_set_label(taken);
        let target = (self.base.pc_next as i64).wrapping_add(a.imm) as u64;
        self.gen_jump_to(ir, 1, target);

        self.base.is_jmp = DisasJumpType::NoReturn;
        true
    }

    // -- Multiply helpers ----------------------------------

    /// `d = high64(signed a * unsigned b)`.
    fn gen_mulhsu(ir: &mut Context, ty: Type, d: TempIdx, a: TempIdx, b: TempIdx) -> TempIdx {
        let hi = ir.new_temp(ty);
        ir.gen_muluh(ty, hi, a, b);
        let sign = ir.new_temp(ty);
        let sh = ir.new_const(ty, (ty.size_bits() - 1) as u64);
        ir.gen_sar(ty, sign, a, sh);
        ir.gen_and(ty, sign, sign, b);
        ir.gen_sub(ty, d, hi, sign)
    }
}

// ── Decode trait implementation ────────────────────────────────

impl Decode<Context> for RiscvDisasContext {
    // ── RV64I: Upper immediate ─────────────────────────

    fn trans_lui(&mut self, ir: &mut Context, a: &ArgsU) -> bool {
        let c = ir.new_const(Type::I64, a.imm as u64);
        self.gen_set_gpr(ir, a.rd, c);
        true
    }

    fn trans_auipc(&mut self, ir: &mut Context, a: &ArgsU) -> bool {
        let v = (self.base.pc_next as i64).wrapping_add(a.imm) as u64;
        let c = ir.new_const(Type::I64, v);
        self.gen_set_gpr(ir, a.rd, c);
        true
    }

    // ── RV64I: Jumps ───────────────────────────────────

    fn trans_jal(&mut self, ir: &mut Context, a: &ArgsJ) -> bool {
        let target = (self.base.pc_next as i64).wrapping_add(a.imm) as u64;
        if target & 3 != 0 {
            self.gen_exception(ir, EXCP_INSN_MISALIGNED, target);
            return true;
        }
        let link = ir.new_const(Type::I64, self.base.pc_next + 4);
        self.gen_set_gpr(ir, a.rd, link);
        self.gen_goto_tb(ir, 0, target);
        self.base.is_jmp = DisasJumpType::NoReturn;
        true
    }

    fn trans_jalr(&mut self, ir: &mut Context, a: &ArgsI) -> bool {
        // Computed before rd is written: rd may equal rs1.
        let target = ir.new_temp_tb(Type::I64);
        let src = self.gpr_or_zero(ir, a.rs1);
        let imm = ir.new_const(Type::I64, a.imm as u64);
        ir.gen_add(Type::I64, target, src, imm);
        let mask = ir.new_const(Type::I64, !1u64);
        ir.gen_and(Type::I64, target, target, mask);

        let aligned = ir.new_label();
        let low = ir.new_temp(Type::I64);
        let two = ir.new_const(Type::I64, 2);
        ir.gen_and(Type::I64, low, target, two);
        let zero = ir.new_const(Type::I64, 0);
        ir.gen_brcond(Type::I64, low, zero, Cond::Eq, aligned);
        let cause = ir.new_const(Type::I64, EXCP_INSN_MISALIGNED as u64);
        let ret = ir.new_temp(Type::I64);
        let flags = HELPERS[HELPER_RAISE as usize].flags;
        ir.gen_call(ret, HELPER_RAISE, flags, &[cause, target]);
        ir.gen_set_label(aligned);

        let link = ir.new_const(Type::I64, self.base.pc_next + 4);
        self.gen_set_gpr(ir, a.rd, link);
        ir.gen_mov(Type::I64, self.g.pc, target);
        ir.gen_exit_tb(TB_EXIT_NOCHAIN);
        self.base.is_jmp = DisasJumpType::NoReturn;
        true
    }

    // ── RV64I: Branches ────────────────────────────────

    fn trans_beq(&mut self, ir: &mut Context, a: &ArgsB) -> bool {
        self.gen_branch(ir, a, Cond::Eq)
    }
    fn trans_bne(&mut self, ir: &mut Context, a: &ArgsB) -> bool {
        self.gen_branch(ir, a, Cond::Ne)
    }
    fn trans_blt(&mut self, ir: &mut Context, a: &ArgsB) -> bool {
        self.gen_branch(ir, a, Cond::Lt)
    }
    fn trans_bge(&mut self, ir: &mut Context, a: &ArgsB) -> bool {
        self.gen_branch(ir, a, Cond::Ge)
    }
    fn trans_bltu(&mut self, ir: &mut Context, a: &ArgsB) -> bool {
        self.gen_branch(ir, a, Cond::Ltu)
    }
    fn trans_bgeu(&mut self, ir: &mut Context, a: &ArgsB) -> bool {
        self.gen_branch(ir, a, Cond::Geu)
    }

    // ── RV64I: Loads ───────────────────────────────────

    fn trans_lb(&mut self, ir: &mut Context, a: &ArgsI) -> bool {
        self.gen_load(ir, a, MemOp::sb())
    }
    fn trans_lh(&mut self, ir: &mut Context, a: &ArgsI) -> bool {
        self.gen_load(ir, a, MemOp::sw())
    }
    fn trans_lw(&mut self, ir: &mut Context, a: &ArgsI) -> bool {
        self.gen_load(ir, a, MemOp::sl())
    }
    fn trans_ld(&mut self, ir: &mut Context, a: &ArgsI) -> bool {
        self.gen_load(ir, a, MemOp::uq())
    }
    fn trans_lbu(&mut self, ir: &mut Context, a: &ArgsI) -> bool {
        self.gen_load(ir, a, MemOp::ub())
    }
    fn trans_lhu(&mut self, ir: &mut Context, a: &ArgsI) -> bool {
        self.gen_load(ir, a, MemOp::uw())
    }
    fn trans_lwu(&mut self, ir: &mut Context, a: &ArgsI) -> bool {
        self.gen_load(ir, a, MemOp::ul())
    }

    // ── RV64I: Stores ──────────────────────────────────

    fn trans_sb(&mut self, ir: &mut Context, a: &ArgsS) -> bool {
        self.gen_store(ir, a, MemOp::ub())
    }
    fn trans_sh(&mut self, ir: &mut Context, a: &ArgsS) -> bool {
        self.gen_store(ir, a, MemOp::uw())
    }
    fn trans_sw(&mut self, ir: &mut Context, a: &ArgsS) -> bool {
        self.gen_store(ir, a, MemOp::ul())
    }
    fn trans_sd(&mut self, ir: &mut Context, a: &ArgsS) -> bool {
        self.gen_store(ir, a, MemOp::uq())
    }

    // ── RV64I: ALU immediate ───────────────────────────

    fn trans_addi(&mut self, ir: &mut Context, a: &ArgsI) -> bool {
        self.gen_arith_imm(ir, a, Context::gen_add)
    }
    fn trans_slti(&mut self, ir: &mut Context, a: &ArgsI) -> bool {
        self.gen_setcond_imm(ir, a, Cond::Lt)
    }
    fn trans_sltiu(&mut self, ir: &mut Context, a: &ArgsI) -> bool {
        self.gen_setcond_imm(ir, a, Cond::Ltu)
    }
    fn trans_xori(&mut self, ir: &mut Context, a: &ArgsI) -> bool {
        self.gen_arith_imm(ir, a, Context::gen_xor)
    }
    fn trans_ori(&mut self, ir: &mut Context, a: &ArgsI) -> bool {
        self.gen_arith_imm(ir, a, Context::gen_or)
    }
    fn trans_andi(&mut self, ir: &mut Context, a: &ArgsI) -> bool {
        self.gen_arith_imm(ir, a, Context::gen_and)
    }

    // ── RV64I: Shift immediate ─────────────────────────

    fn trans_slli(&mut self, ir: &mut Context, a: &ArgsShift) -> bool {
        self.gen_shift_imm(ir, a, Context::gen_shl)
    }
    fn trans_srli(&mut self, ir: &mut Context, a: &ArgsShift) -> bool {
        self.gen_shift_imm(ir, a, Context::gen_shr)
    }
    fn trans_srai(&mut self, ir: &mut Context, a: &ArgsShift) -> bool {
        self.gen_shift_imm(ir, a, Context::gen_sar)
    }

    // ── RV64I: R-type ALU ──────────────────────────────

    fn trans_add(&mut self, ir: &mut Context, a: &ArgsR) -> bool {
        self.gen_arith(ir, a, Context::gen_add)
    }
    fn trans_sub(&mut self, ir: &mut Context, a: &ArgsR) -> bool {
        self.gen_arith(ir, a, Context::gen_sub)
    }
    fn trans_sll(&mut self, ir: &mut Context, a: &ArgsR) -> bool {
        self.gen_arith(ir, a, Context::gen_shl)
    }
    fn trans_slt(&mut self, ir: &mut Context, a: &ArgsR) -> bool {
        self.gen_setcond_rr(ir, a, Cond::Lt)
    }
    fn trans_sltu(&mut self, ir: &mut Context, a: &ArgsR) -> bool {
        self.gen_setcond_rr(ir, a, Cond::Ltu)
    }
    fn trans_xor(&mut self, ir: &mut Context, a: &ArgsR) -> bool {
        self.gen_arith(ir, a, Context::gen_xor)
    }
    fn trans_srl(&mut self, ir: &mut Context, a: &ArgsR) -> bool {
        self.gen_arith(ir, a, Context::gen_shr)
    }
    fn trans_sra(&mut self, ir: &mut Context, a: &ArgsR) -> bool {
        self.gen_arith(ir, a, Context::gen_sar)
    }
    fn trans_or(&mut self, ir: &mut Context, a: &ArgsR) -> bool {
        self.gen_arith(ir, a, Context::gen_or)
    }
    fn trans_and(&mut self, ir: &mut Context, a: &ArgsR) -> bool {
        self.gen_arith(ir, a, Context::gen_and)
    }

    // ── RV64I: W-suffix ALU ────────────────────────────

    fn trans_addiw(&mut self, ir: &mut Context, a: &ArgsI) -> bool {
        self.gen_arith_imm_w(ir, a, Context::gen_add)
    }
    fn trans_slliw(&mut self, ir: &mut Context, a: &ArgsShift) -> bool {
        self.gen_shift_imm_w(ir, a, Context::gen_shl)
    }
    fn trans_srliw(&mut self, ir: &mut Context, a: &ArgsShift) -> bool {
        self.gen_shift_imm_w(ir, a, Context::gen_shr)
    }
    fn trans_sraiw(&mut self, ir: &mut Context, a: &ArgsShift) -> bool {
        self.gen_shift_imm_w(ir, a, Context::gen_sar)
    }
    fn trans_addw(&mut self, ir: &mut Context, a: &ArgsR) -> bool {
        self.gen_arith_w(ir, a, Context::gen_add)
    }
    fn trans_subw(&mut self, ir: &mut Context, a: &ArgsR) -> bool {
        self.gen_arith_w(ir, a, Context::gen_sub)
    }
    fn trans_sllw(&mut self, ir: &mut Context, a: &ArgsR) -> bool {
        self.gen_op32(ir, a, Context::gen_shl)
    }
    fn trans_srlw(&mut self, ir: &mut Context, a: &ArgsR) -> bool {
        self.gen_op32(ir, a, Context::gen_shr)
    }
    fn trans_sraw(&mut self, ir: &mut Context, a: &ArgsR) -> bool {
        self.gen_op32(ir, a, Context::gen_sar)
    }

    // ── RV64I: Fence / System ──────────────────────────

    fn trans_fence(&mut self, ir: &mut Context, _a: &ArgsEmpty) -> bool {
        ir.gen_mb(MB_ALL);
        true
    }

    fn trans_ecall(&mut self, ir: &mut Context, _a: &ArgsEmpty) -> bool {
        let cause = match self.priv_mode {
            Priv::User => EXCP_ECALL_U,
            Priv::Machine => EXCP_ECALL_M,
        };
        self.gen_exception(ir, cause, 0);
        true
    }

    fn trans_ebreak(&mut self, ir: &mut Context, _a: &ArgsEmpty) -> bool {
        self.gen_exception(ir, EXCP_BREAKPOINT, self.base.pc_next);
        true
    }

    // ── M: Multiply / Divide ───────────────────────────

    fn trans_mul(&mut self, ir: &mut Context, a: &ArgsR) -> bool {
        self.has_ext(MisaExt::M) && self.gen_arith(ir, a, Context::gen_mul)
    }
    fn trans_mulh(&mut self, ir: &mut Context, a: &ArgsR) -> bool {
        self.has_ext(MisaExt::M) && self.gen_arith(ir, a, Context::gen_mulsh)
    }
    fn trans_mulhsu(&mut self, ir: &mut Context, a: &ArgsR) -> bool {
        self.has_ext(MisaExt::M) && self.gen_arith(ir, a, Self::gen_mulhsu)
    }
    fn trans_mulhu(&mut self, ir: &mut Context, a: &ArgsR) -> bool {
        self.has_ext(MisaExt::M) && self.gen_arith(ir, a, Context::gen_muluh)
    }
    fn trans_div(&mut self, ir: &mut Context, a: &ArgsR) -> bool {
        self.has_ext(MisaExt::M) && self.gen_arith(ir, a, Context::gen_divs)
    }
    fn trans_divu(&mut self, ir: &mut Context, a: &ArgsR) -> bool {
        self.has_ext(MisaExt::M) && self.gen_arith(ir, a, Context::gen_divu)
    }
    fn trans_rem(&mut self, ir: &mut Context, a: &ArgsR) -> bool {
        self.has_ext(MisaExt::M) && self.gen_arith(ir, a, Context::gen_rems)
    }
    fn trans_remu(&mut self, ir: &mut Context, a: &ArgsR) -> bool {
        self.has_ext(MisaExt::M) && self.gen_arith(ir, a, Context::gen_remu)
    }

    fn trans_mulw(&mut self, ir: &mut Context, a: &ArgsR) -> bool {
        self.has_ext(MisaExt::M) && self.gen_op32(ir, a, Context::gen_mul)
    }
    fn trans_divw(&mut self, ir: &mut Context, a: &ArgsR) -> bool {
        self.has_ext(MisaExt::M) && self.gen_op32(ir, a, Context::gen_divs)
    }
    fn trans_divuw(&mut self, ir: &mut Context, a: &ArgsR) -> bool {
        self.has_ext(MisaExt::M) && self.gen_op32(ir, a, Context::gen_divu)
    }
    fn trans_remw(&mut self, ir: &mut Context, a: &ArgsR) -> bool {
        self.has_ext(MisaExt::M) && self.gen_op32(ir, a, Context::gen_rems)
    }
    fn trans_remuw(&mut self, ir: &mut Context, a: &ArgsR) -> bool {
        self.has_ext(MisaExt::M) && self.gen_op32(ir, a, Context::gen_remu)
    }

    // ── A: Atomics ─────────────────────────────────────

    fn trans_lr_w(&mut self, ir: &mut Context, a: &ArgsAtomic) -> bool {
        self.gen_lr(ir, a, false)
    }
    fn trans_sc_w(&mut self, ir: &mut Context, a: &ArgsAtomic) -> bool {
        self.gen_sc(ir, a, false)
    }
    fn trans_amoswap_w(&mut self, ir: &mut Context, a: &ArgsAtomic) -> bool {
        self.gen_amo(ir, a, false, AtomicOp::Xchg)
    }
    fn trans_amoadd_w(&mut self, ir: &mut Context, a: &ArgsAtomic) -> bool {
        self.gen_amo(ir, a, false, AtomicOp::Add)
    }
    fn trans_amoxor_w(&mut self, ir: &mut Context, a: &ArgsAtomic) -> bool {
        self.gen_amo(ir, a, false, AtomicOp::Xor)
    }
    fn trans_amoand_w(&mut self, ir: &mut Context, a: &ArgsAtomic) -> bool {
        self.gen_amo(ir, a, false, AtomicOp::And)
    }
    fn trans_amoor_w(&mut self, ir: &mut Context, a: &ArgsAtomic) -> bool {
        self.gen_amo(ir, a, false, AtomicOp::Or)
    }
    fn trans_amomin_w(&mut self, ir: &mut Context, a: &ArgsAtomic) -> bool {
        self.gen_amo(ir, a, false, AtomicOp::Min)
    }
    fn trans_amomax_w(&mut self, ir: &mut Context, a: &ArgsAtomic) -> bool {
        self.gen_amo(ir, a, false, AtomicOp::Max)
    }
    fn trans_amominu_w(&mut self, ir: &mut Context, a: &ArgsAtomic) -> bool {
        self.gen_amo(ir, a, false, AtomicOp::MinU)
    }
    fn trans_amomaxu_w(&mut self, ir: &mut Context, a: &ArgsAtomic) -> bool {
        self.gen_amo(ir, a, false, AtomicOp::MaxU)
    }

    fn trans_lr_d(&mut self, ir: &mut Context, a: &ArgsAtomic) -> bool {
        self.gen_lr(ir, a, true)
    }
    fn trans_sc_d(&mut self, ir: &mut Context, a: &ArgsAtomic) -> bool {
        self.gen_sc(ir, a, true)
    }
    fn trans_amoswap_d(&mut self, ir: &mut Context, a: &ArgsAtomic) -> bool {
        self.gen_amo(ir, a, true, AtomicOp::Xchg)
    }
    fn trans_amoadd_d(&mut self, ir: &mut Context, a: &ArgsAtomic) -> bool {
        self.gen_amo(ir, a, true, AtomicOp::Add)
    }
    fn trans_amoxor_d(&mut self, ir: &mut Context, a: &ArgsAtomic) -> bool {
        self.gen_amo(ir, a, true, AtomicOp::Xor)
    }
    fn trans_amoand_d(&mut self, ir: &mut Context, a: &ArgsAtomic) -> bool {
        self.gen_amo(ir, a, true, AtomicOp::And)
    }
    fn trans_amoor_d(&mut self, ir: &mut Context, a: &ArgsAtomic) -> bool {
        self.gen_amo(ir, a, true, AtomicOp::Or)
    }
    fn trans_amomin_d(&mut self, ir: &mut Context, a: &ArgsAtomic) -> bool {
        self.gen_amo(ir, a, true, AtomicOp::Min)
    }
    fn trans_amomax_d(&mut self, ir: &mut Context, a: &ArgsAtomic) -> bool {
        self.gen_amo(ir, a, true, AtomicOp::Max)
    }
    fn trans_amominu_d(&mut self, ir: &mut Context, a: &ArgsAtomic) -> bool {
        self.gen_amo(ir, a, true, AtomicOp::MinU)
    }
    fn trans_amomaxu_d(&mut self, ir: &mut Context, a: &ArgsAtomic) -> bool {
        self.gen_amo(ir, a, true, AtomicOp::MaxU)
    }

    // ── Zicsr ──────────────────────────────────────────

    fn trans_csrrw(&mut self, ir: &mut Context, a: &ArgsCsr) -> bool {
        self.gen_csr(ir, a, CsrAccess::Write, false)
    }
    fn trans_csrrs(&mut self, ir: &mut Context, a: &ArgsCsr) -> bool {
        self.gen_csr(ir, a, CsrAccess::Set, false)
    }
    fn trans_csrrc(&mut self, ir: &mut Context, a: &ArgsCsr) -> bool {
        self.gen_csr(ir, a, CsrAccess::Clear, false)
    }
    fn trans_csrrwi(&mut self, ir: &mut Context, a: &ArgsCsr) -> bool {
        self.gen_csr(ir, a, CsrAccess::Write, true)
    }
    fn trans_csrrsi(&mut self, ir: &mut Context, a: &ArgsCsr) -> bool {
        self.gen_csr(ir, a, CsrAccess::Set, true)
    }
    fn trans_csrrci(&mut self, ir: &mut Context, a: &ArgsCsr) -> bool {
        self.gen_csr(ir, a, CsrAccess::Clear, true)
    }

    // ── Zifencei ───────────────────────────────────────

    fn trans_fence_i(&mut self, ir: &mut Context, _a: &ArgsEmpty) -> bool {
        if !self.cfg.ext_zifencei {
            return false;
        }
        // Stores to code already invalidated stale blocks; leaving
        // the block makes the next fetch see the new bytes.
        self.gen_exit_next(ir);
        true
    }

    // ── Privileged ─────────────────────────────────────

    fn trans_mret(&mut self, ir: &mut Context, _a: &ArgsEmpty) -> bool {
        if self.priv_mode != Priv::Machine {
            return false;
        }
        let d = ir.new_temp(Type::I64);
        let flags = HELPERS[HELPER_MRET as usize].flags;
        ir.gen_call(d, HELPER_MRET, flags, &[]);
        ir.gen_mov(Type::I64, self.g.pc, d);
        ir.gen_exit_tb(TB_EXIT_NOCHAIN);
        self.base.is_jmp = DisasJumpType::NoReturn;
        true
    }

    fn trans_wfi(&mut self, ir: &mut Context, _a: &ArgsEmpty) -> bool {
        if self.priv_mode != Priv::Machine {
            return false;
        }
        self.gen_set_pc(ir, self.base.pc_next + 4);
        ir.gen_exit_tb(TB_EXIT_HALT);
        self.base.is_jmp = DisasJumpType::NoReturn;
        true
    }
}
