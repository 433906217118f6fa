use crate::code_buffer::CodeWriter;
use crate::constraint::OpConstraint;
use crate::{HostArg, HostCodeGen};
use xlat_core::label::RelocKind;
use xlat_core::temp::TempKind;
use xlat_core::types::{RegSet, TempVal, Type};
use xlat_core::{Context, Op, OpFlags, Opcode, TempIdx, CALL_NO_RWG, CALL_NO_WG, OPCODE_DEFS};

const MAX_HOST_REGS: usize = 64;

/// How far ahead to look for the next use of an eviction candidate.
const NEXT_USE_WINDOW: usize = 256;

/// Register allocator state.
struct RegAllocState {
    reg_to_temp: [Option<TempIdx>; MAX_HOST_REGS],
    free_regs: RegSet,
    allocatable: RegSet,
    /// Index of the op being allocated.
    cur_op: usize,
}

impl RegAllocState {
    fn new(allocatable: RegSet) -> Self {
        Self {
            reg_to_temp: [None; MAX_HOST_REGS],
            free_regs: allocatable,
            allocatable,
            cur_op: 0,
        }
    }

    fn free_reg(&mut self, reg: u8) {
        self.reg_to_temp[reg as usize] = None;
        if self.allocatable.contains(reg) {
            self.free_regs = self.free_regs.set(reg);
        }
    }

    fn assign(&mut self, reg: u8, tidx: TempIdx) {
        self.reg_to_temp[reg as usize] = Some(tidx);
        self.free_regs = self.free_regs.clear(reg);
    }
}

// -- Helper functions --

/// Distance to the next op reading `tidx`, or `usize::MAX` if it is
/// redefined first or not read within the window.
fn next_use(ctx: &Context, from: usize, tidx: TempIdx) -> usize {
    let ops = ctx.ops();
    let end = ops.len().min(from + NEXT_USE_WINDOW);
    for (dist, op) in ops[from..end].iter().enumerate() {
        if op.opc == Opcode::Nop || op.opc == Opcode::InsnStart {
            continue;
        }
        if op.iargs().contains(&tidx) {
            return dist;
        }
        if op.oargs().contains(&tidx) {
            return usize::MAX;
        }
    }
    usize::MAX
}

fn base_reg(ctx: &Context, tidx: TempIdx) -> u8 {
    let temp = ctx.temp(tidx);
    let Some(base) = temp.mem_base else {
        panic!("temp {tidx:?} has no memory slot");
    };
    match ctx.temp(base).reg {
        Some(r) => r,
        None => panic!("memory base of {tidx:?} is not a fixed register"),
    }
}

/// Write a register-resident temp back to its memory slot, allocating
/// a frame slot for locals on first spill.
fn temp_sync(ctx: &mut Context, backend: &impl HostCodeGen, buf: &mut CodeWriter, tidx: TempIdx) {
    let temp = ctx.temp(tidx);
    if temp.mem_coherent
        || temp.val_type != TempVal::Reg
        || matches!(temp.kind, TempKind::Fixed | TempKind::Const)
    {
        return;
    }
    if !temp.mem_allocated {
        ctx.alloc_temp_frame(tidx);
    }
    let temp = ctx.temp(tidx);
    let (ty, offset) = (temp.ty, temp.mem_offset);
    let Some(reg) = temp.reg else {
        panic!("temp {tidx:?} marked in register without one");
    };
    let base = base_reg(ctx, tidx);
    backend.tcg_out_st(buf, ty, reg, base, offset);
    ctx.temp_mut(tidx).mem_coherent = true;
}

/// Release a temp's register, leaving the value in memory (or as a
/// constant).
fn temp_to_mem(
    ctx: &mut Context,
    state: &mut RegAllocState,
    backend: &impl HostCodeGen,
    buf: &mut CodeWriter,
    tidx: TempIdx,
) {
    let temp = ctx.temp(tidx);
    if temp.val_type != TempVal::Reg || temp.is_fixed() {
        return;
    }
    let reg = temp.reg;
    if temp.is_const() {
        let t = ctx.temp_mut(tidx);
        t.val_type = TempVal::Const;
        t.reg = None;
    } else {
        temp_sync(ctx, backend, buf, tidx);
        let t = ctx.temp_mut(tidx);
        t.val_type = TempVal::Mem;
        t.reg = None;
        t.mem_coherent = true;
    }
    if let Some(r) = reg {
        state.free_reg(r);
    }
}

/// Evict the current occupant of `reg`. Locals move to a free
/// register outside `forbidden` if one exists; everything else goes
/// back to memory.
fn evict_reg(
    ctx: &mut Context,
    state: &mut RegAllocState,
    backend: &impl HostCodeGen,
    buf: &mut CodeWriter,
    reg: u8,
    forbidden: RegSet,
) {
    let Some(tidx) = state.reg_to_temp[reg as usize] else {
        return;
    };
    let temp = ctx.temp(tidx);
    match temp.kind {
        TempKind::Fixed => panic!("cannot evict fixed temp {tidx:?} from r{reg}"),
        TempKind::Ebb | TempKind::Tb => {
            let free = state.free_regs.subtract(forbidden).clear(reg);
            if let Some(dst) = free.first() {
                let ty = temp.ty;
                backend.tcg_out_mov(buf, ty, dst, reg);
                state.free_reg(reg);
                state.assign(dst, tidx);
                ctx.temp_mut(tidx).reg = Some(dst);
            } else {
                temp_to_mem(ctx, state, backend, buf, tidx);
            }
        }
        TempKind::Global | TempKind::Const => {
            temp_to_mem(ctx, state, backend, buf, tidx);
        }
    }
}

/// Allocate a register from `required & ~forbidden`, preferring
/// `preferred`. When none is free, spills the occupant whose next use
/// is furthest away.
#[allow(clippy::too_many_arguments)]
fn reg_alloc(
    ctx: &mut Context,
    state: &mut RegAllocState,
    backend: &impl HostCodeGen,
    buf: &mut CodeWriter,
    required: RegSet,
    forbidden: RegSet,
    preferred: RegSet,
) -> u8 {
    let candidates = required.intersect(state.allocatable).subtract(forbidden);
    let pref_free = candidates.intersect(state.free_regs).intersect(preferred);
    if let Some(r) = pref_free.first() {
        return r;
    }
    if let Some(r) = candidates.intersect(state.free_regs).first() {
        return r;
    }

    let mut victim = None;
    let mut best = (0usize, false);
    for r in candidates.iter() {
        let Some(t) = state.reg_to_temp[r as usize] else {
            continue;
        };
        let temp = ctx.temp(t);
        if temp.is_fixed() {
            continue;
        }
        // Constants and clean values are cheaper to drop.
        let cheap = temp.is_const() || temp.mem_coherent;
        let score = (next_use(ctx, state.cur_op, t), cheap);
        if victim.is_none() || score > best {
            victim = Some(r);
            best = score;
        }
    }
    let Some(r) = victim else {
        panic!(
            "no legal register for op {} (required {:?}, forbidden {:?})",
            state.cur_op, required, forbidden
        );
    };
    evict_reg(ctx, state, backend, buf, r, forbidden.union(required));
    r
}

/// Load a temp into a register satisfying the constraint.
/// Returns the allocated host register.
#[allow(clippy::too_many_arguments)]
fn temp_load_to(
    ctx: &mut Context,
    state: &mut RegAllocState,
    backend: &impl HostCodeGen,
    buf: &mut CodeWriter,
    tidx: TempIdx,
    required: RegSet,
    forbidden: RegSet,
    preferred: RegSet,
) -> u8 {
    let temp = ctx.temp(tidx);
    match temp.val_type {
        TempVal::Reg => {
            let Some(cur) = temp.reg else {
                panic!("temp {tidx:?} marked in register without one");
            };
            if temp.is_fixed() || (required.contains(cur) && !forbidden.contains(cur)) {
                return cur;
            }
            // Current reg doesn't satisfy: move
            let ty = temp.ty;
            let dst = reg_alloc(ctx, state, backend, buf, required, forbidden, preferred);
            backend.tcg_out_mov(buf, ty, dst, cur);
            state.free_reg(cur);
            state.assign(dst, tidx);
            ctx.temp_mut(tidx).reg = Some(dst);
            dst
        }
        TempVal::Const => {
            let (val, ty) = (temp.val, temp.ty);
            let reg = reg_alloc(ctx, state, backend, buf, required, forbidden, preferred);
            state.assign(reg, tidx);
            backend.tcg_out_movi(buf, ty, reg, val);
            let t = ctx.temp_mut(tidx);
            t.val_type = TempVal::Reg;
            t.reg = Some(reg);
            reg
        }
        TempVal::Mem => {
            let (ty, offset) = (temp.ty, temp.mem_offset);
            let reg = reg_alloc(ctx, state, backend, buf, required, forbidden, preferred);
            state.assign(reg, tidx);
            let base = base_reg(ctx, tidx);
            backend.tcg_out_ld(buf, ty, reg, base, offset);
            let t = ctx.temp_mut(tidx);
            t.val_type = TempVal::Reg;
            t.reg = Some(reg);
            t.mem_coherent = true;
            reg
        }
        TempVal::Dead => {
            panic!("temp_load_to on dead temp {tidx:?}");
        }
    }
}

/// Write dirty globals back to memory, keeping them in registers.
fn sync_globals(ctx: &mut Context, backend: &impl HostCodeGen, buf: &mut CodeWriter) {
    for i in 0..ctx.nb_globals() {
        let tidx = TempIdx(i);
        if ctx.temp(tidx).is_global() {
            temp_sync(ctx, backend, buf, tidx);
        }
    }
}

/// Write back and release every global held in a register.
fn free_globals(
    ctx: &mut Context,
    state: &mut RegAllocState,
    backend: &impl HostCodeGen,
    buf: &mut CodeWriter,
) {
    for i in 0..ctx.nb_globals() {
        let tidx = TempIdx(i);
        if ctx.temp(tidx).is_global() {
            temp_to_mem(ctx, state, backend, buf, tidx);
        }
    }
}

/// Bring register state to a basic block boundary.
///
/// On a conditional branch, globals and TB temps are written back
/// but stay in registers for the fall-through path. Otherwise every
/// register is released: globals and TB temps go to memory, EBB
/// temps die.
fn bb_end(
    ctx: &mut Context,
    state: &mut RegAllocState,
    backend: &impl HostCodeGen,
    buf: &mut CodeWriter,
    cond_branch: bool,
) {
    for reg in 0..MAX_HOST_REGS {
        let Some(tidx) = state.reg_to_temp[reg] else {
            continue;
        };
        let kind = ctx.temp(tidx).kind;
        match (kind, cond_branch) {
            (TempKind::Fixed, _) => {}
            (TempKind::Global | TempKind::Tb, true) => temp_sync(ctx, backend, buf, tidx),
            (TempKind::Const, true) | (TempKind::Ebb, true) => {}
            (TempKind::Ebb, false) => temp_dead(ctx, state, tidx),
            (_, false) => temp_to_mem(ctx, state, backend, buf, tidx),
        }
    }
}

/// Free a temp's register if it's dead after this op.
fn temp_dead(ctx: &mut Context, state: &mut RegAllocState, tidx: TempIdx) {
    let temp = ctx.temp(tidx);
    if temp.is_global_or_fixed() {
        return;
    }
    if let (TempVal::Reg, Some(reg)) = (temp.val_type, temp.reg) {
        state.free_reg(reg);
    }
    let is_const = temp.is_const();
    let t = ctx.temp_mut(tidx);
    t.reg = None;
    // Constants stay available for later uses.
    t.val_type = if is_const { TempVal::Const } else { TempVal::Dead };
    if !is_const {
        t.mem_coherent = false;
    }
}

/// Finish an output after its op was emitted.
fn output_done(
    ctx: &mut Context,
    state: &mut RegAllocState,
    backend: &impl HostCodeGen,
    buf: &mut CodeWriter,
    op: &Op,
    k: usize,
) {
    let tidx = op.args[k];
    if op.life.is_sync(k as u32) {
        temp_sync(ctx, backend, buf, tidx);
    }
    if op.life.is_dead(k as u32) {
        if ctx.temp(tidx).is_global() {
            temp_to_mem(ctx, state, backend, buf, tidx);
        } else {
            temp_dead(ctx, state, tidx);
        }
    }
}

fn cargs_of(op: &Op) -> Vec<u32> {
    op.cargs().iter().map(|c| c.0).collect()
}

/// Generic constraint-driven register allocation for one op.
fn regalloc_op(
    ctx: &mut Context,
    state: &mut RegAllocState,
    backend: &impl HostCodeGen,
    buf: &mut CodeWriter,
    op: &Op,
    ct: &OpConstraint,
) {
    let def = &OPCODE_DEFS[op.opc as usize];
    let nb_oargs = def.nb_oargs as usize;
    let nb_iargs = def.nb_iargs as usize;
    let life = op.life;
    let is64 = op.op_type == Type::I64;

    let mut iargs = [HostArg::Imm(0); 8];
    let mut i_allocated = RegSet::EMPTY;

    // 1. Place inputs: immediates where the constraint allows,
    //    registers otherwise.
    for i in 0..nb_iargs {
        let arg_ct = &ct.args[nb_oargs + i];
        let tidx = op.args[nb_oargs + i];
        let temp = ctx.temp(tidx);
        if temp.is_const() && arg_ct.ct_const.accepts(temp.val, is64) {
            iargs[i] = HostArg::Imm(temp.val as i64);
            continue;
        }
        let reg = temp_load_to(
            ctx,
            state,
            backend,
            buf,
            tidx,
            arg_ct.regs,
            i_allocated,
            RegSet::EMPTY,
        );
        iargs[i] = HostArg::Reg(reg);
        i_allocated = i_allocated.set(reg);
    }

    // 2. Ops that may fault need the guest-visible state in memory.
    if def.flags.contains(OpFlags::SIDE_EFFECTS) {
        sync_globals(ctx, backend, buf);
    }

    // 3. Free dead inputs
    for i in 0..nb_iargs {
        if life.is_dead((nb_oargs + i) as u32) {
            temp_dead(ctx, state, op.args[nb_oargs + i]);
        }
    }

    // 4. Allocate outputs, away from inputs that stay live.
    let mut live_inputs = RegSet::EMPTY;
    for i in 0..nb_iargs {
        if let HostArg::Reg(r) = iargs[i] {
            if state.reg_to_temp[r as usize] == Some(op.args[nb_oargs + i]) {
                live_inputs = live_inputs.set(r);
            }
        }
    }
    let mut o_regs = [0u8; 2];
    let mut o_allocated = RegSet::EMPTY;
    for k in 0..nb_oargs {
        let dst_tidx = op.args[k];
        if let Some(old) = ctx.temp(dst_tidx).reg {
            if ctx.temp(dst_tidx).val_type == TempVal::Reg {
                state.free_reg(old);
            }
        }
        let reg = reg_alloc(
            ctx,
            state,
            backend,
            buf,
            ct.args[k].regs,
            o_allocated.union(live_inputs),
            op.output_pref[k],
        );
        state.assign(reg, dst_tidx);
        let t = ctx.temp_mut(dst_tidx);
        t.val_type = TempVal::Reg;
        t.reg = Some(reg);
        t.mem_coherent = false;
        o_regs[k] = reg;
        o_allocated = o_allocated.set(reg);
    }

    // 5. Emit host code
    let cargs = cargs_of(op);
    backend.tcg_out_op(buf, ctx, op, &o_regs[..nb_oargs], &iargs[..nb_iargs], &cargs);

    // 6. Write back or free outputs
    for k in 0..nb_oargs {
        output_done(ctx, state, backend, buf, op, k);
    }
}

/// Register allocation for a helper call.
///
/// Arguments are copied into the argument registers without changing
/// where their temps live, globals are saved according to the helper's
/// flags, and locals are moved out of call-clobbered registers.
fn regalloc_call(
    ctx: &mut Context,
    state: &mut RegAllocState,
    backend: &impl HostCodeGen,
    buf: &mut CodeWriter,
    op: &Op,
) {
    let arg_regs = backend.call_arg_regs();
    let clobber = backend.call_clobber_regs();
    let flags = op.carg(1);
    let nb_iargs = op.iargs().len();
    assert!(nb_iargs <= arg_regs.len(), "call has more arguments than arg regs");

    let mut arg_set = RegSet::EMPTY;
    for &r in &arg_regs[..nb_iargs] {
        arg_set = arg_set.set(r);
    }

    // 1. Empty the argument registers.
    for &r in &arg_regs[..nb_iargs] {
        evict_reg(ctx, state, backend, buf, r, arg_set);
    }

    // 2. Copy each argument in place.
    for (i, &tidx) in op.iargs().iter().enumerate() {
        let dst = arg_regs[i];
        let temp = ctx.temp(tidx);
        match (temp.val_type, temp.reg) {
            (TempVal::Reg, Some(src)) => {
                if src != dst {
                    backend.tcg_out_mov(buf, Type::I64, dst, src);
                }
            }
            (TempVal::Const, _) => backend.tcg_out_movi(buf, Type::I64, dst, temp.val),
            (TempVal::Mem, _) => {
                let (ty, offset) = (temp.ty, temp.mem_offset);
                let base = base_reg(ctx, tidx);
                backend.tcg_out_ld(buf, ty, dst, base, offset);
            }
            _ => panic!("call argument {tidx:?} is dead"),
        }
        // Keep the copied register out of later allocation.
        state.free_regs = state.free_regs.clear(dst);
    }

    for (i, &tidx) in op.iargs().iter().enumerate() {
        if op.life.is_dead((1 + i) as u32) {
            temp_dead(ctx, state, tidx);
        }
    }

    // 3. Save globals as the helper requires.
    if flags & CALL_NO_RWG == 0 {
        if flags & CALL_NO_WG != 0 {
            sync_globals(ctx, backend, buf);
        } else {
            free_globals(ctx, state, backend, buf);
        }
    }

    // 4. Clear caller-saved registers of anything still live.
    for r in clobber.iter() {
        if !arg_set.contains(r) {
            evict_reg(ctx, state, backend, buf, r, clobber);
        }
    }

    // 5. Emit the call.
    let cargs = cargs_of(op);
    backend.tcg_out_op(buf, ctx, op, &[], &[], &cargs);

    // Argument registers are free again.
    for r in arg_set.iter() {
        if state.reg_to_temp[r as usize].is_none() {
            state.free_reg(r);
        }
    }

    // 6. Result
    let ret = backend.call_ret_reg();
    let dst = op.args[0];
    if let (TempVal::Reg, Some(old)) = (ctx.temp(dst).val_type, ctx.temp(dst).reg) {
        state.free_reg(old);
    }
    evict_reg(ctx, state, backend, buf, ret, clobber);
    state.assign(ret, dst);
    let t = ctx.temp_mut(dst);
    t.val_type = TempVal::Reg;
    t.reg = Some(ret);
    t.mem_coherent = false;
    output_done(ctx, state, backend, buf, op, 0);
}

/// Main register allocation + code generation pass.
///
/// Records `(host offset relative to tb_start, guest pc)` of every
/// guest instruction into `ctx.insn_offsets`.
pub fn regalloc_and_codegen(
    ctx: &mut Context,
    backend: &impl HostCodeGen,
    buf: &mut CodeWriter,
) {
    let allocatable = backend.allocatable_regs().subtract(ctx.reserved_regs);
    let mut state = RegAllocState::new(allocatable);
    let tb_start = buf.offset();

    // Fixed temps always live in their register.
    for i in 0..ctx.nb_globals() {
        let tidx = TempIdx(i);
        let temp = ctx.temp(tidx);
        if temp.kind == TempKind::Fixed {
            if let Some(reg) = temp.reg {
                state.assign(reg, tidx);
            }
        }
    }

    let num_ops = ctx.num_ops();
    for oi in 0..num_ops {
        let op = ctx.ops()[oi].clone();
        state.cur_op = oi;

        match op.opc {
            Opcode::Nop => continue,

            Opcode::InsnStart => {
                let pc = op.carg(0) as u64 | ((op.carg(1) as u64) << 32);
                let off = (buf.offset() - tb_start) as u32;
                ctx.insn_offsets.push((off, pc));
            }

            Opcode::Discard => temp_dead(ctx, &mut state, op.args[0]),

            Opcode::Mov => {
                let dst_idx = op.args[0];
                let src_idx = op.args[1];
                let life = op.life;
                let src = ctx.temp(src_idx);
                let rename = life.is_dead(1)
                    && matches!(src.kind, TempKind::Ebb | TempKind::Tb)
                    && src.val_type == TempVal::Reg;
                if rename {
                    // Hand the dying source's register to the destination.
                    let Some(reg) = src.reg else {
                        panic!("temp {src_idx:?} marked in register without one");
                    };
                    temp_dead(ctx, &mut state, src_idx);
                    if let (TempVal::Reg, Some(old)) =
                        (ctx.temp(dst_idx).val_type, ctx.temp(dst_idx).reg)
                    {
                        state.free_reg(old);
                    }
                    state.assign(reg, dst_idx);
                    let t = ctx.temp_mut(dst_idx);
                    t.val_type = TempVal::Reg;
                    t.reg = Some(reg);
                    t.mem_coherent = false;
                } else {
                    let src_reg = temp_load_to(
                        ctx,
                        &mut state,
                        backend,
                        buf,
                        src_idx,
                        allocatable,
                        RegSet::EMPTY,
                        RegSet::EMPTY,
                    );
                    if life.is_dead(1) {
                        temp_dead(ctx, &mut state, src_idx);
                    }
                    if let (TempVal::Reg, Some(old)) =
                        (ctx.temp(dst_idx).val_type, ctx.temp(dst_idx).reg)
                    {
                        state.free_reg(old);
                    }
                    // Keep a live source's register out of reach.
                    let forbidden = if state.reg_to_temp[src_reg as usize] == Some(src_idx) {
                        RegSet::EMPTY.set(src_reg)
                    } else {
                        RegSet::EMPTY
                    };
                    let dst_reg = reg_alloc(
                        ctx,
                        &mut state,
                        backend,
                        buf,
                        allocatable,
                        forbidden,
                        op.output_pref[0],
                    );
                    state.assign(dst_reg, dst_idx);
                    let t = ctx.temp_mut(dst_idx);
                    t.val_type = TempVal::Reg;
                    t.reg = Some(dst_reg);
                    t.mem_coherent = false;
                    if dst_reg != src_reg {
                        backend.tcg_out_mov(buf, op.op_type, dst_reg, src_reg);
                    }
                }
                output_done(ctx, &mut state, backend, buf, &op, 0);
            }

            Opcode::SetLabel => {
                let label_id = op.carg(0);
                bb_end(ctx, &mut state, backend, buf, false);
                let offset = buf.offset();
                for u in ctx.label_mut(label_id).bind(offset) {
                    match u.kind {
                        RelocKind::Abs32 => backend.patch_label(buf, u, offset),
                    }
                }
            }

            Opcode::Br => {
                let label_id = op.carg(0);
                bb_end(ctx, &mut state, backend, buf, false);
                let resolved = ctx.label(label_id).is_bound();
                backend.tcg_out_op(buf, ctx, &op, &[], &[], &cargs_of(&op));
                if !resolved && !buf.overflowed() {
                    let patch_off = buf.offset() - 4;
                    ctx.label_mut(label_id).add_use(patch_off, RelocKind::Abs32);
                }
            }

            Opcode::ExitTb | Opcode::GotoTb | Opcode::Trap => {
                bb_end(ctx, &mut state, backend, buf, false);
                backend.tcg_out_op(buf, ctx, &op, &[], &[], &cargs_of(&op));
            }

            Opcode::Mb => {
                backend.tcg_out_op(buf, ctx, &op, &[], &[], &cargs_of(&op));
            }

            Opcode::Call => regalloc_call(ctx, &mut state, backend, buf, &op),

            Opcode::BrCond => {
                let label_id = op.carg(1);
                let ct = backend.op_constraint(op.opc);
                let nb_iargs = 2;
                let is64 = op.op_type == Type::I64;
                let mut iargs = [HostArg::Imm(0); 2];
                let mut i_allocated = RegSet::EMPTY;
                for i in 0..nb_iargs {
                    let tidx = op.args[i];
                    let arg_ct = &ct.args[i];
                    let temp = ctx.temp(tidx);
                    if temp.is_const() && arg_ct.ct_const.accepts(temp.val, is64) {
                        iargs[i] = HostArg::Imm(temp.val as i64);
                        continue;
                    }
                    let reg = temp_load_to(
                        ctx,
                        &mut state,
                        backend,
                        buf,
                        tidx,
                        arg_ct.regs,
                        i_allocated,
                        RegSet::EMPTY,
                    );
                    iargs[i] = HostArg::Reg(reg);
                    i_allocated = i_allocated.set(reg);
                }

                for i in 0..nb_iargs {
                    if op.life.is_dead(i as u32) {
                        temp_dead(ctx, &mut state, op.args[i]);
                    }
                }

                bb_end(ctx, &mut state, backend, buf, true);

                let resolved = ctx.label(label_id).is_bound();
                backend.tcg_out_op(buf, ctx, &op, &[], &iargs, &cargs_of(&op));
                if !resolved && !buf.overflowed() {
                    let patch_off = buf.offset() - 4;
                    ctx.label_mut(label_id).add_use(patch_off, RelocKind::Abs32);
                }
            }

            _ => {
                let ct = backend.op_constraint(op.opc);
                regalloc_op(ctx, &mut state, backend, buf, &op, ct);
            }
        }
    }
}
