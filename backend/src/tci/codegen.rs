use crate::code_buffer::{CodeBuffer, CodeWriter};
use crate::constraint::OpConstraint;
use crate::tci::insn::{field_word, regs_word, Insn, TciOp};
use crate::tci::regs::{
    ALLOCATABLE_REGS, CALL_ARG_REGS, CALL_CLOBBER_REGS, CALL_RET_REG, FRAME_REG, FRAME_SIZE,
    TCG_AREG0,
};
use crate::tci::TciCodeGen;
use crate::{HostArg, HostCodeGen, TbReturn};
use xlat_core::{encode_tb_exit, Context, LabelUse, Op, Opcode, RegSet, TbRuntime, Type};

fn is64(ty: Type) -> bool {
    ty == Type::I64
}

/// Emit `op r0, r1, (r2 | imm)`.
fn emit_rrx(buf: &mut CodeWriter, insn: Insn, d: u8, a: u8, b: HostArg) {
    match b {
        HostArg::Reg(r) => buf.emit_u32(insn.r0(d).r1(a).r2(r).0),
        HostArg::Imm(v) => {
            buf.emit_u32(insn.r0(d).r1(a).imm().0);
            buf.emit_u32(v as u32);
        }
    }
}

fn reg(arg: HostArg) -> u8 {
    match arg {
        HostArg::Reg(r) => r,
        HostArg::Imm(v) => panic!("immediate {v:#x} where a register is required"),
    }
}

fn emit_offset(buf: &mut CodeWriter, offset: i64) {
    assert!(
        i32::try_from(offset).is_ok(),
        "host memory offset {offset:#x} out of range"
    );
    buf.emit_u32(offset as i32 as u32);
}

fn label_target(ctx: &Context, id: u32) -> u32 {
    ctx.label(id).target().map_or(0, |t| t as u32)
}

impl HostCodeGen for TciCodeGen {
    fn name(&self) -> &'static str {
        "tci"
    }

    fn allocatable_regs(&self) -> RegSet {
        ALLOCATABLE_REGS
    }

    fn call_clobber_regs(&self) -> RegSet {
        CALL_CLOBBER_REGS
    }

    fn call_arg_regs(&self) -> &'static [u8] {
        &CALL_ARG_REGS
    }

    fn call_ret_reg(&self) -> u8 {
        CALL_RET_REG
    }

    fn init_context(&self, ctx: &mut Context) {
        ctx.reserved_regs = RegSet::EMPTY.set(TCG_AREG0).set(FRAME_REG);
        ctx.set_frame(FRAME_REG, 0, FRAME_SIZE as i64);
        ctx.set_env(TCG_AREG0);
    }

    fn op_constraint(&self, opc: Opcode) -> &'static OpConstraint {
        crate::tci::constraints::op_constraint(opc)
    }

    fn tcg_out_mov(&self, buf: &mut CodeWriter, ty: Type, dst: u8, src: u8) {
        buf.emit_u32(Insn::new(TciOp::MovR).w64(is64(ty)).r0(dst).r1(src).0);
    }

    fn tcg_out_movi(&self, buf: &mut CodeWriter, ty: Type, dst: u8, val: u64) {
        let val = val & ty.mask();
        if ty == Type::I32 || val as i64 == val as i32 as i64 {
            buf.emit_u32(Insn::new(TciOp::MovI32).w64(is64(ty)).r0(dst).0);
            buf.emit_u32(val as u32);
        } else {
            buf.emit_u32(Insn::new(TciOp::MovI64).w64(true).r0(dst).0);
            buf.emit_u64(val);
        }
    }

    fn tcg_out_ld(&self, buf: &mut CodeWriter, ty: Type, dst: u8, base: u8, offset: i64) {
        let op = match ty {
            Type::I32 => TciOp::Ld32U,
            Type::I64 => TciOp::Ld64,
        };
        buf.emit_u32(Insn::new(op).w64(is64(ty)).r0(dst).r1(base).0);
        emit_offset(buf, offset);
    }

    fn tcg_out_st(&self, buf: &mut CodeWriter, ty: Type, src: u8, base: u8, offset: i64) {
        let op = match ty {
            Type::I32 => TciOp::St32,
            Type::I64 => TciOp::St64,
        };
        buf.emit_u32(Insn::new(op).w64(is64(ty)).r0(src).r1(base).0);
        emit_offset(buf, offset);
    }

    fn tcg_out_op(
        &self,
        buf: &mut CodeWriter,
        ctx: &Context,
        op: &Op,
        oregs: &[u8],
        iargs: &[HostArg],
        cargs: &[u32],
    ) {
        let w = is64(op.op_type);
        match op.opc {
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::AndC
            | Opcode::OrC
            | Opcode::Eqv
            | Opcode::Nand
            | Opcode::Nor
            | Opcode::Shl
            | Opcode::Shr
            | Opcode::Sar
            | Opcode::RotL
            | Opcode::RotR
            | Opcode::DivS
            | Opcode::DivU
            | Opcode::RemS
            | Opcode::RemU
            | Opcode::MulSH
            | Opcode::MulUH
            | Opcode::Clz
            | Opcode::Ctz => {
                let top = match op.opc {
                    Opcode::Add => TciOp::Add,
                    Opcode::Sub => TciOp::Sub,
                    Opcode::Mul => TciOp::Mul,
                    Opcode::And => TciOp::And,
                    Opcode::Or => TciOp::Or,
                    Opcode::Xor => TciOp::Xor,
                    Opcode::AndC => TciOp::AndC,
                    Opcode::OrC => TciOp::OrC,
                    Opcode::Eqv => TciOp::Eqv,
                    Opcode::Nand => TciOp::Nand,
                    Opcode::Nor => TciOp::Nor,
                    Opcode::Shl => TciOp::Shl,
                    Opcode::Shr => TciOp::Shr,
                    Opcode::Sar => TciOp::Sar,
                    Opcode::RotL => TciOp::RotL,
                    Opcode::RotR => TciOp::RotR,
                    Opcode::DivS => TciOp::DivS,
                    Opcode::DivU => TciOp::DivU,
                    Opcode::RemS => TciOp::RemS,
                    Opcode::RemU => TciOp::RemU,
                    Opcode::MulSH => TciOp::MulSH,
                    Opcode::MulUH => TciOp::MulUH,
                    Opcode::Clz => TciOp::Clz,
                    _ => TciOp::Ctz,
                };
                emit_rrx(buf, Insn::new(top).w64(w), oregs[0], reg(iargs[0]), iargs[1]);
            }
            Opcode::SetCond | Opcode::NegSetCond => {
                let top = if op.opc == Opcode::SetCond {
                    TciOp::SetCond
                } else {
                    TciOp::NegSetCond
                };
                let insn = Insn::new(top).w64(w).aux(cargs[0]);
                emit_rrx(buf, insn, oregs[0], reg(iargs[0]), iargs[1]);
            }
            Opcode::MovCond => {
                let insn = Insn::new(TciOp::MovCond)
                    .w64(w)
                    .aux(cargs[0])
                    .r0(oregs[0])
                    .r1(reg(iargs[0]))
                    .r2(reg(iargs[1]));
                buf.emit_u32(insn.0);
                buf.emit_u32(regs_word(reg(iargs[2]), reg(iargs[3])));
            }
            Opcode::Neg
            | Opcode::Not
            | Opcode::CtPop
            | Opcode::ExtI32I64
            | Opcode::ExtUI32I64
            | Opcode::ExtrlI64I32
            | Opcode::ExtrhI64I32 => {
                let (top, w) = match op.opc {
                    Opcode::Neg => (TciOp::Neg, w),
                    Opcode::Not => (TciOp::Not, w),
                    Opcode::CtPop => (TciOp::CtPop, w),
                    Opcode::ExtI32I64 => (TciOp::ExtS32, true),
                    Opcode::ExtUI32I64 => (TciOp::ExtU32, true),
                    Opcode::ExtrlI64I32 => (TciOp::ExtU32, false),
                    _ => (TciOp::ExtrH, false),
                };
                buf.emit_u32(Insn::new(top).w64(w).r0(oregs[0]).r1(reg(iargs[0])).0);
            }
            Opcode::Bswap16 | Opcode::Bswap32 | Opcode::Bswap64 => {
                let top = match op.opc {
                    Opcode::Bswap16 => TciOp::Bswap16,
                    Opcode::Bswap32 => TciOp::Bswap32,
                    _ => TciOp::Bswap64,
                };
                let insn = Insn::new(top)
                    .w64(w)
                    .aux(cargs[0])
                    .r0(oregs[0])
                    .r1(reg(iargs[0]));
                buf.emit_u32(insn.0);
            }
            Opcode::Extract | Opcode::SExtract => {
                let top = if op.opc == Opcode::Extract {
                    TciOp::Extract
                } else {
                    TciOp::SExtract
                };
                buf.emit_u32(Insn::new(top).w64(w).r0(oregs[0]).r1(reg(iargs[0])).0);
                buf.emit_u32(field_word(cargs[0], cargs[1]));
            }
            Opcode::Deposit => {
                let insn = Insn::new(TciOp::Deposit)
                    .w64(w)
                    .r0(oregs[0])
                    .r1(reg(iargs[0]))
                    .r2(reg(iargs[1]));
                buf.emit_u32(insn.0);
                buf.emit_u32(field_word(cargs[0], cargs[1]));
            }
            Opcode::Ld8U
            | Opcode::Ld8S
            | Opcode::Ld16U
            | Opcode::Ld16S
            | Opcode::Ld32U
            | Opcode::Ld32S
            | Opcode::Ld => {
                let top = match op.opc {
                    Opcode::Ld8U => TciOp::Ld8U,
                    Opcode::Ld8S => TciOp::Ld8S,
                    Opcode::Ld16U => TciOp::Ld16U,
                    Opcode::Ld16S => TciOp::Ld16S,
                    Opcode::Ld32U => TciOp::Ld32U,
                    Opcode::Ld32S => TciOp::Ld32S,
                    _ if w => TciOp::Ld64,
                    _ => TciOp::Ld32U,
                };
                buf.emit_u32(Insn::new(top).w64(w).r0(oregs[0]).r1(reg(iargs[0])).0);
                emit_offset(buf, cargs[0] as i32 as i64);
            }
            Opcode::St8 | Opcode::St16 | Opcode::St32 | Opcode::St => {
                let top = match op.opc {
                    Opcode::St8 => TciOp::St8,
                    Opcode::St16 => TciOp::St16,
                    Opcode::St32 => TciOp::St32,
                    _ if w => TciOp::St64,
                    _ => TciOp::St32,
                };
                buf.emit_u32(Insn::new(top).w64(w).r0(reg(iargs[0])).r1(reg(iargs[1])).0);
                emit_offset(buf, cargs[0] as i32 as i64);
            }
            Opcode::QemuLd => {
                buf.emit_u32(Insn::new(TciOp::QemuLd).w64(w).r0(oregs[0]).r1(reg(iargs[0])).0);
                buf.emit_u32(cargs[0]);
            }
            Opcode::QemuSt => {
                let insn = Insn::new(TciOp::QemuSt)
                    .w64(w)
                    .r0(reg(iargs[0]))
                    .r1(reg(iargs[1]));
                buf.emit_u32(insn.0);
                buf.emit_u32(cargs[0]);
            }
            Opcode::AtomicRmw => {
                let insn = Insn::new(TciOp::AtomicRmw)
                    .w64(w)
                    .aux(cargs[1])
                    .r0(oregs[0])
                    .r1(reg(iargs[0]))
                    .r2(reg(iargs[1]));
                buf.emit_u32(insn.0);
                buf.emit_u32(cargs[0]);
            }
            Opcode::AtomicCmpxchg => {
                let insn = Insn::new(TciOp::AtomicCmpxchg)
                    .w64(w)
                    .r0(oregs[0])
                    .r1(reg(iargs[0]))
                    .r2(reg(iargs[1]));
                buf.emit_u32(insn.0);
                buf.emit_u32(regs_word(reg(iargs[2]), 0));
                buf.emit_u32(cargs[0]);
            }
            Opcode::Br => {
                buf.emit_u32(Insn::new(TciOp::Br).0);
                buf.emit_u32(label_target(ctx, cargs[0]));
            }
            Opcode::BrCond => {
                let insn = Insn::new(TciOp::BrCond).w64(w).aux(cargs[0]);
                match iargs[1] {
                    HostArg::Reg(b) => buf.emit_u32(insn.r0(reg(iargs[0])).r1(b).0),
                    HostArg::Imm(v) => {
                        buf.emit_u32(insn.r0(reg(iargs[0])).imm().0);
                        buf.emit_u32(v as u32);
                    }
                }
                buf.emit_u32(label_target(ctx, cargs[1]));
            }
            Opcode::GotoTb => {
                let slot = cargs[0] as usize;
                buf.emit_u32(Insn::new(TciOp::GotoTb).0);
                let word = buf.offset();
                // Unlinked, the slot falls through to the next insn.
                let reset = word + 4;
                buf.emit_u32(reset as u32);
                buf.goto_tb[slot] = Some((word, reset));
            }
            Opcode::ExitTb => {
                buf.emit_u32(Insn::new(TciOp::ExitTb).0);
                buf.emit_u64(encode_tb_exit(ctx.tb_idx, cargs[0]));
            }
            Opcode::Trap => {
                buf.emit_u32(Insn::new(TciOp::Trap).0);
                buf.emit_u32(cargs[0]);
                buf.emit_u32(cargs[1]);
                buf.emit_u32(cargs[2]);
            }
            Opcode::Mb => buf.emit_u32(Insn::new(TciOp::Mb).0),
            Opcode::Call => {
                buf.emit_u32(Insn::new(TciOp::Call).0);
                buf.emit_u32(cargs[0]);
            }
            Opcode::Mov
            | Opcode::SetLabel
            | Opcode::Nop
            | Opcode::Discard
            | Opcode::InsnStart
            | Opcode::Count => {
                panic!("{} is handled by the register allocator", op.opc.def().name)
            }
        }
    }

    fn patch_label(&self, buf: &mut CodeWriter, at: LabelUse, target: usize) {
        buf.patch_u32(at.offset, target as u32);
    }

    fn patch_jump(&self, code: &CodeBuffer, jump_offset: usize, target_offset: usize) {
        code.patch_u32_atomic(jump_offset, target_offset as u32);
    }

    unsafe fn tb_exec(
        &self,
        code: &CodeBuffer,
        tb_offset: usize,
        env: *mut u8,
        rt: &mut dyn TbRuntime,
    ) -> TbReturn {
        crate::tci::interp::tci_exec(code, tb_offset, env, rt)
    }
}
