//! Forward IR optimizer.
//!
//! One pass over the op list tracks, per temp, whether its value is a
//! known constant or a copy of another temp. With that it folds
//! constant expressions, forwards copies into inputs, applies the
//! usual algebraic identities and turns constant `brcond`s into `br`
//! or `nop`. Knowledge is dropped at labels, branches, block exits
//! and helper calls. Dead movs left behind are removed by liveness.

use xlat_core::op::OpIdx;
use xlat_core::opcode::{OpFlags, Opcode};
use xlat_core::temp::TempIdx;
use xlat_core::types::{Cond, Type};
use xlat_core::Context;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Known {
    #[default]
    Nothing,
    Const(u64),
    CopyOf(TempIdx),
}

/// What an op is rewritten into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rewrite {
    Const(u64),
    Mov(TempIdx),
    Neg(TempIdx),
    Keep,
}

struct Optimizer {
    known: Vec<Known>,
}

impl Optimizer {
    fn new(ctx: &Context) -> Self {
        let known = ctx
            .temps()
            .iter()
            .map(|t| if t.is_const() { Known::Const(t.val) } else { Known::Nothing })
            .collect();
        Self { known }
    }

    fn get(&self, t: TempIdx) -> Known {
        self.known.get(t.0 as usize).copied().unwrap_or_default()
    }

    fn constant(&self, t: TempIdx) -> Option<u64> {
        match self.get(t) {
            Known::Const(v) => Some(v),
            _ => None,
        }
    }

    fn slot(&mut self, t: TempIdx) -> &mut Known {
        let i = t.0 as usize;
        if i >= self.known.len() {
            self.known.resize(i + 1, Known::Nothing);
        }
        &mut self.known[i]
    }

    /// `t` is about to be redefined.
    fn forget(&mut self, ctx: &Context, t: TempIdx) {
        if ctx.temp(t).is_const() {
            return;
        }
        *self.slot(t) = Known::Nothing;
        for k in self.known.iter_mut() {
            if *k == Known::CopyOf(t) {
                *k = Known::Nothing;
            }
        }
    }

    /// Control may arrive from elsewhere: keep only real constants.
    fn forget_all(&mut self, ctx: &Context) {
        for (i, k) in self.known.iter_mut().enumerate() {
            let keep = i < ctx.nb_temps() as usize && ctx.temp(TempIdx(i as u32)).is_const();
            if !keep {
                *k = Known::Nothing;
            }
        }
    }

    fn set_const(&mut self, ctx: &Context, t: TempIdx, val: u64) {
        self.forget(ctx, t);
        *self.slot(t) = Known::Const(val);
    }

    fn set_copy(&mut self, ctx: &Context, dst: TempIdx, src: TempIdx) {
        if dst == src {
            return;
        }
        let k = match self.get(src) {
            Known::Const(v) => Known::Const(v),
            _ => Known::CopyOf(src),
        };
        self.forget(ctx, dst);
        *self.slot(dst) = k;
    }

    fn run(&mut self, ctx: &mut Context) {
        for i in 0..ctx.num_ops() {
            self.visit(ctx, OpIdx(i as u32));
        }
    }

    fn visit(&mut self, ctx: &mut Context, idx: OpIdx) {
        let opc = ctx.op(idx).opc;
        let def = opc.def();

        if matches!(
            opc,
            Opcode::SetLabel
                | Opcode::Br
                | Opcode::ExitTb
                | Opcode::GotoTb
                | Opcode::Trap
                | Opcode::Call
        ) {
            self.forget_outputs(ctx, idx);
            self.forget_all(ctx);
            return;
        }
        if def.flags.contains(OpFlags::SIDE_EFFECTS)
            || matches!(opc, Opcode::Nop | Opcode::Mb | Opcode::InsnStart | Opcode::Discard)
        {
            self.forget_outputs(ctx, idx);
            return;
        }

        // Forward copies into the inputs.
        let first = def.nb_oargs as usize;
        for slot in first..first + def.nb_iargs as usize {
            let t = ctx.op(idx).args[slot];
            if let Known::CopyOf(src) = self.get(t) {
                ctx.op_mut(idx).args[slot] = src;
            }
        }

        let op = ctx.op(idx);
        let ty = op.op_type;
        let args = op.args;
        let dst = args[0];
        let rewrite = match opc {
            Opcode::Mov => {
                self.set_copy(ctx, dst, args[1]);
                return;
            }
            Opcode::Neg | Opcode::Not => match self.constant(args[1]) {
                Some(v) if opc == Opcode::Neg => Rewrite::Const(v.wrapping_neg()),
                Some(v) => Rewrite::Const(!v),
                None => Rewrite::Keep,
            },
            Opcode::ExtI32I64 | Opcode::ExtUI32I64 | Opcode::ExtrlI64I32 | Opcode::ExtrhI64I32 => {
                match self.constant(args[1]) {
                    Some(v) => Rewrite::Const(eval_conversion(opc, v)),
                    None => Rewrite::Keep,
                }
            }
            Opcode::SetCond | Opcode::NegSetCond => {
                let cond = Cond::from_u32(args[3].0);
                match (cond, self.constant(args[1]), self.constant(args[2])) {
                    (Some(cond), Some(a), Some(b)) => {
                        let bit = cond.eval(ty, a, b) as u64;
                        Rewrite::Const(if opc == Opcode::NegSetCond { bit.wrapping_neg() } else { bit })
                    }
                    _ => Rewrite::Keep,
                }
            }
            Opcode::BrCond => {
                self.fold_brcond(ctx, idx);
                return;
            }
            _ if is_foldable_binary(opc) => {
                let (a, b) = (args[1], args[2]);
                simplify_binary(opc, ty, a, b, self.constant(a), self.constant(b))
            }
            _ => Rewrite::Keep,
        };
        self.apply(ctx, idx, dst, ty, rewrite);
    }

    fn apply(&mut self, ctx: &mut Context, idx: OpIdx, dst: TempIdx, ty: Type, rw: Rewrite) {
        match rw {
            Rewrite::Const(v) => {
                let v = v & ty.mask();
                let c = ctx.new_const(ty, v);
                *self.slot(c) = Known::Const(v);
                set_unary(ctx, idx, Opcode::Mov, dst, c);
                self.set_const(ctx, dst, v);
            }
            Rewrite::Mov(src) => {
                set_unary(ctx, idx, Opcode::Mov, dst, src);
                self.set_copy(ctx, dst, src);
            }
            Rewrite::Neg(src) => {
                set_unary(ctx, idx, Opcode::Neg, dst, src);
                self.forget(ctx, dst);
            }
            Rewrite::Keep => self.forget_outputs(ctx, idx),
        }
    }

    /// `brcond a, b, cond, label` with both inputs known.
    fn fold_brcond(&mut self, ctx: &mut Context, idx: OpIdx) {
        let op = ctx.op(idx);
        let (ty, args) = (op.op_type, op.args);
        let (Some(a), Some(b), Some(cond)) = (
            self.constant(args[0]),
            self.constant(args[1]),
            Cond::from_u32(args[2].0),
        ) else {
            return;
        };
        let op = ctx.op_mut(idx);
        if cond.eval(ty, a, b) {
            op.opc = Opcode::Br;
            op.args[0] = args[3];
            op.nargs = 1;
            self.forget_all(ctx);
        } else {
            op.opc = Opcode::Nop;
            op.nargs = 0;
        }
    }

    fn forget_outputs(&mut self, ctx: &Context, idx: OpIdx) {
        let op = ctx.op(idx);
        let n = op.opc.def().nb_oargs as usize;
        let outs = op.args;
        for &t in &outs[..n] {
            self.forget(ctx, t);
        }
    }
}

fn set_unary(ctx: &mut Context, idx: OpIdx, opc: Opcode, dst: TempIdx, src: TempIdx) {
    let op = ctx.op_mut(idx);
    op.opc = opc;
    op.args[0] = dst;
    op.args[1] = src;
    op.nargs = 2;
}

fn is_foldable_binary(opc: Opcode) -> bool {
    matches!(
        opc,
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
    )
}

fn eval_conversion(opc: Opcode, v: u64) -> u64 {
    match opc {
        Opcode::ExtI32I64 => v as u32 as i32 as i64 as u64,
        Opcode::ExtrhI64I32 => v >> 32,
        _ => v & 0xffff_ffff,
    }
}

/// Result of a foldable binary op on constants. Shift counts wrap at
/// the operand width, as the interpreter does.
fn eval_binary(opc: Opcode, ty: Type, a: u64, b: u64) -> u64 {
    let mask = ty.mask();
    let (a, b) = (a & mask, b & mask);
    let sh = (b as u32) % ty.size_bits();
    let narrow = ty == Type::I32;
    let r = match opc {
        Opcode::Add => a.wrapping_add(b),
        Opcode::Sub => a.wrapping_sub(b),
        Opcode::Mul => a.wrapping_mul(b),
        Opcode::And => a & b,
        Opcode::Or => a | b,
        Opcode::Xor => a ^ b,
        Opcode::AndC => a & !b,
        Opcode::OrC => a | !b,
        Opcode::Eqv => !(a ^ b),
        Opcode::Nand => !(a & b),
        Opcode::Nor => !(a | b),
        Opcode::Shl => a << sh,
        Opcode::Shr => a >> sh,
        Opcode::Sar if narrow => ((a as i32) >> sh) as u64,
        Opcode::Sar => ((a as i64) >> sh) as u64,
        Opcode::RotL if narrow => (a as u32).rotate_left(sh) as u64,
        Opcode::RotL => a.rotate_left(sh),
        Opcode::RotR if narrow => (a as u32).rotate_right(sh) as u64,
        Opcode::RotR => a.rotate_right(sh),
        _ => unreachable!("{opc:?} is not foldable"),
    };
    r & mask
}

/// Constant folding and the identities that hold with one known
/// operand or with both operands the same temp.
fn simplify_binary(
    opc: Opcode,
    ty: Type,
    a: TempIdx,
    b: TempIdx,
    ka: Option<u64>,
    kb: Option<u64>,
) -> Rewrite {
    let ones = ty.mask();
    let ka = ka.map(|v| v & ones);
    let kb = kb.map(|v| v & ones);
    if let (Some(x), Some(y)) = (ka, kb) {
        return Rewrite::Const(eval_binary(opc, ty, x, y));
    }
    if let Some(y) = kb {
        match (opc, y) {
            (
                Opcode::Add
                | Opcode::Sub
                | Opcode::Or
                | Opcode::Xor
                | Opcode::Shl
                | Opcode::Shr
                | Opcode::Sar
                | Opcode::RotL
                | Opcode::RotR,
                0,
            ) => return Rewrite::Mov(a),
            (Opcode::Mul | Opcode::And, 0) => return Rewrite::Const(0),
            (Opcode::Mul, 1) => return Rewrite::Mov(a),
            (Opcode::And, y) if y == ones => return Rewrite::Mov(a),
            (Opcode::Or, y) if y == ones => return Rewrite::Const(ones),
            (Opcode::AndC, y) if y == ones => return Rewrite::Const(0),
            _ => {}
        }
    }
    if let Some(x) = ka {
        match (opc, x) {
            (Opcode::Add, 0) => return Rewrite::Mov(b),
            (Opcode::Sub, 0) => return Rewrite::Neg(b),
            (Opcode::Mul | Opcode::And, 0) => return Rewrite::Const(0),
            (Opcode::Mul, 1) => return Rewrite::Mov(b),
            (Opcode::Or, x) if x == ones => return Rewrite::Const(ones),
            _ => {}
        }
    }
    if a == b {
        match opc {
            Opcode::And | Opcode::Or => return Rewrite::Mov(a),
            Opcode::Xor | Opcode::Sub | Opcode::AndC => return Rewrite::Const(0),
            _ => {}
        }
    }
    Rewrite::Keep
}

/// Run the optimizer over every op in `ctx`.
pub fn optimize(ctx: &mut Context) {
    Optimizer::new(ctx).run(ctx);
}
