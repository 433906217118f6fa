//! Textual IR listing.
//!
//! One line per op, with block headers at guest instruction
//! boundaries. The text depends only on the op list, so two dumps of
//! the same translation compare equal.

use std::fmt::{self, Display, Formatter};

use crate::context::Context;
use crate::op::Op;
use crate::opcode::Opcode;
use crate::temp::{TempIdx, TempKind};
use crate::types::{Cond, MemOpIdx, Type};

fn cond_name(raw: u32) -> &'static str {
    match Cond::from_u32(raw) {
        Some(Cond::Never) => "never",
        Some(Cond::Always) => "always",
        Some(Cond::Eq) => "eq",
        Some(Cond::Ne) => "ne",
        Some(Cond::Lt) => "lt",
        Some(Cond::Ge) => "ge",
        Some(Cond::Le) => "le",
        Some(Cond::Gt) => "gt",
        Some(Cond::Ltu) => "ltu",
        Some(Cond::Geu) => "geu",
        Some(Cond::Leu) => "leu",
        Some(Cond::Gtu) => "gtu",
        Some(Cond::TstEq) => "tsteq",
        Some(Cond::TstNe) => "tstne",
        None => "???",
    }
}

/// A temp operand as it appears in the listing.
struct Operand<'a>(&'a Context, TempIdx);

impl Display for Operand<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let Operand(ctx, idx) = *self;
        if idx.0 >= ctx.nb_temps() {
            return write!(f, "$0x{:x}", idx.0);
        }
        let t = ctx.temp(idx);
        match (t.kind, t.name) {
            (TempKind::Const, _) => write!(f, "$0x{:x}", t.val),
            (TempKind::Global | TempKind::Fixed, Some(name)) => f.write_str(name),
            (TempKind::Global, None) => write!(f, "g{}", idx.0),
            (TempKind::Fixed, None) => write!(f, "fixed({})", t.reg.unwrap_or(0)),
            (TempKind::Ebb | TempKind::Tb, _) => write!(f, "tmp{}", idx.0 - ctx.nb_globals()),
        }
    }
}

/// Constant arguments, formatted per opcode.
fn write_cargs(f: &mut Formatter<'_>, op: &Op, after_operand: bool) -> fmt::Result {
    let c: Vec<u32> = op.cargs().iter().map(|t| t.0).collect();
    match op.opc {
        Opcode::BrCond => write!(f, ", {}, L{}", cond_name(c[0]), c[1]),
        Opcode::SetCond | Opcode::NegSetCond | Opcode::MovCond => {
            write!(f, ", {}", cond_name(c[0]))
        }
        Opcode::Br => write!(f, " L{}", c[0]),
        Opcode::Call => write!(f, ", helper{}, $0x{:x}", c[0], c[1]),
        Opcode::QemuLd | Opcode::QemuSt | Opcode::AtomicCmpxchg | Opcode::AtomicRmw => {
            let oi = MemOpIdx::from_raw(c[0]);
            write!(f, ", mo$0x{:x}, mmu{}", oi.memop().bits(), oi.mmu_idx())?;
            if op.opc == Opcode::AtomicRmw {
                write!(f, ", rmw{}", c[1])?;
            }
            Ok(())
        }
        Opcode::Trap => {
            let tval = ((c[2] as u64) << 32) | c[1] as u64;
            write!(f, " cause{}, $0x{tval:x}", c[0])
        }
        _ => {
            for (i, v) in c.iter().enumerate() {
                let sep = if after_operand || i > 0 { "," } else { "" };
                write!(f, "{sep} $0x{v:x}")?;
            }
            Ok(())
        }
    }
}

fn write_op(f: &mut Formatter<'_>, ctx: &Context, op: &Op) -> fmt::Result {
    let c = op.cargs();
    match op.opc {
        Opcode::InsnStart => {
            let pc = ((c[1].0 as u64) << 32) | c[0].0 as u64;
            writeln!(f, " ---- 0x{pc:016x}")?;
            return writeln!(f, " insn_start $0x{pc:x}");
        }
        Opcode::SetLabel => return writeln!(f, " L{}:", c[0].0),
        _ => {}
    }

    write!(f, " {}", op.opc.def().name)?;
    if op.opc.is_int_polymorphic() {
        f.write_str(match op.op_type {
            Type::I32 => "_i32",
            Type::I64 => "_i64",
        })?;
    }
    let operands = op.oargs().iter().chain(op.iargs());
    let mut any = false;
    for (i, &t) in operands.enumerate() {
        let sep = if i > 0 { "," } else { "" };
        write!(f, "{sep} {}", Operand(ctx, t))?;
        any = true;
    }
    write_cargs(f, op, any)?;
    writeln!(f)
}

/// Displays every op of a context.
pub struct IrDump<'a>(pub &'a Context);

impl Display for IrDump<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.ops().iter().try_for_each(|op| write_op(f, self.0, op))
    }
}

pub fn dump_to_string(ctx: &Context) -> String {
    IrDump(ctx).to_string()
}
