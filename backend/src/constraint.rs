use xlat_core::op::MAX_OP_ARGS;
use xlat_core::{RegSet, ALL_OPCODES};

use crate::HostCodeGen;

/// Constants an argument slot accepts directly as an immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstClass {
    /// Constants must be loaded into a register.
    None,
    /// Values that sign-extend from 32 bits.
    I32,
}

impl ConstClass {
    /// Whether `val` (masked to the op type) may be passed as an
    /// immediate.
    pub fn accepts(self, val: u64, is64: bool) -> bool {
        match self {
            ConstClass::None => false,
            ConstClass::I32 => {
                if is64 {
                    val as i64 == val as i32 as i64
                } else {
                    true
                }
            }
        }
    }
}

/// Constraint for a single argument of an IR op.
///
/// The set of host registers an
/// argument may live in, plus the class of constants the host can
/// encode in its place.
#[derive(Debug, Clone, Copy)]
pub struct ArgConstraint {
    /// Allowed host registers for this argument.
    pub regs: RegSet,
    pub ct_const: ConstClass,
}

impl ArgConstraint {
    pub const UNUSED: Self = Self {
        regs: RegSet::EMPTY,
        ct_const: ConstClass::None,
    };
}

/// Per-opcode constraint descriptor.
///
/// Outputs come first, then inputs.
#[derive(Debug, Clone, Copy)]
pub struct OpConstraint {
    pub args: [ArgConstraint; MAX_OP_ARGS],
}

impl OpConstraint {
    pub const EMPTY: Self = Self {
        args: [ArgConstraint::UNUSED; MAX_OP_ARGS],
    };
}

// -- Argument builders --

/// Register constraint (any reg in `regs`).
pub const fn r(regs: RegSet) -> ArgConstraint {
    ArgConstraint {
        regs,
        ct_const: ConstClass::None,
    }
}

/// Register, or a constant that sign-extends from 32 bits.
pub const fn ri(regs: RegSet) -> ArgConstraint {
    ArgConstraint {
        regs,
        ct_const: ConstClass::I32,
    }
}

// -- OpConstraint builders --

const fn build(list: &[ArgConstraint]) -> OpConstraint {
    let mut args = [ArgConstraint::UNUSED; MAX_OP_ARGS];
    let mut i = 0;
    while i < list.len() {
        args[i] = list[i];
        i += 1;
    }
    OpConstraint { args }
}

/// 1 output, 1 input.
pub const fn o1_i1(o0: RegSet, i0: RegSet) -> OpConstraint {
    build(&[r(o0), r(i0)])
}

/// 1 output, 2 inputs.
pub const fn o1_i2(o0: RegSet, i0: RegSet, i1: RegSet) -> OpConstraint {
    build(&[r(o0), r(i0), r(i1)])
}

/// 1 output, 2 inputs, the second may be an immediate.
pub const fn o1_i2i(o0: RegSet, i0: RegSet, i1: RegSet) -> OpConstraint {
    build(&[r(o0), r(i0), ri(i1)])
}

/// 1 output, 3 inputs.
pub const fn o1_i3(o0: RegSet, i0: RegSet, i1: RegSet, i2: RegSet) -> OpConstraint {
    build(&[r(o0), r(i0), r(i1), r(i2)])
}

/// 1 output, 4 inputs (movcond).
pub const fn o1_i4(
    o0: RegSet,
    i0: RegSet,
    i1: RegSet,
    i2: RegSet,
    i3: RegSet,
) -> OpConstraint {
    build(&[r(o0), r(i0), r(i1), r(i2), r(i3)])
}

/// 0 outputs, 2 inputs.
pub const fn o0_i2(i0: RegSet, i1: RegSet) -> OpConstraint {
    build(&[r(i0), r(i1)])
}

/// 0 outputs, 2 inputs, the second may be an immediate.
pub const fn o0_i2i(i0: RegSet, i1: RegSet) -> OpConstraint {
    build(&[r(i0), ri(i1)])
}

/// Check that `backend` provides a usable constraint for every opcode
/// that reaches host code emission.
///
/// Returns the names of the offending opcodes.
pub fn validate_constraints(backend: &dyn HostCodeGen) -> Result<(), Vec<&'static str>> {
    let allocatable = backend.allocatable_regs();
    let mut missing = Vec::new();
    for &opc in ALL_OPCODES.iter().filter(|o| o.needs_lowering()) {
        let def = opc.def();
        let ct = backend.op_constraint(opc);
        let nargs = (def.nb_oargs + def.nb_iargs) as usize;
        let ok = ct.args[..nargs]
            .iter()
            .all(|a| !a.regs.intersect(allocatable).is_empty());
        if !ok {
            missing.push(def.name);
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(missing)
    }
}

