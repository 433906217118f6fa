use crate::opcode::Opcode;
use crate::temp::TempIdx;
use crate::types::{RegSet, Type};

/// Upper bound on arguments of any op (`call` is the widest).
pub const MAX_OP_ARGS: usize = 10;

/// Position of an op in its context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpIdx(pub u32);

/// Per-argument liveness bits, two per argument: bit `2n` says
/// argument `n` dies here, bit `2n + 1` that it must be written back to
/// its memory slot after the op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LifeData(pub u32);

impl LifeData {
    pub const fn dead_arg(n: u32) -> u32 {
        1 << (2 * n)
    }

    pub const fn sync_arg(n: u32) -> u32 {
        Self::dead_arg(n) << 1
    }

    pub fn is_dead(&self, n: u32) -> bool {
        self.0 & Self::dead_arg(n) != 0
    }

    pub fn is_sync(&self, n: u32) -> bool {
        self.0 & Self::sync_arg(n) != 0
    }

    pub fn set_dead(&mut self, n: u32) {
        self.0 |= Self::dead_arg(n);
    }

    pub fn set_sync(&mut self, n: u32) {
        self.0 |= Self::sync_arg(n);
    }
}

/// One IR instruction. Arguments are laid out outputs first, then
/// inputs, then constants; constants are stored as raw `TempIdx`
/// values.
#[derive(Debug, Clone)]
pub struct Op {
    pub idx: OpIdx,
    pub opc: Opcode,
    pub op_type: Type,
    pub life: LifeData,
    /// Register hints for the outputs, filled by liveness.
    pub output_pref: [RegSet; 2],
    pub args: [TempIdx; MAX_OP_ARGS],
    pub nargs: u8,
}

impl Op {
    pub fn new(idx: OpIdx, opc: Opcode, op_type: Type) -> Self {
        Op {
            idx,
            opc,
            op_type,
            life: LifeData::default(),
            output_pref: [RegSet::EMPTY; 2],
            args: [TempIdx(0); MAX_OP_ARGS],
            nargs: 0,
        }
    }

    pub fn with_args(idx: OpIdx, opc: Opcode, op_type: Type, args: &[TempIdx]) -> Self {
        let def = opc.def();
        debug_assert_eq!(args.len(), def.nb_args() as usize, "arity of {}", def.name);
        let mut op = Op::new(idx, opc, op_type);
        let n = args.len().min(MAX_OP_ARGS);
        op.args[..n].copy_from_slice(&args[..n]);
        op.nargs = n as u8;
        op
    }

    fn arg_range(&self, skip: u8, take: u8) -> &[TempIdx] {
        let start = skip as usize;
        &self.args[start..start + take as usize]
    }

    pub fn oargs(&self) -> &[TempIdx] {
        let def = self.opc.def();
        self.arg_range(0, def.nb_oargs)
    }

    pub fn iargs(&self) -> &[TempIdx] {
        let def = self.opc.def();
        self.arg_range(def.nb_oargs, def.nb_iargs)
    }

    pub fn cargs(&self) -> &[TempIdx] {
        let def = self.opc.def();
        self.arg_range(def.nb_oargs + def.nb_iargs, def.nb_cargs)
    }

    /// Constant argument `n` as a raw value.
    pub fn carg(&self, n: usize) -> u32 {
        self.cargs()[n].0
    }
}
