use std::collections::HashMap;

use crate::label::Label;
use crate::op::{Op, OpIdx};
use crate::temp::{Temp, TempIdx, TempKind};
use crate::types::{RegSet, TempVal, Type};

/// Maximum number of temps per translation context.
pub const MAX_TEMPS: usize = 512;
/// Op count above which a front end must close the block at the next
/// instruction boundary. Leaves headroom for the largest single
/// guest instruction expansion.
pub const OPS_HIGH_WATER: usize = 4000;

/// Spill slots for locals, addressed from a fixed frame register.
#[derive(Debug, Default)]
struct SpillFrame {
    temp: Option<TempIdx>,
    start: i64,
    end: i64,
    next: i64,
}

impl SpillFrame {
    /// Reserve one 8-byte slot. Slots are full width so a temp can be
    /// reloaded with a 64-bit host load whatever its type.
    fn alloc(&mut self) -> i64 {
        let off = (self.next + 7) & !7;
        self.next = off + 8;
        assert!(self.next <= self.end, "spill area overflow");
        off
    }
}

/// Translation state for one block at a time: temps, ops, labels and
/// what the register allocator needs to know about the host.
///
/// Globals and fixed temps sit at the front of the temp pool and
/// survive [`Context::reset`]; everything else is per block.
pub struct Context {
    temps: Vec<Temp>,
    ops: Vec<Op>,
    labels: Vec<Label>,
    nb_globals: u32,
    consts: HashMap<(Type, u64), TempIdx>,
    frame: SpillFrame,
    env_temp: Option<TempIdx>,

    /// Registers the backend keeps for itself.
    pub reserved_regs: RegSet,

    /// `(host offset from the TB start, guest pc)` of every
    /// `insn_start`, recorded by the code generator.
    pub insn_offsets: Vec<(u32, u64)>,

    /// Arena index of the TB being generated, encoded into `exit_tb`
    /// return values.
    pub tb_idx: u32,
}

impl Context {
    pub fn new() -> Self {
        Self {
            temps: Vec::with_capacity(256),
            ops: Vec::with_capacity(512),
            labels: Vec::new(),
            nb_globals: 0,
            consts: HashMap::new(),
            frame: SpillFrame::default(),
            env_temp: None,
            reserved_regs: RegSet::EMPTY,
            insn_offsets: Vec::new(),
            tb_idx: 0,
        }
    }

    /// Start a new block. Globals stay registered but go back to
    /// living in memory.
    pub fn reset(&mut self) {
        self.temps.truncate(self.nb_globals as usize);
        for t in &mut self.temps {
            match t.kind {
                TempKind::Global => {
                    t.val_type = TempVal::Mem;
                    t.reg = None;
                    t.mem_coherent = true;
                }
                TempKind::Fixed => t.mem_coherent = false,
                _ => {}
            }
        }
        self.ops.clear();
        self.labels.clear();
        self.consts.clear();
        self.insn_offsets.clear();
        self.frame.next = self.frame.start;
    }

    /// Whether the current block has grown large enough that the
    /// front end should stop adding instructions.
    pub fn ops_budget_exceeded(&self) -> bool {
        self.ops.len() >= OPS_HIGH_WATER || self.temps.len() >= MAX_TEMPS
    }

    // -- Temps --

    pub fn nb_globals(&self) -> u32 {
        self.nb_globals
    }

    pub fn nb_temps(&self) -> u32 {
        self.temps.len() as u32
    }

    fn push_temp(&mut self, make: impl FnOnce(TempIdx) -> Temp) -> TempIdx {
        let idx = TempIdx(self.temps.len() as u32);
        self.temps.push(make(idx));
        idx
    }

    fn push_global(&mut self, make: impl FnOnce(TempIdx) -> Temp) -> TempIdx {
        assert_eq!(
            self.temps.len() as u32,
            self.nb_globals,
            "globals must be registered before any block temp"
        );
        self.nb_globals += 1;
        self.push_temp(make)
    }

    /// A temp that lives until the end of its extended basic block.
    pub fn new_temp(&mut self, ty: Type) -> TempIdx {
        self.push_temp(|idx| Temp::new_ebb(idx, ty))
    }

    /// A temp that stays valid across labels within the block.
    pub fn new_temp_tb(&mut self, ty: Type) -> TempIdx {
        self.push_temp(|idx| Temp::new_tb(idx, ty))
    }

    /// Constant temp, shared by every use of the same value and type.
    pub fn new_const(&mut self, ty: Type, val: u64) -> TempIdx {
        let val = val & ty.mask();
        if let Some(&t) = self.consts.get(&(ty, val)) {
            return t;
        }
        let t = self.push_temp(|idx| Temp::new_const(idx, ty, val));
        self.consts.insert((ty, val), t);
        t
    }

    /// Guest state kept in memory at `base + offset`; `base` is the
    /// env temp.
    pub fn new_global(&mut self, ty: Type, base: TempIdx, offset: i64, name: &'static str) -> TempIdx {
        self.push_global(|idx| Temp::new_global(idx, ty, base, offset, name))
    }

    /// A temp pinned to host register `reg`.
    pub fn new_fixed(&mut self, ty: Type, reg: u8, name: &'static str) -> TempIdx {
        self.push_global(|idx| Temp::new_fixed(idx, ty, reg, name))
    }

    pub fn temp(&self, idx: TempIdx) -> &Temp {
        &self.temps[idx.0 as usize]
    }

    pub fn temp_mut(&mut self, idx: TempIdx) -> &mut Temp {
        &mut self.temps[idx.0 as usize]
    }

    pub fn temps(&self) -> &[Temp] {
        &self.temps
    }

    /// Global and fixed temps.
    pub fn globals(&self) -> &[Temp] {
        &self.temps[..self.nb_globals as usize]
    }

    // -- Ops --

    pub fn emit_op(&mut self, op: Op) -> OpIdx {
        let idx = op.idx;
        self.ops.push(op);
        idx
    }

    pub fn next_op_idx(&self) -> OpIdx {
        OpIdx(self.ops.len() as u32)
    }

    pub fn op(&self, idx: OpIdx) -> &Op {
        &self.ops[idx.0 as usize]
    }

    pub fn op_mut(&mut self, idx: OpIdx) -> &mut Op {
        &mut self.ops[idx.0 as usize]
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn num_ops(&self) -> usize {
        self.ops.len()
    }

    // -- Labels --

    pub fn new_label(&mut self) -> u32 {
        let id = self.labels.len() as u32;
        self.labels.push(Label::new(id));
        id
    }

    pub fn label(&self, id: u32) -> &Label {
        &self.labels[id as usize]
    }

    pub fn label_mut(&mut self, id: u32) -> &mut Label {
        &mut self.labels[id as usize]
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    // -- Host frame and env --

    /// Spill slots live in `[start, start + size)` from register
    /// `reg`. Registers a fixed temp, so call it before creating
    /// globals.
    pub fn set_frame(&mut self, reg: u8, start: i64, size: i64) {
        if self.frame.temp.is_none() {
            self.frame.temp = Some(self.new_fixed(Type::I64, reg, "frame"));
        }
        self.frame.start = start;
        self.frame.end = start + size;
        self.frame.next = start;
    }

    /// Register the fixed temp for the env pointer held in `reg`.
    pub fn set_env(&mut self, reg: u8) {
        if self.env_temp.is_none() {
            self.env_temp = Some(self.new_fixed(Type::I64, reg, "env"));
        }
    }

    pub fn env(&self) -> TempIdx {
        match self.env_temp {
            Some(t) => t,
            None => panic!("backend did not register an env register"),
        }
    }

    /// Give a local temp its spill slot on first use. Returns the
    /// slot's offset from the frame register.
    pub fn alloc_temp_frame(&mut self, tidx: TempIdx) -> i64 {
        let t = self.temp(tidx);
        if t.mem_allocated {
            return t.mem_offset;
        }
        debug_assert!(!t.is_global_or_fixed(), "globals own their slot");
        let offset = self.frame.alloc();
        let base = self.frame.temp;
        let t = self.temp_mut(tidx);
        t.mem_allocated = true;
        t.mem_base = base;
        t.mem_offset = offset;
        offset
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
