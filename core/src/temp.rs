use crate::types::{TempVal, Type};

/// How long a temp's value is meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TempKind {
    /// Dies at the next label or branch.
    Ebb,
    /// Valid anywhere in the block.
    Tb,
    /// A field of the guest CPU state, valid across blocks.
    Global,
    /// Lives in one host register for the whole run.
    Fixed,
    Const,
}

/// Handle to a temp in a [`Context`](crate::Context).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TempIdx(pub u32);

/// An IR value slot together with the allocator's bookkeeping for it.
#[derive(Debug, Clone)]
pub struct Temp {
    pub idx: TempIdx,
    pub ty: Type,
    pub kind: TempKind,

    pub val_type: TempVal,
    /// Host register holding the value when `val_type` is `Reg`.
    pub reg: Option<u8>,
    /// Memory slot agrees with the register copy.
    pub mem_coherent: bool,
    pub mem_allocated: bool,

    /// Value of a `Const` temp.
    pub val: u64,
    /// Base temp of the memory slot: the env for globals, the frame
    /// pointer for spilled locals.
    pub mem_base: Option<TempIdx>,
    /// Offset of the memory slot from `mem_base`.
    pub mem_offset: i64,

    /// Name shown in IR dumps.
    pub name: Option<&'static str>,
}

impl Temp {
    fn blank(idx: TempIdx, ty: Type, kind: TempKind) -> Self {
        Temp {
            idx,
            ty,
            kind,
            val_type: TempVal::Dead,
            reg: None,
            mem_coherent: false,
            mem_allocated: false,
            val: 0,
            mem_base: None,
            mem_offset: 0,
            name: None,
        }
    }

    pub fn new_ebb(idx: TempIdx, ty: Type) -> Self {
        Self::blank(idx, ty, TempKind::Ebb)
    }

    pub fn new_tb(idx: TempIdx, ty: Type) -> Self {
        Self::blank(idx, ty, TempKind::Tb)
    }

    pub fn new_const(idx: TempIdx, ty: Type, val: u64) -> Self {
        Temp {
            val_type: TempVal::Const,
            val: val & ty.mask(),
            ..Self::blank(idx, ty, TempKind::Const)
        }
    }

    pub fn new_global(idx: TempIdx, ty: Type, base: TempIdx, offset: i64, name: &'static str) -> Self {
        Temp {
            val_type: TempVal::Mem,
            mem_coherent: true,
            mem_allocated: true,
            mem_base: Some(base),
            mem_offset: offset,
            name: Some(name),
            ..Self::blank(idx, ty, TempKind::Global)
        }
    }

    pub fn new_fixed(idx: TempIdx, ty: Type, reg: u8, name: &'static str) -> Self {
        Temp {
            val_type: TempVal::Reg,
            reg: Some(reg),
            name: Some(name),
            ..Self::blank(idx, ty, TempKind::Fixed)
        }
    }

    pub fn is_const(&self) -> bool {
        self.kind == TempKind::Const
    }

    pub fn is_global(&self) -> bool {
        self.kind == TempKind::Global
    }

    pub fn is_fixed(&self) -> bool {
        self.kind == TempKind::Fixed
    }

    /// Backed by guest state or a host register rather than the frame.
    pub fn is_global_or_fixed(&self) -> bool {
        matches!(self.kind, TempKind::Global | TempKind::Fixed)
    }
}
