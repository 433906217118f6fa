//! Branch targets inside one translation block.

/// Where a branch stores its label's target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    /// 32-bit word holding the absolute code buffer offset of the target.
    Abs32,
}

/// A branch emitted before its label was placed.
#[derive(Debug, Clone, Copy)]
pub struct LabelUse {
    /// Code buffer offset of the field to patch.
    pub offset: usize,
    pub kind: RelocKind,
}

/// A branch target. Branches may refer to a label before `set_label`
/// places it; such references queue up until the label is bound.
#[derive(Debug, Clone)]
pub struct Label {
    pub id: u32,
    target: Option<usize>,
    pending: Vec<LabelUse>,
}

impl Label {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            target: None,
            pending: Vec::new(),
        }
    }

    /// Host code offset of the label, once placed.
    pub fn target(&self) -> Option<usize> {
        self.target
    }

    pub fn is_bound(&self) -> bool {
        self.target.is_some()
    }

    pub fn add_use(&mut self, offset: usize, kind: RelocKind) {
        self.pending.push(LabelUse { offset, kind });
    }

    /// Place the label at `offset` and hand back the references that
    /// were waiting for it.
    pub fn bind(&mut self, offset: usize) -> Vec<LabelUse> {
        self.target = Some(offset);
        std::mem::take(&mut self.pending)
    }

    /// Whether some branch still waits for this label.
    pub fn has_pending_uses(&self) -> bool {
        !self.pending.is_empty()
    }
}
