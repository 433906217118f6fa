use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Stable handle to a TB slot in the translation cache arena.
///
/// The generation distinguishes successive occupants of the same
/// slot, so a stale handle never aliases a newer TB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TbId {
    pub index: u32,
    pub gen: u32,
}

/// Chaining state of a TB, guarded by the TB's `jmp` lock.
#[derive(Debug, Default)]
pub struct TbJmpState {
    /// Destination TB of each patched `goto_tb` slot.
    pub jmp_dest: [Option<TbId>; 2],
    /// Incoming edges: `(source TB, slot)` pairs that jump here.
    pub jmp_list: Vec<(TbId, usize)>,
    /// Last successor reached through a NOCHAIN (indirect) exit.
    pub exit_target: Option<TbId>,
}

/// A cached translated code block.
///
/// The mapping from a guest code
/// range, under given mode flags and mapping epoch, to generated
/// host code.
#[derive(Debug)]
pub struct TranslationBlock {
    pub id: TbId,
    /// Guest virtual pc where this TB starts.
    pub pc: u64,
    /// CPU state flags that affect translation (privilege level).
    pub flags: u32,
    /// Address-space mapping epoch the TB was translated under.
    pub epoch: u64,
    /// Guest physical address of the first instruction.
    pub phys_pc: u64,
    /// Size of guest code covered by this TB, in bytes.
    pub size: u32,
    /// Number of guest instructions in this TB.
    pub icount: u16,

    /// Offset into the shared code buffer where host code starts.
    pub host_offset: usize,
    /// Size of generated host code in bytes.
    pub host_size: usize,
    /// Code buffer region holding the host code.
    pub region: usize,

    /// Offset of the patchable target word of each `goto_tb` slot.
    pub jmp_insn_offset: [Option<u32>; 2],
    /// Code offset the slot falls through to when unlinked.
    pub jmp_reset_offset: [Option<u32>; 2],

    /// `(host offset relative to host_offset, guest pc)` per guest
    /// instruction, ascending. Used to restore the pc of a fault.
    pub insn_search: Vec<(u32, u64)>,

    invalid: AtomicBool,
    pub jmp: Mutex<TbJmpState>,
}

impl TranslationBlock {
    pub fn new(id: TbId, pc: u64, flags: u32, epoch: u64) -> Self {
        Self {
            id,
            pc,
            flags,
            epoch,
            phys_pc: 0,
            size: 0,
            icount: 0,
            host_offset: 0,
            host_size: 0,
            region: 0,
            jmp_insn_offset: [None; 2],
            jmp_reset_offset: [None; 2],
            insn_search: Vec::new(),
            invalid: AtomicBool::new(false),
            jmp: Mutex::new(TbJmpState::default()),
        }
    }

    pub fn matches(&self, pc: u64, flags: u32, epoch: u64) -> bool {
        self.pc == pc && self.flags == flags && self.epoch == epoch
    }

    pub fn is_invalid(&self) -> bool {
        self.invalid.load(Ordering::Acquire)
    }

    pub fn set_invalid(&self) {
        self.invalid.store(true, Ordering::Release);
    }

    /// Whether the TB's guest bytes overlap `[start, start + len)`.
    pub fn overlaps_phys(&self, start: u64, len: u64) -> bool {
        let end = start.saturating_add(len);
        let tb_end = self.phys_pc + self.size.max(1) as u64;
        self.phys_pc < end && start < tb_end
    }

    /// Whether `host_off` (absolute buffer offset) falls in this TB.
    pub fn contains_host(&self, host_off: usize) -> bool {
        host_off >= self.host_offset
            && host_off < self.host_offset + self.host_size
    }

    /// Guest pc of the instruction whose host code contains `host_off`.
    pub fn restore_pc(&self, host_off: usize) -> u64 {
        let rel = host_off.saturating_sub(self.host_offset) as u32;
        let i = self.insn_search.partition_point(|&(off, _)| off <= rel);
        if i == 0 {
            self.pc
        } else {
            self.insn_search[i - 1].1
        }
    }
}

// -- TB exit protocol --

/// `exit_tb` codes 0 and 1 name the `goto_tb` slot that was taken.
pub const TB_EXIT_IDX0: u32 = 0;
pub const TB_EXIT_IDX1: u32 = 1;
/// Indirect exit: the guest pc is in the env, no slot to chain.
pub const TB_EXIT_NOCHAIN: u32 = 2;
/// An exit request was observed at TB entry; nothing executed.
pub const TB_EXIT_REQUESTED: u32 = 3;
/// The guest halted until the next interrupt (e.g. `wfi`).
pub const TB_EXIT_HALT: u32 = 4;

const TB_EXIT_BITS: u32 = 3;

/// Pack the exiting TB's arena index with an exit code.
pub const fn encode_tb_exit(tb_idx: u32, code: u32) -> u64 {
    ((tb_idx as u64) << TB_EXIT_BITS) | code as u64
}

/// Split an `exit_tb` value into `(tb_idx, code)`.
pub const fn decode_tb_exit(val: u64) -> (u32, u32) {
    (
        (val >> TB_EXIT_BITS) as u32,
        (val & ((1 << TB_EXIT_BITS) - 1)) as u32,
    )
}

/// Number of entries in the per-CPU jump cache.
pub const TB_JMP_CACHE_SIZE: usize = 1 << 12;

/// Per-CPU direct-mapped TB jump cache.
///
/// Indexed by `(pc >> 2) & (TB_JMP_CACHE_SIZE - 1)`. Entries are
/// hints: callers re-check the key and the `invalid` flag on a hit.
pub struct JumpCache {
    entries: Box<[Option<Arc<TranslationBlock>>]>,
}

impl JumpCache {
    pub fn new() -> Self {
        Self {
            entries: vec![None; TB_JMP_CACHE_SIZE].into_boxed_slice(),
        }
    }

    fn index(pc: u64) -> usize {
        (pc as usize >> 2) & (TB_JMP_CACHE_SIZE - 1)
    }

    pub fn lookup(
        &self,
        pc: u64,
        flags: u32,
        epoch: u64,
    ) -> Option<&Arc<TranslationBlock>> {
        let tb = self.entries[Self::index(pc)].as_ref()?;
        if tb.matches(pc, flags, epoch) && !tb.is_invalid() {
            Some(tb)
        } else {
            None
        }
    }

    pub fn insert(&mut self, tb: Arc<TranslationBlock>) {
        let i = Self::index(tb.pc);
        self.entries[i] = Some(tb);
    }

    pub fn invalidate(&mut self) {
        self.entries.fill(None);
    }
}

impl Default for JumpCache {
    fn default() -> Self {
        Self::new()
    }
}
