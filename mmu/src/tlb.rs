//! Direct-mapped software TLB with a victim cache.
//!
//! Every entry caches one virtual page for one MMU index. The tag of
//! each access kind is the page address with slow-path flags in its
//! low bits, so the fast path is a single compare: a tag equal to the
//! page address means "plain RAM, go ahead".
//!
//! Entries are atomics: only the owning vCPU fills them, but any
//! thread may flush them or force stores into the slow path.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use xlat_core::AccessKind;

use crate::{NB_MMU_MODES, PAGE_BITS, PAGE_MASK};

/// Entry holds no translation for this access kind.
pub const TLB_INVALID: u64 = 1 << 0;
/// Page is device memory; every access takes the slow path.
pub const TLB_MMIO: u64 = 1 << 1;
/// Page holds translated code; stores must check for SMC first.
pub const TLB_NOTDIRTY: u64 = 1 << 2;

const TLB_SLOW_FLAGS: u64 = TLB_MMIO | TLB_NOTDIRTY;

/// Entries in each MMU index's victim TLB.
pub const VICTIM_SIZE: usize = 8;

/// Plain snapshot of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntryData {
    pub addr_read: u64,
    pub addr_write: u64,
    pub addr_code: u64,
    /// Host address of the page minus its guest virtual address.
    pub addend: u64,
    /// Guest physical page address.
    pub paddr: u64,
}

impl EntryData {
    fn is_valid(&self) -> bool {
        (self.addr_read & self.addr_write & self.addr_code & TLB_INVALID) == 0
    }

    fn matches_page(&self, page: u64) -> bool {
        [self.addr_read, self.addr_write, self.addr_code]
            .iter()
            .any(|&t| t & TLB_INVALID == 0 && t & PAGE_MASK == page)
    }
}

struct TlbEntry {
    addr_read: AtomicU64,
    addr_write: AtomicU64,
    addr_code: AtomicU64,
    addend: AtomicU64,
    paddr: AtomicU64,
}

impl TlbEntry {
    fn new() -> Self {
        Self {
            addr_read: AtomicU64::new(TLB_INVALID),
            addr_write: AtomicU64::new(TLB_INVALID),
            addr_code: AtomicU64::new(TLB_INVALID),
            addend: AtomicU64::new(0),
            paddr: AtomicU64::new(0),
        }
    }

    fn tag(&self, access: AccessKind) -> &AtomicU64 {
        match access {
            AccessKind::Read => &self.addr_read,
            AccessKind::Write => &self.addr_write,
            AccessKind::Execute => &self.addr_code,
        }
    }

    fn load(&self) -> EntryData {
        EntryData {
            addr_read: self.addr_read.load(Ordering::Acquire),
            addr_write: self.addr_write.load(Ordering::Acquire),
            addr_code: self.addr_code.load(Ordering::Acquire),
            addend: self.addend.load(Ordering::Acquire),
            paddr: self.paddr.load(Ordering::Acquire),
        }
    }

    fn store(&self, d: &EntryData) {
        // Tags go invalid first so a concurrent reader never pairs a
        // valid tag with a half-written addend.
        self.invalidate();
        self.addend.store(d.addend, Ordering::Release);
        self.paddr.store(d.paddr, Ordering::Release);
        self.addr_code.store(d.addr_code, Ordering::Release);
        self.addr_write.store(d.addr_write, Ordering::Release);
        self.addr_read.store(d.addr_read, Ordering::Release);
    }

    fn invalidate(&self) {
        self.addr_read.store(TLB_INVALID, Ordering::Release);
        self.addr_write.store(TLB_INVALID, Ordering::Release);
        self.addr_code.store(TLB_INVALID, Ordering::Release);
    }
}

struct TlbMode {
    table: Box<[TlbEntry]>,
    victim: [TlbEntry; VICTIM_SIZE],
    victim_next: AtomicUsize,
}

impl TlbMode {
    fn new(size: usize) -> Self {
        Self {
            table: (0..size).map(|_| TlbEntry::new()).collect(),
            victim: std::array::from_fn(|_| TlbEntry::new()),
            victim_next: AtomicUsize::new(0),
        }
    }

    fn entries(&self) -> impl Iterator<Item = &TlbEntry> {
        self.table.iter().chain(self.victim.iter())
    }
}

/// A successful TLB probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbHit {
    /// Slow-path flags of the probed access kind.
    pub flags: u64,
    pub addend: u64,
    pub paddr: u64,
}

/// The TLB of one vCPU, covering every MMU index.
pub struct Tlb {
    mask: usize,
    modes: Box<[TlbMode]>,
}

impl Tlb {
    /// Create a TLB with `1 << bits` entries per MMU index.
    pub fn new(bits: u32) -> Self {
        let size = 1usize << bits;
        Self {
            mask: size - 1,
            modes: (0..NB_MMU_MODES).map(|_| TlbMode::new(size)).collect(),
        }
    }

    fn entry(&self, vaddr: u64, mmu_idx: usize) -> &TlbEntry {
        &self.modes[mmu_idx].table[(vaddr >> PAGE_BITS) as usize & self.mask]
    }

    /// Probe the main table.
    pub fn lookup(&self, vaddr: u64, access: AccessKind, mmu_idx: usize) -> Option<TlbHit> {
        let page = vaddr & PAGE_MASK;
        let e = self.entry(vaddr, mmu_idx);
        let tag = e.tag(access).load(Ordering::Acquire);
        if tag & !TLB_SLOW_FLAGS != page {
            return None;
        }
        Some(TlbHit {
            flags: tag & TLB_SLOW_FLAGS,
            addend: e.addend.load(Ordering::Acquire),
            paddr: e.paddr.load(Ordering::Acquire),
        })
    }

    /// Look for the page in the victim TLB and swap it into the main
    /// table on a hit.
    pub(crate) fn victim_lookup(
        &self,
        vaddr: u64,
        access: AccessKind,
        mmu_idx: usize,
    ) -> Option<EntryData> {
        let page = vaddr & PAGE_MASK;
        let mode = &self.modes[mmu_idx];
        let v = mode.victim.iter().find(|v| {
            v.tag(access).load(Ordering::Acquire) & !TLB_SLOW_FLAGS == page
        })?;
        let main = self.entry(vaddr, mmu_idx);
        let (hit, old) = (v.load(), main.load());
        main.store(&hit);
        v.store(&old);
        Some(hit)
    }

    /// Install a translation, moving the displaced entry to the
    /// victim TLB.
    pub(crate) fn fill(&self, vaddr: u64, mmu_idx: usize, data: &EntryData) {
        let mode = &self.modes[mmu_idx];
        let main = self.entry(vaddr, mmu_idx);
        let old = main.load();
        if old.is_valid() && !old.matches_page(vaddr & PAGE_MASK) {
            let slot = mode.victim_next.fetch_add(1, Ordering::Relaxed) % VICTIM_SIZE;
            mode.victim[slot].store(&old);
        }
        main.store(data);
    }

    /// Drop the main-table entry for `vaddr`.
    pub(crate) fn invalidate_entry(&self, vaddr: u64, mmu_idx: usize) {
        self.entry(vaddr, mmu_idx).invalidate();
    }

    /// Set `TLB_NOTDIRTY` on the write tag of the entry for `vaddr`.
    pub(crate) fn set_notdirty_entry(&self, vaddr: u64, mmu_idx: usize) {
        let e = self.entry(vaddr, mmu_idx);
        e.addr_write.fetch_or(TLB_NOTDIRTY, Ordering::AcqRel);
    }

    /// Clear `TLB_NOTDIRTY` from the entry for `vaddr`, once its page
    /// no longer holds translated code.
    pub(crate) fn clear_notdirty(&self, vaddr: u64, mmu_idx: usize) {
        let e = self.entry(vaddr, mmu_idx);
        e.addr_write.fetch_and(!TLB_NOTDIRTY, Ordering::AcqRel);
    }

    /// Force stores to the physical page `ppage` into the slow path
    /// in every MMU index.
    pub(crate) fn set_notdirty_phys(&self, ppage: u64) {
        for mode in self.modes.iter() {
            for e in mode.entries() {
                if e.paddr.load(Ordering::Acquire) == ppage {
                    e.addr_write.fetch_or(TLB_NOTDIRTY, Ordering::AcqRel);
                }
            }
        }
    }

    /// Invalidate all entries.
    pub fn flush(&self) {
        for mode in self.modes.iter() {
            for e in mode.entries() {
                e.invalidate();
            }
        }
    }

    /// Invalidate every entry caching the virtual page of `vaddr`.
    pub fn flush_page(&self, vaddr: u64) {
        let page = vaddr & PAGE_MASK;
        for mode in self.modes.iter() {
            for e in mode.entries() {
                if e.load().matches_page(page) {
                    e.invalidate();
                }
            }
        }
    }
}

impl std::fmt::Debug for Tlb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tlb")
            .field("entries", &(self.mask + 1))
            .field("modes", &self.modes.len())
            .finish()
    }
}
