//! The shared translation cache.
//!
//! TBs live in an arena of `Arc<TranslationBlock>` slots addressed by
//! [`TbId`]. A slot is only recycled when its code region is evicted
//! or the cache is flushed, both of which happen while no vCPU runs
//! generated code, so the index packed into an `exit_tb` value always
//! names the TB that produced it.
//!
//! Lock order: `inner` before `hash`, `inner` before any TB's `jmp`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use log::trace;
use parking_lot::{Mutex, RwLock};
use xlat_backend::{CodeBuffer, HostCodeGen};
use xlat_core::{TbId, TranslationBlock};
use xlat_mmu::{PAGE_MASK, PAGE_SIZE};

type TbKey = (u64, u32, u64);

#[derive(Default)]
struct Slot {
    gen: u32,
    tb: Option<Arc<TranslationBlock>>,
}

#[derive(Default)]
struct Inner {
    slots: Vec<Slot>,
    free: Vec<u32>,
    /// Physical page address → TBs with code on that page. A page is
    /// in the map iff it holds live translations.
    pages: HashMap<u64, Vec<TbId>>,
    /// Host code offset → TB, for fault attribution.
    by_host: BTreeMap<usize, TbId>,
}

impl Inner {
    fn tb(&self, id: TbId) -> Option<&Arc<TranslationBlock>> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.gen != id.gen {
            return None;
        }
        slot.tb.as_ref()
    }
}

/// Pages covered by a TB's guest code.
fn tb_pages(tb: &TranslationBlock) -> impl Iterator<Item = u64> {
    let first = tb.phys_pc & PAGE_MASK;
    let last = (tb.phys_pc + tb.size.max(1) as u64 - 1) & PAGE_MASK;
    (0..=(last - first) / PAGE_SIZE).map(move |i| first + i * PAGE_SIZE)
}

/// Arena, hash index and page index of all translated blocks.
pub struct TbStore {
    inner: Mutex<Inner>,
    hash: RwLock<HashMap<TbKey, Arc<TranslationBlock>>>,
    max_tbs: usize,
}

impl TbStore {
    pub fn new(max_tbs: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            hash: RwLock::new(HashMap::new()),
            max_tbs,
        }
    }

    /// Find a valid TB for `(pc, flags, epoch)`.
    pub fn lookup(&self, pc: u64, flags: u32, epoch: u64) -> Option<Arc<TranslationBlock>> {
        let hash = self.hash.read();
        hash.get(&(pc, flags, epoch))
            .filter(|tb| !tb.is_invalid())
            .cloned()
    }

    /// Reserve an arena slot for a TB about to be translated.
    /// Returns `None` when the arena is full.
    pub fn alloc_id(&self) -> Option<TbId> {
        let mut inner = self.inner.lock();
        let index = match inner.free.pop() {
            Some(i) => i,
            None if inner.slots.len() < self.max_tbs => {
                inner.slots.push(Slot::default());
                (inner.slots.len() - 1) as u32
            }
            None => return None,
        };
        let gen = inner.slots[index as usize].gen;
        Some(TbId { index, gen })
    }

    /// Give back a reserved slot whose translation was abandoned.
    pub fn release_id(&self, id: TbId) {
        let mut inner = self.inner.lock();
        let slot = &mut inner.slots[id.index as usize];
        assert!(
            slot.gen == id.gen && slot.tb.is_none(),
            "releasing TB slot {} that is not reserved",
            id.index
        );
        slot.gen = slot.gen.wrapping_add(1);
        inner.free.push(id.index);
    }

    /// Publish a fully built TB in its reserved slot.
    ///
    /// A valid TB already cached under the same key is invalidated:
    /// the last insert wins. Returns the physical pages that gained
    /// their first translation; stores to them must be routed
    /// through the SMC check by the caller.
    pub fn insert<B: HostCodeGen>(
        &self,
        tb: Arc<TranslationBlock>,
        code: &CodeBuffer,
        backend: &B,
    ) -> Vec<u64> {
        let id = tb.id;
        let mut inner = self.inner.lock();
        {
            let slot = &mut inner.slots[id.index as usize];
            assert!(
                slot.gen == id.gen && slot.tb.is_none(),
                "inserting TB into unreserved slot {}",
                id.index
            );
            slot.tb = Some(tb.clone());
        }
        inner.by_host.insert(tb.host_offset, id);

        let mut new_pages = Vec::new();
        for page in tb_pages(&tb) {
            let list = inner.pages.entry(page).or_default();
            if list.is_empty() {
                new_pages.push(page);
            }
            list.push(id);
        }

        let key = (tb.pc, tb.flags, tb.epoch);
        let old = self.hash.write().insert(key, tb);
        if let Some(old) = old.filter(|o| !o.is_invalid()) {
            trace!("tb {:#x}: replacing an earlier translation", old.pc);
            Self::invalidate_locked(&mut inner, &self.hash, &old, code, backend);
        }
        new_pages
    }

    pub fn get(&self, index: u32) -> Option<Arc<TranslationBlock>> {
        let inner = self.inner.lock();
        inner.slots.get(index as usize)?.tb.clone()
    }

    pub fn get_id(&self, id: TbId) -> Option<Arc<TranslationBlock>> {
        self.inner.lock().tb(id).cloned()
    }

    /// The TB whose host code contains `host_off`.
    pub fn tb_by_host(&self, host_off: usize) -> Option<Arc<TranslationBlock>> {
        let inner = self.inner.lock();
        let (_, &id) = inner.by_host.range(..=host_off).next_back()?;
        inner.tb(id).filter(|tb| tb.contains_host(host_off)).cloned()
    }

    /// Whether the physical page `ppage` holds live translations.
    pub fn page_has_code(&self, ppage: u64) -> bool {
        self.inner.lock().pages.contains_key(&(ppage & PAGE_MASK))
    }

    /// Number of TBs in the arena, valid or not.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.slots.iter().filter(|s| s.tb.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invalidate one TB. Returns false if it already was.
    pub fn invalidate<B: HostCodeGen>(
        &self,
        tb: &Arc<TranslationBlock>,
        code: &CodeBuffer,
        backend: &B,
    ) -> bool {
        let mut inner = self.inner.lock();
        Self::invalidate_locked(&mut inner, &self.hash, tb, code, backend)
    }

    fn invalidate_locked<B: HostCodeGen>(
        inner: &mut Inner,
        hash: &RwLock<HashMap<TbKey, Arc<TranslationBlock>>>,
        tb: &Arc<TranslationBlock>,
        code: &CodeBuffer,
        backend: &B,
    ) -> bool {
        if tb.is_invalid() {
            return false;
        }
        tb.set_invalid();

        {
            let mut hash = hash.write();
            let key = (tb.pc, tb.flags, tb.epoch);
            if hash.get(&key).is_some_and(|t| Arc::ptr_eq(t, tb)) {
                hash.remove(&key);
            }
        }

        // Point every incoming jump back at its stub before anyone
        // can reuse this TB's code.
        let (incoming, outgoing) = {
            let mut jmp = tb.jmp.lock();
            jmp.exit_target = None;
            (std::mem::take(&mut jmp.jmp_list), std::mem::take(&mut jmp.jmp_dest))
        };
        for (src_id, slot) in incoming {
            let Some(src) = inner.tb(src_id) else { continue };
            if let (Some(jump), Some(reset)) =
                (src.jmp_insn_offset[slot], src.jmp_reset_offset[slot])
            {
                backend.patch_jump(code, jump as usize, reset as usize);
            }
            src.jmp.lock().jmp_dest[slot] = None;
        }
        for (slot, dst_id) in outgoing.iter().enumerate() {
            let Some(dst) = dst_id.and_then(|id| inner.tb(id)) else {
                continue;
            };
            dst.jmp
                .lock()
                .jmp_list
                .retain(|&(s, n)| !(s == tb.id && n == slot));
        }

        for page in tb_pages(tb) {
            if let Some(list) = inner.pages.get_mut(&page) {
                list.retain(|&id| id != tb.id);
                if list.is_empty() {
                    inner.pages.remove(&page);
                }
            }
        }
        true
    }

    /// Invalidate every TB whose guest bytes overlap
    /// `[start, start + len)`. Returns the number invalidated.
    pub fn invalidate_phys_range<B: HostCodeGen>(
        &self,
        start: u64,
        len: u64,
        code: &CodeBuffer,
        backend: &B,
    ) -> usize {
        if len == 0 {
            return 0;
        }
        let mut inner = self.inner.lock();
        let end = start.saturating_add(len);
        let mut victims = Vec::new();
        let mut page = start & PAGE_MASK;
        while page < end {
            if let Some(list) = inner.pages.get(&page) {
                for &id in list {
                    if let Some(tb) = inner.tb(id) {
                        if tb.overlaps_phys(start, len)
                            && !victims.iter().any(|v: &Arc<TranslationBlock>| v.id == id)
                        {
                            victims.push(tb.clone());
                        }
                    }
                }
            }
            page = match page.checked_add(PAGE_SIZE) {
                Some(p) => p,
                None => break,
            };
        }
        victims
            .iter()
            .filter(|tb| Self::invalidate_locked(&mut inner, &self.hash, tb, code, backend))
            .count()
    }

    /// Patch `src`'s `goto_tb` slot to jump straight into `dst`.
    ///
    /// Nothing happens unless both TBs are still valid and the slot
    /// is unlinked. Returns true if the jump was patched.
    pub fn add_jump<B: HostCodeGen>(
        &self,
        src: &Arc<TranslationBlock>,
        slot: usize,
        dst: &Arc<TranslationBlock>,
        code: &CodeBuffer,
        backend: &B,
    ) -> bool {
        let Some(jump) = src.jmp_insn_offset[slot] else {
            return false;
        };
        let _inner = self.inner.lock();
        if src.is_invalid() || dst.is_invalid() {
            return false;
        }
        {
            let mut sj = src.jmp.lock();
            if sj.jmp_dest[slot].is_some() {
                return false;
            }
            sj.jmp_dest[slot] = Some(dst.id);
        }
        dst.jmp.lock().jmp_list.push((src.id, slot));
        backend.patch_jump(code, jump as usize, dst.host_offset);
        trace!("chain {:#x}[{slot}] -> {:#x}", src.pc, dst.pc);
        true
    }

    /// Invalidate and free every TB whose code lives in `region`.
    /// Must run while no vCPU executes generated code.
    pub fn evict_region<B: HostCodeGen>(
        &self,
        region: usize,
        code: &CodeBuffer,
        backend: &B,
    ) -> usize {
        let mut inner = self.inner.lock();
        let victims: Vec<_> = inner
            .slots
            .iter()
            .filter_map(|s| s.tb.clone())
            .filter(|tb| tb.region == region)
            .collect();
        let mut invalidated = 0;
        for tb in &victims {
            if Self::invalidate_locked(&mut inner, &self.hash, tb, code, backend) {
                invalidated += 1;
            }
            inner.by_host.remove(&tb.host_offset);
            let slot = &mut inner.slots[tb.id.index as usize];
            slot.tb = None;
            slot.gen = slot.gen.wrapping_add(1);
            inner.free.push(tb.id.index);
        }
        invalidated
    }

    /// Drop every TB. Reserved slots survive. Must run while no vCPU
    /// executes generated code.
    pub fn flush(&self) {
        let mut inner = self.inner.lock();
        let Inner {
            slots,
            free,
            pages,
            by_host,
        } = &mut *inner;
        for (i, slot) in slots.iter_mut().enumerate() {
            if let Some(tb) = slot.tb.take() {
                tb.set_invalid();
                slot.gen = slot.gen.wrapping_add(1);
                free.push(i as u32);
            }
        }
        pages.clear();
        by_host.clear();
        self.hash.write().clear();
    }
}

impl std::fmt::Debug for TbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TbStore")
            .field("tbs", &self.len())
            .field("max_tbs", &self.max_tbs)
            .finish()
    }
}
