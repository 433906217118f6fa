use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use log::trace;
use xlat_core::{
    AccessKind, AtomicOp, CodeFetch, FaultKind, GuestException, MemFault, MemOp, MemOpIdx,
};

use crate::space::{AddressSpace, MmioDevice, PhysTarget};
use crate::tlb::{EntryData, Tlb, TlbHit, TLB_INVALID, TLB_MMIO, TLB_NOTDIRTY};
use crate::{PAGE_MASK, PAGE_SIZE};

/// Where a guest virtual address ends up.
#[derive(Clone)]
pub enum Resolved {
    Ram {
        host: *mut u8,
        paddr: u64,
    },
    Mmio {
        dev: Arc<dyn MmioDevice>,
        offset: u64,
        paddr: u64,
    },
}

impl std::fmt::Debug for Resolved {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resolved::Ram { host, paddr } => f
                .debug_struct("Ram")
                .field("host", host)
                .field("paddr", &format_args!("{paddr:#x}"))
                .finish(),
            Resolved::Mmio { offset, paddr, .. } => f
                .debug_struct("Mmio")
                .field("offset", offset)
                .field("paddr", &format_args!("{paddr:#x}"))
                .finish(),
        }
    }
}

fn fault(access: AccessKind, kind: FaultKind, addr: u64) -> MemFault {
    MemFault { access, kind, addr }
}

fn crosses_page(addr: u64, size: u32) -> bool {
    (addr & !PAGE_MASK) + size as u64 > PAGE_SIZE
}

fn bswap_sized(v: u64, size: u32) -> u64 {
    match size {
        1 => v,
        2 => (v as u16).swap_bytes() as u64,
        4 => (v as u32).swap_bytes() as u64,
        _ => v.swap_bytes(),
    }
}

/// Read `size` little-endian bytes from host memory.
///
/// # Safety
///
/// `p` must be valid for a `size`-byte read.
unsafe fn host_read(p: *const u8, size: u32) -> u64 {
    // Naturally aligned accesses are single-copy atomic, as other
    // vCPUs may touch the same guest memory.
    let aligned = (p as usize) % size as usize == 0;
    match (size, aligned) {
        (1, _) => (*(p as *const AtomicU8)).load(Ordering::Relaxed) as u64,
        (2, true) => u16::from_le((*(p as *const AtomicU16)).load(Ordering::Relaxed)) as u64,
        (4, true) => u32::from_le((*(p as *const AtomicU32)).load(Ordering::Relaxed)) as u64,
        (8, true) => u64::from_le((*(p as *const AtomicU64)).load(Ordering::Relaxed)),
        (2, false) => u16::from_le((p as *const u16).read_unaligned()) as u64,
        (4, false) => u32::from_le((p as *const u32).read_unaligned()) as u64,
        _ => u64::from_le((p as *const u64).read_unaligned()),
    }
}

/// # Safety
///
/// `p` must be valid for a `size`-byte write.
unsafe fn host_write(p: *mut u8, size: u32, v: u64) {
    let aligned = (p as usize) % size as usize == 0;
    match (size, aligned) {
        (1, _) => (*(p as *const AtomicU8)).store(v as u8, Ordering::Relaxed),
        (2, true) => (*(p as *const AtomicU16)).store((v as u16).to_le(), Ordering::Relaxed),
        (4, true) => (*(p as *const AtomicU32)).store((v as u32).to_le(), Ordering::Relaxed),
        (8, true) => (*(p as *const AtomicU64)).store(v.to_le(), Ordering::Relaxed),
        (2, false) => (p as *mut u16).write_unaligned((v as u16).to_le()),
        (4, false) => (p as *mut u32).write_unaligned((v as u32).to_le()),
        _ => (p as *mut u64).write_unaligned(v.to_le()),
    }
}

/// Per-vCPU software MMU.
///
/// Caches translations of its [`AddressSpace`] in a private TLB that
/// the address space can flush from any thread.
pub struct SoftMmu {
    space: Arc<AddressSpace>,
    tlb: Arc<Tlb>,
}

impl SoftMmu {
    /// Create an MMU with `1 << tlb_bits` TLB entries per MMU index.
    pub fn new(space: Arc<AddressSpace>, tlb_bits: u32) -> Self {
        let tlb = Arc::new(Tlb::new(tlb_bits));
        space.register_tlb(&tlb);
        Self { space, tlb }
    }

    pub fn space(&self) -> &Arc<AddressSpace> {
        &self.space
    }

    pub fn tlb(&self) -> &Tlb {
        &self.tlb
    }

    pub fn flush(&self) {
        self.tlb.flush();
    }

    pub fn flush_page(&self, vaddr: u64) {
        self.tlb.flush_page(vaddr);
    }

    // -- Translation --

    /// Find the TLB entry for `vaddr`, filling it on a miss.
    fn probe(&self, vaddr: u64, access: AccessKind, mmu_idx: usize) -> Result<TlbHit, MemFault> {
        if let Some(hit) = self.tlb.lookup(vaddr, access, mmu_idx) {
            return Ok(hit);
        }
        if self.tlb.victim_lookup(vaddr, access, mmu_idx).is_some() {
            if let Some(hit) = self.tlb.lookup(vaddr, access, mmu_idx) {
                return Ok(hit);
            }
        }
        self.tlb_fill(vaddr, access, mmu_idx)
    }

    /// Slow path: ask the translator and the physical map.
    fn tlb_fill(&self, vaddr: u64, access: AccessKind, mmu_idx: usize) -> Result<TlbHit, MemFault> {
        let epoch = self.space.epoch();
        let m = self
            .space
            .translate(vaddr, access, mmu_idx)
            .map_err(|kind| fault(access, kind, vaddr))?;
        let vpage = vaddr & PAGE_MASK;
        let (addend, slow) = match self.space.phys_target(m.paddr) {
            Some(PhysTarget::Ram { host, .. }) => ((host as u64).wrapping_sub(vpage), 0),
            Some(PhysTarget::Mmio { .. }) => (0, TLB_MMIO),
            None => return Err(fault(access, FaultKind::Unmapped, vaddr)),
        };
        let tag = |kind: AccessKind| {
            if m.permits(kind, mmu_idx) {
                vpage | slow
            } else {
                TLB_INVALID
            }
        };
        let mut data = EntryData {
            addr_read: tag(AccessKind::Read),
            addr_write: tag(AccessKind::Write),
            addr_code: tag(AccessKind::Execute),
            addend,
            paddr: m.paddr,
        };
        let code_page = data.addr_write & TLB_INVALID == 0 && self.space.page_has_code(m.paddr);
        if code_page {
            data.addr_write |= TLB_NOTDIRTY;
        }
        self.tlb.fill(vaddr, mmu_idx, &data);
        trace!(
            "tlb fill {vaddr:#x} -> {:#x} idx {mmu_idx} prot {:#x}",
            m.paddr,
            m.prot
        );

        // The page may have gained code between the check and the
        // install; the marker is published before TLBs are scanned.
        if data.addr_write & TLB_INVALID == 0 && !code_page && self.space.page_has_code(m.paddr) {
            self.tlb.set_notdirty_entry(vaddr, mmu_idx);
        }
        // A concurrent mapping change may have flushed the TLB before
        // this entry went in.
        if self.space.epoch() != epoch {
            self.tlb.invalidate_entry(vaddr, mmu_idx);
        }

        let flags = match access {
            AccessKind::Read => data.addr_read,
            AccessKind::Write => data.addr_write,
            AccessKind::Execute => data.addr_code,
        } & (TLB_MMIO | TLB_NOTDIRTY);
        Ok(TlbHit {
            flags,
            addend,
            paddr: m.paddr,
        })
    }

    /// Resolve `vaddr` for `access` from `mmu_idx`.
    pub fn resolve(
        &self,
        vaddr: u64,
        access: AccessKind,
        mmu_idx: usize,
    ) -> Result<Resolved, MemFault> {
        let hit = self.probe(vaddr, access, mmu_idx)?;
        let paddr = hit.paddr | (vaddr & !PAGE_MASK);
        if hit.flags & TLB_MMIO == 0 {
            return Ok(Resolved::Ram {
                host: hit.addend.wrapping_add(vaddr) as *mut u8,
                paddr,
            });
        }
        match self.space.phys_target(paddr) {
            Some(PhysTarget::Mmio { dev, offset }) => Ok(Resolved::Mmio { dev, offset, paddr }),
            // The map changed under the entry.
            _ => Err(fault(access, FaultKind::Unmapped, vaddr)),
        }
    }

    fn check_align(&self, addr: u64, mop: MemOp, access: AccessKind) -> Result<(), MemFault> {
        if addr & mop.align_mask() != 0 {
            return Err(fault(access, FaultKind::Misaligned, addr));
        }
        Ok(())
    }

    /// A store hit a page that holds (or held) translated code.
    fn notdirty_write(&self, vaddr: u64, paddr: u64, size: u32, mmu_idx: usize) {
        let Some(obs) = self.space.smc_observer() else {
            self.tlb.clear_notdirty(vaddr, mmu_idx);
            return;
        };
        let ppage = paddr & PAGE_MASK;
        if obs.page_has_code(ppage) {
            obs.invalidate_phys_range(paddr, size as u64);
        }
        if !obs.page_has_code(ppage) {
            self.tlb.clear_notdirty(vaddr, mmu_idx);
            // Lost a race with a new translation of the page.
            if obs.page_has_code(ppage) {
                self.tlb.set_notdirty_entry(vaddr, mmu_idx);
            }
        }
    }

    // -- Data accesses --

    fn load_raw(&self, addr: u64, size: u32, access: AccessKind, mmu_idx: usize) -> Result<u64, MemFault> {
        match self.resolve(addr, access, mmu_idx)? {
            // SAFETY: the TLB only holds addends of live RAM blocks and
            // the access does not cross the page.
            Resolved::Ram { host, .. } => Ok(unsafe { host_read(host, size) }),
            Resolved::Mmio { dev, offset, .. } => Ok(dev.read(offset, size)),
        }
    }

    fn store_raw(&self, addr: u64, size: u32, val: u64, mmu_idx: usize) -> Result<(), MemFault> {
        let hit = self.probe(addr, AccessKind::Write, mmu_idx)?;
        if hit.flags & TLB_NOTDIRTY != 0 {
            let paddr = hit.paddr | (addr & !PAGE_MASK);
            self.notdirty_write(addr, paddr, size, mmu_idx);
        }
        match self.resolve(addr, AccessKind::Write, mmu_idx)? {
            // SAFETY: as in `load_raw`.
            Resolved::Ram { host, .. } => unsafe { host_write(host, size, val) },
            Resolved::Mmio { dev, offset, .. } => dev.write(offset, size, val),
        }
        Ok(())
    }

    /// Guest load. The result is extended to 64 bits as `oi` says.
    pub fn load(&self, addr: u64, oi: MemOpIdx) -> Result<u64, MemFault> {
        let (mop, idx) = (oi.memop(), oi.mmu_idx());
        let size = mop.size_bytes();
        self.check_align(addr, mop, AccessKind::Read)?;
        let raw = if crosses_page(addr, size) {
            let mut v = 0;
            for i in 0..size {
                let b = self.load_raw(addr.wrapping_add(i as u64), 1, AccessKind::Read, idx)?;
                v |= b << (8 * i);
            }
            v
        } else {
            self.load_raw(addr, size, AccessKind::Read, idx)?
        };
        let raw = if mop.is_bswap() { bswap_sized(raw, size) } else { raw };
        Ok(mop.extend(raw))
    }

    /// Guest store of the low bytes of `val`.
    pub fn store(&self, addr: u64, val: u64, oi: MemOpIdx) -> Result<(), MemFault> {
        let (mop, idx) = (oi.memop(), oi.mmu_idx());
        let size = mop.size_bytes();
        self.check_align(addr, mop, AccessKind::Write)?;
        let val = if mop.is_bswap() { bswap_sized(val, size) } else { val };
        if crosses_page(addr, size) {
            // Probe both pages first so a fault leaves memory intact.
            let last = addr.wrapping_add(size as u64 - 1);
            self.probe(addr, AccessKind::Write, idx)?;
            self.probe(last, AccessKind::Write, idx)?;
            for i in 0..size {
                self.store_raw(addr.wrapping_add(i as u64), 1, val >> (8 * i), idx)?;
            }
            Ok(())
        } else {
            self.store_raw(addr, size, val, idx)
        }
    }

    /// Resolve an atomic access: once for write, RAM only, naturally
    /// aligned.
    fn atomic_host(&self, addr: u64, mop: MemOp, idx: usize) -> Result<*mut u8, MemFault> {
        let size = mop.size_bytes();
        if addr & (size as u64 - 1) != 0 {
            return Err(fault(AccessKind::Write, FaultKind::Misaligned, addr));
        }
        if size < 4 {
            return Err(fault(AccessKind::Write, FaultKind::Unsupported, addr));
        }
        let hit = self.probe(addr, AccessKind::Write, idx)?;
        if hit.flags & TLB_MMIO != 0 {
            return Err(fault(AccessKind::Write, FaultKind::Unsupported, addr));
        }
        if hit.flags & TLB_NOTDIRTY != 0 {
            self.notdirty_write(addr, hit.paddr | (addr & !PAGE_MASK), size, idx);
        }
        Ok(hit.addend.wrapping_add(addr) as *mut u8)
    }

    /// Atomic read-modify-write; returns the old value.
    pub fn atomic_rmw(
        &self,
        op: AtomicOp,
        addr: u64,
        val: u64,
        oi: MemOpIdx,
    ) -> Result<u64, MemFault> {
        let (mop, idx) = (oi.memop(), oi.mmu_idx());
        let host = self.atomic_host(addr, mop, idx)?;
        let val = mop.extend(val);
        // SAFETY: `host` is naturally aligned RAM inside one page.
        let old = unsafe {
            if mop.size_bytes() == 4 {
                let a = &*(host as *const AtomicU32);
                let mut cur = a.load(Ordering::SeqCst);
                loop {
                    let new = op.apply(mop.extend(cur as u64), val) as u32;
                    match a.compare_exchange_weak(cur, new, Ordering::SeqCst, Ordering::SeqCst) {
                        Ok(_) => break cur as u64,
                        Err(c) => cur = c,
                    }
                }
            } else {
                let a = &*(host as *const AtomicU64);
                let mut cur = a.load(Ordering::SeqCst);
                loop {
                    let new = op.apply(cur, val);
                    match a.compare_exchange_weak(cur, new, Ordering::SeqCst, Ordering::SeqCst) {
                        Ok(_) => break cur,
                        Err(c) => cur = c,
                    }
                }
            }
        };
        Ok(mop.extend(old))
    }

    /// Atomic compare-and-swap; returns the old value.
    pub fn atomic_cmpxchg(
        &self,
        addr: u64,
        cmp: u64,
        new: u64,
        oi: MemOpIdx,
    ) -> Result<u64, MemFault> {
        let (mop, idx) = (oi.memop(), oi.mmu_idx());
        let host = self.atomic_host(addr, mop, idx)?;
        // SAFETY: as in `atomic_rmw`.
        let old = unsafe {
            if mop.size_bytes() == 4 {
                let a = &*(host as *const AtomicU32);
                match a.compare_exchange(cmp as u32, new as u32, Ordering::SeqCst, Ordering::SeqCst)
                {
                    Ok(v) | Err(v) => v as u64,
                }
            } else {
                let a = &*(host as *const AtomicU64);
                match a.compare_exchange(cmp, new, Ordering::SeqCst, Ordering::SeqCst) {
                    Ok(v) | Err(v) => v,
                }
            }
        };
        Ok(mop.extend(old))
    }

    // -- Instruction fetch --

    /// Fetch a little-endian 32-bit instruction word.
    pub fn fetch_code(&self, pc: u64, mmu_idx: usize) -> Result<u32, MemFault> {
        let fetch = |addr: u64, size: u32| -> Result<u64, MemFault> {
            match self.resolve(addr, AccessKind::Execute, mmu_idx)? {
                // SAFETY: as in `load_raw`.
                Resolved::Ram { host, .. } => Ok(unsafe { host_read(host, size) }),
                Resolved::Mmio { .. } => {
                    Err(fault(AccessKind::Execute, FaultKind::Unsupported, addr))
                }
            }
        };
        if crosses_page(pc, 4) {
            let mut v = 0;
            for i in 0..4 {
                v |= fetch(pc.wrapping_add(i), 1)? << (8 * i);
            }
            Ok(v as u32)
        } else {
            Ok(fetch(pc, 4)? as u32)
        }
    }

    /// Guest physical address of `pc` for execution.
    pub fn phys_code_addr(&self, pc: u64, mmu_idx: usize) -> Result<u64, MemFault> {
        match self.resolve(pc, AccessKind::Execute, mmu_idx)? {
            Resolved::Ram { paddr, .. } => Ok(paddr),
            Resolved::Mmio { .. } => Err(fault(AccessKind::Execute, FaultKind::Unsupported, pc)),
        }
    }
}

impl std::fmt::Debug for SoftMmu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftMmu").field("tlb", &self.tlb).finish()
    }
}

/// [`CodeFetch`] over a vCPU's MMU in a fixed MMU index.
pub struct CodeFetcher<'a> {
    pub mmu: &'a SoftMmu,
    pub mmu_idx: usize,
}

impl CodeFetch for CodeFetcher<'_> {
    fn fetch_u32(&mut self, pc: u64) -> Result<u32, GuestException> {
        Ok(self.mmu.fetch_code(pc, self.mmu_idx)?)
    }

    fn phys_pc(&mut self, pc: u64) -> Result<u64, GuestException> {
        Ok(self.mmu.phys_code_addr(pc, self.mmu_idx)?)
    }
}
