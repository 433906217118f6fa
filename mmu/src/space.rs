use std::sync::{Arc, Weak};

use log::debug;
use parking_lot::{Mutex, RwLock};
use xlat_core::{AccessKind, FaultKind};

use crate::error::MmuError;
use crate::ram::RamBlock;
use crate::tlb::Tlb;
use crate::translator::{IdentityTranslator, PageMap, PageMapping, PageTranslator};
use crate::{PAGE_MASK, PAGE_SIZE};

/// A memory-mapped device.
///
/// Called without any translation cache lock held, from whichever
/// vCPU thread performs the access.
pub trait MmioDevice: Send + Sync {
    /// Read `size` bytes (1, 2, 4 or 8) at `offset` into the region.
    fn read(&self, offset: u64, size: u32) -> u64;

    fn write(&self, offset: u64, size: u32, val: u64);
}

/// Receives notifications about guest writes to pages holding
/// translated code. Implemented by the translation cache.
pub trait SmcObserver: Send + Sync {
    /// Whether any live translation covers the physical page `ppage`.
    fn page_has_code(&self, ppage: u64) -> bool;

    /// Invalidate translations overlapping `[start, start + len)`.
    fn invalidate_phys_range(&self, start: u64, len: u64);

    /// The translator's mappings changed and its epoch was bumped.
    /// vCPUs running chained code must return to their loop to see it.
    fn mapping_changed(&self);
}

#[derive(Clone)]
pub(crate) enum RegionKind {
    Ram(Arc<RamBlock>),
    Mmio(Arc<dyn MmioDevice>),
}

#[derive(Clone)]
struct Region {
    base: u64,
    size: u64,
    kind: RegionKind,
}

impl Region {
    fn contains(&self, paddr: u64) -> bool {
        paddr >= self.base && paddr - self.base < self.size
    }
}

/// What a physical address resolves to.
#[derive(Clone)]
pub(crate) enum PhysTarget {
    /// RAM; `host` points to the byte at the physical address.
    Ram { host: *mut u8 },
    Mmio { dev: Arc<dyn MmioDevice>, offset: u64 },
}

/// A guest address space: page translator, physical memory map and
/// the TLBs caching translations of both.
pub struct AddressSpace {
    translator: Arc<dyn PageTranslator>,
    page_map: Option<Arc<PageMap>>,
    regions: RwLock<Vec<Region>>,
    tlbs: Mutex<Vec<Weak<Tlb>>>,
    smc: RwLock<Option<Weak<dyn SmcObserver>>>,
}

impl AddressSpace {
    pub fn new(translator: Arc<dyn PageTranslator>) -> Self {
        Self {
            translator,
            page_map: None,
            regions: RwLock::new(Vec::new()),
            tlbs: Mutex::new(Vec::new()),
            smc: RwLock::new(None),
        }
    }

    /// Address space where virtual equals physical.
    pub fn identity() -> Self {
        Self::new(Arc::new(IdentityTranslator))
    }

    /// Address space translated through a software page table,
    /// updated with [`map`](Self::map) and friends.
    pub fn with_page_map() -> Self {
        let pm = Arc::new(PageMap::new());
        let mut space = Self::new(pm.clone());
        space.page_map = Some(pm);
        space
    }

    // -- Physical memory map --

    fn add_region(&self, base: u64, size: u64, kind: RegionKind) -> Result<(), MmuError> {
        if size == 0 || base & !PAGE_MASK != 0 || size & !PAGE_MASK != 0 {
            return Err(MmuError::BadRegion { base, size });
        }
        let end = base.checked_add(size).ok_or(MmuError::BadRegion { base, size })?;
        let mut regions = self.regions.write();
        if regions.iter().any(|r| base < r.base + r.size && r.base < end) {
            return Err(MmuError::Overlap { base, size });
        }
        let at = regions.partition_point(|r| r.base < base);
        regions.insert(at, Region { base, size, kind });
        Ok(())
    }

    /// Back `[base, base + size)` with fresh zeroed RAM.
    pub fn add_ram(&self, base: u64, size: u64) -> Result<Arc<RamBlock>, MmuError> {
        let ram = Arc::new(RamBlock::new(size as usize)?);
        self.add_region(base, size, RegionKind::Ram(ram.clone()))?;
        debug!("ram {base:#x}+{size:#x}");
        Ok(ram)
    }

    pub fn add_mmio(
        &self,
        base: u64,
        size: u64,
        dev: Arc<dyn MmioDevice>,
    ) -> Result<(), MmuError> {
        self.add_region(base, size, RegionKind::Mmio(dev))?;
        debug!("mmio {base:#x}+{size:#x}");
        Ok(())
    }

    fn find_region(&self, paddr: u64) -> Option<Region> {
        let regions = self.regions.read();
        let i = regions.partition_point(|r| r.base <= paddr);
        let r = regions.get(i.checked_sub(1)?)?;
        r.contains(paddr).then(|| r.clone())
    }

    pub(crate) fn phys_target(&self, paddr: u64) -> Option<PhysTarget> {
        let r = self.find_region(paddr)?;
        let offset = paddr - r.base;
        Some(match r.kind {
            RegionKind::Ram(ram) => PhysTarget::Ram {
                host: ram.host_ptr(offset),
            },
            RegionKind::Mmio(dev) => PhysTarget::Mmio { dev, offset },
        })
    }

    fn ram_at(&self, paddr: u64, len: usize) -> Result<(Arc<RamBlock>, u64), MmuError> {
        let out_of_range = MmuError::OutOfRange {
            addr: paddr,
            len: len as u64,
        };
        match self.find_region(paddr) {
            Some(Region {
                base,
                kind: RegionKind::Ram(ram),
                ..
            }) => Ok((ram, paddr - base)),
            _ => Err(out_of_range),
        }
    }

    /// Copy `data` into guest RAM at `paddr`, invalidating any
    /// translations of the overwritten bytes.
    pub fn write_phys(&self, paddr: u64, data: &[u8]) -> Result<(), MmuError> {
        let (ram, offset) = self.ram_at(paddr, data.len())?;
        ram.write(offset, data)?;
        if let Some(obs) = self.smc_observer() {
            let end = paddr + data.len() as u64;
            let mut page = paddr & PAGE_MASK;
            while page < end {
                if obs.page_has_code(page) {
                    obs.invalidate_phys_range(paddr, data.len() as u64);
                    break;
                }
                page += PAGE_SIZE;
            }
        }
        Ok(())
    }

    pub fn read_phys(&self, paddr: u64, out: &mut [u8]) -> Result<(), MmuError> {
        let (ram, offset) = self.ram_at(paddr, out.len())?;
        ram.read(offset, out)
    }

    // -- Translation --

    pub fn translate(
        &self,
        vaddr: u64,
        access: AccessKind,
        mmu_idx: usize,
    ) -> Result<PageMapping, FaultKind> {
        self.translator.translate(vaddr, access, mmu_idx)
    }

    /// Current mapping epoch.
    pub fn epoch(&self) -> u64 {
        self.translator.epoch()
    }

    fn page_map(&self) -> Result<&PageMap, MmuError> {
        self.page_map.as_deref().ok_or(MmuError::NoPageMap)
    }

    /// Map `[vaddr, vaddr + len)` to physical `paddr` with `prot`.
    /// Every TLB is flushed before this returns.
    pub fn map(&self, vaddr: u64, paddr: u64, len: u64, prot: u8) -> Result<(), MmuError> {
        self.page_map()?.map(vaddr, paddr, len, prot)?;
        self.mapping_changed();
        Ok(())
    }

    pub fn unmap(&self, vaddr: u64, len: u64) -> Result<(), MmuError> {
        self.page_map()?.unmap(vaddr, len)?;
        self.mapping_changed();
        Ok(())
    }

    pub fn protect(&self, vaddr: u64, len: u64, prot: u8) -> Result<(), MmuError> {
        self.page_map()?.protect(vaddr, len, prot)?;
        self.mapping_changed();
        Ok(())
    }

    /// Flush every TLB and kick running vCPUs after a change of the
    /// translator's mappings. Translators other than the built-in page
    /// table call this after bumping their epoch.
    pub fn mapping_changed(&self) {
        debug!("mapping changed, epoch {}", self.epoch());
        self.flush_all_tlbs();
        if let Some(obs) = self.smc_observer() {
            obs.mapping_changed();
        }
    }

    // -- TLB registry --

    pub(crate) fn register_tlb(&self, tlb: &Arc<Tlb>) {
        let mut tlbs = self.tlbs.lock();
        tlbs.retain(|t| t.strong_count() > 0);
        tlbs.push(Arc::downgrade(tlb));
    }

    fn for_each_tlb(&self, mut f: impl FnMut(&Tlb)) {
        let tlbs = self.tlbs.lock();
        for tlb in tlbs.iter().filter_map(Weak::upgrade) {
            f(&tlb);
        }
    }

    pub fn flush_all_tlbs(&self) {
        self.for_each_tlb(|t| t.flush());
    }

    // -- Self-modifying code --

    pub fn set_smc_observer(&self, obs: Weak<dyn SmcObserver>) {
        *self.smc.write() = Some(obs);
    }

    pub(crate) fn smc_observer(&self) -> Option<Arc<dyn SmcObserver>> {
        self.smc.read().as_ref()?.upgrade()
    }

    pub(crate) fn page_has_code(&self, ppage: u64) -> bool {
        self.smc_observer()
            .is_some_and(|o| o.page_has_code(ppage & PAGE_MASK))
    }

    /// Called by the translation cache when the physical page
    /// `ppage` gains its first translation: stores to it must take
    /// the slow path from now on.
    pub fn mark_code_page(&self, ppage: u64) {
        let ppage = ppage & PAGE_MASK;
        self.for_each_tlb(|t| t.set_notdirty_phys(ppage));
    }
}

impl std::fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressSpace")
            .field("regions", &self.regions.read().len())
            .field("epoch", &self.epoch())
            .finish()
    }
}
