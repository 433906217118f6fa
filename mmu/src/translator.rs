use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use xlat_core::{AccessKind, FaultKind};

use crate::error::MmuError;
use crate::{MMU_USER_IDX, PAGE_BITS, PAGE_MASK, PAGE_SIZE};

pub const PROT_READ: u8 = 1 << 0;
pub const PROT_WRITE: u8 = 1 << 1;
pub const PROT_EXEC: u8 = 1 << 2;
/// Page is accessible from the user MMU index.
pub const PROT_USER: u8 = 1 << 3;
pub const PROT_RWX: u8 = PROT_READ | PROT_WRITE | PROT_EXEC;

/// Result of a successful virtual page translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageMapping {
    /// Page-aligned guest physical address.
    pub paddr: u64,
    /// `PROT_*` bits of the page.
    pub prot: u8,
}

impl PageMapping {
    /// Whether `access` from `mmu_idx` is allowed on this page.
    pub fn permits(&self, access: AccessKind, mmu_idx: usize) -> bool {
        let need = match access {
            AccessKind::Read => PROT_READ,
            AccessKind::Write => PROT_WRITE,
            AccessKind::Execute => PROT_EXEC,
        };
        if self.prot & need == 0 {
            return false;
        }
        mmu_idx != MMU_USER_IDX || self.prot & PROT_USER != 0
    }
}

/// The authoritative guest virtual → physical translation.
///
/// The software MMU only caches what this returns. Implementations
/// that change their mappings must bump [`PageTranslator::epoch`] so
/// translations cached under the old mapping are recognized as stale.
pub trait PageTranslator: Send + Sync {
    /// Translate `vaddr` for `access` from `mmu_idx`.
    ///
    /// Fails with `FaultKind::PageFault` when no mapping exists and
    /// `FaultKind::Permission` when it forbids the access.
    fn translate(
        &self,
        vaddr: u64,
        access: AccessKind,
        mmu_idx: usize,
    ) -> Result<PageMapping, FaultKind>;

    /// Mapping generation; part of every translation block's key.
    fn epoch(&self) -> u64 {
        0
    }
}

/// Virtual equals physical, every page fully accessible.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityTranslator;

impl PageTranslator for IdentityTranslator {
    fn translate(
        &self,
        vaddr: u64,
        _access: AccessKind,
        _mmu_idx: usize,
    ) -> Result<PageMapping, FaultKind> {
        Ok(PageMapping {
            paddr: vaddr & PAGE_MASK,
            prot: PROT_RWX | PROT_USER,
        })
    }
}

/// Software page table with per-page permissions.
///
/// Mutations go through [`crate::AddressSpace`], which flushes every
/// registered TLB once the table and epoch are updated.
#[derive(Debug, Default)]
pub struct PageMap {
    pages: RwLock<HashMap<u64, PageMapping>>,
    epoch: AtomicU64,
}

fn check_range(vaddr: u64, len: u64) -> Result<(), MmuError> {
    if len == 0 || vaddr & !PAGE_MASK != 0 || len & !PAGE_MASK != 0 {
        return Err(MmuError::BadRegion {
            base: vaddr,
            size: len,
        });
    }
    Ok(())
}

impl PageMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn map(&self, vaddr: u64, paddr: u64, len: u64, prot: u8) -> Result<(), MmuError> {
        check_range(vaddr, len)?;
        if paddr & !PAGE_MASK != 0 {
            return Err(MmuError::BadRegion {
                base: paddr,
                size: len,
            });
        }
        let mut pages = self.pages.write();
        for i in 0..len / PAGE_SIZE {
            let vpn = (vaddr >> PAGE_BITS) + i;
            pages.insert(
                vpn,
                PageMapping {
                    paddr: paddr + i * PAGE_SIZE,
                    prot,
                },
            );
        }
        self.epoch.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub(crate) fn unmap(&self, vaddr: u64, len: u64) -> Result<(), MmuError> {
        check_range(vaddr, len)?;
        let mut pages = self.pages.write();
        for i in 0..len / PAGE_SIZE {
            pages.remove(&((vaddr >> PAGE_BITS) + i));
        }
        self.epoch.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Change the permissions of mapped pages in the range. Unmapped
    /// pages are skipped.
    pub(crate) fn protect(&self, vaddr: u64, len: u64, prot: u8) -> Result<(), MmuError> {
        check_range(vaddr, len)?;
        let mut pages = self.pages.write();
        for i in 0..len / PAGE_SIZE {
            if let Some(m) = pages.get_mut(&((vaddr >> PAGE_BITS) + i)) {
                m.prot = prot;
            }
        }
        self.epoch.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub fn lookup(&self, vaddr: u64) -> Option<PageMapping> {
        self.pages.read().get(&(vaddr >> PAGE_BITS)).copied()
    }
}

impl PageTranslator for PageMap {
    fn translate(
        &self,
        vaddr: u64,
        access: AccessKind,
        mmu_idx: usize,
    ) -> Result<PageMapping, FaultKind> {
        let m = self.lookup(vaddr).ok_or(FaultKind::PageFault)?;
        if m.permits(access, mmu_idx) {
            Ok(m)
        } else {
            Err(FaultKind::Permission)
        }
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }
}
