//! Software MMU: guest virtual → physical → host resolution.
//!
//! An [`AddressSpace`] holds the authoritative page translator, the
//! physical memory map (RAM blocks and MMIO devices) and the set of
//! TLBs that cache its translations. Each vCPU owns a [`SoftMmu`]
//! with its own [`tlb::Tlb`], used by generated code for every guest
//! memory access.

pub mod error;
pub mod ram;
pub mod softmmu;
pub mod space;
pub mod tlb;
pub mod translator;

pub use error::MmuError;
pub use ram::RamBlock;
pub use softmmu::{CodeFetcher, Resolved, SoftMmu};
pub use space::{AddressSpace, MmioDevice, SmcObserver};
pub use tlb::{Tlb, TLB_INVALID, TLB_MMIO, TLB_NOTDIRTY};
pub use translator::{
    IdentityTranslator, PageMap, PageMapping, PageTranslator, PROT_EXEC, PROT_READ, PROT_RWX,
    PROT_USER, PROT_WRITE,
};

pub const PAGE_BITS: u32 = 12;
pub const PAGE_SIZE: u64 = 1 << PAGE_BITS;
/// Mask selecting the page-aligned part of an address.
pub const PAGE_MASK: u64 = !(PAGE_SIZE - 1);

/// Number of MMU indices (privilege contexts) each TLB covers.
pub const NB_MMU_MODES: usize = 4;
/// MMU index of unprivileged (user mode) accesses.
pub const MMU_USER_IDX: usize = 0;
