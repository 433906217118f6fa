use std::io;

use thiserror::Error;

/// Errors from building or updating an address space.
///
/// Guest-visible faults are not reported here; they surface as
/// [`xlat_core::MemFault`] from the access paths.
#[derive(Debug, Error)]
pub enum MmuError {
    #[error("region {base:#x}+{size:#x} overlaps an existing region")]
    Overlap { base: u64, size: u64 },
    #[error("region {base:#x}+{size:#x} is empty or not page aligned")]
    BadRegion { base: u64, size: u64 },
    #[error("failed to allocate guest RAM: {0}")]
    RamAlloc(#[source] io::Error),
    #[error("physical range {addr:#x}+{len:#x} is not backed by RAM")]
    OutOfRange { addr: u64, len: u64 },
    #[error("address space has no software page table")]
    NoPageMap,
}
