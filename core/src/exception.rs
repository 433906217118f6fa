use thiserror::Error;

/// Kind of guest memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    Read,
    Write,
    Execute,
}

/// Why a guest memory access failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// No translation for the virtual page.
    PageFault,
    /// The page is mapped but the access is not permitted.
    Permission,
    /// The physical address hits neither RAM nor a device.
    Unmapped,
    /// The access violates the alignment required by its `MemOp`.
    Misaligned,
    /// The region cannot service this access (e.g. atomics on MMIO,
    /// instruction fetch from a device).
    Unsupported,
}

/// A failed guest memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[error("{kind:?} fault on {access:?} at {addr:#x}")]
pub struct MemFault {
    pub access: AccessKind,
    pub kind: FaultKind,
    pub addr: u64,
}

/// A synchronous guest exception raised while executing a TB.
///
/// Surfaced to the guest only through the execution loop, which
/// restores the faulting guest pc before delivering it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum GuestException {
    #[error("memory fault: {0}")]
    Mem(#[from] MemFault),
    /// Guest-defined cause code (illegal instruction, ecall, ...).
    #[error("trap cause {cause} (tval {tval:#x})")]
    Trap { cause: u32, tval: u64 },
}
