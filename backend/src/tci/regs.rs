use xlat_core::RegSet;

/// Number of virtual host registers.
pub const NB_REGS: usize = 16;

/// Register holding the guest env pointer for the whole TB.
pub const TCG_AREG0: u8 = 14;
/// Register holding the spill frame base.
pub const FRAME_REG: u8 = 15;

/// Bytes of spill frame the interpreter provides per TB entry.
pub const FRAME_SIZE: usize = 4096;

/// Registers the allocator may hand out: R0..R13.
pub const ALLOCATABLE_REGS: RegSet = RegSet::from_raw(0x3fff);

/// Registers a helper call clobbers: R0..R7.
pub const CALL_CLOBBER_REGS: RegSet = RegSet::from_raw(0x00ff);

/// Helper arguments, in order.
pub const CALL_ARG_REGS: [u8; 6] = [0, 1, 2, 3, 4, 5];

/// Helper return value.
pub const CALL_RET_REG: u8 = 0;

/// Value written to clobbered registers after a call in debug builds,
/// so code that wrongly expects them to survive fails loudly.
pub const CLOBBER_POISON: u64 = 0xdead_beef_dead_beef;
