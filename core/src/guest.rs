//! Capability interfaces between the engine, guest front ends and
//! generated code.

use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use crate::context::Context;
use crate::exception::GuestException;
use crate::ir_builder::{AtomicOp, MAX_CALL_ARGS};
use crate::types::MemOpIdx;

/// Helper does not read or write globals; no sync or reload is needed
/// around the call.
pub const CALL_NO_RWG: u32 = 1 << 0;
/// Helper may read but never write globals; they are synced to the env
/// before the call but stay valid in registers afterwards.
pub const CALL_NO_WG: u32 = 1 << 1;

/// Signature of a guest helper.
///
/// # Safety
///
/// `env` points to the guest's CPU env of the vCPU executing the call,
/// and is valid for reads and writes for the duration of the call.
pub type HelperFn = unsafe fn(
    env: *mut u8,
    args: &[u64; MAX_CALL_ARGS],
) -> Result<u64, GuestException>;

/// Entry of a guest helper table. Generated code refers to helpers by
/// their index in the table.
#[derive(Clone, Copy)]
pub struct HelperInfo {
    pub name: &'static str,
    pub func: HelperFn,
    /// `CALL_*` flags.
    pub flags: u32,
}

impl std::fmt::Debug for HelperInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HelperInfo")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .finish()
    }
}

/// Source of guest instruction bytes for the front end.
///
/// Implemented by the software MMU over the execute permission, so a
/// translated block never contains bytes the guest could not fetch.
pub trait CodeFetch {
    /// Fetch a 32-bit instruction word at guest virtual `pc`.
    fn fetch_u32(&mut self, pc: u64) -> Result<u32, GuestException>;

    /// Guest physical address of `pc`, resolved for execution.
    fn phys_pc(&mut self, pc: u64) -> Result<u64, GuestException>;
}

/// How a decoded block ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockEnd {
    /// Branch, jump or trap terminated the block.
    Branch,
    /// An instruction/op budget or page boundary was reached.
    Budget,
    /// The next instruction could not be fetched.
    FetchFault,
}

/// Summary of one `gen_code` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Guest bytes covered by the block.
    pub guest_size: u32,
    pub num_insns: u32,
    pub end: BlockEnd,
}

/// Guest CPU capability set driven by the execution loop.
pub trait GuestCpu: Send {
    fn get_pc(&self) -> u64;

    fn set_pc(&mut self, pc: u64);

    /// Mode flags that are part of a TB's identity.
    fn get_flags(&self) -> u32;

    /// MMU index used for code fetch in the current mode.
    fn mmu_index(&self) -> usize;

    /// Raw pointer to the `#[repr(C)]` env that generated code
    /// addresses through AREG0.
    fn env_ptr(&mut self) -> *mut u8;

    /// Translate one block starting at `pc` into `ir`.
    fn gen_code(
        &mut self,
        ir: &mut Context,
        pc: u64,
        flags: u32,
        max_insns: u32,
        fetch: &mut dyn CodeFetch,
    ) -> BlockInfo;

    /// Helper table indexed by `call` ops.
    fn helpers(&self) -> &'static [HelperInfo];

    /// Publish the exit-request flag to generated code. Called once
    /// before the vCPU first runs.
    fn bind_exit_request(&mut self, flag: Arc<AtomicU32>);

    /// Guest cause code of an exception, used for intercept masks.
    fn exception_cause(&self, excp: &GuestException) -> u32;

    /// Enter the guest's exception handler for `excp`, raised by the
    /// instruction at the current pc.
    fn do_exception(&mut self, excp: GuestException);

    /// Mirror the externally asserted interrupt lines into the guest's
    /// architectural state.
    fn set_pending_interrupts(&mut self, lines: u64);

    /// Take the highest-priority pending and enabled interrupt, if any.
    /// Returns true if an interrupt handler was entered.
    fn exec_interrupt(&mut self) -> bool;

    /// Whether a halted vCPU should wake up.
    fn has_work(&self) -> bool;
}

/// Services generated code calls back into while a TB runs.
///
/// Implemented by the execution loop over the vCPU's software MMU and
/// the guest helper table.
pub trait TbRuntime {
    fn load(&mut self, addr: u64, oi: MemOpIdx) -> Result<u64, GuestException>;

    fn store(
        &mut self,
        addr: u64,
        val: u64,
        oi: MemOpIdx,
    ) -> Result<(), GuestException>;

    fn atomic_rmw(
        &mut self,
        op: AtomicOp,
        addr: u64,
        val: u64,
        oi: MemOpIdx,
    ) -> Result<u64, GuestException>;

    fn atomic_cmpxchg(
        &mut self,
        addr: u64,
        cmp: u64,
        new: u64,
        oi: MemOpIdx,
    ) -> Result<u64, GuestException>;

    fn call_helper(
        &mut self,
        idx: u32,
        env: *mut u8,
        args: &[u64; MAX_CALL_ARGS],
    ) -> Result<u64, GuestException>;
}
