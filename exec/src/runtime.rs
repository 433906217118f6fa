use xlat_core::{AtomicOp, GuestException, HelperInfo, MemOpIdx, TbRuntime, MAX_CALL_ARGS};
use xlat_mmu::SoftMmu;

/// Services for generated code of one vCPU: guest memory through its
/// software MMU, and the guest's helper table.
pub(crate) struct Runtime<'a> {
    mmu: &'a SoftMmu,
    helpers: &'static [HelperInfo],
}

impl<'a> Runtime<'a> {
    pub(crate) fn new(mmu: &'a SoftMmu, helpers: &'static [HelperInfo]) -> Self {
        Self { mmu, helpers }
    }
}

impl TbRuntime for Runtime<'_> {
    fn load(&mut self, addr: u64, oi: MemOpIdx) -> Result<u64, GuestException> {
        Ok(self.mmu.load(addr, oi)?)
    }

    fn store(&mut self, addr: u64, val: u64, oi: MemOpIdx) -> Result<(), GuestException> {
        Ok(self.mmu.store(addr, val, oi)?)
    }

    fn atomic_rmw(
        &mut self,
        op: AtomicOp,
        addr: u64,
        val: u64,
        oi: MemOpIdx,
    ) -> Result<u64, GuestException> {
        Ok(self.mmu.atomic_rmw(op, addr, val, oi)?)
    }

    fn atomic_cmpxchg(
        &mut self,
        addr: u64,
        cmp: u64,
        new: u64,
        oi: MemOpIdx,
    ) -> Result<u64, GuestException> {
        Ok(self.mmu.atomic_cmpxchg(addr, cmp, new, oi)?)
    }

    fn call_helper(
        &mut self,
        idx: u32,
        env: *mut u8,
        args: &[u64; MAX_CALL_ARGS],
    ) -> Result<u64, GuestException> {
        let Some(h) = self.helpers.get(idx as usize) else {
            panic!("call to unknown helper {idx}");
        };
        // SAFETY: `env` is the env of the vCPU running this TB, valid
        // for the duration of `tb_exec`.
        unsafe { (h.func)(env, args) }
    }
}
