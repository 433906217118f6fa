//! The per-vCPU execution loop: find or translate the block at the
//! current pc, run it, and act on how it exited.

use std::sync::Arc;

use log::{trace, warn};
use xlat_backend::{HostCodeGen, TbReturn, TciCodeGen};
use xlat_core::{
    decode_tb_exit, Context, GuestCpu, GuestException, JumpCache, TranslationBlock, TB_EXIT_HALT,
    TB_EXIT_IDX0, TB_EXIT_IDX1, TB_EXIT_NOCHAIN, TB_EXIT_REQUESTED,
};
use xlat_mmu::SoftMmu;

use crate::config::VCpuConfig;
use crate::engine::Shared;
use crate::runtime::Runtime;
use crate::stats::ExecStats;
use crate::vcpu::{CpuSignals, ExitReason, VCpuHandle};

/// How one entry into generated code ended.
enum TbExit {
    /// `goto_tb` slot taken without a patched link.
    Slot {
        last: Arc<TranslationBlock>,
        slot: usize,
    },
    /// Indirect branch; the next pc is in the env.
    NoChain { last: Arc<TranslationBlock> },
    /// The exit flag was set when `last` was entered.
    Requested { last: Arc<TranslationBlock> },
    Halt,
    Exception { excp: GuestException, pc: u64 },
}

/// A virtual CPU: guest state plus its private MMU, jump cache and IR
/// context. Run it on its own thread with [`VCpu::run`].
pub struct VCpu<C: GuestCpu, B: HostCodeGen = TciCodeGen> {
    pub(crate) cpu: C,
    pub(crate) shared: Arc<Shared<B>>,
    pub(crate) mmu: SoftMmu,
    pub(crate) ctx: Context,
    pub(crate) jump_cache: JumpCache,
    pub(crate) signals: Arc<CpuSignals>,
    pub(crate) config: VCpuConfig,
    /// Mapping epoch the jump cache and TLB were filled under.
    pub(crate) epoch: u64,
}

impl<C: GuestCpu, B: HostCodeGen> VCpu<C, B> {
    pub fn handle(&self) -> VCpuHandle {
        VCpuHandle {
            signals: self.signals.clone(),
        }
    }

    pub fn cpu(&self) -> &C {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut C {
        &mut self.cpu
    }

    pub fn mmu(&self) -> &SoftMmu {
        &self.mmu
    }

    pub fn config(&self) -> &VCpuConfig {
        &self.config
    }

    /// Execute guest code until a stop request or an intercepted
    /// exception.
    pub fn run(&mut self) -> ExitReason {
        let mut next: Option<Arc<TranslationBlock>> = None;
        loop {
            // Events posted after this point re-set the flag and are
            // seen at the next TB entry.
            self.signals.clear_request();
            if self.signals.take_stop() {
                return ExitReason::Stopped;
            }
            if self.check_epoch() {
                next = None;
            }
            self.cpu.set_pending_interrupts(self.signals.pending_events());
            if self.cpu.exec_interrupt() {
                trace!("hart {}: interrupt taken, pc {:#x}", self.config.hart_id, self.cpu.get_pc());
                next = None;
            }

            let tb = match next.take().filter(|tb| !tb.is_invalid()) {
                Some(tb) => tb,
                None => match self.tb_find() {
                    Ok(tb) => tb,
                    Err(excp) => {
                        let pc = self.cpu.get_pc();
                        if let Some(exit) = self.raise(excp, pc) {
                            return exit;
                        }
                        continue;
                    }
                },
            };

            let Some(exit) = self.cpu_tb_exec(&tb) else {
                continue;
            };
            match exit {
                TbExit::Slot { last, slot } => match self.tb_find() {
                    Ok(dst) => {
                        let sh = &self.shared;
                        if sh.store.add_jump(&last, slot, &dst, &sh.code, &sh.backend) {
                            ExecStats::bump(&sh.stats.chains);
                        }
                        next = Some(dst);
                    }
                    Err(excp) => {
                        let pc = self.cpu.get_pc();
                        if let Some(exit) = self.raise(excp, pc) {
                            return exit;
                        }
                    }
                },
                TbExit::NoChain { last } => {
                    next = self.indirect_target(&last);
                }
                TbExit::Requested { last } => {
                    self.cpu.set_pc(last.pc);
                }
                TbExit::Halt => self.wait_for_work(),
                TbExit::Exception { excp, pc } => {
                    self.cpu.set_pc(pc);
                    if let Some(exit) = self.raise(excp, pc) {
                        return exit;
                    }
                }
            }
        }
    }

    /// Flush per-vCPU translation caches after a mapping change.
    fn check_epoch(&mut self) -> bool {
        let epoch = self.shared.space.epoch();
        if epoch == self.epoch {
            return false;
        }
        trace!("hart {}: epoch {} -> {epoch}", self.config.hart_id, self.epoch);
        self.epoch = epoch;
        self.jump_cache.invalidate();
        self.mmu.flush();
        true
    }

    /// Find the TB for the current pc: jump cache, then the shared
    /// hash index, then translation.
    fn tb_find(&mut self) -> Result<Arc<TranslationBlock>, GuestException> {
        let (pc, flags, epoch) = (self.cpu.get_pc(), self.cpu.get_flags(), self.epoch);
        let stats = &self.shared.stats;
        ExecStats::bump(&stats.lookups);
        if let Some(tb) = self.jump_cache.lookup(pc, flags, epoch) {
            ExecStats::bump(&stats.hits);
            return Ok(tb.clone());
        }
        if let Some(tb) = self.shared.store.lookup(pc, flags, epoch) {
            ExecStats::bump(&stats.hits);
            self.jump_cache.insert(tb.clone());
            return Ok(tb);
        }
        let tb = self
            .shared
            .tb_gen_code(&mut self.cpu, &mut self.ctx, &self.mmu, pc, flags, epoch)?;
        self.jump_cache.insert(tb.clone());
        Ok(tb)
    }

    /// Follow an indirect exit through the exiting TB's one-entry
    /// target cache.
    fn indirect_target(&mut self, last: &Arc<TranslationBlock>) -> Option<Arc<TranslationBlock>> {
        let (pc, flags) = (self.cpu.get_pc(), self.cpu.get_flags());
        let cached = last.jmp.lock().exit_target;
        if let Some(tb) = cached.and_then(|id| self.shared.store.get_id(id)) {
            if tb.matches(pc, flags, self.epoch) && !tb.is_invalid() {
                ExecStats::bump(&self.shared.stats.hits);
                return Some(tb);
            }
        }
        // A fetch fault is raised by the lookup at the next boundary.
        let tb = self.tb_find().ok()?;
        last.jmp.lock().exit_target = Some(tb.id);
        Some(tb)
    }

    /// Run generated code from `tb` until it exits. Returns `None`
    /// if the TB was invalidated before it could be entered.
    fn cpu_tb_exec(&mut self, tb: &Arc<TranslationBlock>) -> Option<TbExit> {
        let sh = &*self.shared;
        sh.lru.touch(tb.region);
        sh.gate.enter();
        if tb.is_invalid() {
            sh.gate.leave();
            return None;
        }

        let env = self.cpu.env_ptr();
        let mut rt = Runtime::new(&self.mmu, self.cpu.helpers());
        // SAFETY: `tb` is valid and we are inside the gate, so its
        // region cannot be recycled until `leave`. `env` is the env
        // every TB of this vCPU was translated against.
        let ret = unsafe { sh.backend.tb_exec(&sh.code, tb.host_offset, env, &mut rt) };

        // Resolve the exiting TB before leaving: its slot may be
        // reused once an exclusive section runs.
        let exit = match ret {
            TbReturn::Exit(val) => {
                let (idx, code) = decode_tb_exit(val);
                let Some(last) = sh.store.get(idx) else {
                    panic!("exit from unknown TB slot {idx}");
                };
                match code {
                    TB_EXIT_IDX0 | TB_EXIT_IDX1 => TbExit::Slot {
                        last,
                        slot: code as usize,
                    },
                    TB_EXIT_NOCHAIN => TbExit::NoChain { last },
                    TB_EXIT_REQUESTED => TbExit::Requested { last },
                    TB_EXIT_HALT => TbExit::Halt,
                    _ => panic!("TB {:#x} exited with unknown code {code}", last.pc),
                }
            }
            TbReturn::Exception { host_off, excp } => {
                let Some(src) = sh.store.tb_by_host(host_off) else {
                    panic!("exception at host offset {host_off:#x} outside any TB");
                };
                TbExit::Exception {
                    excp,
                    pc: src.restore_pc(host_off),
                }
            }
        };
        sh.gate.leave();
        Some(exit)
    }

    /// Deliver `excp` raised at `pc` to the guest, or return it to the
    /// caller when its cause is intercepted.
    fn raise(&mut self, excp: GuestException, pc: u64) -> Option<ExitReason> {
        let cause = self.cpu.exception_cause(&excp);
        if cause < 64 && self.config.intercept & (1 << cause) != 0 {
            warn!("hart {}: returning {excp} at {pc:#x}", self.config.hart_id);
            return Some(ExitReason::Exception { excp, pc });
        }
        trace!("hart {}: {excp} at {pc:#x}", self.config.hart_id);
        self.cpu.do_exception(excp);
        None
    }

    /// Park until an enabled interrupt is pending or a stop request
    /// arrives.
    fn wait_for_work(&mut self) {
        let (cpu, signals) = (&mut self.cpu, &self.signals);
        signals.wait_until(|| {
            if signals.stop_requested() {
                return true;
            }
            cpu.set_pending_interrupts(signals.pending_events());
            cpu.has_work()
        });
    }
}

impl<C: GuestCpu + std::fmt::Debug, B: HostCodeGen> std::fmt::Debug for VCpu<C, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VCpu")
            .field("cpu", &self.cpu)
            .field("config", &self.config)
            .finish()
    }
}
