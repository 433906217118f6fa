use std::marker::PhantomData;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use log::{debug, warn};
use parking_lot::Mutex;
use xlat_backend::{
    translate, validate_constraints, CodeBuffer, CodeWriter, HostCodeGen, TciCodeGen,
    TranslateError,
};
use xlat_core::{
    CodeFetch, Context, GuestCpu, GuestException, JumpCache, TbId, TranslationBlock,
};
use xlat_mmu::{AddressSpace, CodeFetcher, SmcObserver, SoftMmu};

use crate::config::{EngineConfig, VCpuConfig};
use crate::error::ExecError;
use crate::exclusive::ExclusiveGate;
use crate::exec_loop::VCpu;
use crate::region::{RegionAlloc, RegionLru};
use crate::stats::{ExecStats, StatsSnapshot};
use crate::tb_store::TbStore;
use crate::vcpu::CpuSignals;

/// State shared by every vCPU of an engine.
pub(crate) struct Shared<B> {
    pub(crate) config: EngineConfig,
    pub(crate) backend: B,
    pub(crate) space: Arc<AddressSpace>,
    pub(crate) code: CodeBuffer,
    pub(crate) store: TbStore,
    /// The translate lock. Taken before any exclusive section.
    regions: Mutex<RegionAlloc>,
    pub(crate) lru: RegionLru,
    pub(crate) gate: ExclusiveGate,
    pub(crate) stats: ExecStats,
    vcpus: Mutex<Vec<Weak<CpuSignals>>>,
}

impl<B: HostCodeGen> Shared<B> {
    fn kick_all(&self) {
        for s in self.vcpus.lock().iter().filter_map(Weak::upgrade) {
            s.kick();
        }
    }

    fn exclusive<R>(&self, f: impl FnOnce() -> R) -> R {
        self.gate.exclusive(|| self.kick_all(), f)
    }

    pub(crate) fn invalidate_phys_range(&self, start: u64, len: u64) -> usize {
        let n = self
            .store
            .invalidate_phys_range(start, len, &self.code, &self.backend);
        if n > 0 {
            debug!("invalidated {n} TBs in {start:#x}+{len:#x}");
            self.stats
                .invalidations
                .fetch_add(n as u64, Ordering::Relaxed);
        }
        n
    }

    fn flush_locked(&self, regions: &mut RegionAlloc) {
        self.exclusive(|| {
            self.store.flush();
            regions.reset_all();
        });
        ExecStats::bump(&self.stats.flushes);
        debug!("translation cache flushed");
    }

    pub(crate) fn flush_all(&self) {
        let mut regions = self.regions.lock();
        self.flush_locked(&mut regions);
    }

    /// Evict the least recently used region holding code and make it
    /// the current one.
    fn evict_lru(&self, regions: &mut RegionAlloc) -> bool {
        let Some(r) = self.lru.victim(|r| regions.is_used(r)) else {
            return false;
        };
        let n = self.exclusive(|| self.store.evict_region(r, &self.code, &self.backend));
        regions.reset_to(r);
        self.lru.touch(r);
        ExecStats::bump(&self.stats.evictions);
        self.stats
            .invalidations
            .fetch_add(n as u64, Ordering::Relaxed);
        debug!("evicted code region {r} ({n} TBs)");
        true
    }

    fn alloc_id(&self, regions: &mut RegionAlloc) -> TbId {
        if let Some(id) = self.store.alloc_id() {
            return id;
        }
        if self.evict_lru(regions) {
            if let Some(id) = self.store.alloc_id() {
                return id;
            }
        }
        warn!("TB arena exhausted, flushing");
        self.flush_locked(regions);
        match self.store.alloc_id() {
            Some(id) => id,
            None => panic!("TB arena has no free slot after a flush"),
        }
    }

    /// Translate the block at `pc` and publish it in the cache.
    ///
    /// Fails only when `pc` itself cannot be fetched.
    pub(crate) fn tb_gen_code<C: GuestCpu>(
        &self,
        cpu: &mut C,
        ctx: &mut Context,
        mmu: &SoftMmu,
        pc: u64,
        flags: u32,
        epoch: u64,
    ) -> Result<Arc<TranslationBlock>, GuestException> {
        let mut fetch = CodeFetcher {
            mmu,
            mmu_idx: cpu.mmu_index(),
        };
        let phys_pc = fetch.phys_pc(pc)?;

        let mut regions = self.regions.lock();
        // Another vCPU may have translated it while we waited.
        if let Some(tb) = self.store.lookup(pc, flags, epoch) {
            return Ok(tb);
        }

        let mut max_insns = self.config.max_insns_per_tb;
        let mut flushed = false;
        loop {
            let id = self.alloc_id(&mut regions);
            ctx.reset();
            ctx.tb_idx = id.index;
            let info = cpu.gen_code(ctx, pc, flags, max_insns, &mut fetch);

            let (start, limit) = regions.window();
            let mut w = CodeWriter::new(&self.code, start, limit);
            let tc = match translate(ctx, &self.backend, &mut w) {
                Ok(tc) => tc,
                Err(TranslateError::BufferFull) => {
                    self.store.release_id(id);
                    if !regions.current_is_empty() {
                        if !regions.switch_to_unused() && !self.evict_lru(&mut regions) {
                            self.flush_locked(&mut regions);
                        }
                    } else if !flushed {
                        warn!("block at {pc:#x} does not fit an empty region, flushing");
                        self.flush_locked(&mut regions);
                        flushed = true;
                    } else if max_insns > 1 {
                        max_insns /= 2;
                    } else {
                        panic!("single instruction at {pc:#x} exceeds a code region");
                    }
                    continue;
                }
                Err(e) => panic!("translation of {pc:#x} failed: {e}"),
            };

            let mut tb = TranslationBlock::new(id, pc, flags, epoch);
            tb.phys_pc = phys_pc;
            tb.size = info.guest_size;
            tb.icount = info.num_insns as u16;
            tb.host_offset = tc.offset;
            tb.host_size = tc.size;
            tb.region = regions.current();
            for (slot, g) in tc.goto_tb.iter().enumerate() {
                if let Some((jump, reset)) = *g {
                    tb.jmp_insn_offset[slot] = Some(jump as u32);
                    tb.jmp_reset_offset[slot] = Some(reset as u32);
                }
            }
            tb.insn_search = ctx.insn_offsets.clone();
            regions.commit(tc.size);
            self.lru.touch(tb.region);

            let tb = Arc::new(tb);
            let new_pages = self.store.insert(tb.clone(), &self.code, &self.backend);
            for page in new_pages {
                self.space.mark_code_page(page);
            }
            ExecStats::bump(&self.stats.translations);
            debug!(
                "translated {pc:#x} flags {flags:#x}: {} insns, {} guest bytes, {} host bytes",
                info.num_insns, info.guest_size, tc.size
            );
            return Ok(tb);
        }
    }
}

impl<B: HostCodeGen> SmcObserver for Shared<B> {
    fn page_has_code(&self, ppage: u64) -> bool {
        self.store.page_has_code(ppage)
    }

    fn invalidate_phys_range(&self, start: u64, len: u64) {
        Shared::invalidate_phys_range(self, start, len);
    }

    fn mapping_changed(&self) {
        self.kick_all();
    }
}

/// A translation engine for guest CPUs of type `C`, generating code
/// for host backend `B`.
///
/// All vCPUs created by one engine share its translation cache and
/// address space.
pub struct Engine<C, B: HostCodeGen = TciCodeGen> {
    shared: Arc<Shared<B>>,
    _cpu: PhantomData<fn() -> C>,
}

impl<C: GuestCpu> Engine<C, TciCodeGen> {
    /// Engine running generated code on the portable interpreter.
    pub fn with_tci(config: EngineConfig, space: Arc<AddressSpace>) -> Result<Self, ExecError> {
        Self::new(config, space, TciCodeGen::new())
    }
}

impl<C: GuestCpu, B: HostCodeGen + 'static> Engine<C, B> {
    pub fn new(
        config: EngineConfig,
        space: Arc<AddressSpace>,
        backend: B,
    ) -> Result<Self, ExecError> {
        config.validate()?;
        validate_constraints(&backend).map_err(|ops| ExecError::Constraints {
            backend: backend.name(),
            ops,
        })?;
        let code = CodeBuffer::new(config.code_buffer_size, config.code_regions)?;
        let bounds = (0..code.nb_regions()).map(|r| code.region_bounds(r)).collect();
        debug!(
            "engine on {}: {} regions of {:#x} bytes",
            backend.name(),
            code.nb_regions(),
            code.region_size()
        );
        let shared = Arc::new(Shared {
            store: TbStore::new(config.max_tbs),
            regions: Mutex::new(RegionAlloc::new(bounds)),
            lru: RegionLru::new(code.nb_regions()),
            gate: ExclusiveGate::default(),
            stats: ExecStats::default(),
            vcpus: Mutex::new(Vec::new()),
            config,
            backend,
            space: space.clone(),
            code,
        });
        let obs: Weak<Shared<B>> = Arc::downgrade(&shared);
        space.set_smc_observer(obs);
        Ok(Self {
            shared,
            _cpu: PhantomData,
        })
    }

    /// Create a vCPU running `cpu`. The vCPU may be moved to its own
    /// thread.
    pub fn create_vcpu(&self, mut cpu: C, config: VCpuConfig) -> VCpu<C, B> {
        let signals = Arc::new(CpuSignals::default());
        cpu.bind_exit_request(signals.exit_request.clone());
        {
            let mut vcpus = self.shared.vcpus.lock();
            vcpus.retain(|w| w.strong_count() > 0);
            vcpus.push(Arc::downgrade(&signals));
        }
        let mmu = SoftMmu::new(self.shared.space.clone(), self.shared.config.tlb_bits);
        let mut ctx = Context::new();
        self.shared.backend.init_context(&mut ctx);
        VCpu {
            epoch: self.shared.space.epoch(),
            cpu,
            shared: self.shared.clone(),
            mmu,
            ctx,
            jump_cache: JumpCache::new(),
            signals,
            config,
        }
    }

    /// Invalidate translations of guest physical `[start, start + len)`.
    /// Returns the number of TBs invalidated.
    pub fn invalidate(&self, phys_start: u64, len: u64) -> usize {
        self.shared.invalidate_phys_range(phys_start, len)
    }

    /// Drop every translation.
    pub fn flush_all(&self) {
        self.shared.flush_all();
    }

    /// Cached valid TB for `(pc, flags)` under the current mapping.
    pub fn lookup_tb(&self, pc: u64, flags: u32) -> Option<Arc<TranslationBlock>> {
        self.shared.store.lookup(pc, flags, self.shared.space.epoch())
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn space(&self) -> &Arc<AddressSpace> {
        &self.shared.space
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }
}

impl<C, B: HostCodeGen> Clone for Engine<C, B> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            _cpu: PhantomData,
        }
    }
}

impl<C, B: HostCodeGen> std::fmt::Debug for Engine<C, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("backend", &self.shared.backend.name())
            .field("store", &self.shared.store)
            .finish()
    }
}
