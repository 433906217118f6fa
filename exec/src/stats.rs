use std::sync::atomic::{AtomicU64, Ordering};

/// Translation cache counters, shared by all vCPUs.
#[derive(Debug, Default)]
pub struct ExecStats {
    pub(crate) lookups: AtomicU64,
    pub(crate) hits: AtomicU64,
    pub(crate) translations: AtomicU64,
    pub(crate) chains: AtomicU64,
    pub(crate) evictions: AtomicU64,
    pub(crate) invalidations: AtomicU64,
    pub(crate) flushes: AtomicU64,
}

/// Point-in-time copy of [`ExecStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// TB lookups at block boundaries.
    pub lookups: u64,
    /// Lookups served from the jump cache or hash index.
    pub hits: u64,
    pub translations: u64,
    /// `goto_tb` slots patched.
    pub chains: u64,
    /// Code regions evicted.
    pub evictions: u64,
    /// TBs invalidated, by SMC, range invalidation or eviction.
    pub invalidations: u64,
    pub flushes: u64,
}

impl ExecStats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let ld = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            lookups: ld(&self.lookups),
            hits: ld(&self.hits),
            translations: ld(&self.translations),
            chains: ld(&self.chains),
            evictions: ld(&self.evictions),
            invalidations: ld(&self.invalidations),
            flushes: ld(&self.flushes),
        }
    }
}
