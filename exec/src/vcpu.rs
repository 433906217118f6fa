//! Cross-thread control of a vCPU.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use xlat_core::GuestException;

/// Why [`crate::VCpu::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// [`VCpuHandle::request_stop`] was observed at a block boundary.
    Stopped,
    /// An exception whose cause is in the vCPU's intercept mask. The
    /// guest pc is left at the faulting instruction.
    Exception { excp: GuestException, pc: u64 },
}

/// Event state shared between a vCPU thread and its handles.
#[derive(Debug, Default)]
pub(crate) struct CpuSignals {
    /// Polled by generated code at every TB entry.
    pub(crate) exit_request: Arc<AtomicU32>,
    pending: AtomicU64,
    stop: AtomicBool,
    halt: Mutex<()>,
    wake: Condvar,
}

impl CpuSignals {
    /// Make the vCPU leave generated code at its next TB entry.
    pub(crate) fn kick(&self) {
        self.exit_request.store(1, Ordering::SeqCst);
    }

    pub(crate) fn clear_request(&self) {
        self.exit_request.store(0, Ordering::SeqCst);
    }

    fn wake(&self) {
        let _g = self.halt.lock();
        self.wake.notify_all();
    }

    pub(crate) fn pending_events(&self) -> u64 {
        self.pending.load(Ordering::SeqCst)
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Consume a stop request.
    pub(crate) fn take_stop(&self) -> bool {
        self.stop.swap(false, Ordering::SeqCst)
    }

    /// Block until `ready` holds. `ready` is re-evaluated after every
    /// event posted to this vCPU.
    pub(crate) fn wait_until(&self, mut ready: impl FnMut() -> bool) {
        let mut g = self.halt.lock();
        while !ready() {
            self.wake.wait(&mut g);
        }
    }
}

/// Thread-safe handle for posting events to a running vCPU.
#[derive(Debug, Clone)]
pub struct VCpuHandle {
    pub(crate) signals: Arc<CpuSignals>,
}

impl VCpuHandle {
    /// Assert interrupt line `line` (0..64).
    pub fn post_interrupt(&self, line: u32) {
        assert!(line < 64, "interrupt line {line} out of range");
        self.signals.pending.fetch_or(1 << line, Ordering::SeqCst);
        self.signals.kick();
        self.signals.wake();
    }

    pub fn clear_interrupt(&self, line: u32) {
        assert!(line < 64, "interrupt line {line} out of range");
        self.signals.pending.fetch_and(!(1 << line), Ordering::SeqCst);
        self.signals.kick();
    }

    /// Currently asserted interrupt lines.
    pub fn pending_events(&self) -> u64 {
        self.signals.pending_events()
    }

    /// Ask the vCPU to return [`ExitReason::Stopped`] at the next
    /// block boundary, waking it if halted.
    pub fn request_stop(&self) {
        self.signals.stop.store(true, Ordering::SeqCst);
        self.signals.kick();
        self.signals.wake();
    }
}
