//! Exclusive sections: run a closure while no vCPU executes
//! generated code.

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct GateState {
    /// vCPUs inside generated code.
    running: usize,
    /// Exclusive sections waiting or in progress.
    pending: usize,
}

#[derive(Debug, Default)]
pub(crate) struct ExclusiveGate {
    state: Mutex<GateState>,
    cond: Condvar,
}

impl ExclusiveGate {
    /// Called by a vCPU before it runs generated code. Blocks while
    /// an exclusive section is pending.
    pub(crate) fn enter(&self) {
        let mut st = self.state.lock();
        while st.pending > 0 {
            self.cond.wait(&mut st);
        }
        st.running += 1;
    }

    pub(crate) fn leave(&self) {
        let mut st = self.state.lock();
        st.running -= 1;
        if st.running == 0 && st.pending > 0 {
            self.cond.notify_all();
        }
    }

    /// Run `f` once every vCPU has left generated code. `kick` asks
    /// running vCPUs to leave at their next TB entry.
    ///
    /// Must not be called by a vCPU between `enter` and `leave`.
    pub(crate) fn exclusive<R>(&self, kick: impl Fn(), f: impl FnOnce() -> R) -> R {
        let mut st = self.state.lock();
        st.pending += 1;
        while st.running > 0 {
            kick();
            self.cond.wait(&mut st);
        }
        let r = f();
        st.pending -= 1;
        self.cond.notify_all();
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn exclusive_waits_for_running() {
        let gate = Arc::new(ExclusiveGate::default());
        let inside = Arc::new(AtomicBool::new(false));
        let leave = Arc::new(AtomicBool::new(false));

        gate.enter();
        inside.store(true, Ordering::SeqCst);
        let t = {
            let (gate, inside, leave) = (gate.clone(), inside.clone(), leave.clone());
            thread::spawn(move || {
                gate.exclusive(
                    || leave.store(true, Ordering::SeqCst),
                    || assert!(!inside.load(Ordering::SeqCst)),
                )
            })
        };
        while !leave.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }
        inside.store(false, Ordering::SeqCst);
        gate.leave();
        t.join().unwrap();

        gate.enter();
        gate.leave();
    }
}
