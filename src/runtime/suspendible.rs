//! Suspendible Thread Set - Cooperative Safepoint Protocol
//!
//! Concurrent GC threads join the set while they work on the heap and
//! poll `yield_at_safepoint` at their work-item boundaries. The pause
//! controller calls `synchronize` to bring every joined thread to a
//! stop, runs the pause, then `desynchronize` releases them.
//!
//! Invariants:
//! - `stopped <= joined` at all times.
//! - At most one controller is synchronizing.
//! - `synchronize` returns only once every joined thread is parked in
//!   `yield_at_safepoint` (threads that `leave` mid-request count as
//!   converged).
//!
//! A thread that stops polling while joined deadlocks the controller,
//! so convergence can carry a timeout that turns the hang into a fatal
//! diagnostic instead of a silent stall.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Default)]
struct StsState {
    /// Threads currently in the set.
    joined: usize,
    /// Joined threads parked in `yield_at_safepoint`.
    stopped: usize,
    /// A controller is requesting (or holding) a suspension.
    suspend_all: bool,
}

pub struct SuspendibleThreadSet {
    state: Mutex<StsState>,
    /// Signaled when `suspend_all` clears; joiners and yielders wait here.
    resume_cv: Condvar,
    /// Signaled when the last running thread stops; the controller waits
    /// here.
    converged_cv: Condvar,
    /// Convergence deadline for `synchronize`; None waits forever.
    timeout: Option<Duration>,
}

impl SuspendibleThreadSet {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            state: Mutex::new(StsState::default()),
            resume_cv: Condvar::new(),
            converged_cv: Condvar::new(),
            timeout,
        }
    }

    /// Enter the set. Blocks while a suspension is in progress so the
    /// controller's census stays stable.
    pub fn join(&self) {
        let mut state = self.state.lock();
        while state.suspend_all {
            self.resume_cv.wait(&mut state);
        }
        state.joined += 1;
    }

    /// Leave the set. A leaving thread counts as converged: if it was
    /// the last one still running during a suspension request, the
    /// controller wakes.
    pub fn leave(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.joined > state.stopped);
        state.joined -= 1;
        if state.suspend_all && state.stopped == state.joined {
            self.converged_cv.notify_one();
        }
    }

    /// Safepoint poll. Returns true if the thread actually suspended,
    /// false if no suspension was requested.
    pub fn yield_at_safepoint(&self) -> bool {
        let mut state = self.state.lock();
        if !state.suspend_all {
            return false;
        }
        state.stopped += 1;
        debug_assert!(state.stopped <= state.joined);
        if state.stopped == state.joined {
            self.converged_cv.notify_one();
        }
        while state.suspend_all {
            self.resume_cv.wait(&mut state);
        }
        state.stopped -= 1;
        true
    }

    /// Bring every joined thread to a stop. Returns once all of them are
    /// parked in [`Self::yield_at_safepoint`] or have left.
    pub fn synchronize(&self) {
        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        crate::guarantee!(!state.suspend_all, "nested suspend request");
        state.suspend_all = true;
        while state.stopped < state.joined {
            match deadline {
                Some(deadline) => {
                    if self
                        .converged_cv
                        .wait_until(&mut state, deadline)
                        .timed_out()
                    {
                        crate::fatal!(
                            "suspendible thread set failed to converge: {} of {} threads stopped",
                            state.stopped,
                            state.joined
                        );
                    }
                }
                None => self.converged_cv.wait(&mut state),
            }
        }
        log::debug!("suspendible thread set converged: {} threads", state.joined);
    }

    /// Release a suspension taken with [`Self::synchronize`].
    pub fn desynchronize(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.suspend_all);
        state.suspend_all = false;
        self.resume_cv.notify_all();
    }

    #[cfg(test)]
    fn joined(&self) -> usize {
        self.state.lock().joined
    }
}

impl Default for SuspendibleThreadSet {
    fn default() -> Self {
        Self::new(None)
    }
}
