//! `rill-sched` — the cooperative round-robin kernel thread scheduler: a
//! single run-queue, a statically allocated sentinel thread, and
//! `spawn_kernel`/`tick`/`exit_current` over it.

#![cfg_attr(not(test), no_std)]

mod id;
mod queue;
mod scheduler;
mod thread;

pub use id::{IdBitset, ThreadId, MAX_THREADS};
pub use scheduler::{SchedError, Scheduler, STACK_ORDER};
pub use thread::{Thread, ThreadLevel};

/// Test-only serialization for `rill_core::addr`'s process-global HHDM
/// offset, which every test in this crate that spawns real threads points
/// at its own host-heap buffer.
#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::{Mutex, MutexGuard};

    static HHDM_LOCK: Mutex<()> = Mutex::new(());

    pub fn lock_hhdm() -> MutexGuard<'static, ()> {
        HHDM_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }
}
