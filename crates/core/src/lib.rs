//! `rill-core` — address types, synchronization primitives, logging, and
//! panic/backtrace support shared by every other crate in the `rill`
//! workspace.
//!
//! These are host-testable abstractions: none of this crate touches MMIO or
//! privileged CSRs directly. Architecture-specific backends (interrupt
//! enable/disable, the print sink) register themselves through the
//! `AtomicPtr`-based hooks in [`arch`] and [`log`] at boot; until then every
//! hook degrades to a safe no-op, which is also what makes this crate
//! runnable under `cargo test` on the host.

#![cfg_attr(not(test), no_std)]

pub mod addr;
pub mod arch;
pub mod backtrace;
pub mod log;
pub mod sync;

pub use addr::{PhysAddr, VirtAddr};

/// Test-only serialization for this crate's process-global state
/// (`arch::ARCH_PORT`), which every test in [`arch`] and [`sync::irq`] that
/// registers a fake port touches and which otherwise runs concurrently
/// within one `cargo test` binary.
#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::{Mutex, MutexGuard};

    static GLOBAL_LOCK: Mutex<()> = Mutex::new(());

    pub fn lock_globals() -> MutexGuard<'static, ()> {
        GLOBAL_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }
}
