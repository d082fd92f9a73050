//! `rill-plic` — the Platform-Level Interrupt Controller driver.
//!
//! [`mmio`] holds the pure register-offset arithmetic; [`driver::Plic`] is
//! the concrete [`rill_interrupt::InterruptController`] implementation over
//! a mapped MMIO base, bound to its device-tree node by [`driver::init_driver`].

#![cfg_attr(not(test), no_std)]

pub mod driver;
pub mod error;
pub mod mmio;

pub use driver::{init_driver, Plic, MAX_SOURCES};
pub use error::PlicInitError;

/// Test-only serialization for `rill_core::addr`'s process-global HHDM
/// offset, which every MMIO-backed test in [`driver`] points at its own
/// host-heap buffer.
#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::{Mutex, MutexGuard};

    static HHDM_LOCK: Mutex<()> = Mutex::new(());

    pub fn lock_hhdm() -> MutexGuard<'static, ()> {
        HHDM_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }
}
