//! `rill-interrupt` — the interrupt controller façade and the portable trap
//! dispatch core (§4.4).
//!
//! [`controller`] holds the single registered [`controller::InterruptController`]
//! (the PLIC, in `rill-plic`) behind the `NoController`/`AlreadyRegistered`
//! registration discipline. [`trap`] decodes `scause` and routes a trap to
//! the scheduler, the controller, or a reported fault/unhandled outcome —
//! the assembly trap entry point itself lives in `rill-arch-riscv64`.

#![cfg_attr(not(test), no_std)]

mod controller;
mod trap;

pub use controller::{
    claim_dispatch_complete, disable, enable, get_priority, register, set_handler, set_priority, Handler,
    InterruptController, InterruptError, InterruptId,
};
pub use trap::{dispatch, DispatchOutcome, Trap};

/// Test-only serialization for this crate's two pieces of process-global
/// state: [`controller::CONTROLLER`] and `rill_core::addr`'s HHDM offset.
/// Both are touched by tests in [`controller`] and [`trap`] that otherwise
/// run concurrently within one `cargo test` binary.
#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::{Mutex, MutexGuard};

    static GLOBAL_LOCK: Mutex<()> = Mutex::new(());

    pub fn lock_globals() -> MutexGuard<'static, ()> {
        GLOBAL_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }
}
