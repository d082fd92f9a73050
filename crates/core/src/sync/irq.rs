//! Interrupt-disabled critical sections (§5): "Any state accessed from both
//! a regular context and an interrupt handler must be guarded by
//! interrupt-disabled critical sections (clear the supervisor-interrupt-
//! enable bit, operate, restore)."
//!
//! Grounded on the teacher's `hadron_kernel::sync::irq_spinlock`, but
//! portable: instead of inline per-arch `asm!` blocks behind `cfg`, this
//! goes through [`crate::arch::arch_port`] so the lock itself never names
//! riscv64.

use core::ops::{Deref, DerefMut};

use crate::arch::arch_port;
use crate::sync::spinlock::{SpinLock, SpinLockGuard};

/// Runs `f` with interrupts disabled, restoring the previous enabled state
/// on return (including on panic-unwind, which this `no_std` target never
/// does, but the restore still happens on every normal return path).
pub fn with_irqs_disabled<R>(f: impl FnOnce() -> R) -> R {
    let port = arch_port();
    let was_enabled = port.interrupts_enabled();
    port.disable_interrupts();
    let result = f();
    if was_enabled {
        port.enable_interrupts();
    }
    result
}

/// A spin lock that disables interrupts while held, for data shared between
/// ordinary kernel code and a trap handler.
pub struct IrqSpinLock<T> {
    inner: SpinLock<T>,
}

impl<T> IrqSpinLock<T> {
    /// Creates a new unlocked `IrqSpinLock`.
    pub const fn new(value: T) -> Self {
        Self { inner: SpinLock::new(value) }
    }

    /// Disables interrupts, then acquires the inner spin lock.
    pub fn lock(&self) -> IrqSpinLockGuard<'_, T> {
        let port = arch_port();
        let was_enabled = port.interrupts_enabled();
        port.disable_interrupts();
        IrqSpinLockGuard { guard: Some(self.inner.lock()), was_enabled }
    }
}

/// RAII guard restoring the prior interrupt-enabled state on drop.
pub struct IrqSpinLockGuard<'a, T> {
    guard: Option<SpinLockGuard<'a, T>>,
    was_enabled: bool,
}

impl<T> Deref for IrqSpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.guard.as_deref().expect("guard taken before drop")
    }
}

impl<T> DerefMut for IrqSpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.as_deref_mut().expect("guard taken before drop")
    }
}

impl<T> Drop for IrqSpinLockGuard<'_, T> {
    fn drop(&mut self) {
        // Release the spin lock before interrupts come back on — otherwise
        // a handler on this hart could spin forever trying to reacquire it.
        self.guard = None;
        if self.was_enabled {
            arch_port().enable_interrupts();
        }
    }
}
