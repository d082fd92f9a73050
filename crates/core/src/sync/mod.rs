//! Synchronization primitives.
//!
//! [`SpinLock`] is the single-hart-ready-for-SMP primitive named in §5: a
//! ticketless test-and-set lock built on an atomic swap. [`irq`] layers
//! interrupt-disabled critical sections on top of it for data shared with
//! trap handlers.

mod irq;
mod spinlock;

pub use irq::{with_irqs_disabled, IrqSpinLock, IrqSpinLockGuard};
pub use spinlock::{RawTasLock, SpinLock, SpinLockGuard};
