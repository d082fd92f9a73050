//! A ticketless test-and-set spin lock built directly on an atomic swap, per
//! §5: "acquire loops until the swap observes 0; release swaps 0 back."
//!
//! This is deliberately simpler than the teacher's TTAS
//! (`compare_exchange_weak` + separate spin-on-read) `SpinLock` in
//! `hadron_core::sync::spinlock` — the spec calls for exactly the swap
//! primitive, described as an SMP placeholder that reduces to disabling
//! interrupts on a single hart. The RAII guard shape (`lock`/`try_lock`,
//! `Deref`/`DerefMut`/`Drop`) is kept from the teacher.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU64, Ordering};

/// The raw swap-based lock word, usable standalone when no payload needs
/// protecting (e.g. guarding a second lock's acquire/release pairing).
pub struct RawTasLock {
    word: AtomicU64,
}

impl RawTasLock {
    /// Creates a new, unlocked word.
    pub const fn new() -> Self {
        Self { word: AtomicU64::new(0) }
    }

    /// Spins until the lock is acquired.
    pub fn acquire(&self) {
        while self.word.swap(1, Ordering::Acquire) != 0 {
            core::hint::spin_loop();
        }
    }

    /// Attempts to acquire without spinning.
    pub fn try_acquire(&self) -> bool {
        self.word.swap(1, Ordering::Acquire) == 0
    }

    /// Releases the lock.
    pub fn release(&self) {
        self.word.swap(0, Ordering::Release);
    }
}

impl Default for RawTasLock {
    fn default() -> Self {
        Self::new()
    }
}

/// A spin-based mutual exclusion lock over `T`, const-constructable for use
/// in `static`s.
pub struct SpinLock<T> {
    raw: RawTasLock,
    data: UnsafeCell<T>,
}

// SAFETY: `SpinLock` grants exclusive access to `T` through the atomic swap;
// `T: Send` is required because the guard may outlive the acquiring thread.
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates a new unlocked `SpinLock`.
    pub const fn new(value: T) -> Self {
        Self { raw: RawTasLock::new(), data: UnsafeCell::new(value) }
    }

    /// Acquires the lock, spinning until it becomes available.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        self.raw.acquire();
        SpinLockGuard { lock: self }
    }

    /// Attempts to acquire the lock without blocking.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        if self.raw.try_acquire() {
            Some(SpinLockGuard { lock: self })
        } else {
            None
        }
    }

    /// Returns a mutable reference to the data without acquiring the lock.
    ///
    /// # Safety
    ///
    /// The caller must ensure no other code is concurrently accessing the
    /// data — intended as a last-resort escape hatch (e.g. the panic path).
    pub unsafe fn force_get(&self) -> &mut T {
        unsafe { &mut *self.data.get() }
    }
}

/// RAII guard releasing the [`SpinLock`] on drop.
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: the guard guarantees exclusive access while it exists.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard guarantees exclusive access while it exists.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.raw.release();
    }
}
