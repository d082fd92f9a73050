//! The cooperative round-robin scheduler.

use core::fmt;

use rill_core::arch::arch_port;
use rill_mm::{BuddyAllocator, Cache, CacheError};

use crate::id::{IdBitset, ThreadId};
use crate::queue::RunQueue;
use crate::thread::{Thread, ThreadLevel};

/// Order of the buddy block allocated as a new kernel thread's stack: `2^2`
/// pages, 16 KiB. Not specified by name anywhere the distilled spec names a
/// constant; chosen as a representative kernel-thread stack size and
/// recorded as a design decision rather than left as a magic number.
pub const STACK_ORDER: usize = 2;

/// Errors the scheduler can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    /// The thread-id bitset has no free id (8192 live threads already).
    NoAvailableThreads,
    /// The thread-object cache or the stack's buddy block could not be
    /// allocated.
    OutOfMemory,
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoAvailableThreads => write!(f, "scheduler: no available thread ids"),
            Self::OutOfMemory => write!(f, "scheduler: out of memory"),
        }
    }
}

impl From<CacheError> for SchedError {
    fn from(_: CacheError) -> Self {
        Self::OutOfMemory
    }
}

/// Cooperative round-robin thread scheduler over a single run-queue.
///
/// Holds the sentinel thread inline (statically allocated) and
/// everything else by address into slab/buddy memory the caller owns — this
/// type never allocates for itself; `spawn_kernel`/`exit_current` take the
/// allocators as parameters, matching `rill_mm::Cache`'s own
/// dependency-injected style.
pub struct Scheduler {
    sentinel: Thread,
    queue: RunQueue,
    ids: IdBitset,
}

impl Scheduler {
    /// An uninitialized scheduler. Call [`Scheduler::init`] once, after this
    /// value has reached its final, permanent memory address (e.g. inside a
    /// `static IrqSpinLock<Scheduler>`), before spawning or ticking.
    pub const fn new() -> Self {
        Self {
            sentinel: Thread::new(ThreadId::SENTINEL, ThreadLevel::Kernel, rill_core::arch::Registers::zeroed(), 0),
            queue: RunQueue::new(),
            ids: IdBitset::new(),
        }
    }

    /// Links the sentinel thread into the run-queue as its sole member.
    ///
    /// # Safety
    /// Must be called exactly once, after `self` is at its final address
    /// (the run-queue's in-band links capture `&self.sentinel`'s address
    /// permanently).
    pub unsafe fn init(&mut self) {
        let addr = &self.sentinel as *const Thread as usize;
        // SAFETY: `addr` is `self.sentinel`'s final address, per the
        // caller's contract.
        unsafe { self.queue.init_sole(addr) };
    }

    /// The currently running thread's id.
    pub fn current_id(&self) -> ThreadId {
        // SAFETY: the run-queue always points at a live, initialized thread
        // once `init` has run.
        unsafe { &*(self.queue.current() as *const Thread) }.id
    }

    /// Pointer to the currently running thread's register frame.
    ///
    /// `rill-kernel`'s non-returning `exit_current` wrapper calls this right
    /// after [`Scheduler::exit_current`] to hand the now-current thread's
    /// frame to `ArchPort::switch_to`, since `exit_current` itself only
    /// updates the run-queue and never touches `sscratch`.
    pub fn current_registers(&self) -> *const rill_core::arch::Registers {
        // SAFETY: the run-queue always points at a live, initialized thread
        // once `init` has run.
        unsafe { &(*(self.queue.current() as *const Thread)).registers as *const _ }
    }

    /// Spawns a new kernel thread starting at `entry`, appending it to the
    /// run-queue just before the current thread (i.e. at the tail).
    pub fn spawn_kernel(
        &mut self,
        buddy: &mut BuddyAllocator,
        thread_cache: &mut Cache,
        entry: usize,
    ) -> Result<ThreadId, SchedError> {
        let id = self.ids.alloc().ok_or(SchedError::NoAvailableThreads)?;

        let thread_phys = thread_cache.alloc(buddy).map_err(|e| {
            self.ids.free(id);
            SchedError::from(e)
        })?;
        let stack_phys = buddy.alloc(STACK_ORDER).map_err(|_| {
            thread_cache.free(thread_phys);
            self.ids.free(id);
            SchedError::OutOfMemory
        })?;

        let stack_size = (rill_core::addr::PAGE_SIZE as usize) << STACK_ORDER;
        let stack_top = stack_phys.to_hhdm_virt().as_u64() as usize + stack_size;

        let mut registers = rill_core::arch::Registers::zeroed();
        arch_port().setup_thread(&mut registers, entry, stack_top);

        let thread_virt = thread_phys.to_hhdm_virt().as_mut_ptr::<Thread>();
        // SAFETY: `thread_virt` points at freshly allocated, uninitialized
        // storage exactly the size and alignment of `Thread`.
        unsafe {
            thread_virt.write(Thread::new(id, ThreadLevel::Kernel, registers, stack_top));
            self.queue.insert_before_current(thread_virt as usize);
        }

        Ok(id)
    }

    /// Rotates the run-queue head to the tail and dispatches the new head —
    /// the only observable side effect of a tick. Returns the newly current
    /// thread's id.
    pub fn tick(&mut self) -> ThreadId {
        // SAFETY: the run-queue is initialized and non-empty for the
        // lifetime of the scheduler.
        let next = unsafe { self.queue.advance() };
        // SAFETY: `next` is a live thread's address.
        let next_ref = unsafe { &*(next as *const Thread) };
        arch_port().switch_to(&next_ref.registers as *const _);
        next_ref.id
    }

    /// Tears down the current thread: unlinks it from the run-queue, frees
    /// its stack block and `Thread` object, clears its id, and advances to
    /// the next thread. Returns the id of the thread now current.
    ///
    /// The caller-facing `exit_current` never returns to its caller's
    /// thread. This crate stays host-testable, so the actual teardown logic
    /// lives here and returns normally; `rill-kernel` wraps it in the real
    /// non-returning `exit_current` that calls `arch_port().switch_to` on
    /// the result and loops.
    ///
    /// # Panics
    /// If the current thread is the sentinel (id 0), which is never torn
    /// down.
    pub fn exit_current(&mut self, buddy: &mut BuddyAllocator, thread_cache: &mut Cache) -> ThreadId {
        let current = self.current_id();
        assert_ne!(current, ThreadId::SENTINEL, "the sentinel thread is never torn down");

        // SAFETY: the current thread is not the sentinel and is therefore a
        // slab-allocated `Thread` with a real stack block to free.
        let removed_addr = unsafe { self.queue.remove_current() };
        let removed = removed_addr as *const Thread;
        // SAFETY: `removed` was just unlinked and is still valid to read
        // until we free its backing storage below.
        let (stack_top, id) = unsafe { ((*removed).stack_top, (*removed).id) };

        let stack_size = (rill_core::addr::PAGE_SIZE as usize) << STACK_ORDER;
        let stack_base = stack_top - stack_size;
        let stack_phys = rill_core::addr::VirtAddr::new(stack_base as u64).from_hhdm();
        buddy.free(stack_phys, STACK_ORDER);

        let thread_phys = rill_core::addr::VirtAddr::new(removed_addr as u64).from_hhdm();
        thread_cache.free(thread_phys);
        self.ids.free(id);

        self.current_id()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
