//! Global kernel state: the buddy allocator, the two slab caches bring-up
//! needs, and the scheduler, reachable from contexts — most importantly the
//! trap handler — that cannot be handed a parameter.
//!
//! Grounded on the same `Option`-guarded-registration idiom the portable
//! crates already use for their own singletons (`rill_core::arch::ARCH_PORT`,
//! `rill_interrupt::controller::CONTROLLER`): a `static` starts `None` and is
//! populated exactly once during bring-up, rather than requiring every field
//! to be `const`-constructible up front. `rill_mm::Cache::new` is not `const`
//! (it computes `objects_per_slab` at construction time), which rules out a
//! single `Kernel::new()` usable directly in a `static` initializer.
//!
//! The buddy allocator itself lives in its own top-level static rather than
//! as a `Kernel` field: [`crate::heap::KernelHeap::set_buddy`] needs a
//! `&'static IrqSpinLock<BuddyAllocator>` to grow the heap from, and a field
//! nested inside `IrqSpinLock<Option<Kernel>>` has no such standalone
//! `'static` address to hand it. A page-run `ingest`-er and a thread
//! spawn/exit both taking out two distinct locks (`BUDDY` and `KERNEL`)
//! rather than one is safe — they guard disjoint data and `IrqSpinLock`'s
//! nested interrupt-disable/restore discipline nests cleanly.

use rill_core::sync::IrqSpinLock;
use rill_mm::{BuddyAllocator, Cache};
use rill_sched::Scheduler;

/// The single physical-page allocator every other allocator and the heap
/// grow from.
pub static BUDDY: IrqSpinLock<BuddyAllocator> = IrqSpinLock::new(BuddyAllocator::new());

/// Every slab cache and the scheduler bring-up constructs, as one unit
/// guarded by a single lock — the same thing the interrupt dispatcher and
/// every kernel thread that spawns or exits another thread needs exclusive
/// access to.
pub struct Kernel {
    pub cache_cache: Cache,
    /// Leaked out of `cache_cache` by [`rill_mm::Cache::create_cache`] during
    /// bring-up, so it is already a `'static` reference rather than a value
    /// this struct owns directly.
    pub thread_cache: &'static mut Cache,
    pub scheduler: Scheduler,
}

static KERNEL: IrqSpinLock<Option<Kernel>> = IrqSpinLock::new(None);

/// Installs the global kernel state.
///
/// # Safety
/// Must be called exactly once, during `boot::kernel_init`, before any trap
/// can be taken or [`with_kernel`] called. `scheduler.init()` requires the
/// `Scheduler` to already be at its final, permanent address, which holds
/// here because `guard` derefs straight into `KERNEL`'s own storage rather
/// than a temporary.
pub unsafe fn init(cache_cache: Cache, thread_cache: &'static mut Cache) {
    let mut guard = KERNEL.lock();
    *guard = Some(Kernel { cache_cache, thread_cache, scheduler: Scheduler::new() });
    // SAFETY: the `Kernel` above was just moved into `KERNEL`'s own backing
    // storage, its final address for the rest of the kernel's lifetime.
    unsafe { guard.as_mut().unwrap().scheduler.init() };
}

/// Runs `f` with exclusive access to the global kernel state.
///
/// # Panics
/// If [`init`] has not run yet.
pub fn with_kernel<R>(f: impl FnOnce(&mut Kernel) -> R) -> R {
    let mut guard = KERNEL.lock();
    let kernel = guard.as_mut().expect("kernel::with_kernel called before kernel::init");
    f(kernel)
}
