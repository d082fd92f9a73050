//! `rill-kernel` — bring-up, the module registry, and the kernel console
//! contract (§2, §6): the crate that ties every portable `rill-*` crate
//! together into a bootable riscv64 "virt" kernel.
//!
//! [`kernel_init`] is the true entry point. It is called by the (out of
//! scope, §1) boot collaborator once the hart is in supervisor mode with a
//! valid stack, having already placed the raw FDT blob somewhere in memory
//! and built an early console backend. Nothing before that point — SBI
//! handoff, relocation, the initial stack — is this crate's concern.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod console;
pub mod heap;
pub mod registry;
pub mod state;

#[cfg(not(test))]
use core::panic::PanicInfo;

use rill_core::addr::{set_hhdm_offset, PAGE_SIZE};
use rill_core::arch::arch_port;
use rill_fdt::DeviceTree;
use rill_interrupt::DispatchOutcome;
use rill_mm::slab;

/// The symbols the linker script places at the start and (one past) the end
/// of the kernel image, so bring-up can carve its own footprint out of
/// usable RAM before handing the rest to the buddy allocator.
unsafe extern "C" {
    static __kernel_start: u8;
    static __kernel_end: u8;
}

/// The global heap every `extern crate alloc` user in this workspace draws
/// from (`rill-fdt`'s node arena, this crate's own console-backend table).
#[global_allocator]
static HEAP: heap::KernelHeap = heap::KernelHeap::new();

// ---------------------------------------------------------------------------
// Bring-up
// ---------------------------------------------------------------------------

/// A half-open physical address interval, `[start, end)`.
#[derive(Clone, Copy)]
struct Interval {
    start: u64,
    end: u64,
}

impl Interval {
    fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }

    fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Upper bound on simultaneously pending address runs while subtracting
/// exclusions out of one memory-node `reg` range — far above what a single
/// "virt" board's FDT ever carries (one memory node, a handful of firmware
/// reservations, one kernel image).
const MAX_PENDING_RUNS: usize = 32;

/// Subtracts every interval in `exclusions` from `region`, appending the
/// resulting sub-intervals (order not significant, empty ones dropped) to
/// `out`. Kept entirely on the stack: bring-up runs before the heap has any
/// backing memory to grow from.
fn subtract_exclusions(region: Interval, exclusions: &[Interval], out: &mut [Interval; MAX_PENDING_RUNS], out_len: &mut usize) {
    let mut pending = [Interval { start: 0, end: 0 }; MAX_PENDING_RUNS];
    let mut pending_len = 1;
    pending[0] = region;

    for excl in exclusions {
        let mut next = [Interval { start: 0, end: 0 }; MAX_PENDING_RUNS];
        let mut next_len = 0;
        for &r in &pending[..pending_len] {
            if !r.overlaps(excl) {
                if next_len < MAX_PENDING_RUNS {
                    next[next_len] = r;
                    next_len += 1;
                }
                continue;
            }
            if r.start < excl.start && next_len < MAX_PENDING_RUNS {
                next[next_len] = Interval { start: r.start, end: excl.start };
                next_len += 1;
            }
            if excl.end < r.end && next_len < MAX_PENDING_RUNS {
                next[next_len] = Interval { start: excl.end, end: r.end };
                next_len += 1;
            }
        }
        pending = next;
        pending_len = next_len;
    }

    for &r in &pending[..pending_len] {
        if !r.is_empty() && *out_len < MAX_PENDING_RUNS {
            out[*out_len] = r;
            *out_len += 1;
        }
    }
}

/// Whether `name` names a device-tree memory node, by the devicetree-spec
/// convention (`"memory"` or `"memory@<unit-address>"`).
fn is_memory_node(name: &str) -> bool {
    name == "memory" || name.starts_with("memory@")
}

/// Computes usable RAM as `(memory node reg ranges) minus (firmware
/// reservations) minus (the kernel's own load range)` (§4.2's "Ingesting
/// firmware reservations") and `ingest`s one buddy-allocator run per
/// resulting contiguous interval.
///
/// The kernel's own image is excluded as its own interval rather than
/// folded into the reservation list — a reservation that happens to overlap
/// it is still subtracted correctly (set union, not double-subtraction),
/// but the kernel doesn't depend on firmware having reserved its own
/// footprint in the first place.
fn ingest_usable_ram(dt: &DeviceTree<'_>) {
    // SAFETY: `__kernel_start`/`__kernel_end` are linker-provided bounds,
    // valid for the lifetime of the kernel.
    let kernel_range = unsafe {
        Interval {
            start: core::ptr::addr_of!(__kernel_start) as u64,
            end: core::ptr::addr_of!(__kernel_end) as u64,
        }
    };

    let mut exclusions = [Interval { start: 0, end: 0 }; MAX_PENDING_RUNS];
    let mut exclusion_count = 0;
    exclusions[exclusion_count] = kernel_range;
    exclusion_count += 1;
    for rsv in dt.memory_reservations() {
        if exclusion_count >= MAX_PENDING_RUNS {
            rill_core::kwarn!("rill-kernel: more memory reservations than this bring-up pass tracks, dropping the rest");
            break;
        }
        exclusions[exclusion_count] = Interval { start: rsv.address, end: rsv.address + rsv.size };
        exclusion_count += 1;
    }

    let mut buddy = state::BUDDY.lock();
    let mut ingested_pages = 0u64;

    for (id, node) in dt.iter_preorder() {
        if !is_memory_node(node.name()) {
            continue;
        }
        let Ok(reg) = dt.reg_iter(id) else {
            rill_core::kwarn!("rill-kernel: memory node '{}' has a malformed reg property, skipping", node.name());
            continue;
        };
        for entry in reg {
            let region = Interval { start: entry.addr, end: entry.addr + entry.size };
            let mut usable = [Interval { start: 0, end: 0 }; MAX_PENDING_RUNS];
            let mut usable_len = 0;
            subtract_exclusions(region, &exclusions[..exclusion_count], &mut usable, &mut usable_len);
            for run in &usable[..usable_len] {
                let start_page = run.start.div_ceil(PAGE_SIZE);
                let end_page = run.end / PAGE_SIZE;
                if end_page > start_page {
                    buddy.ingest(start_page, end_page - start_page);
                    ingested_pages += end_page - start_page;
                }
            }
        }
    }

    rill_core::kinfo!("rill-kernel: ingested {} pages ({} MiB) of usable RAM", ingested_pages, ingested_pages * PAGE_SIZE / (1024 * 1024));
}

/// Reads the DTB header's `totalsize` field (big-endian `u32` at byte
/// offset 4) so bring-up can build a bounds-checked slice before handing
/// the blob to [`DeviceTree::parse`]. Kept here rather than in `rill-fdt`:
/// everywhere else in that crate already has a slice, never a bare pointer
/// fresh off a boot register.
///
/// # Safety
/// `ptr` must point to at least 8 readable bytes.
unsafe fn peek_total_size(ptr: *const u8) -> usize {
    // SAFETY: caller's contract.
    let bytes = unsafe { core::slice::from_raw_parts(ptr, 8) };
    u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize
}

/// Brings up the kernel and never returns (§2's bring-up data flow, §2.1's
/// ambient additions).
///
/// # Safety
/// Must be called exactly once, by the boot collaborator, with the hart
/// already in supervisor mode on a valid stack. `fdt_ptr` must point to a
/// well-formed FDT blob that stays mapped and unchanged for the rest of the
/// kernel's lifetime; `early_console`'s `write_bytes` must be safe to call
/// from supervisor mode with interrupts disabled.
pub unsafe fn kernel_init(fdt_ptr: *const u8, early_console: console::Backend) -> ! {
    // Register the one console backend bring-up has, before anything else
    // can be observed (§2.1: "so that parse errors and panics during
    // bring-up are observable at all").
    console::add_backend(early_console);
    rill_core::kinfo!("rill-kernel: bring-up starting");

    // No paging layer exists in this rewrite (§1's identity/HHDM-only
    // memory model) — the HHDM offset is fixed at zero rather than read
    // from a boot collaborator that does not exist here.
    set_hhdm_offset(0);

    rill_arch_riscv64::install();
    rill_arch_riscv64::set_trap_handler(handle_trap);
    arch_port().install_trap_vector();
    rill_core::kdebug!("rill-kernel: arch port installed, trap vector armed");

    // SAFETY: caller's contract guarantees `fdt_ptr` is a valid FDT blob.
    let total_size = unsafe { peek_total_size(fdt_ptr) };
    // SAFETY: `total_size` came from the blob's own header; the caller's
    // contract guarantees the whole blob stays mapped for this long.
    let fdt_bytes = unsafe { core::slice::from_raw_parts(fdt_ptr, total_size) };
    let dt = match DeviceTree::parse(fdt_bytes) {
        Ok(dt) => dt,
        Err(e) => panic!("FDT parse failed: {e}"),
    };
    rill_core::kinfo!("rill-kernel: parsed device tree, {} nodes", dt.node_count());

    ingest_usable_ram(&dt);

    let mut cache_cache = slab::bootstrap_cache_cache();
    let thread_align_log = (core::mem::align_of::<rill_sched::Thread>() as u64).trailing_zeros();
    let thread_cache = {
        let mut buddy = state::BUDDY.lock();
        match cache_cache.create_cache(
            &mut buddy,
            "thread-cache",
            0,
            core::mem::size_of::<rill_sched::Thread>() as u64,
            thread_align_log,
        ) {
            Ok(cache) => cache,
            Err(e) => panic!("failed to bootstrap the thread cache: {e}"),
        }
    };
    rill_core::kdebug!("rill-kernel: cache-cache and thread-cache bootstrapped");

    heap::HEAP.set_buddy(&state::BUDDY);

    // SAFETY: called exactly once, before any trap can land or `with_kernel`
    // can be called from elsewhere.
    unsafe { state::init(cache_cache, thread_cache) };

    let (bound, unmatched) = registry::bind_all(&dt);
    rill_core::kinfo!("rill-kernel: module registry: {} bound, {} unmatched", bound, unmatched);

    state::with_kernel(|kernel| {
        let mut buddy = state::BUDDY.lock();
        match kernel.scheduler.spawn_kernel(&mut buddy, kernel.thread_cache, idle_thread_entry as usize) {
            Ok(id) => rill_core::kinfo!("rill-kernel: spawned idle thread {:?}", id),
            Err(e) => rill_core::kerr!("rill-kernel: failed to spawn idle thread: {e}"),
        }
    });

    // SAFETY: the scheduler is initialized, the trap vector is installed,
    // and the PLIC (if bound) has every wired source enabled above
    // threshold — unmasking now is safe to take a trap from.
    unsafe { rill_arch_riscv64::csr::unmask_timer_and_external() };
    arch_port().enable_interrupts();
    rill_core::kinfo!("rill-kernel: bring-up complete, interrupts enabled");

    loop {
        arch_port().wait_for_interrupt();
    }
}

/// Entry point for every kernel thread `kernel_init` spawns beyond the
/// sentinel. No real workload is named anywhere in the spec, so this just
/// parks in the idle loop; it exists to exercise `spawn_kernel` and give the
/// scheduler more than one thread to round-robin over.
extern "C" fn idle_thread_entry() {
    loop {
        arch_port().wait_for_interrupt();
    }
}

/// Tears down the calling kernel thread and never returns (§4.5 names this
/// `exit_current() -> !`). Wraps `Scheduler::exit_current`, which stays
/// host-testable and returns normally at the `rill-sched` layer.
pub fn exit_current_thread() -> ! {
    state::with_kernel(|kernel| {
        let mut buddy = state::BUDDY.lock();
        kernel.scheduler.exit_current(&mut buddy, kernel.thread_cache);
        arch_port().switch_to(kernel.scheduler.current_registers());
    });
    loop {
        arch_port().wait_for_interrupt();
    }
}

// ---------------------------------------------------------------------------
// Trap handler
// ---------------------------------------------------------------------------

/// The function registered with `rill_arch_riscv64::set_trap_handler`.
/// Locks the global scheduler, runs it through `rill_interrupt`'s portable
/// dispatch core, and turns any non-`Resumed` outcome into a real panic
/// (§4.4, §7) — `rill_interrupt::trap::dispatch` itself never panics, to
/// stay host-testable.
fn handle_trap(scause: u64, stval: usize) {
    let outcome = state::with_kernel(|kernel| rill_interrupt::dispatch(&mut kernel.scheduler, scause, stval));
    match outcome {
        DispatchOutcome::Resumed => {}
        DispatchOutcome::PageFault { addr } => panic!("page fault at {addr:#x} (scause {scause:#x})"),
        DispatchOutcome::UnhandledSyscall => panic!("unhandled syscall (ecall from user, scause {scause:#x})"),
        DispatchOutcome::Unhandled(trap) => panic!("unhandled trap {trap:?} (scause {scause:#x}, stval {stval:#x})"),
    }
}

// ---------------------------------------------------------------------------
// Panic handling
// ---------------------------------------------------------------------------

/// §7's panic implementation: log the panic message, walk the frame-pointer
/// chain for a raw-address backtrace, then halt with interrupts disabled.
/// No heap allocation anywhere in this path — a panic can happen before or
/// during allocator bring-up.
///
/// Not compiled under `cfg(test)`: the host test build pulls in `std`
/// (`SPEC_FULL.md` §1.1's host-testability split), which already registers
/// its own panic handler.
#[cfg(not(test))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    rill_core::kfatal!("KERNEL PANIC: {}", info);

    let fp = rill_arch_riscv64::current_frame_pointer();
    // SAFETY: `fp` is this handler's own live frame pointer.
    let (frames, count) = unsafe { rill_core::backtrace::capture_backtrace(fp) };
    for &addr in &frames[..count] {
        rill_core::kerr!("  at {:#x}", addr);
    }

    let port = arch_port();
    port.disable_interrupts();
    loop {
        port.wait_for_interrupt();
    }
}
