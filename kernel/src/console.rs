//! The kernel console contract (§6): "`add_backend({name, priority,
//! write_bytes})`; the highest-priority backend is selected to drain each
//! write." The backend itself (a UART driver's byte-out routine, a
//! framebuffer glyph renderer) is out of scope per §1 — only this
//! registration seam, and its wiring into [`rill_core::log`], is
//! implemented here.
//!
//! Grounded on the teacher's `hadron_kernel::log` two-phase sink design,
//! simplified to match what this rewrite's §6 actually specifies: a flat
//! priority selection rather than a `Vec<Box<dyn LogSink>>` fan-out to
//! every registered sink. A fixed-capacity array (no heap dependency for
//! the table itself) holds the backends registered so far.

use core::fmt::Write as _;
use core::sync::atomic::Ordering;

use rill_core::log::{self, LogLevel};
use rill_core::sync::IrqSpinLock;

/// Upper bound on simultaneously registered console backends. There is
/// exactly one real backend in this bring-up kernel (early UART); this
/// headroom matches the teacher's habit of sizing such tables generously
/// rather than exactly.
pub const MAX_BACKENDS: usize = 4;

/// A console backend: raw byte output, named and prioritized per §6.
#[derive(Clone, Copy)]
pub struct Backend {
    pub name: &'static str,
    pub priority: u8,
    pub write_bytes: fn(&[u8]),
}

struct Registry {
    backends: [Option<Backend>; MAX_BACKENDS],
    count: usize,
}

static REGISTRY: IrqSpinLock<Registry> = IrqSpinLock::new(Registry { backends: [None; MAX_BACKENDS], count: 0 });

/// Registers a console backend. If its priority is the highest registered
/// so far, it becomes the active sink for [`rill_core::log`]'s print/log
/// functions immediately.
///
/// Panics if [`MAX_BACKENDS`] backends are already registered — a
/// misconfiguration this bring-up kernel has no graceful recovery from.
pub fn add_backend(backend: Backend) {
    let mut reg = REGISTRY.lock();
    assert!(reg.count < MAX_BACKENDS, "console: too many backends registered");
    reg.backends[reg.count] = Some(backend);
    reg.count += 1;
    drop(reg);
    activate_highest_priority();
}

fn activate_highest_priority() {
    let reg = REGISTRY.lock();
    let highest = reg.backends[..reg.count].iter().flatten().max_by_key(|b| b.priority).copied();
    drop(reg);
    if let Some(backend) = highest {
        ACTIVE.store(backend.write_bytes as *mut (), Ordering::Release);
        log::set_print_fn(print_fn);
        log::set_log_fn(log_fn);
    }
}

static ACTIVE: core::sync::atomic::AtomicPtr<()> = core::sync::atomic::AtomicPtr::new(core::ptr::null_mut());

type WriteBytesFn = fn(&[u8]);

fn write_active(bytes: &[u8]) {
    let ptr = ACTIVE.load(Ordering::Acquire);
    if ptr.is_null() {
        return;
    }
    // SAFETY: only `WriteBytesFn` pointers are ever stored into `ACTIVE`.
    let f: WriteBytesFn = unsafe { core::mem::transmute(ptr) };
    f(bytes);
}

struct ByteSink;

impl core::fmt::Write for ByteSink {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        write_active(s.as_bytes());
        Ok(())
    }
}

fn print_fn(args: core::fmt::Arguments<'_>) {
    let _ = ByteSink.write_fmt(args);
}

fn log_fn(level: LogLevel, args: core::fmt::Arguments<'_>) {
    let mut sink = ByteSink;
    let _ = write!(sink, "[{}] ", level.name());
    let _ = sink.write_fmt(args);
    let _ = sink.write_str("\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicUsize;

    static LOW_CALLS: AtomicUsize = AtomicUsize::new(0);
    static HIGH_CALLS: AtomicUsize = AtomicUsize::new(0);

    fn low_write(_bytes: &[u8]) {
        LOW_CALLS.fetch_add(1, Ordering::SeqCst);
    }
    fn high_write(_bytes: &[u8]) {
        HIGH_CALLS.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn highest_priority_backend_drains_writes() {
        add_backend(Backend { name: "low", priority: 1, write_bytes: low_write });
        add_backend(Backend { name: "high", priority: 9, write_bytes: high_write });

        let before_high = HIGH_CALLS.load(Ordering::SeqCst);
        let before_low = LOW_CALLS.load(Ordering::SeqCst);
        rill_core::kprintln!("probe");
        assert_eq!(HIGH_CALLS.load(Ordering::SeqCst), before_high + 1);
        assert_eq!(LOW_CALLS.load(Ordering::SeqCst), before_low);
    }
}
