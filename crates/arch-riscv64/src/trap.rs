//! The riscv64 trap vector (§4.4): a single direct-mode supervisor trap
//! entry point that saves GPRs to the current thread's register frame,
//! dispatches through the registered handler, and restores whichever
//! thread `sscratch` names on return.
//!
//! Grounded on vanadinite's `stvec_trap_shim` swap-trick entry
//! (`csrrw t0, sscratch, t0` frees a GPR to address the register frame
//! without losing its prior value), simplified: `sscratch` always points
//! directly at a [`rill_core::arch::Registers`] rather than a stack-frame
//! structure, and there is no floating-point context to save.

use core::sync::atomic::{AtomicPtr, Ordering};

/// Signature of the registered trap handler: the raw `scause`/`stval`
/// values read at trap entry. `rill-kernel` registers the function that
/// locks the global scheduler and calls into `rill_interrupt::dispatch`;
/// this crate never references the scheduler itself.
pub type TrapHandlerFn = fn(scause: u64, stval: usize);

fn null_handler(_scause: u64, _stval: usize) {}

static TRAP_HANDLER: AtomicPtr<()> = AtomicPtr::new(null_handler as *mut ());

/// Registers the function the trap entry calls on every trap.
///
/// Must be called before [`rill_core::arch::ArchPort::install_trap_vector`]
/// runs for real; a trap taken with the default no-op handler is silently
/// dropped (resumed at the next instruction).
pub fn set_trap_handler(f: TrapHandlerFn) {
    TRAP_HANDLER.store(f as *mut (), Ordering::Release);
}

#[inline]
fn load_trap_handler() -> TrapHandlerFn {
    let ptr = TRAP_HANDLER.load(Ordering::Acquire);
    // SAFETY: only `TrapHandlerFn` pointers (or the initial `null_handler`)
    // are ever stored into `TRAP_HANDLER`.
    unsafe { core::mem::transmute(ptr) }
}

/// Size of the dedicated stack the trap entry switches to before calling
/// into Rust, so a trap taken with a near-exhausted thread stack still has
/// room to run the dispatcher.
const TRAP_STACK_SIZE: usize = 4096 * 4;

#[repr(align(16))]
struct TrapStack([u8; TRAP_STACK_SIZE]);

static mut TRAP_STACK: TrapStack = TrapStack([0; TRAP_STACK_SIZE]);

/// Called from [`trap_entry`] once `scause`/`stval` are in `a0`/`a1`.
extern "C" fn riscv64_trap_dispatch(scause: u64, stval: usize) {
    load_trap_handler()(scause, stval);
}

/// The direct-mode supervisor trap vector installed at `stvec` (§6).
///
/// GPR save/restore offsets follow [`rill_core::arch::Registers`]'s fixed
/// field order (`ra, sp, gp, tp, t0..t2, s0..s1, a0..a7, s2..s11, t3..t6`,
/// then `pc` at index 31) — every `N*8(t0)` offset below is that index
/// times 8.
///
/// # Safety
/// Only valid as the target of `stvec`; never call directly. Requires
/// `sscratch` to already point at the current thread's `Registers` frame.
#[unsafe(naked)]
pub unsafe extern "C" fn trap_entry() {
    core::arch::naked_asm!(
        // Swap sscratch <-> t0: t0 now points at the current thread's
        // Registers; sscratch temporarily holds t0's prior value.
        "csrrw t0, sscratch, t0",
        "sd ra,   0*8(t0)",
        "sd sp,   1*8(t0)",
        "sd gp,   2*8(t0)",
        "sd tp,   3*8(t0)",
        "sd t1,   5*8(t0)",
        "sd t2,   6*8(t0)",
        "sd s0,   7*8(t0)",
        "sd s1,   8*8(t0)",
        "sd a0,   9*8(t0)",
        "sd a1,  10*8(t0)",
        "sd a2,  11*8(t0)",
        "sd a3,  12*8(t0)",
        "sd a4,  13*8(t0)",
        "sd a5,  14*8(t0)",
        "sd a6,  15*8(t0)",
        "sd a7,  16*8(t0)",
        "sd s2,  17*8(t0)",
        "sd s3,  18*8(t0)",
        "sd s4,  19*8(t0)",
        "sd s5,  20*8(t0)",
        "sd s6,  21*8(t0)",
        "sd s7,  22*8(t0)",
        "sd s8,  23*8(t0)",
        "sd s9,  24*8(t0)",
        "sd s10, 25*8(t0)",
        "sd s11, 26*8(t0)",
        "sd t3,  27*8(t0)",
        "sd t4,  28*8(t0)",
        "sd t5,  29*8(t0)",
        "sd t6,  30*8(t0)",
        // Recover t0's original value out of sscratch (t1 is already saved
        // above, safe to clobber now) and store it, then restore the
        // invariant that sscratch always names the current thread's frame.
        "csrr t1, sscratch",
        "sd t1,   4*8(t0)",
        "csrw sscratch, t0",
        // Save the trapped pc.
        "csrr t1, sepc",
        "sd t1,  31*8(t0)",
        // Switch to the dedicated trap stack; the interrupted thread's own
        // sp is already safe in its Registers frame.
        "la sp, {stack}",
        "li t1, {stack_size}",
        "add sp, sp, t1",
        // Dispatch: a0 = scause, a1 = stval.
        "csrr a0, scause",
        "csrr a1, stval",
        "call {dispatch}",
        // Dispatch (by way of a timer tick) may have pointed sscratch at a
        // different thread; re-read it to find who resumes.
        "csrr t0, sscratch",
        "ld t1,  31*8(t0)",
        "csrw sepc, t1",
        "ld ra,   0*8(t0)",
        "ld sp,   1*8(t0)",
        "ld gp,   2*8(t0)",
        "ld tp,   3*8(t0)",
        "ld t1,   5*8(t0)",
        "ld t2,   6*8(t0)",
        "ld s0,   7*8(t0)",
        "ld s1,   8*8(t0)",
        "ld a0,   9*8(t0)",
        "ld a1,  10*8(t0)",
        "ld a2,  11*8(t0)",
        "ld a3,  12*8(t0)",
        "ld a4,  13*8(t0)",
        "ld a5,  14*8(t0)",
        "ld a6,  15*8(t0)",
        "ld a7,  16*8(t0)",
        "ld s2,  17*8(t0)",
        "ld s3,  18*8(t0)",
        "ld s4,  19*8(t0)",
        "ld s5,  20*8(t0)",
        "ld s6,  21*8(t0)",
        "ld s7,  22*8(t0)",
        "ld s8,  23*8(t0)",
        "ld s9,  24*8(t0)",
        "ld s10, 25*8(t0)",
        "ld s11, 26*8(t0)",
        "ld t3,  27*8(t0)",
        "ld t4,  28*8(t0)",
        "ld t5,  29*8(t0)",
        "ld t6,  30*8(t0)",
        "ld t0,   4*8(t0)",
        "sret",
        stack = sym TRAP_STACK,
        stack_size = const TRAP_STACK_SIZE,
        dispatch = sym riscv64_trap_dispatch,
    );
}
