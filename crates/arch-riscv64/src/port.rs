//! [`Riscv64Port`]: the concrete [`ArchPort`] implementation for this
//! workspace's one supported architecture.

use rill_core::arch::{ArchPort, Registers, SP_INDEX};

use crate::csr;
use crate::trap::trap_entry;

/// The riscv64 architecture port. Zero-sized — every method operates
/// entirely through CSRs and the `Registers` it is handed, never through
/// `self` state.
pub struct Riscv64Port;

impl ArchPort for Riscv64Port {
    fn enable_interrupts(&self) {
        // SAFETY: called with a trap vector already installed and
        // `sscratch` pointing at a live thread's frame, per `ArchPort`'s
        // contract.
        unsafe { csr::set_sie() };
    }

    fn disable_interrupts(&self) {
        // SAFETY: no precondition beyond supervisor mode.
        unsafe { csr::clear_sie() };
    }

    fn interrupts_enabled(&self) -> bool {
        csr::sie_enabled()
    }

    fn install_trap_vector(&self) {
        // SAFETY: `trap_entry` is a valid, properly aligned trap-vector
        // entry point.
        unsafe { csr::install_trap_vector(trap_entry as usize) };
    }

    fn setup_thread(&self, regs: &mut Registers, entry: usize, stack_top: usize) {
        *regs = Registers::zeroed();
        regs.pc = entry as u64;
        regs.gpr[SP_INDEX] = stack_top as u64;
    }

    fn switch_to(&self, regs: *const Registers) {
        // SAFETY: `regs` outlives every subsequent trap until the next
        // `switch_to`, per `ArchPort::switch_to`'s contract.
        unsafe { csr::write_sscratch(regs as usize) };
    }

    fn wait_for_interrupt(&self) {
        csr::wait_for_interrupt();
    }
}

/// The single, statically allocated port instance this crate registers.
pub static RISCV64_PORT: Riscv64Port = Riscv64Port;

/// Registers [`RISCV64_PORT`] as the global architecture port.
///
/// Should be called exactly once, before any code calls
/// `rill_core::arch::arch_port`.
pub fn install() {
    rill_core::arch::set_arch_port(&RISCV64_PORT);
}
