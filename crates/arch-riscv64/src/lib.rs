//! `rill-arch-riscv64` — the riscv64 architecture port (§4.4, §6).
//!
//! Implements `rill_core::arch::ArchPort` for the riscv64 "virt" platform:
//! CSR access ([`csr`]) built on the `riscv` crate, the direct-mode
//! supervisor trap vector ([`trap`]), and [`port::Riscv64Port`] tying both
//! to the portable contract. No other crate in this workspace names
//! `riscv64` directly — this is the one seam that does.
//!
//! This crate does not build for a host target (the `riscv` crate's CSR
//! accessors are riscv-only), so unlike the rest of the workspace it is not
//! `cfg(test)`-host-testable as a whole; [`port::Riscv64Port::setup_thread`]
//! is plain data manipulation and still carries a unit test below.

#![cfg_attr(not(test), no_std)]

pub mod csr;
pub mod port;
pub mod trap;

pub use csr::current_frame_pointer;
pub use port::{install, Riscv64Port};
pub use trap::{set_trap_handler, TrapHandlerFn};

#[cfg(test)]
mod tests {
    use super::*;
    use rill_core::arch::{Registers, SP_INDEX};

    #[test]
    fn setup_thread_points_pc_and_sp_at_the_given_entry_and_stack() {
        let port = Riscv64Port;
        let mut regs = Registers::zeroed();
        regs.gpr[3] = 0xDEAD; // tp, say, left over from a prior thread
        port.setup_thread(&mut regs, 0x8020_0000, 0xFFFF_FFC0_0010_0000);
        assert_eq!(regs.pc, 0x8020_0000);
        assert_eq!(regs.gpr[SP_INDEX], 0xFFFF_FFC0_0010_0000);
        // A fresh frame is fully zeroed apart from pc/sp.
        assert_eq!(regs.gpr[3], 0);
    }
}
