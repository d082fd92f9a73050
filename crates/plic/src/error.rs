//! Errors specific to bringing a PLIC driver instance up from the device
//! tree. Runtime interrupt operations report `rill_interrupt::InterruptError`
//! instead — these only cover `init_driver` itself.

use core::fmt;

/// Failure to construct a [`crate::Plic`] from its bound device-tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlicInitError {
    /// The node's `reg` property was missing or yielded no entries.
    MissingReg,
    /// The node carried no `riscv,ndev` property.
    MissingNdev,
    /// `riscv,ndev`'s payload was not exactly 4 bytes.
    InvalidNdev,
    /// No `interrupts-extended` entry referenced a supervisor-external
    /// context (specifier `9`), so no (hart, privilege) context could be
    /// determined.
    NoSupervisorContext,
}

impl fmt::Display for PlicInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingReg => write!(f, "PLIC node has no usable reg property"),
            Self::MissingNdev => write!(f, "PLIC node has no riscv,ndev property"),
            Self::InvalidNdev => write!(f, "PLIC node's riscv,ndev property is malformed"),
            Self::NoSupervisorContext => write!(f, "no supervisor-external context found for this hart"),
        }
    }
}
