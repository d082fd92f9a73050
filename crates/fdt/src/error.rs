//! FDT parse errors.

/// Errors that can occur while parsing a Flattened Device Tree blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdtError {
    /// The header's `magic` field was not `0xD00DFEED`.
    MagicMismatch,
    /// The structure-block token stream violated a structural invariant:
    /// a token appeared where a different one was expected, a mandatory
    /// property was missing, or a `phandle` reference could not be resolved.
    InvalidDeviceTree(&'static str),
    /// A `reg`/`ranges`-shaped property's length was not a multiple of the
    /// address+size cell count inherited from the parent node.
    InvalidCellCounts,
    /// An `#address-cells`/`#size-cells` value other than 1 or 2 was seen.
    UnsupportedCellSize(u32),
}

impl core::fmt::Display for FdtError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::MagicMismatch => write!(f, "FDT magic mismatch"),
            Self::InvalidDeviceTree(msg) => write!(f, "invalid device tree: {msg}"),
            Self::InvalidCellCounts => write!(f, "property length is not a multiple of cell size"),
            Self::UnsupportedCellSize(n) => write!(f, "unsupported cell size: {n}"),
        }
    }
}
