//! The interrupt controller façade (§4.4): "A single registered
//! `InterruptController` exposing `{enable, disable, setPriority,
//! getPriority, setHandler}`; before registration, every call fails with
//! `NoController`; a second `register` fails with `AlreadyRegistered`."
//!
//! Grounded on the teacher's driver-registry single-registration discipline
//! (`hadron-drivers::registry`, which refuses to match a second driver
//! against an already-bound device node), simplified here to a single global
//! slot behind `rill_core::sync::IrqSpinLock` rather than a table, since the
//! rewrite has exactly one interrupt controller (the PLIC).

use core::fmt;

use rill_core::sync::IrqSpinLock;

/// A wire-level interrupt source identifier (the PLIC's 1-based source id).
pub type InterruptId = u32;

/// A registered handler, invoked with the id of the source that fired.
pub type Handler = fn(InterruptId);

/// Errors the façade and its registered controller can report (§7's
/// "Hardware" taxonomy row).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptError {
    /// An operation was attempted before any controller registered itself.
    NoController,
    /// A second controller tried to register after the first.
    AlreadyRegistered,
    /// `id` is outside the controller's valid source range.
    InvalidInterruptId,
    /// A priority value outside the controller's supported range.
    InvalidPriority,
    /// A (hart, privilege) context outside the controller's bound set.
    InvalidContext,
    /// A threshold value outside the controller's supported range.
    InvalidThreshold,
    /// The controller failed for a reason not covered by the above.
    ControllerInternalError,
}

impl fmt::Display for InterruptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoController => write!(f, "no interrupt controller registered"),
            Self::AlreadyRegistered => write!(f, "an interrupt controller is already registered"),
            Self::InvalidInterruptId => write!(f, "invalid interrupt id"),
            Self::InvalidPriority => write!(f, "invalid interrupt priority"),
            Self::InvalidContext => write!(f, "invalid interrupt context"),
            Self::InvalidThreshold => write!(f, "invalid interrupt threshold"),
            Self::ControllerInternalError => write!(f, "interrupt controller internal error"),
        }
    }
}

/// The operations every interrupt controller implementation must provide.
///
/// `claim_dispatch_complete` is not one of the five façade operations named
/// in §4.4 — it concretizes "PLIC claim → dispatch → complete" for
/// [`crate::trap::dispatch`], which needs a single call to run the claim,
/// look up and invoke the source's registered handler, and complete it.
pub trait InterruptController: Sync {
    fn enable(&self, id: InterruptId) -> Result<(), InterruptError>;
    fn disable(&self, id: InterruptId) -> Result<(), InterruptError>;
    fn set_priority(&self, id: InterruptId, priority: u32) -> Result<(), InterruptError>;
    fn get_priority(&self, id: InterruptId) -> Result<u32, InterruptError>;
    fn set_handler(&self, id: InterruptId, handler: Handler) -> Result<(), InterruptError>;
    /// Claims the highest-priority pending source, invokes its registered
    /// handler (if any), and completes it. Returns the claimed id, or `None`
    /// if nothing was pending above threshold.
    fn claim_dispatch_complete(&self) -> Option<InterruptId>;
}

static CONTROLLER: IrqSpinLock<Option<&'static dyn InterruptController>> = IrqSpinLock::new(None);

/// Registers the single interrupt controller for the system.
///
/// # Errors
/// Returns `AlreadyRegistered` if a controller has already registered.
pub fn register(controller: &'static dyn InterruptController) -> Result<(), InterruptError> {
    let mut slot = CONTROLLER.lock();
    if slot.is_some() {
        return Err(InterruptError::AlreadyRegistered);
    }
    *slot = Some(controller);
    Ok(())
}

/// Clears the registered controller. Test-only: production code registers
/// exactly once at boot and never unregisters.
#[cfg(test)]
pub(crate) fn reset_for_test() {
    *CONTROLLER.lock() = None;
}

fn with_controller<R>(f: impl FnOnce(&'static dyn InterruptController) -> R) -> Result<R, InterruptError> {
    let guard = CONTROLLER.lock();
    let controller = (*guard).ok_or(InterruptError::NoController)?;
    Ok(f(controller))
}

pub fn enable(id: InterruptId) -> Result<(), InterruptError> {
    with_controller(|c| c.enable(id))?
}

pub fn disable(id: InterruptId) -> Result<(), InterruptError> {
    with_controller(|c| c.disable(id))?
}

pub fn set_priority(id: InterruptId, priority: u32) -> Result<(), InterruptError> {
    with_controller(|c| c.set_priority(id, priority))?
}

pub fn get_priority(id: InterruptId) -> Result<u32, InterruptError> {
    with_controller(|c| c.get_priority(id))?
}

pub fn set_handler(id: InterruptId, handler: Handler) -> Result<(), InterruptError> {
    with_controller(|c| c.set_handler(id, handler))?
}

/// Claims, dispatches, and completes the next pending source on the
/// registered controller. Returns `NoController` if none is registered.
pub fn claim_dispatch_complete() -> Result<Option<InterruptId>, InterruptError> {
    with_controller(|c| c.claim_dispatch_complete())
}
