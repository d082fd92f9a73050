//! The module registry (§6): "A compile-time list of `{name, enabled,
//! init_kind}` where `init_kind` is either `always_run(init_fn(dt))` or
//! `driver{compatible_strings[], init_fn(dt, node_id)}`. Binding semantics:
//! for every device-tree node with a `compatible` property, the first
//! entry whose list contains any of the node's compat strings is
//! instantiated exactly once; interrupt controllers... are bound in an
//! **early pass** before all others."
//!
//! Grounded on the teacher's `hadron_drivers::registry` matching semantics
//! (first-match-wins, log a line per bind), re-expressed per §9's resolved
//! design note as a plain `static` table rather than the teacher's
//! linker-section-scanned `PciDriverEntry`/`PlatformDriverEntry` arrays —
//! this rewrite has no PCI bus and no code-generation machinery, so a
//! `const` slice declared directly in source plays the same role.

extern crate alloc;

use alloc::boxed::Box;

use rill_fdt::{DeviceTree, NodeId};

/// What kind of entry point a registry entry has (§6).
pub enum InitKind {
    /// Runs once during bring-up, independent of any device-tree node.
    AlwaysRun(fn(&DeviceTree<'_>)),
    /// Binds to the first device-tree node whose `compatible` list
    /// contains one of `compatible`.
    Driver { compatible: &'static [&'static str], init: fn(&DeviceTree<'_>, NodeId) },
}

/// One module-registry entry (§6).
pub struct ModuleEntry {
    pub name: &'static str,
    pub enabled: bool,
    pub init_kind: InitKind,
}

fn init_plic(dt: &DeviceTree<'_>, node: NodeId) {
    let plic = match rill_plic::init_driver(dt, node) {
        Ok(plic) => plic,
        Err(e) => {
            rill_core::kerr!("plic: init_driver failed: {}", e);
            return;
        }
    };
    let leaked: &'static rill_plic::Plic = Box::leak(Box::new(plic));
    if let Err(e) = rill_interrupt::register(leaked) {
        rill_core::kerr!("plic: register failed: {}", e);
        return;
    }
    for id in 1..=leaked.ndev() {
        let _ = leaked.set_priority(id, 1);
        let _ = leaked.enable(id);
    }
    let _ = leaked.set_threshold(0);
    rill_core::kinfo!("plic: bound, {} sources", leaked.ndev());
}

/// The compile-time module table (§6). Ordering has no effect on binding
/// semantics (the early pass/general pass split is by `interrupt-controller`
/// property, not table order), but keeping the interrupt-controller driver
/// first mirrors the teacher's practice of listing foundational drivers
/// ahead of leaf ones for readability.
pub static MODULES: &[ModuleEntry] = &[ModuleEntry {
    name: "plic",
    enabled: true,
    init_kind: InitKind::Driver { compatible: &["riscv,plic0", "sifive,plic-1.0.0"], init: init_plic },
}];

/// Runs the two-pass device-tree walk (§2's bring-up data flow / §6's
/// binding semantics): interrupt controllers first, then every other
/// node. Returns `(bound, unmatched)` counts for the bring-up summary line
/// (§2.1's "log a one-line summary").
pub fn bind_all(dt: &DeviceTree<'_>) -> (usize, usize) {
    let mut bound = 0usize;
    let mut unmatched = 0usize;

    for (id, node) in dt.iter_preorder() {
        if node.is_interrupt_controller() && node.property("compatible").is_some() {
            if try_bind(dt, id) {
                bound += 1;
            } else {
                unmatched += 1;
            }
        }
    }

    for (id, node) in dt.iter_preorder() {
        if node.is_interrupt_controller() || node.property("compatible").is_none() {
            continue;
        }
        if try_bind(dt, id) {
            bound += 1;
        } else {
            unmatched += 1;
        }
    }

    for entry in MODULES {
        if entry.enabled {
            if let InitKind::AlwaysRun(init) = entry.init_kind {
                init(dt);
            }
        }
    }

    (bound, unmatched)
}

/// Matches `node` against the registry's driver entries, binding (and
/// running) the first match. Returns whether a match was found.
fn try_bind(dt: &DeviceTree<'_>, node: NodeId) -> bool {
    for entry in MODULES {
        if !entry.enabled {
            continue;
        }
        let InitKind::Driver { compatible, init } = entry.init_kind else { continue };
        if compatible.iter().any(|c| dt.node(node).is_compatible(c)) {
            rill_core::kinfo!("matched {} -> driver '{}'", dt.node(node).name(), entry.name);
            init(dt, node);
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_not_empty() {
        assert!(!MODULES.is_empty());
    }
}
