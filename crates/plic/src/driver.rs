//! The concrete PLIC [`InterruptController`] implementation.
//!
//! Register accesses are 32-bit volatile loads/stores at `base + offset`,
//! where `base` is the node's `reg`-property physical address mapped
//! through the HHDM — the same addressing convention `rill-mm`'s
//! `inband::hhdm_ptr` uses for buddy/slab storage. Offsets are computed by
//! hand in [`crate::mmio`] rather than through a register-block macro;
//! there's exactly one MMIO device in this tree so the generality isn't
//! worth the proc-macro dependency.

use rill_core::addr::PhysAddr;
use rill_core::sync::IrqSpinLock;
use rill_fdt::{DeviceTree, NodeId, Property};
use rill_interrupt::{Handler, InterruptController, InterruptError, InterruptId};

use crate::error::PlicInitError;
use crate::mmio;

/// Upper bound on wired interrupt sources: one per bit of the 1024-bit
/// per-context enable bitfield.
pub const MAX_SOURCES: usize = 1024;

/// Highest priority value a source can be assigned; priorities range
/// `0..=7`.
pub const MAX_PRIORITY: u32 = 7;

/// A bound PLIC instance: an MMIO base address, the number of wired
/// sources, and the (hart, privilege) context this kernel operates through.
pub struct Plic {
    base: PhysAddr,
    ndev: u32,
    context: u32,
    handlers: IrqSpinLock<[Option<Handler>; MAX_SOURCES]>,
}

impl Plic {
    /// Constructs a PLIC driver instance over a raw MMIO base, source
    /// count, and context index. Does not touch hardware — callers that
    /// want a reset initial state should call [`Plic::set_threshold`]
    /// themselves.
    pub fn new(base: PhysAddr, ndev: u32, context: u32) -> Self {
        Self {
            base,
            ndev,
            context,
            handlers: IrqSpinLock::new([None; MAX_SOURCES]),
        }
    }

    /// The number of wired interrupt sources this instance was bound with
    /// (its device-tree node's `riscv,ndev` property).
    pub fn ndev(&self) -> u32 {
        self.ndev
    }

    fn validate_id(&self, id: InterruptId) -> Result<(), InterruptError> {
        if id == 0 || id > self.ndev {
            return Err(InterruptError::InvalidInterruptId);
        }
        Ok(())
    }

    #[inline]
    unsafe fn read32(&self, offset: usize) -> u32 {
        let ptr = (self.base.to_hhdm_virt().as_u64() as usize + offset) as *const u32;
        // SAFETY: `offset` is one of `mmio`'s computed register offsets,
        // within the PLIC's MMIO window; `base` is mapped through the HHDM.
        unsafe { ptr.read_volatile() }
    }

    #[inline]
    unsafe fn write32(&self, offset: usize, value: u32) {
        let ptr = (self.base.to_hhdm_virt().as_u64() as usize + offset) as *mut u32;
        // SAFETY: see `read32`.
        unsafe { ptr.write_volatile(value) }
    }

    /// Sets this context's priority threshold: sources at or below it never
    /// claim. Not one of [`InterruptController`]'s operations, but needed at
    /// bring-up to unmask every wired priority.
    ///
    /// # Errors
    /// `InvalidThreshold` if `threshold` exceeds [`MAX_PRIORITY`].
    pub fn set_threshold(&self, threshold: u32) -> Result<(), InterruptError> {
        if threshold > MAX_PRIORITY {
            return Err(InterruptError::InvalidThreshold);
        }
        // SAFETY: `threshold_offset` is this context's own register.
        unsafe { self.write32(mmio::threshold_offset(self.context), threshold) };
        Ok(())
    }
}

impl InterruptController for Plic {
    fn enable(&self, id: InterruptId) -> Result<(), InterruptError> {
        self.validate_id(id)?;
        let offset = mmio::enable_word_offset(self.context, id);
        let bit = mmio::enable_bit(id);
        // SAFETY: `offset` is a valid enable-bitfield word for this context.
        unsafe {
            let word = self.read32(offset);
            self.write32(offset, word | (1 << bit));
        }
        Ok(())
    }

    fn disable(&self, id: InterruptId) -> Result<(), InterruptError> {
        self.validate_id(id)?;
        let offset = mmio::enable_word_offset(self.context, id);
        let bit = mmio::enable_bit(id);
        // SAFETY: see `enable`.
        unsafe {
            let word = self.read32(offset);
            self.write32(offset, word & !(1 << bit));
        }
        Ok(())
    }

    fn set_priority(&self, id: InterruptId, priority: u32) -> Result<(), InterruptError> {
        self.validate_id(id)?;
        if priority > MAX_PRIORITY {
            return Err(InterruptError::InvalidPriority);
        }
        // SAFETY: `priority_offset(id)` is `id`'s own priority register.
        unsafe { self.write32(mmio::priority_offset(id), priority) };
        Ok(())
    }

    fn get_priority(&self, id: InterruptId) -> Result<u32, InterruptError> {
        self.validate_id(id)?;
        // SAFETY: see `set_priority`.
        Ok(unsafe { self.read32(mmio::priority_offset(id)) })
    }

    fn set_handler(&self, id: InterruptId, handler: Handler) -> Result<(), InterruptError> {
        self.validate_id(id)?;
        self.handlers.lock()[id as usize] = Some(handler);
        Ok(())
    }

    fn claim_dispatch_complete(&self) -> Option<InterruptId> {
        // SAFETY: `claim_complete_offset` is this context's own register;
        // reading it is the documented claim sequence.
        let id = unsafe { self.read32(mmio::claim_complete_offset(self.context)) };
        if id == 0 {
            return None;
        }
        if let Some(handler) = self.handlers.lock()[id as usize] {
            handler(id);
        }
        // SAFETY: completing with the id just claimed — complete must
        // write back the same id that was claimed.
        unsafe { self.write32(mmio::claim_complete_offset(self.context), id) };
        Some(id)
    }
}

/// FDT property name for the PLIC's source count — outside the known set
/// in `rill-fdt::Property`, so it arrives through the `Unknown` catch-all.
const NDEV_PROPERTY: &str = "riscv,ndev";

/// Specifier value identifying the supervisor-external interrupt line in an
/// `interrupts-extended` entry.
const SUPERVISOR_EXTERNAL_SPECIFIER: u64 = 9;

/// Builds a [`Plic`] from its bound device-tree node: MMIO base from `reg`, source count from
/// `riscv,ndev`, and context from the `interrupts-extended` entry whose
/// specifier names the supervisor-external line.
pub fn init_driver(dt: &DeviceTree<'_>, node: NodeId) -> Result<Plic, PlicInitError> {
    let mut reg = dt.reg_iter(node).map_err(|_| PlicInitError::MissingReg)?;
    let entry = reg.next().ok_or(PlicInitError::MissingReg)?;
    let base = PhysAddr::new(entry.addr);

    let ndev = match dt.node(node).property(NDEV_PROPERTY) {
        Some(Property::Unknown { raw_bytes, .. }) => {
            let bytes: [u8; 4] = (*raw_bytes).try_into().map_err(|_| PlicInitError::InvalidNdev)?;
            u32::from_be_bytes(bytes)
        }
        _ => return Err(PlicInitError::MissingNdev),
    };

    let context = dt
        .interrupts_extended_iter(node)
        .enumerate()
        .find_map(|(idx, entry)| match entry {
            Ok(e) if e.specifier == SUPERVISOR_EXTERNAL_SPECIFIER => Some(idx as u32),
            _ => None,
        })
        .ok_or(PlicInitError::NoSupervisorContext)?;

    Ok(Plic::new(base, ndev, context))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::lock_hhdm;
    use core::sync::atomic::{AtomicU32, Ordering};
    use rill_core::addr::set_hhdm_offset;

    /// Backs a `Plic` with a zeroed host buffer large enough to cover every
    /// register block this test touches, through the HHDM — the same
    /// technique `rill-mm`'s allocator tests use. The returned guard
    /// serializes access to the one process-global HHDM offset and must be
    /// held for the rest of the test.
    fn harness(ndev: u32, context: u32) -> (Plic, std::boxed::Box<[u8]>, std::sync::MutexGuard<'static, ()>) {
        let guard = lock_hhdm();
        let mut backing = std::vec![0u8; 0x21_0000].into_boxed_slice();
        set_hhdm_offset(backing.as_mut_ptr() as u64);
        (Plic::new(PhysAddr::new(0), ndev, context), backing, guard)
    }

    #[test]
    fn id_zero_and_out_of_range_are_rejected() {
        let (plic, _backing, _guard) = harness(8, 1);
        assert_eq!(plic.enable(0), Err(InterruptError::InvalidInterruptId));
        assert_eq!(plic.enable(9), Err(InterruptError::InvalidInterruptId));
        assert!(plic.enable(8).is_ok());
    }

    #[test]
    fn priority_out_of_range_is_rejected() {
        let (plic, _backing, _guard) = harness(8, 0);
        assert_eq!(plic.set_priority(1, 8), Err(InterruptError::InvalidPriority));
        assert!(plic.set_priority(1, 7).is_ok());
        assert_eq!(plic.get_priority(1), Ok(7));
    }

    #[test]
    fn enable_sets_and_clears_only_the_targeted_bit() {
        let (plic, backing, _guard) = harness(40, 2);
        plic.enable(3).unwrap();
        plic.enable(33).unwrap();

        let word0 = u32::from_ne_bytes(backing[0x2100..0x2104].try_into().unwrap());
        let word1 = u32::from_ne_bytes(backing[0x2104..0x2108].try_into().unwrap());
        assert_eq!(word0, 1 << 3);
        assert_eq!(word1, 1 << 1);

        plic.disable(3).unwrap();
        let word0 = u32::from_ne_bytes(backing[0x2100..0x2104].try_into().unwrap());
        assert_eq!(word0, 0);
        let word1 = u32::from_ne_bytes(backing[0x2104..0x2108].try_into().unwrap());
        assert_eq!(word1, 1 << 1, "disabling id 3 must not touch id 33's bit");
    }

    #[test]
    fn threshold_out_of_range_is_rejected() {
        let (plic, _backing, _guard) = harness(8, 0);
        assert_eq!(plic.set_threshold(8), Err(InterruptError::InvalidThreshold));
        assert!(plic.set_threshold(0).is_ok());
    }

    #[test]
    fn claim_returns_none_when_nothing_pending() {
        let (plic, _backing, _guard) = harness(8, 0);
        assert_eq!(plic.claim_dispatch_complete(), None);
    }

    #[test]
    fn claim_dispatches_to_the_registered_handler_and_completes() {
        let (plic, backing, _guard) = harness(8, 0);
        static SEEN: AtomicU32 = AtomicU32::new(0);
        fn handler(id: InterruptId) {
            SEEN.store(id, Ordering::SeqCst);
        }
        plic.set_handler(5, handler).unwrap();

        // Simulate the hardware reporting source 5 as claimable by writing
        // directly into the backing buffer's claim/complete register.
        let claim_off = mmio::claim_complete_offset(0);
        let mut backing = backing;
        backing[claim_off..claim_off + 4].copy_from_slice(&5u32.to_ne_bytes());

        let claimed = plic.claim_dispatch_complete();
        assert_eq!(claimed, Some(5));
        assert_eq!(SEEN.load(Ordering::SeqCst), 5);
        // Completing wrote the same id back into the register.
        let completed = u32::from_ne_bytes(backing[claim_off..claim_off + 4].try_into().unwrap());
        assert_eq!(completed, 5);
    }

    /// Hand-assembles a minimal FDT fixture binding a PLIC node with one
    /// `reg` entry, a `riscv,ndev` property, and an `interrupts-extended`
    /// list whose second entry is the supervisor-external context.
    mod init_driver_tests {
        use super::*;
        use rill_fdt::DeviceTree;

        fn push_u32(buf: &mut std::vec::Vec<u8>, v: u32) {
            buf.extend_from_slice(&v.to_be_bytes());
        }
        fn push_name(buf: &mut std::vec::Vec<u8>, name: &[u8]) {
            buf.extend_from_slice(name);
            buf.push(0);
            while buf.len() % 4 != 0 {
                buf.push(0);
            }
        }
        fn push_prop(buf: &mut std::vec::Vec<u8>, nameoff: u32, value: &[u8]) {
            push_u32(buf, 3); // FDT_PROP
            push_u32(buf, value.len() as u32);
            push_u32(buf, nameoff);
            buf.extend_from_slice(value);
            while buf.len() % 4 != 0 {
                buf.push(0);
            }
        }

        /// `/ { #address-cells=<2>; #size-cells=<2>; cpu0intc { phandle=<1>; };
        /// plic { reg=<0 0x0c000000 0 0x4000000>; riscv,ndev=<0x35>;
        /// interrupts-extended=<&cpu0intc 0xffffffff &cpu0intc 9>; }; }`
        fn plic_fdt() -> std::vec::Vec<u8> {
            let mut strings = std::vec::Vec::new();
            let mut off = |s: &[u8]| {
                let o = strings.len();
                strings.extend_from_slice(s);
                strings.push(0);
                o as u32
            };
            let addr_cells_off = off(b"#address-cells");
            let size_cells_off = off(b"#size-cells");
            let phandle_off = off(b"phandle");
            let reg_off = off(b"reg");
            let ndev_off = off(b"riscv,ndev");
            let iext_off = off(b"interrupts-extended");

            let mut st = std::vec::Vec::new();
            push_u32(&mut st, 1); // BEGIN_NODE root
            push_name(&mut st, b"");
            push_prop(&mut st, addr_cells_off, &2u32.to_be_bytes());
            push_prop(&mut st, size_cells_off, &2u32.to_be_bytes());

            push_u32(&mut st, 1); // BEGIN_NODE cpu0intc
            push_name(&mut st, b"cpu0intc");
            push_prop(&mut st, phandle_off, &1u32.to_be_bytes());
            push_u32(&mut st, 2); // END_NODE

            push_u32(&mut st, 1); // BEGIN_NODE plic
            push_name(&mut st, b"plic");
            let mut reg_val = std::vec::Vec::new();
            reg_val.extend_from_slice(&0u32.to_be_bytes());
            reg_val.extend_from_slice(&0x0c00_0000u32.to_be_bytes());
            reg_val.extend_from_slice(&0u32.to_be_bytes());
            reg_val.extend_from_slice(&0x0400_0000u32.to_be_bytes());
            push_prop(&mut st, reg_off, &reg_val);
            push_prop(&mut st, ndev_off, &0x35u32.to_be_bytes());
            let mut iext_val = std::vec::Vec::new();
            iext_val.extend_from_slice(&1u32.to_be_bytes());
            iext_val.extend_from_slice(&0xffff_ffffu32.to_be_bytes());
            iext_val.extend_from_slice(&1u32.to_be_bytes());
            iext_val.extend_from_slice(&9u32.to_be_bytes());
            push_prop(&mut st, iext_off, &iext_val);
            push_u32(&mut st, 2); // END_NODE plic

            push_u32(&mut st, 2); // END_NODE root
            push_u32(&mut st, 9); // END

            let header_size = 40usize;
            let struct_off = header_size;
            let struct_len = st.len();
            let strings_off = struct_off + struct_len;
            let strings_len = strings.len();
            let total_size = strings_off + strings_len;

            let mut blob = std::vec::Vec::new();
            push_u32(&mut blob, 0xD00D_FEED);
            push_u32(&mut blob, total_size as u32);
            push_u32(&mut blob, struct_off as u32);
            push_u32(&mut blob, strings_off as u32);
            push_u32(&mut blob, header_size as u32);
            push_u32(&mut blob, 17);
            push_u32(&mut blob, 16);
            push_u32(&mut blob, 0);
            push_u32(&mut blob, strings_len as u32);
            push_u32(&mut blob, struct_len as u32);
            blob.extend_from_slice(&st);
            blob.extend_from_slice(&strings);
            blob
        }

        #[test]
        fn binds_base_ndev_and_supervisor_context() {
            let blob = plic_fdt();
            let dt = DeviceTree::parse(&blob).unwrap();
            let plic_node = dt.find_child(rill_fdt::NodeId::ROOT, "plic").unwrap();
            let plic = init_driver(&dt, plic_node).unwrap();
            assert_eq!(plic.base.as_u64(), 0x0c00_0000);
            assert_eq!(plic.ndev, 0x35);
            assert_eq!(plic.context, 1);
        }

        #[test]
        fn missing_ndev_is_an_error() {
            // Root has no `riscv,ndev`, so binding the root itself fails.
            let blob = plic_fdt();
            let dt = DeviceTree::parse(&blob).unwrap();
            assert!(matches!(init_driver(&dt, rill_fdt::NodeId::ROOT), Err(PlicInitError::MissingReg)));
        }
    }
}
