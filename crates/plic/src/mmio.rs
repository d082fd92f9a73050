//! Pure PLIC register-offset arithmetic.
//!
//! Kept free of any MMIO access so the offsets are unit-testable without
//! real hardware. Context `c`'s enable-bitfield word containing source `id`
//! is at `0x2000 + c*0x80 + (id/32)*4`, bit `id % 32`; context `c`'s
//! claim/complete register is at `0x200000 + c*0x1000 + 0x4`.
//!
//! The enable-bitfield base must *not* reuse the pending-bitfield's base
//! offset — the two blocks live at `0x1000` and `0x2000` respectively and
//! are easy to conflate.

/// Per-source priority register array base. Source 0's slot exists but is
/// unused; valid sources are `1..=ndev`.
pub const PRIORITY_BASE: usize = 0x0;
/// Pending-bitfield base: one bit per source, word-addressed.
pub const PENDING_BASE: usize = 0x1000;
/// Per-context enable-bitfield base (1024 bits per context).
pub const ENABLE_BASE: usize = 0x2000;
/// Byte stride between two contexts' enable bitfields.
pub const ENABLE_STRIDE: usize = 0x80;
/// Per-context register block base (threshold, claim/complete).
pub const CONTEXT_BASE: usize = 0x200000;
/// Byte stride between two contexts' register blocks.
pub const CONTEXT_STRIDE: usize = 0x1000;
/// Offset of the priority-threshold register within a context's block.
pub const THRESHOLD_OFFSET: usize = 0x0;
/// Offset of the claim/complete register within a context's block.
pub const CLAIM_COMPLETE_OFFSET: usize = 0x4;

/// Byte offset of source `id`'s priority register.
pub fn priority_offset(id: u32) -> usize {
    PRIORITY_BASE + id as usize * 4
}

/// Byte offset of the pending-bitfield word containing source `id`.
pub fn pending_word_offset(id: u32) -> usize {
    PENDING_BASE + (id as usize / 32) * 4
}

/// Byte offset of context `c`'s enable-bitfield word containing source
/// `id`. Pair with [`enable_bit`] for the bit within that word.
pub fn enable_word_offset(context: u32, id: u32) -> usize {
    ENABLE_BASE + context as usize * ENABLE_STRIDE + (id as usize / 32) * 4
}

/// Bit index of source `id` within its enable word.
pub fn enable_bit(id: u32) -> u32 {
    id % 32
}

/// Byte offset of context `c`'s priority-threshold register.
pub fn threshold_offset(context: u32) -> usize {
    CONTEXT_BASE + context as usize * CONTEXT_STRIDE + THRESHOLD_OFFSET
}

/// Byte offset of context `c`'s claim/complete register.
pub fn claim_complete_offset(context: u32) -> usize {
    CONTEXT_BASE + context as usize * CONTEXT_STRIDE + CLAIM_COMPLETE_OFFSET
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enable_word_offset_matches_the_documented_formula() {
        assert_eq!(enable_word_offset(0, 0), 0x2000);
        assert_eq!(enable_word_offset(0, 31), 0x2000);
        assert_eq!(enable_word_offset(0, 32), 0x2004);
        assert_eq!(enable_word_offset(1, 0), 0x2080);
        assert_eq!(enable_word_offset(2, 65), 0x2000 + 2 * 0x80 + 4);
        assert_eq!(enable_bit(33), 1);
        assert_eq!(enable_bit(0), 0);
    }

    #[test]
    fn claim_complete_offset_matches_the_documented_formula() {
        assert_eq!(claim_complete_offset(0), 0x200004);
        assert_eq!(claim_complete_offset(1), 0x201004);
        assert_eq!(claim_complete_offset(2), 0x200000 + 2 * 0x1000 + 0x4);
    }

    #[test]
    fn enable_base_does_not_alias_the_pending_base() {
        // The enable bitfield must not reuse the pending bitfield's base
        // offset — easy bug to reintroduce by copy-paste.
        assert_ne!(ENABLE_BASE, PENDING_BASE);
        assert_eq!(PENDING_BASE, 0x1000);
        assert_eq!(ENABLE_BASE, 0x2000);
    }

    #[test]
    fn priority_and_pending_offsets() {
        assert_eq!(priority_offset(1), 0x4);
        assert_eq!(priority_offset(0), 0x0);
        assert_eq!(pending_word_offset(0), 0x1000);
        assert_eq!(pending_word_offset(32), 0x1004);
    }
}
