//! `rill-mm` — the buddy page allocator and the slab/object-cache allocator
//! layered on top of it (§4.2, §4.3).
//!
//! Both allocators keep their free-list metadata in-band, inside the
//! HHDM-mapped memory of the blocks they describe, rather than in a side
//! table — see [`inband`].

#![cfg_attr(not(test), no_std)]

pub mod buddy;
pub mod inband;
pub mod slab;
pub mod typed;

pub use buddy::{BuddyAllocator, BuddyError};
pub use slab::{Cache, CacheError};
pub use typed::TypedCache;

/// Test-only serialization for `rill_core::addr`'s process-global HHDM
/// offset: `cargo test` runs every `#[test]` in this crate concurrently
/// within one binary, but `buddy`, `slab`, and `typed` each point that one
/// offset at their own host-heap buffer, so tests must take turns.
#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::{Mutex, MutexGuard};

    static HHDM_LOCK: Mutex<()> = Mutex::new(());

    pub fn lock_hhdm() -> MutexGuard<'static, ()> {
        HHDM_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }
}
