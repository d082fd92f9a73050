//! The slab / object-cache allocator (§4.3): typed, O(1) alloc/free layered
//! on top of the buddy allocator's page blocks.

use core::fmt;

use rill_core::addr::{PhysAddr, PAGE_SIZE};

use crate::buddy::{BuddyAllocator, BuddyError};
use crate::inband::{hhdm_ptr, LinkList, NONE};

/// Size in bytes of the in-band [`SlabDescriptor`] placed at the base of
/// every slab. Fixed independently of `Cache` fields so [`objects_per_slab`]
/// matches the constant the spec's worked examples assume.
pub const DESCRIPTOR_SIZE: u64 = 32;
/// Size in bytes of one next-list entry.
pub const INDEX_SIZE: u64 = 2;
/// Sentinel next-list index meaning "end of list".
pub const END_OF_LIST: u16 = 0xFFFF;

/// Descriptor placed at the base of every slab block, immediately followed
/// by the next-list (§3).
#[derive(Clone, Copy)]
#[repr(C)]
struct SlabDescriptor {
    prev: u64,
    next: u64,
    free_object_count: u32,
    first_free_obj_idx: u16,
    _pad: u16,
    _reserved: u64,
}

const _: () = assert!(core::mem::size_of::<SlabDescriptor>() as u64 == DESCRIPTOR_SIZE);

/// Errors the slab allocator can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    /// The underlying buddy allocator is out of memory.
    OutOfMemory,
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "slab cache: out of memory"),
        }
    }
}

impl From<BuddyError> for CacheError {
    fn from(err: BuddyError) -> Self {
        match err {
            BuddyError::OutOfMemory => Self::OutOfMemory,
            BuddyError::InvalidOrder => {
                unreachable!("Cache always requests a valid slab_order")
            }
        }
    }
}

/// Computes how many objects of `object_size`, aligned to `2^align_log`,
/// fit in one slab of `2^slab_order` pages alongside the descriptor and
/// next-list (§4.3 algorithm):
///
/// 1. estimate `n = (S - D) / (I + O)`, with `wastage = (S - D) - n*(I + O)`.
/// 2. `list_end = D + n*I`; `gap = (A - list_end mod A) mod A`.
/// 3. if `gap > wastage`, decrement `n` by 1 — always sufficient since `O >= A`.
pub fn objects_per_slab(slab_order: u32, object_size: u64, align_log: u32) -> u64 {
    let slab_size = PAGE_SIZE << slab_order;
    let avail = slab_size - DESCRIPTOR_SIZE;
    let per_object = INDEX_SIZE + object_size;
    let mut n = avail / per_object;
    let wastage = avail - n * per_object;
    let list_end = DESCRIPTOR_SIZE + n * INDEX_SIZE;
    let align = 1u64 << align_log;
    let gap = (align - list_end % align) % align;
    if gap > wastage {
        n -= 1;
    }
    n
}

/// An object cache: fixed-size, fixed-alignment allocation backed by slabs
/// drawn from the buddy allocator.
pub struct Cache {
    name: &'static str,
    slab_order: u32,
    object_size: u64,
    object_align_log: u32,
    objects_per_slab: u64,
    free_count: u64,
    total_count: u64,
    unused_list: LinkList,
    partial_list: LinkList,
    full_list: LinkList,
}

impl Cache {
    /// Creates a new, empty cache. No slabs are allocated until the first
    /// [`alloc`](Self::alloc) call.
    pub fn new(name: &'static str, slab_order: u32, object_size: u64, object_align_log: u32) -> Self {
        Self {
            name,
            slab_order,
            object_size,
            object_align_log,
            objects_per_slab: objects_per_slab(slab_order, object_size, object_align_log),
            free_count: 0,
            total_count: 0,
            unused_list: LinkList::new(),
            partial_list: LinkList::new(),
            full_list: LinkList::new(),
        }
    }

    /// The cache's name, for diagnostics.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Objects live across all slabs this cache owns.
    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    /// Objects currently free across all slabs this cache owns.
    pub fn free_count(&self) -> u64 {
        self.free_count
    }

    fn slab_size(&self) -> u64 {
        PAGE_SIZE << self.slab_order
    }

    fn objects_start_offset(&self) -> u64 {
        let list_end = DESCRIPTOR_SIZE + self.objects_per_slab * INDEX_SIZE;
        let align = 1u64 << self.object_align_log;
        let padding = (align - list_end % align) % align;
        list_end + padding
    }

    fn object_addr(&self, slab_page_idx: u64, obj_idx: u16) -> PhysAddr {
        let base = slab_page_idx * PAGE_SIZE + self.objects_start_offset();
        PhysAddr::new(base + obj_idx as u64 * self.object_size)
    }

    /// Allocates a freshly grown slab from the buddy allocator and writes
    /// its descriptor + next-list in place.
    fn grow(&mut self, buddy: &mut BuddyAllocator) -> Result<u64, CacheError> {
        let phys = buddy.alloc(self.slab_order as usize)?;
        let page_idx = phys.as_u64() / PAGE_SIZE;
        let n = self.objects_per_slab;
        // SAFETY: the slab was just carved out of the buddy allocator; no
        // other code holds a reference to this page range.
        unsafe {
            *hhdm_ptr::<SlabDescriptor>(page_idx) = SlabDescriptor {
                prev: NONE,
                next: NONE,
                free_object_count: n as u32,
                first_free_obj_idx: 0,
                _pad: 0,
                _reserved: 0,
            };
            let next_list = (hhdm_ptr::<SlabDescriptor>(page_idx) as *mut u8).add(DESCRIPTOR_SIZE as usize) as *mut u16;
            for i in 0..n {
                let entry = if i + 1 < n { (i + 1) as u16 } else { END_OF_LIST };
                *next_list.add(i as usize) = entry;
            }
        }
        self.total_count += n;
        self.free_count += n;
        Ok(page_idx)
    }

    /// Returns a slab with at least one free object: a partial slab, an
    /// unused slab, or a freshly grown one (§4.3 "Alloc").
    fn take_candidate(&mut self, buddy: &mut BuddyAllocator) -> Result<u64, CacheError> {
        // SAFETY: these lists are maintained exclusively by this cache.
        if let Some(slab) = unsafe { self.partial_list.pop_front() } {
            return Ok(slab);
        }
        if let Some(slab) = unsafe { self.unused_list.pop_front() } {
            return Ok(slab);
        }
        self.grow(buddy)
    }

    /// Allocates one object, growing the cache from the buddy allocator if
    /// no partial or unused slab is available.
    pub fn alloc(&mut self, buddy: &mut BuddyAllocator) -> Result<PhysAddr, CacheError> {
        let slab = self.take_candidate(buddy)?;
        // SAFETY: `slab` was just carved out of a list this cache owns
        // exclusively, and its descriptor was written by `grow` or a prior
        // `alloc`/`free`.
        let (obj_idx, addr, free_after) = unsafe {
            let desc = &mut *hhdm_ptr::<SlabDescriptor>(slab);
            let idx = desc.first_free_obj_idx;
            debug_assert_ne!(idx, END_OF_LIST, "candidate slab reported free objects but next-list is empty");
            let next_list = (hhdm_ptr::<SlabDescriptor>(slab) as *mut u8).add(DESCRIPTOR_SIZE as usize) as *mut u16;
            desc.first_free_obj_idx = *next_list.add(idx as usize);
            desc.free_object_count -= 1;
            (idx, self.object_addr(slab, idx), desc.free_object_count)
        };
        self.free_count -= 1;

        if free_after == 0 {
            // SAFETY: slab is not currently linked (just popped as candidate).
            unsafe { self.full_list.push_front(slab) };
        } else {
            // SAFETY: same as above.
            unsafe { self.partial_list.push_front(slab) };
        }
        let _ = obj_idx;
        Ok(addr)
    }

    /// Locates the slab owning `addr` by scanning the full list then the
    /// partial list (§4.3 "Free": unused slabs hold no live objects, so
    /// they are never searched).
    fn find_owning_slab(&self, addr: PhysAddr) -> Option<u64> {
        let size = self.slab_size();
        let addr = addr.as_u64();
        // SAFETY: iterating lists this cache itself maintains.
        for slab in unsafe { self.full_list.iter() }.chain(unsafe { self.partial_list.iter() }) {
            let base = slab * PAGE_SIZE;
            if addr >= base && addr < base + size {
                return Some(slab);
            }
        }
        None
    }

    /// Frees an object previously returned by [`alloc`](Self::alloc).
    ///
    /// Pushes the object's index to the head of its slab's next-list (LIFO
    /// — maximizes cache reuse), then moves the slab between lists as its
    /// occupancy changes.
    pub fn free(&mut self, addr: PhysAddr) {
        let slab = self.find_owning_slab(addr).expect("Cache::free: address does not belong to this cache");
        let offset = addr.as_u64() - (slab * PAGE_SIZE + self.objects_start_offset());
        debug_assert_eq!(offset % self.object_size, 0, "Cache::free: address is not object-aligned");
        let obj_idx = (offset / self.object_size) as u16;

        // SAFETY: `slab` is linked into exactly one of full/partial (found
        // above); we unlink it before re-linking into its new list.
        let was_full = unsafe { self.full_list.remove(slab) };
        if !was_full {
            unsafe { self.partial_list.remove(slab) };
        }

        let free_after = unsafe {
            let desc = &mut *hhdm_ptr::<SlabDescriptor>(slab);
            let next_list = (hhdm_ptr::<SlabDescriptor>(slab) as *mut u8).add(DESCRIPTOR_SIZE as usize) as *mut u16;
            *next_list.add(obj_idx as usize) = desc.first_free_obj_idx;
            desc.first_free_obj_idx = obj_idx;
            desc.free_object_count += 1;
            desc.free_object_count
        };
        self.free_count += 1;

        if free_after as u64 == self.objects_per_slab {
            // SAFETY: slab was just unlinked above.
            unsafe { self.unused_list.push_front(slab) };
        } else {
            // SAFETY: same as above.
            unsafe { self.partial_list.push_front(slab) };
        }
    }
}

/// A statically-constructed cache describing `Cache` itself, the first
/// allocator brought up at boot (§4.3 "Bootstrap"): every other `Cache`
/// value is allocated from this one.
pub fn bootstrap_cache_cache() -> Cache {
    let align_log = (core::mem::align_of::<Cache>() as u64).trailing_zeros();
    Cache::new("cache-cache", 0, core::mem::size_of::<Cache>() as u64, align_log)
}

impl Cache {
    /// Allocates storage for a new `Cache` from this cache (which must be
    /// sized for `Cache` itself — see [`bootstrap_cache_cache`]) and
    /// initializes it with `ctor`.
    pub fn create_cache(
        &mut self,
        buddy: &mut BuddyAllocator,
        name: &'static str,
        slab_order: u32,
        object_size: u64,
        object_align_log: u32,
    ) -> Result<&'static mut Cache, CacheError> {
        let addr = self.alloc(buddy)?;
        let ptr = addr.to_hhdm_virt().as_mut_ptr::<Cache>();
        // SAFETY: `ptr` points at freshly allocated, uninitialized storage
        // exactly the size and alignment of `Cache`.
        unsafe {
            ptr.write(Cache::new(name, slab_order, object_size, object_align_log));
            Ok(&mut *ptr)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::lock_hhdm;
    use rill_core::addr::set_hhdm_offset;

    fn host_backed_buddy(total_pages: u64) -> (BuddyAllocator, std::boxed::Box<[u8]>, std::sync::MutexGuard<'static, ()>) {
        let guard = lock_hhdm();
        let bytes = (total_pages * PAGE_SIZE) as usize;
        let mut backing = std::vec![0u8; bytes].into_boxed_slice();
        set_hhdm_offset(backing.as_mut_ptr() as u64);
        let mut buddy = BuddyAllocator::new();
        buddy.ingest(0, total_pages);
        (buddy, backing, guard)
    }

    #[test]
    fn objects_per_slab_matches_worked_examples() {
        assert_eq!(objects_per_slab(0, 8, 3), 406);
        assert_eq!(objects_per_slab(0, 32, 4), 119);
        assert_eq!(objects_per_slab(0, 128, 6), 31);
    }

    #[test]
    fn descriptor_is_exactly_32_bytes() {
        assert_eq!(core::mem::size_of::<SlabDescriptor>(), 32);
    }

    #[test]
    fn alloc_roundtrip_is_lifo() {
        let (mut buddy, _backing, _guard) = host_backed_buddy(1 << crate::buddy::MAX_ORDER);
        let mut cache = Cache::new("u128-cache", 0, 16, 4);

        let mut addrs = std::vec::Vec::new();
        for _ in 0..8 {
            addrs.push(cache.alloc(&mut buddy).unwrap());
        }

        let freed = addrs[2];
        cache.free(freed);
        let reused = cache.alloc(&mut buddy).unwrap();
        assert_eq!(reused.as_u64(), freed.as_u64());
    }

    #[test]
    fn cache_counts_track_alloc_and_free() {
        let (mut buddy, _backing, _guard) = host_backed_buddy(1 << crate::buddy::MAX_ORDER);
        let mut cache = Cache::new("u64-cache", 0, 8, 3);
        let n = objects_per_slab(0, 8, 3);
        assert_eq!(cache.total_count(), 0);

        let first = cache.alloc(&mut buddy).unwrap();
        assert_eq!(cache.total_count(), n);
        assert_eq!(cache.free_count(), n - 1);

        cache.free(first);
        assert_eq!(cache.free_count(), n);
    }

    #[test]
    fn grows_a_second_slab_once_the_first_is_full() {
        let (mut buddy, _backing, _guard) = host_backed_buddy(4 * (1 << crate::buddy::MAX_ORDER));
        let mut cache = Cache::new("u128-cache", 0, 16, 4);
        let n = objects_per_slab(0, 16, 4);

        for _ in 0..n {
            cache.alloc(&mut buddy).unwrap();
        }
        assert_eq!(cache.total_count(), n);

        // One more allocation must grow a second slab rather than error.
        cache.alloc(&mut buddy).unwrap();
        assert_eq!(cache.total_count(), n * 2);
    }

    #[test]
    fn bootstrap_cache_cache_can_create_further_caches() {
        let (mut buddy, _backing, _guard) = host_backed_buddy(4 * (1 << crate::buddy::MAX_ORDER));
        let mut cache_cache = bootstrap_cache_cache();
        let new_cache = cache_cache.create_cache(&mut buddy, "thread-cache", 0, 64, 3).unwrap();
        assert_eq!(new_cache.name(), "thread-cache");
        let obj = new_cache.alloc(&mut buddy).unwrap();
        assert_ne!(obj.as_u64(), 0);
    }
}
