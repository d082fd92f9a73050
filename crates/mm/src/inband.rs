//! Shared plumbing for in-band free-list nodes (design note §9): both the
//! buddy allocator's per-order free lists and the slab allocator's
//! unused/partial/full slab lists embed their link pointers at the start of
//! the block they describe, addressed through the HHDM rather than kept in
//! a side table.
//!
//! Blocks are identified by **page index** (`PhysAddr / PAGE_SIZE`), not raw
//! address, since every block this crate manages is page-aligned.

use rill_core::addr::{PhysAddr, PAGE_SIZE};

/// Sentinel page index meaning "no link" — real RAM never reaches this page
/// index on a 64-bit address space, so it is safe to reuse as `Option::None`.
pub const NONE: u64 = u64::MAX;

/// A doubly linked list node, embedded in-band at a block's base address.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct LinkNode {
    pub prev: u64,
    pub next: u64,
}

/// Returns a pointer to `T` at the HHDM virtual address of the page at
/// `page_idx`.
///
/// # Safety
///
/// The caller must ensure the page is not concurrently aliased as live
/// allocator metadata of a different type, and that the HHDM offset has
/// been set.
#[inline]
pub unsafe fn hhdm_ptr<T>(page_idx: u64) -> *mut T {
    PhysAddr::new(page_idx * PAGE_SIZE).to_hhdm_virt().as_mut_ptr::<T>()
}

/// A singly-rooted, doubly linked list of in-band [`LinkNode`]s, addressed
/// by page index. Used both as the buddy allocator's per-order free list
/// (kept address-sorted) and the slab allocator's per-state slab lists
/// (unordered).
#[derive(Clone, Copy)]
pub struct LinkList {
    head: u64,
}

impl LinkList {
    /// An empty list.
    pub const fn new() -> Self {
        Self { head: NONE }
    }

    /// `true` if the list has no elements.
    pub fn is_empty(&self) -> bool {
        self.head == NONE
    }

    /// The page index at the head, if any.
    pub fn head(&self) -> Option<u64> {
        (self.head != NONE).then_some(self.head)
    }

    /// Pushes `page_idx` at the front of the list. O(1), used where
    /// ordering does not matter (slab lists).
    ///
    /// # Safety
    /// `page_idx`'s in-band [`LinkNode`] must not currently be linked into
    /// any other list.
    pub unsafe fn push_front(&mut self, page_idx: u64) {
        unsafe {
            *hhdm_ptr::<LinkNode>(page_idx) = LinkNode { prev: NONE, next: self.head };
            if self.head != NONE {
                (*hhdm_ptr::<LinkNode>(self.head)).prev = page_idx;
            }
        }
        self.head = page_idx;
    }

    /// Inserts `page_idx` keeping the list sorted ascending by page index.
    /// O(n), used by the buddy allocator's per-order lists (§3 invariant:
    /// "free blocks within an order are address-sorted").
    ///
    /// # Safety
    /// Same as [`push_front`](Self::push_front).
    pub unsafe fn insert_sorted(&mut self, page_idx: u64) {
        let mut prev = NONE;
        let mut cur = self.head;
        unsafe {
            while cur != NONE && cur < page_idx {
                prev = cur;
                cur = (*hhdm_ptr::<LinkNode>(cur)).next;
            }
            *hhdm_ptr::<LinkNode>(page_idx) = LinkNode { prev, next: cur };
            if cur != NONE {
                (*hhdm_ptr::<LinkNode>(cur)).prev = page_idx;
            }
            if prev != NONE {
                (*hhdm_ptr::<LinkNode>(prev)).next = page_idx;
            } else {
                self.head = page_idx;
            }
        }
    }

    /// Removes `page_idx` from the list if present, returning whether it
    /// was found. O(n).
    ///
    /// # Safety
    /// `page_idx`'s in-band [`LinkNode`] must be valid to read if it is
    /// actually linked into this list.
    pub unsafe fn remove(&mut self, page_idx: u64) -> bool {
        unsafe {
            let mut cur = self.head;
            while cur != NONE {
                let node = *hhdm_ptr::<LinkNode>(cur);
                if cur == page_idx {
                    if node.prev != NONE {
                        (*hhdm_ptr::<LinkNode>(node.prev)).next = node.next;
                    } else {
                        self.head = node.next;
                    }
                    if node.next != NONE {
                        (*hhdm_ptr::<LinkNode>(node.next)).prev = node.prev;
                    }
                    return true;
                }
                cur = node.next;
            }
            false
        }
    }

    /// Pops the head element, if any. O(1).
    ///
    /// # Safety
    /// Same as [`remove`](Self::remove).
    pub unsafe fn pop_front(&mut self) -> Option<u64> {
        let head = self.head();
        if let Some(page_idx) = head {
            unsafe { self.remove(page_idx) };
        }
        head
    }

    /// Iterates page indices from head to tail.
    ///
    /// # Safety
    /// Every linked node must currently hold a valid [`LinkNode`].
    pub unsafe fn iter(&self) -> LinkListIter {
        LinkListIter { cur: self.head }
    }
}

impl Default for LinkList {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over a [`LinkList`]'s page indices.
pub struct LinkListIter {
    cur: u64,
}

impl Iterator for LinkListIter {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if self.cur == NONE {
            return None;
        }
        let cur = self.cur;
        // SAFETY: caller of `LinkList::iter` guaranteed every linked node is valid.
        self.cur = unsafe { (*hhdm_ptr::<LinkNode>(cur)).next };
        Some(cur)
    }
}
