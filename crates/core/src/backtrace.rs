//! Panic backtrace support: walk the stack via the frame-pointer chain and
//! log each return address before halting the hart.
//!
//! This stops at raw return addresses rather than resolving them against an
//! embedded symbol/line table — that kind of two-pass-linker symbolication
//! machinery is a lot of build-system complexity for a kernel this small;
//! raw addresses plus `addr2line` against the unstripped ELF gets the same
//! answer offline.

/// Maximum number of frames a single walk will report, guarding against a
/// corrupted or cyclic frame-pointer chain.
pub const MAX_FRAMES: usize = 32;

/// Walks the frame-pointer chain starting at `fp`, calling `on_frame` with
/// each return address, most recent first.
///
/// Assumes the riscv64 standard frame layout with frame pointers enabled:
/// `*(fp - 8)` is the saved return address and `*(fp - 16)` is the previous
/// frame's `fp`. Stack grows down, so caller frames sit at strictly higher
/// addresses than the frame that called into them. Stops at a null/
/// misaligned pointer, a zero return address, a frame pointer that fails to
/// move strictly upward (corrupt or cyclic chain), or [`MAX_FRAMES`].
///
/// # Safety
///
/// `fp` must be a live frame pointer on the current stack (or `0`, which
/// yields zero frames).
pub unsafe fn walk(fp: usize, mut on_frame: impl FnMut(usize)) {
    let mut fp = fp;
    for _ in 0..MAX_FRAMES {
        if fp == 0 || fp % core::mem::size_of::<usize>() != 0 {
            break;
        }
        // SAFETY: caller guarantees `fp` starts on a live frame; each
        // subsequent `fp` is validated to move strictly downward before use.
        let ra = unsafe { *((fp - 8) as *const usize) };
        let prev_fp = unsafe { *((fp - 16) as *const usize) };
        if ra == 0 {
            break;
        }
        on_frame(ra);
        if prev_fp <= fp {
            break;
        }
        fp = prev_fp;
    }
}

/// Captures up to [`MAX_FRAMES`] return addresses starting at `fp` into a
/// fixed-size buffer, with no heap allocation — a panic can happen before or
/// during allocator bring-up, so the panic path must not need `alloc`.
/// Returns the buffer and how many leading entries are valid.
///
/// # Safety
/// Same as [`walk`]: `fp` must be a live frame pointer on the current stack
/// (or `0`, which yields zero frames).
pub unsafe fn capture_backtrace(fp: usize) -> ([usize; MAX_FRAMES], usize) {
    let mut frames = [0usize; MAX_FRAMES];
    let mut count = 0;
    // SAFETY: caller's contract, forwarded from `walk`.
    unsafe {
        walk(fp, |ra| {
            frames[count] = ra;
            count += 1;
        });
    }
    (frames, count)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a synthetic three-frame chain inside one contiguous buffer so
    /// frame addresses are ordered exactly as written, then walks it.
    /// Layout per frame: `[0] = prev_fp` (at `fp - 16`), `[1] = ra` (at `fp - 8`).
    #[test]
    fn walks_a_synthetic_frame_chain() {
        let mut buf = [0usize; 6];
        let base = buf.as_mut_ptr() as usize;
        let fp_of = |slot: usize| base + slot * 8 + 16;

        // frame0 (current, lowest address) -> frame1 -> frame2 (oldest).
        let frame1_fp = fp_of(2);
        let frame2_fp = fp_of(4);

        buf[0] = frame1_fp; // frame0 prev_fp
        buf[1] = 0xCCCC; // frame0 ra
        buf[2] = frame2_fp; // frame1 prev_fp
        buf[3] = 0xBBBB; // frame1 ra
        buf[4] = 0; // frame2 prev_fp (terminator)
        buf[5] = 0xAAAA; // frame2 ra

        let frame0_fp = fp_of(0);
        let mut seen = std::vec::Vec::new();
        unsafe { walk(frame0_fp, |ra| seen.push(ra)) };
        assert_eq!(seen, std::vec![0xCCCC, 0xBBBB, 0xAAAA]);
    }

    #[test]
    fn zero_fp_yields_no_frames() {
        let mut seen = 0;
        unsafe { walk(0, |_| seen += 1) };
        assert_eq!(seen, 0);
    }

    #[test]
    fn capture_backtrace_collects_the_same_frames_walk_would() {
        let mut buf = [0usize; 4];
        let base = buf.as_mut_ptr() as usize;
        let fp_of = |slot: usize| base + slot * 8 + 16;

        let frame1_fp = fp_of(2);
        buf[0] = frame1_fp;
        buf[1] = 0x1111;
        buf[2] = 0;
        buf[3] = 0x2222;

        let (frames, count) = unsafe { capture_backtrace(fp_of(0)) };
        assert_eq!(count, 2);
        assert_eq!(&frames[..count], &[0x1111, 0x2222]);
    }

    #[test]
    fn capture_backtrace_of_zero_fp_is_empty() {
        let (_, count) = unsafe { capture_backtrace(0) };
        assert_eq!(count, 0);
    }
}
