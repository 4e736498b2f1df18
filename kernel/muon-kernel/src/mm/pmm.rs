//! Bitmap-based physical frame allocator.
//!
//! One bit per 4 KiB frame, stored in HHDM-accessible memory; bit = 1
//! means allocated or reserved. Allocation scans whole `u64` words with
//! `trailing_zeros()` from a rotating search hint.
//!
//! At initialization every frame starts reserved; frames fully contained
//! in usable regions are freed, then three ranges are re-reserved: the
//! kernel image, the bitmap's own storage, and everything below 1 MiB.

use core::ptr;

use crate::addr::PhysAddr;
use crate::mm::{PAGE_SIZE, PhysMemoryRegion, PmmError};
use crate::sync::SpinLock;

const FRAME_SIZE: u64 = PAGE_SIZE as u64;
const BITS_PER_WORD: usize = 64;

/// Physical memory below this line is never handed out.
const LOW_MEMORY_LIMIT: u64 = 0x10_0000;

struct BitmapInner {
    /// The bitmap as `u64` words, viewed through the HHDM.
    bitmap: *mut u64,
    /// Frames tracked by the bitmap.
    total_frames: usize,
    /// Words in the bitmap.
    bitmap_words: usize,
    /// Currently free frames.
    free_count: usize,
    /// Word index to start the next scan at. An optimisation only;
    /// correctness never depends on scan order.
    search_hint: usize,
}

// SAFETY: The raw bitmap pointer is only touched under the lock.
unsafe impl Send for BitmapInner {}

/// The physical frame allocator.
///
/// Interior mutability via [`SpinLock`], so all methods take `&self`.
pub struct BitmapFrameAllocator {
    inner: SpinLock<BitmapInner>,
}

impl BitmapFrameAllocator {
    /// Builds the allocator from the boot memory map.
    ///
    /// `kernel_image` is the physical range of the loaded kernel, which
    /// is re-reserved after the usable sweep (the memory map usually
    /// already excludes it, but the allocator does not rely on that).
    ///
    /// # Errors
    ///
    /// [`PmmError::NoBitmapRegion`] if no usable region can hold the
    /// bitmap; [`PmmError::OutOfMemory`] if the map has no usable RAM.
    ///
    /// # Safety
    ///
    /// - `hhdm_offset` must map all of physical memory.
    /// - `regions` must describe physical memory truthfully.
    /// - Must be called once, before any allocation.
    pub unsafe fn new(
        regions: &[PhysMemoryRegion],
        kernel_image: (PhysAddr, u64),
        hhdm_offset: u64,
    ) -> Result<Self, PmmError> {
        let max_phys = regions
            .iter()
            .filter(|r| r.usable)
            .map(|r| r.start.as_u64() + r.size)
            .max()
            .ok_or(PmmError::OutOfMemory)?;

        let total_frames = (max_phys / FRAME_SIZE) as usize;
        let bitmap_words = total_frames.div_ceil(BITS_PER_WORD);
        let bitmap_bytes = bitmap_words * 8;
        let bitmap_frames = (bitmap_bytes as u64).div_ceil(FRAME_SIZE);

        // Place the bitmap in the first usable region that can hold it.
        let bitmap_phys = regions
            .iter()
            .filter(|r| r.usable && r.size >= bitmap_bytes as u64)
            .map(|r| r.start)
            .next()
            .ok_or(PmmError::NoBitmapRegion)?;

        let bitmap = (hhdm_offset + bitmap_phys.as_u64()) as *mut u64;

        // Every frame starts reserved.
        // SAFETY: The caller guarantees the HHDM covers the bitmap region.
        unsafe { ptr::write_bytes(bitmap, 0xFF, bitmap_words) };

        let mut inner = BitmapInner {
            bitmap,
            total_frames,
            bitmap_words,
            free_count: 0,
            search_hint: 0,
        };

        // Free the frames fully contained in usable regions.
        for region in regions.iter().filter(|r| r.usable) {
            let first = region.start.as_u64().div_ceil(FRAME_SIZE);
            let last = (region.start.as_u64() + region.size) / FRAME_SIZE;
            for frame in first..last {
                inner.clear_bit(frame as usize);
            }
        }

        // Re-reserve the kernel image, the bitmap itself, and low memory.
        let (kernel_base, kernel_size) = kernel_image;
        inner.set_range(kernel_base.as_u64(), kernel_size);
        inner.set_range(bitmap_phys.as_u64(), bitmap_frames * FRAME_SIZE);
        inner.set_range(0, LOW_MEMORY_LIMIT);

        Ok(Self {
            inner: SpinLock::new(inner),
        })
    }

    /// Allocates one 4 KiB frame. `None` means physical memory is
    /// exhausted; the caller is responsible for propagating the failure.
    pub fn alloc_frame(&self) -> Option<PhysAddr> {
        let mut inner = self.inner.lock();
        if inner.free_count == 0 {
            return None;
        }

        let words = inner.bitmap_words;
        let start = inner.search_hint;
        for offset in 0..words {
            let word_idx = (start + offset) % words;
            // SAFETY: word_idx < bitmap_words.
            let word = unsafe { *inner.bitmap.add(word_idx) };
            if word == u64::MAX {
                continue;
            }

            let bit_idx = (!word).trailing_zeros() as usize;
            let frame_idx = word_idx * BITS_PER_WORD + bit_idx;
            if frame_idx >= inner.total_frames {
                continue;
            }

            // SAFETY: word_idx < bitmap_words.
            unsafe { *inner.bitmap.add(word_idx) |= 1u64 << bit_idx };
            inner.free_count -= 1;
            inner.search_hint = word_idx;
            return Some(PhysAddr::new(frame_idx as u64 * FRAME_SIZE));
        }

        None
    }

    /// Allocates `count` physically contiguous frames, returning the
    /// base of the run. Used by the heap, which wants one contiguous
    /// HHDM-addressable region.
    pub fn alloc_contiguous(&self, count: usize) -> Option<PhysAddr> {
        if count == 0 {
            return None;
        }
        if count == 1 {
            return self.alloc_frame();
        }

        let mut inner = self.inner.lock();
        if inner.free_count < count {
            return None;
        }

        let mut run_start = 0usize;
        let mut run_len = 0usize;
        for frame_idx in 0..inner.total_frames {
            if inner.bit(frame_idx) {
                run_len = 0;
            } else {
                if run_len == 0 {
                    run_start = frame_idx;
                }
                run_len += 1;
                if run_len == count {
                    for idx in run_start..run_start + count {
                        inner.set_bit_counted(idx);
                    }
                    inner.search_hint = (run_start + count) / BITS_PER_WORD;
                    return Some(PhysAddr::new(run_start as u64 * FRAME_SIZE));
                }
            }
        }

        None
    }

    /// Returns a frame to the allocator.
    ///
    /// # Errors
    ///
    /// [`PmmError::InvalidFrame`] for a non-page-aligned or untracked
    /// address; [`PmmError::DoubleFree`] if the frame was already free.
    /// Neither corrupts the bitmap.
    pub fn free_frame(&self, frame: PhysAddr) -> Result<(), PmmError> {
        if !frame.is_aligned(FRAME_SIZE) {
            return Err(PmmError::InvalidFrame);
        }

        let mut inner = self.inner.lock();
        let frame_idx = (frame.as_u64() / FRAME_SIZE) as usize;
        if frame_idx >= inner.total_frames {
            return Err(PmmError::InvalidFrame);
        }
        if !inner.bit(frame_idx) {
            return Err(PmmError::DoubleFree);
        }

        inner.clear_bit_counted(frame_idx);
        let word_idx = frame_idx / BITS_PER_WORD;
        if word_idx < inner.search_hint {
            inner.search_hint = word_idx;
        }
        Ok(())
    }

    /// Number of free frames.
    pub fn free_frames(&self) -> usize {
        self.inner.lock().free_count
    }

    /// Number of tracked frames.
    pub fn total_frames(&self) -> usize {
        self.inner.lock().total_frames
    }

    /// Highest tracked physical address (exclusive).
    pub fn highest_address(&self) -> PhysAddr {
        PhysAddr::new(self.inner.lock().total_frames as u64 * FRAME_SIZE)
    }
}

impl BitmapInner {
    fn bit(&self, frame_idx: usize) -> bool {
        let word_idx = frame_idx / BITS_PER_WORD;
        let bit_idx = frame_idx % BITS_PER_WORD;
        // SAFETY: Callers only pass indices below total_frames.
        unsafe { *self.bitmap.add(word_idx) & (1u64 << bit_idx) != 0 }
    }

    /// Clears a bit during initialization, counting the frame as free.
    fn clear_bit(&mut self, frame_idx: usize) {
        if frame_idx >= self.total_frames {
            return;
        }
        if self.bit(frame_idx) {
            let word_idx = frame_idx / BITS_PER_WORD;
            let bit_idx = frame_idx % BITS_PER_WORD;
            // SAFETY: word_idx < bitmap_words.
            unsafe { *self.bitmap.add(word_idx) &= !(1u64 << bit_idx) };
            self.free_count += 1;
        }
    }

    /// Sets a bit, keeping `free_count` consistent.
    fn set_bit_counted(&mut self, frame_idx: usize) {
        if frame_idx >= self.total_frames {
            return;
        }
        if !self.bit(frame_idx) {
            let word_idx = frame_idx / BITS_PER_WORD;
            let bit_idx = frame_idx % BITS_PER_WORD;
            // SAFETY: word_idx < bitmap_words.
            unsafe { *self.bitmap.add(word_idx) |= 1u64 << bit_idx };
            self.free_count -= 1;
        }
    }

    /// Clears a bit, keeping `free_count` consistent.
    fn clear_bit_counted(&mut self, frame_idx: usize) {
        let word_idx = frame_idx / BITS_PER_WORD;
        let bit_idx = frame_idx % BITS_PER_WORD;
        // SAFETY: word_idx < bitmap_words.
        unsafe { *self.bitmap.add(word_idx) &= !(1u64 << bit_idx) };
        self.free_count += 1;
    }

    /// Reserves every frame touching `[base, base + size)`.
    fn set_range(&mut self, base: u64, size: u64) {
        if size == 0 {
            return;
        }
        let first = (base / FRAME_SIZE) as usize;
        let last = (base + size).div_ceil(FRAME_SIZE) as usize;
        for frame_idx in first..last.min(self.total_frames) {
            self.set_bit_counted(frame_idx);
        }
    }
}

// ── Global allocator instance ────────────────────────────────────────

static PMM: SpinLock<Option<BitmapFrameAllocator>> = SpinLock::new(None);

/// Installs the global frame allocator.
///
/// # Panics
///
/// Panics on double initialization.
pub fn install(pmm: BitmapFrameAllocator) {
    let mut global = PMM.lock();
    assert!(global.is_none(), "PMM already initialized");
    *global = Some(pmm);
}

/// Runs `f` with the global frame allocator.
///
/// # Panics
///
/// Panics if the allocator has not been installed.
pub fn with_pmm<R>(f: impl FnOnce(&BitmapFrameAllocator) -> R) -> R {
    let guard = PMM.lock();
    f(guard.as_ref().expect("PMM not initialized"))
}

/// Allocates a frame from the global allocator.
pub fn alloc_frame() -> Option<PhysAddr> {
    with_pmm(BitmapFrameAllocator::alloc_frame)
}

/// Frees a frame via the global allocator, reporting (but surviving)
/// bad or double frees.
pub fn free_frame(frame: PhysAddr) {
    with_pmm(|pmm| {
        if let Err(err) = pmm.free_frame(frame) {
            crate::kwarn!("PMM: rejected free of {frame}: {err}");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A 4 MiB fake physical space backed by a boxed arena. The "HHDM
    /// offset" is simply the arena's base address, so physical address 0
    /// is the first arena byte.
    struct TestArena {
        mem: Box<[u8]>,
    }

    const ARENA_SIZE: usize = 4 * 1024 * 1024;
    const USABLE_START: u64 = LOW_MEMORY_LIMIT;

    impl TestArena {
        fn new() -> Self {
            Self {
                mem: vec![0u8; ARENA_SIZE].into_boxed_slice(),
            }
        }

        fn hhdm_offset(&self) -> u64 {
            self.mem.as_ptr() as u64
        }

        fn allocator(&self) -> BitmapFrameAllocator {
            let regions = [PhysMemoryRegion {
                start: PhysAddr::zero(),
                size: ARENA_SIZE as u64,
                usable: true,
            }];
            // Pretend the kernel occupies 64 KiB above the low-memory line.
            let kernel = (PhysAddr::new(USABLE_START), 0x1_0000);
            // SAFETY: The arena covers all of the fake physical space.
            unsafe { BitmapFrameAllocator::new(&regions, kernel, self.hhdm_offset()) }
                .expect("allocator init")
        }
    }

    #[test]
    fn low_memory_and_kernel_reserved() {
        let arena = TestArena::new();
        let pmm = arena.allocator();

        // Nothing below 1 MiB + 64 KiB kernel image may come back.
        for _ in 0..pmm.free_frames() {
            let frame = pmm.alloc_frame().expect("free frame");
            assert!(frame.as_u64() >= USABLE_START + 0x1_0000);
        }
        assert!(pmm.alloc_frame().is_none());
    }

    #[test]
    fn alloc_free_round_trip_restores_bitmap() {
        let arena = TestArena::new();
        let pmm = arena.allocator();

        let before = pmm.free_frames();
        let mut held = Vec::new();
        for _ in 0..128 {
            held.push(pmm.alloc_frame().expect("free frame"));
        }
        assert_eq!(pmm.free_frames(), before - 128);

        for frame in held {
            pmm.free_frame(frame).expect("valid free");
        }
        assert_eq!(pmm.free_frames(), before);
    }

    #[test]
    fn frames_are_unique_until_freed() {
        let arena = TestArena::new();
        let pmm = arena.allocator();

        let a = pmm.alloc_frame().unwrap();
        let b = pmm.alloc_frame().unwrap();
        assert_ne!(a, b);

        pmm.free_frame(a).unwrap();
        // The freed frame may be reused; the still-held one may not.
        let c = pmm.alloc_frame().unwrap();
        assert_ne!(c, b);
    }

    #[test]
    fn double_free_reported_not_corrupting() {
        let arena = TestArena::new();
        let pmm = arena.allocator();

        let frame = pmm.alloc_frame().unwrap();
        pmm.free_frame(frame).unwrap();
        let free_before = pmm.free_frames();
        assert_eq!(pmm.free_frame(frame), Err(PmmError::DoubleFree));
        assert_eq!(pmm.free_frames(), free_before);
    }

    #[test]
    fn misaligned_and_out_of_range_rejected() {
        let arena = TestArena::new();
        let pmm = arena.allocator();

        assert_eq!(
            pmm.free_frame(PhysAddr::new(0x1234)),
            Err(PmmError::InvalidFrame)
        );
        assert_eq!(
            pmm.free_frame(PhysAddr::new(ARENA_SIZE as u64 + 0x1000)),
            Err(PmmError::InvalidFrame)
        );
    }

    #[test]
    fn contiguous_run_is_contiguous() {
        let arena = TestArena::new();
        let pmm = arena.allocator();

        let base = pmm.alloc_contiguous(16).expect("run of 16");
        // All frames of the run are marked used now.
        for i in 0..16 {
            assert_eq!(
                pmm.free_frame(PhysAddr::new(base.as_u64() + i * FRAME_SIZE)),
                Ok(())
            );
        }
    }

    #[test]
    fn exhaustion_returns_none() {
        let arena = TestArena::new();
        let pmm = arena.allocator();

        while pmm.alloc_frame().is_some() {}
        assert!(pmm.alloc_frame().is_none());
        assert_eq!(pmm.free_frames(), 0);
    }
}
