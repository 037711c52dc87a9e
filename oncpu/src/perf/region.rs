//! Bounds-checked view over the shared sampling region
//!
//! [`SharedRegion`] is the only place that dereferences the mapping. Every
//! accessor validates its offset against the mapping length (and alignment,
//! for the atomic cursor fields) before touching memory. A violation is a bug
//! in the caller, so it panics rather than returning an error.
//!
//! The region is backed either by a kernel `mmap` of a perf event fd (unmapped
//! on drop) or by an owned heap buffer, which lets the ring buffer and decoder
//! be exercised without a kernel producer.

#![allow(unsafe_code)]

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU64, Ordering};

enum Backing {
    /// Kernel mapping, released with `munmap`
    Mmap,
    /// Owned, 8-byte aligned buffer
    Heap(#[allow(dead_code)] Box<[u64]>),
}

/// A contiguous shared memory region: metadata page followed by the data region
pub struct SharedRegion {
    base: NonNull<u8>,
    len: usize,
    backing: Backing,
}

// SAFETY: the region is plain shared memory. Concurrent access from the kernel
// producer is confined to the data_head field (atomic) and to bytes outside
// [tail, head), which this process never reads.
unsafe impl Send for SharedRegion {}

impl SharedRegion {
    /// Take ownership of a kernel mapping
    ///
    /// # Safety
    /// `base` must be the address returned by a successful `mmap` of `len`
    /// bytes that nothing else will unmap.
    pub unsafe fn from_mmap(base: NonNull<u8>, len: usize) -> Self {
        Self { base, len, backing: Backing::Mmap }
    }

    /// Allocate a zeroed heap-backed region of at least `len` bytes
    #[must_use]
    pub fn heap(len: usize) -> Self {
        let words = len.div_ceil(8).max(1);
        let mut buf = vec![0u64; words].into_boxed_slice();
        // SAFETY: a boxed slice pointer is never null and stays put while the
        // box lives inside `backing`.
        let base = unsafe { NonNull::new_unchecked(buf.as_mut_ptr().cast::<u8>()) };
        Self { base, len, backing: Backing::Heap(buf) }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn is_aligned(&self) -> bool {
        (self.base.as_ptr() as usize) % std::mem::align_of::<AtomicU64>() == 0
    }

    fn check(&self, offset: usize, len: usize) {
        let end = offset.checked_add(len);
        assert!(
            end.is_some_and(|end| end <= self.len),
            "region access [{offset}, +{len}) outside {} byte mapping",
            self.len
        );
    }

    fn atomic_u64(&self, offset: usize) -> &AtomicU64 {
        self.check(offset, 8);
        assert!(offset % 8 == 0, "unaligned atomic access at offset {offset}");
        assert!(self.is_aligned(), "region base is not 8-byte aligned");
        // SAFETY: in bounds and aligned (checked above); the memory lives as
        // long as `self`.
        unsafe { &*self.base.as_ptr().add(offset).cast::<AtomicU64>() }
    }

    /// Load a u64 with `Acquire` ordering (producer-written cursor)
    #[must_use]
    pub fn load_acquire_u64(&self, offset: usize) -> u64 {
        self.atomic_u64(offset).load(Ordering::Acquire)
    }

    /// Store a u64 with `Release` ordering (consumer-written cursor)
    pub fn store_release_u64(&self, offset: usize, value: u64) {
        self.atomic_u64(offset).store(value, Ordering::Release);
    }

    /// Load a u64 field that the producer does not change after setup
    #[must_use]
    pub fn load_u64(&self, offset: usize) -> u64 {
        self.atomic_u64(offset).load(Ordering::Relaxed)
    }

    /// Copy `dst.len()` bytes starting at `offset` out of the region
    pub fn copy_out(&self, offset: usize, dst: &mut [u8]) {
        self.check(offset, dst.len());
        // SAFETY: source range checked above; `dst` is a distinct Rust buffer.
        unsafe {
            ptr::copy_nonoverlapping(self.base.as_ptr().add(offset), dst.as_mut_ptr(), dst.len());
        }
    }

    /// Copy `src` into the region starting at `offset`
    #[cfg(test)]
    pub(crate) fn copy_in(&self, offset: usize, src: &[u8]) {
        self.check(offset, src.len());
        // SAFETY: destination range checked above.
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), self.base.as_ptr().add(offset), src.len());
        }
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        if let Backing::Mmap = self.backing {
            // SAFETY: we own the mapping (see `from_mmap`).
            let rc = unsafe { libc::munmap(self.base.as_ptr().cast(), self.len) };
            if rc != 0 {
                log::warn!("munmap failed: {}", std::io::Error::last_os_error());
            }
        }
    }
}

/// Split a read of `len` bytes at unbounded cursor `cursor` over a circular
/// region of `data_size` bytes (a power of two)
///
/// Returns `(start, first, second)`: the wrapped start offset, the bytes read
/// before the end of the region, and the bytes read from its beginning.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn wrap_split(cursor: u64, len: usize, data_size: u64) -> (usize, usize, usize) {
    debug_assert!(data_size.is_power_of_two());
    let start = (cursor & (data_size - 1)) as usize;
    let room = data_size as usize - start;
    let first = len.min(room);
    (start, first, len - first)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_split_contiguous() {
        assert_eq!(wrap_split(0, 16, 64), (0, 16, 0));
        assert_eq!(wrap_split(48, 16, 64), (48, 16, 0));
        // cursor has wrapped three times already
        assert_eq!(wrap_split(3 * 64 + 8, 16, 64), (8, 16, 0));
    }

    #[test]
    fn test_wrap_split_across_boundary() {
        assert_eq!(wrap_split(56, 16, 64), (56, 8, 8));
        assert_eq!(wrap_split(64 + 63, 2, 64), (63, 1, 1));
    }

    #[test]
    fn test_heap_region_atomics() {
        let region = SharedRegion::heap(64);
        assert!(region.is_aligned());
        region.store_release_u64(8, 0xdead_beef);
        assert_eq!(region.load_acquire_u64(8), 0xdead_beef);
        assert_eq!(region.load_u64(0), 0);
    }

    #[test]
    fn test_copy_round_trip() {
        let region = SharedRegion::heap(32);
        region.copy_in(5, b"hello");
        let mut out = [0u8; 5];
        region.copy_out(5, &mut out);
        assert_eq!(&out, b"hello");
    }

    #[test]
    #[should_panic(expected = "outside")]
    fn test_out_of_bounds_panics() {
        let region = SharedRegion::heap(16);
        let mut out = [0u8; 8];
        region.copy_out(12, &mut out);
    }

    #[test]
    #[should_panic(expected = "unaligned")]
    fn test_unaligned_atomic_panics() {
        let region = SharedRegion::heap(16);
        let _ = region.load_u64(4);
    }
}
