//! Consumer side of the kernel sampling ring buffer
//!
//! The kernel (single producer) appends records into the data region and
//! advances `data_head`; this reader (single consumer) copies bytes out from
//! its own cursor and publishes progress through `data_tail`. Both cursors are
//! unbounded u64 counters; they are wrapped by the data size only when bytes
//! are dereferenced.
//!
//! ```text
//! mapping:  [ metadata page | data region (2^n pages)            ]
//!                             ^ data_offset
//! cursors:  tail <= head, readable bytes = [tail, head) mod data_size
//! ```
//!
//! Because the mapping is `PROT_WRITE`, the kernel never overwrites bytes past
//! the published tail; it emits a `PERF_RECORD_LOST` instead.

use log::debug;

use super::layout::{
    DATA_HEAD_OFFSET, DATA_OFFSET_OFFSET, DATA_SIZE_OFFSET, DATA_TAIL_OFFSET, METADATA_MIN_LEN,
};
use super::region::{wrap_split, SharedRegion};
use crate::domain::LayoutError;

pub struct RingBufferReader {
    region: SharedRegion,
    data_offset: usize,
    data_size: u64,
    /// Consumer cursor, ahead of the published tail until `commit`
    tail: u64,
    /// Last value stored into `data_tail`
    committed: u64,
}

impl RingBufferReader {
    /// Wrap a mapped metadata+data region
    ///
    /// The consumer cursor starts at the persisted `data_tail`, so a reader
    /// re-created over the same mapping resumes instead of re-reading.
    /// `page_size` locates the data region on kernels that predate the
    /// `data_offset`/`data_size` fields (they read as zero there).
    ///
    /// # Errors
    /// Returns a [`LayoutError`] when the mapping cannot hold the metadata
    /// fields, is misaligned, or describes a data region that is not a power
    /// of two or lies outside the mapping.
    pub fn new(region: SharedRegion, page_size: usize) -> Result<Self, LayoutError> {
        if region.len() < METADATA_MIN_LEN {
            return Err(LayoutError::MappingTooSmall { len: region.len(), needed: METADATA_MIN_LEN });
        }
        if !region.is_aligned() {
            return Err(LayoutError::Misaligned);
        }

        let mut data_offset = region.load_u64(DATA_OFFSET_OFFSET);
        let mut data_size = region.load_u64(DATA_SIZE_OFFSET);
        if data_size == 0 {
            data_offset = page_size as u64;
            data_size = (region.len() as u64).saturating_sub(page_size as u64);
        }

        if !data_size.is_power_of_two() {
            return Err(LayoutError::DataSizeNotPowerOfTwo(data_size));
        }
        let fits = data_offset.checked_add(data_size).is_some_and(|end| end <= region.len() as u64);
        if !fits {
            return Err(LayoutError::DataOutOfBounds {
                offset: data_offset,
                size: data_size,
                len: region.len(),
            });
        }

        let tail = region.load_acquire_u64(DATA_TAIL_OFFSET);
        debug!("ring buffer: {data_size} data bytes at offset {data_offset}, tail {tail}");

        #[allow(clippy::cast_possible_truncation)]
        Ok(Self { region, data_offset: data_offset as usize, data_size, tail, committed: tail })
    }

    /// Producer cursor (kernel-written, never decreases)
    #[must_use]
    pub fn head(&self) -> u64 {
        self.region.load_acquire_u64(DATA_HEAD_OFFSET)
    }

    /// Consumer cursor
    #[must_use]
    pub fn tail(&self) -> u64 {
        self.tail
    }

    /// Bytes between the consumer and producer cursors
    #[must_use]
    pub fn available(&self) -> u64 {
        self.head().saturating_sub(self.tail)
    }

    #[must_use]
    pub fn data_size(&self) -> u64 {
        self.data_size
    }

    /// Read exactly `n` bytes at the consumer cursor and advance it
    ///
    /// Requests larger than the data region are clamped to its size. A range
    /// that crosses the end of the region is copied in two pieces.
    #[must_use]
    pub fn read(&mut self, n: usize) -> Vec<u8> {
        #[allow(clippy::cast_possible_truncation)]
        let n = n.min(self.data_size as usize);
        let mut out = vec![0u8; n];

        let (start, first, second) = wrap_split(self.tail, n, self.data_size);
        self.region.copy_out(self.data_offset + start, &mut out[..first]);
        if second > 0 {
            self.region.copy_out(self.data_offset, &mut out[first..]);
        }

        self.tail += n as u64;
        out
    }

    /// Move the consumer cursor back to `cursor`
    ///
    /// Only positions between the last committed tail and the current cursor
    /// are accepted; the bytes there have not been released to the kernel.
    pub fn rewind_to(&mut self, cursor: u64) {
        assert!(
            cursor >= self.committed && cursor <= self.tail,
            "rewind to {cursor} outside [{}, {}]",
            self.committed,
            self.tail
        );
        self.tail = cursor;
    }

    /// Publish the consumer cursor to `data_tail`
    ///
    /// Called once per drain pass: the kernel may reuse everything before the
    /// stored value as soon as it observes it.
    pub fn commit(&mut self) {
        self.region.store_release_u64(DATA_TAIL_OFFSET, self.tail);
        self.committed = self.tail;
    }

    #[cfg(test)]
    pub(crate) fn region(&self) -> &SharedRegion {
        &self.region
    }
}
