//! Fixed layout of the kernel structures shared with the sampling ring buffer
//!
//! The metadata page (`struct perf_event_mmap_page`) is an external contract:
//! userspace only touches four u64 fields of it, at the offsets below. They are
//! checked against the `perf-event-open-sys` bindings at compile time so a
//! bindings update that moves a field fails the build instead of corrupting
//! the cursor.

use std::mem::{offset_of, size_of};

use perf_event_open_sys::bindings::{perf_event_header, perf_event_mmap_page};

/// `data_head`: producer cursor, written by the kernel
pub const DATA_HEAD_OFFSET: usize = 0x400;
/// `data_tail`: consumer cursor, written by us
pub const DATA_TAIL_OFFSET: usize = 0x408;
/// `data_offset`: start of the data region inside the mapping (Linux 4.1+)
pub const DATA_OFFSET_OFFSET: usize = 0x410;
/// `data_size`: size of the data region (Linux 4.1+)
pub const DATA_SIZE_OFFSET: usize = 0x418;

/// Bytes of the metadata page the reader depends on
pub const METADATA_MIN_LEN: usize = DATA_SIZE_OFFSET + size_of::<u64>();

const _: () = assert!(offset_of!(perf_event_mmap_page, data_head) == DATA_HEAD_OFFSET);
const _: () = assert!(offset_of!(perf_event_mmap_page, data_tail) == DATA_TAIL_OFFSET);
const _: () = assert!(offset_of!(perf_event_mmap_page, data_offset) == DATA_OFFSET_OFFSET);
const _: () = assert!(offset_of!(perf_event_mmap_page, data_size) == DATA_SIZE_OFFSET);

/// Size of `struct perf_event_header`: type (u32), misc (u16), size (u16)
pub const RECORD_HEADER_LEN: usize = 8;

const _: () = assert!(size_of::<perf_event_header>() == RECORD_HEADER_LEN);

/// `PERF_RECORD_LOST`: `{ id: u64, lost: u64 }`
pub const PERF_RECORD_LOST: u32 = 2;
/// `PERF_RECORD_SAMPLE`: layout selected by `sample_type`
pub const PERF_RECORD_SAMPLE: u32 = 9;

/// Fixed part of a TID|TIME|CALLCHAIN sample: pid, tid (u32 each), time, nr (u64 each)
pub const SAMPLE_FIXED_LEN: usize = 24;

/// Call-chain entries at or above this value are context markers
/// (`PERF_CONTEXT_KERNEL`, `PERF_CONTEXT_USER`, ...), not addresses
pub const PERF_CONTEXT_MAX: u64 = (-4095i64) as u64;

/// Size of a sample record carrying `depth` call-chain entries
#[must_use]
pub const fn sample_record_len(depth: usize) -> usize {
    RECORD_HEADER_LEN + SAMPLE_FIXED_LEN + 8 * depth
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_record_len() {
        assert_eq!(sample_record_len(0), 32);
        assert_eq!(sample_record_len(100), 832);
    }

    #[test]
    fn test_context_markers_are_above_limit() {
        // PERF_CONTEXT_KERNEL = (u64)-128, PERF_CONTEXT_USER = (u64)-512
        assert!((-128i64) as u64 >= PERF_CONTEXT_MAX);
        assert!((-512i64) as u64 >= PERF_CONTEXT_MAX);
        assert!(0x7fff_ffff_ffff < PERF_CONTEXT_MAX);
    }
}
