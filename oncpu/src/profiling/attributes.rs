//! Sampling attributes shared by every per-thread session
//!
//! One software CPU-clock event per thread, sampled by frequency, waking the
//! reader after every overflow, with TIME | TID | CALLCHAIN payloads.

use log::debug;
use perf_event_open_sys::bindings::{
    perf_event_attr, PERF_COUNT_SW_CPU_CLOCK, PERF_SAMPLE_CALLCHAIN, PERF_SAMPLE_TID,
    PERF_SAMPLE_TIME, PERF_TYPE_SOFTWARE,
};
use std::fs;
use std::path::Path;

use crate::config::SamplingSettings;
use crate::perf::layout::sample_record_len;
use crate::perf::page_size;

const MAX_STACK_PATH: &str = "/proc/sys/kernel/perf_event_max_stack";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplingAttributes {
    pub frequency_hz: u64,
    /// Call-chain depth requested from the kernel
    pub max_stack: u16,
    pub include_kernel: bool,
    /// Data pages per ring buffer, a power of two
    pub data_pages: usize,
    pub page_size: usize,
}

impl SamplingAttributes {
    /// Build attributes for this host from validated settings
    #[must_use]
    pub fn from_settings(settings: &SamplingSettings) -> Self {
        let max_stack = read_max_stack(Path::new(MAX_STACK_PATH), settings.max_stack_cap);
        let page_size = page_size();
        let data_pages = settings
            .data_pages
            .unwrap_or_else(|| data_pages_for(max_stack, settings.slack_samples, page_size));

        let attrs = Self {
            frequency_hz: settings.frequency_hz,
            max_stack,
            include_kernel: settings.include_kernel,
            data_pages,
            page_size,
        };
        debug!(
            "sampling at {} Hz, max stack {}, {} data pages ({} byte mapping)",
            attrs.frequency_hz,
            attrs.max_stack,
            attrs.data_pages,
            attrs.mmap_len()
        );
        attrs
    }

    /// Bytes to map: one metadata page plus the data pages
    #[must_use]
    pub fn mmap_len(&self) -> usize {
        (self.data_pages + 1) * self.page_size
    }

    /// The `perf_event_attr` handed to `perf_event_open`
    ///
    /// Created disabled; the session enables it once the ring is mapped.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn perf_attr(&self) -> perf_event_attr {
        let mut attr = perf_event_attr::default();
        attr.size = std::mem::size_of::<perf_event_attr>() as u32;
        attr.type_ = PERF_TYPE_SOFTWARE;
        attr.config = u64::from(PERF_COUNT_SW_CPU_CLOCK);

        attr.sample_type =
            u64::from(PERF_SAMPLE_TIME) | u64::from(PERF_SAMPLE_TID) | u64::from(PERF_SAMPLE_CALLCHAIN);
        // sample_period/sample_freq and wakeup_events/wakeup_watermark are unions
        attr.__bindgen_anon_1.sample_freq = self.frequency_hz;
        attr.set_freq(1);
        attr.__bindgen_anon_2.wakeup_events = 1;
        attr.sample_max_stack = self.max_stack;

        attr.set_disabled(1);
        if !self.include_kernel {
            attr.set_exclude_kernel(1);
            attr.set_exclude_hv(1);
        }
        attr
    }
}

/// Read the kernel's call-chain depth limit
///
/// Falls back to `cap` when the file is unreadable, unparsable, zero or not
/// below `cap`.
#[must_use]
pub fn read_max_stack(path: &Path, cap: u16) -> u16 {
    fs::read_to_string(path)
        .ok()
        .and_then(|text| text.trim().parse::<u32>().ok())
        .filter(|&depth| depth > 0 && depth < u32::from(cap))
        .and_then(|depth| u16::try_from(depth).ok())
        .unwrap_or(cap)
}

/// Smallest power-of-two page count holding `slack_samples` samples of
/// `max_stack` frames
#[must_use]
pub fn data_pages_for(max_stack: u16, slack_samples: usize, page_size: usize) -> usize {
    let bytes = sample_record_len(usize::from(max_stack)) * slack_samples.max(1);
    bytes.div_ceil(page_size.max(1)).max(1).next_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    fn settings() -> SamplingSettings {
        SamplingSettings {
            period: Duration::from_millis(10),
            frequency_hz: 100,
            wait_timeout: Duration::from_secs(1),
            max_stack_cap: 100,
            data_pages: None,
            slack_samples: 64,
            include_kernel: true,
        }
    }

    #[test]
    fn test_read_max_stack() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "32").unwrap();
        assert_eq!(read_max_stack(file.path(), 100), 32);

        let mut big = tempfile::NamedTempFile::new().unwrap();
        writeln!(big, "127").unwrap();
        assert_eq!(read_max_stack(big.path(), 100), 100);

        let mut junk = tempfile::NamedTempFile::new().unwrap();
        writeln!(junk, "lots").unwrap();
        assert_eq!(read_max_stack(junk.path(), 100), 100);

        assert_eq!(read_max_stack(Path::new("/nonexistent/max_stack"), 100), 100);
    }

    #[test]
    fn test_data_pages_power_of_two() {
        // 64 samples of 832 bytes = 53248 bytes = 13 pages -> 16
        assert_eq!(data_pages_for(100, 64, 4096), 16);
        assert_eq!(data_pages_for(0, 1, 4096), 1);
        for depth in [1u16, 7, 50, 127] {
            assert!(data_pages_for(depth, 64, 4096).is_power_of_two());
        }
    }

    #[test]
    fn test_explicit_pages_win() {
        let attrs = SamplingAttributes::from_settings(&SamplingSettings {
            data_pages: Some(4),
            ..settings()
        });
        assert_eq!(attrs.data_pages, 4);
        assert_eq!(attrs.mmap_len(), 5 * attrs.page_size);
    }

    #[test]
    #[allow(unsafe_code)]
    fn test_perf_attr_fields() {
        let attrs = SamplingAttributes {
            frequency_hz: 100,
            max_stack: 64,
            include_kernel: false,
            data_pages: 8,
            page_size: 4096,
        };
        let attr = attrs.perf_attr();
        assert_eq!(attr.type_, PERF_TYPE_SOFTWARE);
        assert_eq!(attr.config, u64::from(PERF_COUNT_SW_CPU_CLOCK));
        assert_eq!(unsafe { attr.__bindgen_anon_1.sample_freq }, 100);
        assert_eq!(unsafe { attr.__bindgen_anon_2.wakeup_events }, 1);
        assert_eq!(attr.freq(), 1);
        assert_eq!(attr.disabled(), 1);
        assert_eq!(attr.exclude_kernel(), 1);
        assert_eq!(attr.sample_max_stack, 64);
        assert_eq!(
            attr.sample_type,
            u64::from(PERF_SAMPLE_TIME) | u64::from(PERF_SAMPLE_TID) | u64::from(PERF_SAMPLE_CALLCHAIN)
        );
    }
}
