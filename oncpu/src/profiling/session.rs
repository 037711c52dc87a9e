//! Per-thread sampling session
//!
//! Owns one perf event fd and its mapped ring buffer. `open` builds the
//! session step by step and any failing kernel call drops what was built so
//! far; `close` is idempotent and runs from `Drop`.

#![allow(unsafe_code)]

use log::{debug, warn};
use perf_event_open_sys::bindings::PERF_FLAG_FD_CLOEXEC;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr::{self, NonNull};

use super::attributes::SamplingAttributes;
use crate::domain::{AttachError, DecodeError, Tid};
use crate::perf::{drain, DrainStats, RingBufferReader, SampleRecord, SharedRegion};

pub struct PerThreadSession {
    tid: Tid,
    // field order: the ring is unmapped before the fd is closed
    reader: Option<RingBufferReader>,
    fd: Option<OwnedFd>,
    enabled: bool,
    totals: DrainStats,
    consecutive_failures: u32,
}

impl PerThreadSession {
    /// Attach a sampling event to `tid`
    ///
    /// # Errors
    /// Returns an [`AttachError`] naming the kernel call that failed. A thread
    /// that exited since it was listed fails here with `ESRCH`.
    pub fn open(tid: Tid, attrs: &SamplingAttributes) -> Result<Self, AttachError> {
        let fail = |call: &'static str| AttachError { tid, call, source: io::Error::last_os_error() };

        let mut attr = attrs.perf_attr();
        // SAFETY: attr is a fully initialised perf_event_attr with `size` set.
        let raw = unsafe {
            perf_event_open_sys::perf_event_open(
                &mut attr,
                tid.into(),
                -1,
                -1,
                libc::c_ulong::from(PERF_FLAG_FD_CLOEXEC),
            )
        };
        if raw < 0 {
            return Err(fail("perf_event_open"));
        }
        // SAFETY: perf_event_open returned a fresh fd that nothing else owns.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let mut session = Self {
            tid,
            reader: None,
            fd: Some(fd),
            enabled: false,
            totals: DrainStats::default(),
            consecutive_failures: 0,
        };

        // SAFETY: plain fcntl calls on an fd we own.
        let nonblocking = unsafe {
            let flags = libc::fcntl(raw, libc::F_GETFL);
            flags >= 0 && libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) >= 0
        };
        if !nonblocking {
            return Err(fail("fcntl(O_NONBLOCK)"));
        }

        let len = attrs.mmap_len();
        // SAFETY: mapping a perf event fd; the kernel validates the length.
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                raw,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(fail("mmap"));
        }
        let Some(base) = NonNull::new(base.cast::<u8>()) else {
            return Err(fail("mmap"));
        };
        // SAFETY: `base` is a live mapping of `len` bytes owned by this region.
        let region = unsafe { SharedRegion::from_mmap(base, len) };
        let reader = RingBufferReader::new(region, attrs.page_size).map_err(|e| AttachError {
            tid,
            call: "mmap",
            source: io::Error::new(io::ErrorKind::InvalidData, e),
        })?;
        session.reader = Some(reader);

        // SAFETY: ioctl on an fd we own.
        if unsafe { perf_event_open_sys::ioctls::ENABLE(raw, 0) } < 0 {
            return Err(fail("ioctl(ENABLE)"));
        }
        session.enabled = true;

        debug!("attached to {tid} (fd {raw})");
        Ok(session)
    }

    /// A session over an existing reader, with no kernel event behind it
    #[cfg(test)]
    pub(crate) fn from_reader(tid: Tid, reader: RingBufferReader) -> Self {
        Self {
            tid,
            reader: Some(reader),
            fd: None,
            enabled: false,
            totals: DrainStats::default(),
            consecutive_failures: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn reader(&self) -> Option<&RingBufferReader> {
        self.reader.as_ref()
    }

    /// Disable the event, unmap the ring and close the fd
    pub fn close(&mut self) {
        if self.enabled {
            if let Some(fd) = &self.fd {
                // SAFETY: ioctl on an fd we still own.
                if unsafe { perf_event_open_sys::ioctls::DISABLE(fd.as_raw_fd(), 0) } < 0 {
                    warn!("failed to disable sampling on {}: {}", self.tid, io::Error::last_os_error());
                }
            }
            self.enabled = false;
        }
        self.reader = None;
        if self.fd.take().is_some() {
            debug!("detached from {}", self.tid);
        }
    }

    /// Decode everything currently buffered, passing samples to `on_sample`
    ///
    /// A closed session drains nothing.
    ///
    /// # Errors
    /// Returns the [`DecodeError`] of a failed pass; the session counts
    /// consecutive failures (see [`Self::consecutive_failures`]).
    pub fn drain<F>(&mut self, on_sample: F) -> Result<DrainStats, DecodeError>
    where
        F: FnMut(SampleRecord),
    {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(DrainStats::default());
        };
        let result = drain(reader, &mut self.totals, on_sample);
        match result {
            Ok(_) => self.consecutive_failures = 0,
            Err(_) => self.consecutive_failures += 1,
        }
        result
    }

    #[must_use]
    pub fn tid(&self) -> Tid {
        self.tid
    }

    #[must_use]
    pub fn raw_fd(&self) -> Option<RawFd> {
        self.fd.as_ref().map(AsRawFd::as_raw_fd)
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    /// Counters accumulated since the session was opened
    #[must_use]
    pub fn totals(&self) -> DrainStats {
        self.totals
    }

    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

impl Drop for PerThreadSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs() -> SamplingAttributes {
        SamplingAttributes {
            frequency_hz: 100,
            max_stack: 32,
            include_kernel: false,
            data_pages: 4,
            page_size: crate::perf::page_size(),
        }
    }

    #[test]
    fn test_open_unknown_thread_fails() {
        // tid far above pid_max
        let Err(err) = PerThreadSession::open(Tid(0x3fff_ffff), &attrs()) else {
            panic!("attaching to a nonexistent thread succeeded");
        };
        assert_eq!(err.call, "perf_event_open");
    }

    #[test]
    fn test_close_is_idempotent() {
        let me = Tid(unsafe { libc::gettid() } as u32);
        let mut session = match PerThreadSession::open(me, &attrs()) {
            Ok(session) => session,
            Err(e) => {
                println!("perf_event_open unavailable here, skipping: {e}");
                return;
            }
        };
        assert!(session.is_open());
        assert!(session.raw_fd().is_some());
        session.close();
        session.close();
        assert!(!session.is_open());
        assert_eq!(session.drain(|_| {}).unwrap(), DrainStats::default());
    }
}
