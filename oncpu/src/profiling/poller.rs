//! Readiness wait over the session fds
//!
//! With `wakeup_events = 1` a perf fd polls readable once a sample is
//! buffered, and reports hang-up once the thread it follows has exited.
//! Closing an fd does not wake a `poll` already blocked on it, so the wait
//! set also carries an eventfd that [`WakeSignal::signal`] makes readable.

#![allow(unsafe_code)]

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

/// Eventfd that ends a pending [`wait_readable`] early
///
/// Once signalled it stays readable; every later wait returns at once.
#[derive(Debug)]
pub struct WakeSignal {
    eventfd: OwnedFd,
}

impl WakeSignal {
    /// # Errors
    /// Returns the `eventfd` error
    pub fn new() -> io::Result<Self> {
        // SAFETY: eventfd has no memory-safety preconditions.
        let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: eventfd returned a fresh fd that nothing else owns.
        Ok(Self { eventfd: unsafe { OwnedFd::from_raw_fd(fd) } })
    }

    pub fn signal(&self) {
        let val: u64 = 1;
        // SAFETY: writes 8 bytes from a live u64 to an fd we own.
        let rc = unsafe {
            libc::write(self.eventfd.as_raw_fd(), std::ptr::addr_of!(val).cast::<libc::c_void>(), 8)
        };
        if rc < 0 {
            log::warn!("failed to signal wake eventfd: {}", io::Error::last_os_error());
        }
    }

    #[must_use]
    pub fn raw_fd(&self) -> RawFd {
        self.eventfd.as_raw_fd()
    }
}

/// One fd reported by [`wait_readable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyFd {
    /// Position in the slice passed to [`wait_readable`]
    pub index: usize,
    pub readable: bool,
    /// The event's thread is gone (or the fd is no longer valid)
    pub hangup: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready(Vec<ReadyFd>),
    TimedOut,
    /// A signal arrived before any fd became ready
    Interrupted,
    /// The wake signal fired; session readiness is not reported
    Woken,
}

/// Block until one of `fds` is ready, `wake` fires, or `timeout` elapses
///
/// An empty `fds` without a wake signal simply sleeps for `timeout`.
///
/// # Errors
/// Returns the `poll` error for anything other than `EINTR`.
pub fn wait_readable(
    fds: &[RawFd],
    wake: Option<&WakeSignal>,
    timeout: Duration,
) -> io::Result<WaitOutcome> {
    let mut pollfds: Vec<libc::pollfd> = fds
        .iter()
        .copied()
        .chain(wake.map(WakeSignal::raw_fd))
        .map(|fd| libc::pollfd { fd, events: libc::POLLIN, revents: 0 })
        .collect();
    let timeout_ms = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);
    let nfds = libc::nfds_t::try_from(pollfds.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many fds to poll"))?;

    // SAFETY: pollfds is a valid array of nfds entries for the whole call.
    let rc = unsafe { libc::poll(pollfds.as_mut_ptr(), nfds, timeout_ms) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(WaitOutcome::Interrupted);
        }
        return Err(err);
    }
    if rc == 0 {
        return Ok(WaitOutcome::TimedOut);
    }

    if wake.is_some() && pollfds.last().is_some_and(|p| p.revents != 0) {
        return Ok(WaitOutcome::Woken);
    }

    let ready = pollfds[..fds.len()]
        .iter()
        .enumerate()
        .filter(|(_, p)| p.revents != 0)
        .map(|(index, p)| ReadyFd {
            index,
            readable: p.revents & libc::POLLIN != 0,
            hangup: p.revents & (libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0,
        })
        .collect();
    Ok(WaitOutcome::Ready(ready))
}
