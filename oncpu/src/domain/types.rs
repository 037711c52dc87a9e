//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers prevent passing a TID where a PID is expected and
//! make the session/runner signatures more expressive.

use std::fmt;

/// Process ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid(pub u32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{}", self.0)
    }
}

#[allow(clippy::cast_sign_loss)]
impl From<i32> for Pid {
    fn from(pid: i32) -> Self {
        Pid(pid as u32)
    }
}

#[allow(clippy::cast_possible_wrap)]
impl From<Pid> for i32 {
    fn from(pid: Pid) -> Self {
        pid.0 as i32
    }
}

/// Thread ID
///
/// A kernel-assigned thread id. Every sampling session is bound to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tid(pub u32);

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TID:{}", self.0)
    }
}

#[allow(clippy::cast_possible_wrap)]
impl From<Tid> for i32 {
    fn from(tid: Tid) -> Self {
        tid.0 as i32
    }
}

/// Timestamp in nanoseconds, as written by the kernel into sample records
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Convert to seconds (f64)
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn as_seconds(self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.as_seconds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_conversion() {
        let pid = Pid::from(1234i32);
        assert_eq!(pid.0, 1234);
        let back: i32 = pid.into();
        assert_eq!(back, 1234);
    }

    #[test]
    fn test_display() {
        assert_eq!(Pid(7).to_string(), "PID:7");
        assert_eq!(Tid(8).to_string(), "TID:8");
        assert_eq!(Timestamp(1_500_000_000).to_string(), "1.500s");
    }
}
