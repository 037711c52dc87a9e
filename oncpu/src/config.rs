//! Task configuration
//!
//! A task is configured with a dump period string ("10ms", "1.5s", "1m30s").
//! The period is validated when the runner is constructed, before any kernel
//! session exists, and turned into a sampling frequency.

// Duration arithmetic on parsed decimals goes through f64
#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use std::time::Duration;

use crate::domain::ConfigError;

/// Default dump period
pub const DEFAULT_PERIOD: &str = "10ms";

/// Default bound for one readiness wait in `flush_data`
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound applied to `/proc/sys/kernel/perf_event_max_stack`
pub const DEFAULT_MAX_STACK: u16 = 100;

/// Number of maximum-size samples the data region must hold
pub const DEFAULT_SLACK_SAMPLES: usize = 64;

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Raw task configuration as supplied by the caller
#[derive(Debug, Clone)]
pub struct TaskConfig {
    /// Dump period, e.g. "10ms"
    pub period: String,
    /// Bound for one readiness wait
    pub wait_timeout: Duration,
    /// Cap for the call-chain depth requested from the kernel
    pub max_stack_cap: u16,
    /// Data pages per ring buffer; derived from the sample size when `None`
    pub data_pages: Option<usize>,
    /// Samples of headroom used when deriving the data page count
    pub slack_samples: usize,
    /// Keep kernel frames in the call-chain
    pub include_kernel: bool,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_PERIOD.to_string(),
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            max_stack_cap: DEFAULT_MAX_STACK,
            data_pages: None,
            slack_samples: DEFAULT_SLACK_SAMPLES,
            include_kernel: true,
        }
    }
}

/// Validated sampling settings derived from a [`TaskConfig`]
#[derive(Debug, Clone)]
pub struct SamplingSettings {
    pub period: Duration,
    pub frequency_hz: u64,
    pub wait_timeout: Duration,
    pub max_stack_cap: u16,
    pub data_pages: Option<usize>,
    pub slack_samples: usize,
    pub include_kernel: bool,
}

impl TaskConfig {
    /// Validate the configuration
    ///
    /// # Errors
    /// Returns a [`ConfigError`] for an empty, malformed or sub-millisecond
    /// period, or a data page count that is not a power of two.
    pub fn validate(&self) -> Result<SamplingSettings, ConfigError> {
        let period = parse_period(&self.period)?;

        if let Some(pages) = self.data_pages {
            if !pages.is_power_of_two() {
                return Err(ConfigError::DataPages(pages));
            }
        }

        Ok(SamplingSettings {
            period,
            frequency_hz: frequency_for(period),
            wait_timeout: self.wait_timeout,
            max_stack_cap: self.max_stack_cap,
            data_pages: self.data_pages,
            slack_samples: self.slack_samples.max(1),
            include_kernel: self.include_kernel,
        })
    }
}

/// Samples per second for one sample every `period`, at least 1 Hz
#[must_use]
pub fn frequency_for(period: Duration) -> u64 {
    let nanos = period.as_nanos().max(1);
    ((1_000_000_000u128 / nanos) as u64).max(1)
}

/// Parse a duration string of one or more `<decimal><unit>` groups
///
/// Units: `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`.
///
/// # Errors
/// Returns [`ConfigError::EmptyPeriod`] for an empty string,
/// [`ConfigError::InvalidPeriod`] for anything unparsable and
/// [`ConfigError::PeriodTooSmall`] below one millisecond.
pub fn parse_period(value: &str) -> Result<Duration, ConfigError> {
    let text = value.trim();
    if text.is_empty() {
        return Err(ConfigError::EmptyPeriod);
    }
    let invalid = || ConfigError::InvalidPeriod(value.to_string());

    let mut rest = text;
    let mut total_nanos = 0f64;

    while !rest.is_empty() {
        let number_len = rest.find(|c: char| !(c.is_ascii_digit() || c == '.')).unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_len);
        if number.is_empty() || number == "." {
            return Err(invalid());
        }
        let amount: f64 = number.parse().map_err(|_| invalid())?;

        let unit_len = tail.find(|c: char| c.is_ascii_digit() || c == '.').unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_len);
        let scale = match unit {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return Err(invalid()),
        };

        total_nanos += amount * scale;
        rest = next;
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return Err(invalid());
    }

    let period = Duration::from_nanos(total_nanos.round() as u64);
    if period < MIN_PERIOD {
        return Err(ConfigError::PeriodTooSmall(value.to_string()));
    }
    Ok(period)
}
