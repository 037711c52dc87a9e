//! Record decoding for the sampling ring buffer
//!
//! Every record starts with a `perf_event_header`; the payload layout depends
//! on the record type. With `sample_type = TID | TIME | CALLCHAIN` a sample
//! payload is:
//!
//! ```text
//! u32 pid, u32 tid, u64 time, u64 nr, u64 ips[nr]
//! ```
//!
//! Values are in host byte order; the kernel producer runs on the same machine.

use log::{debug, trace};

use super::layout::{
    PERF_CONTEXT_MAX, PERF_RECORD_LOST, PERF_RECORD_SAMPLE, RECORD_HEADER_LEN, SAMPLE_FIXED_LEN,
};
use super::ring_buffer::RingBufferReader;
use crate::domain::{DecodeError, Pid, Tid, Timestamp};

fn u16_at(bytes: &[u8], at: usize) -> u16 {
    u16::from_ne_bytes([bytes[at], bytes[at + 1]])
}

fn u32_at(bytes: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    u32::from_ne_bytes(raw)
}

fn u64_at(bytes: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    u64::from_ne_bytes(raw)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub kind: u32,
    pub misc: u16,
    /// Total record size, header included
    pub size: u16,
}

impl RecordHeader {
    /// Parse a header from the first 8 bytes of `bytes`
    #[must_use]
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < RECORD_HEADER_LEN {
            return None;
        }
        Some(Self { kind: u32_at(bytes, 0), misc: u16_at(bytes, 4), size: u16_at(bytes, 6) })
    }

    #[must_use]
    pub fn encode(&self) -> [u8; RECORD_HEADER_LEN] {
        let mut out = [0u8; RECORD_HEADER_LEN];
        out[..4].copy_from_slice(&self.kind.to_ne_bytes());
        out[4..6].copy_from_slice(&self.misc.to_ne_bytes());
        out[6..].copy_from_slice(&self.size.to_ne_bytes());
        out
    }

    /// Payload length, zero when the declared size is below the header size
    #[must_use]
    pub fn payload_len(&self) -> usize {
        usize::from(self.size).saturating_sub(RECORD_HEADER_LEN)
    }
}

/// One decoded `PERF_RECORD_SAMPLE`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRecord {
    pub pid: Pid,
    pub tid: Tid,
    pub time: Timestamp,
    /// Raw call-chain as emitted by the kernel, leaf first, markers included
    pub callchain: Vec<u64>,
}

impl SampleRecord {
    /// Parse a sample payload (the bytes after the header)
    ///
    /// Returns `None` unless the payload is exactly `24 + 8 * nr` bytes.
    #[must_use]
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < SAMPLE_FIXED_LEN {
            return None;
        }
        let nr = u64_at(payload, 16);
        let expected = usize::try_from(nr)
            .ok()
            .and_then(|n| n.checked_mul(8))
            .and_then(|n| n.checked_add(SAMPLE_FIXED_LEN))?;
        if payload.len() != expected {
            return None;
        }

        let callchain = payload[SAMPLE_FIXED_LEN..]
            .chunks_exact(8)
            .map(|chunk| u64_at(chunk, 0))
            .collect();

        Some(Self {
            pid: Pid(u32_at(payload, 0)),
            tid: Tid(u32_at(payload, 4)),
            time: Timestamp(u64_at(payload, 8)),
            callchain,
        })
    }

    /// Full record bytes, header included
    ///
    /// The call-chain must fit a u16 record size (at most 8188 entries).
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode(&self) -> Vec<u8> {
        let size = RECORD_HEADER_LEN + SAMPLE_FIXED_LEN + 8 * self.callchain.len();
        debug_assert!(size <= usize::from(u16::MAX), "call-chain too deep for one record");
        let header = RecordHeader { kind: PERF_RECORD_SAMPLE, misc: 0, size: size as u16 };

        let mut out = Vec::with_capacity(size);
        out.extend_from_slice(&header.encode());
        out.extend_from_slice(&self.pid.0.to_ne_bytes());
        out.extend_from_slice(&self.tid.0.to_ne_bytes());
        out.extend_from_slice(&self.time.0.to_ne_bytes());
        out.extend_from_slice(&(self.callchain.len() as u64).to_ne_bytes());
        for ip in &self.callchain {
            out.extend_from_slice(&ip.to_ne_bytes());
        }
        out
    }

    /// Instruction addresses of the call-chain, context markers and zeros removed
    pub fn frames(&self) -> impl Iterator<Item = u64> + '_ {
        self.callchain.iter().copied().filter(|&ip| ip != 0 && ip < PERF_CONTEXT_MAX)
    }
}

#[allow(clippy::cast_possible_truncation)]
const LOST_RECORD_LEN: u16 = (RECORD_HEADER_LEN + 16) as u16;

/// One decoded `PERF_RECORD_LOST`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LostRecord {
    pub id: u64,
    pub lost: u64,
}

impl LostRecord {
    #[must_use]
    pub fn parse(payload: &[u8]) -> Option<Self> {
        // sample_id_all may append trailing fields; only the prefix matters
        if payload.len() < 16 {
            return None;
        }
        Some(Self { id: u64_at(payload, 0), lost: u64_at(payload, 8) })
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let header = RecordHeader { kind: PERF_RECORD_LOST, misc: 0, size: LOST_RECORD_LEN };
        let mut out = header.encode().to_vec();
        out.extend_from_slice(&self.id.to_ne_bytes());
        out.extend_from_slice(&self.lost.to_ne_bytes());
        out
    }
}

/// Counters for one drain pass (or, accumulated, for a session's lifetime)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// Records consumed, of any type
    pub records: u64,
    pub samples: u64,
    /// Samples the kernel reported as dropped
    pub lost: u64,
    /// Records of a type this decoder does not handle
    pub unknown: u64,
    /// Sample or lost records whose size disagrees with their contents
    pub malformed: u64,
    pub bytes: u64,
}

impl DrainStats {
    pub fn add(&mut self, other: &DrainStats) {
        self.records += other.records;
        self.samples += other.samples;
        self.lost += other.lost;
        self.unknown += other.unknown;
        self.malformed += other.malformed;
        self.bytes += other.bytes;
    }

    /// Counters gained since `earlier`, a previous reading of the same totals
    #[must_use]
    pub fn since(&self, earlier: &DrainStats) -> DrainStats {
        DrainStats {
            records: self.records.saturating_sub(earlier.records),
            samples: self.samples.saturating_sub(earlier.samples),
            lost: self.lost.saturating_sub(earlier.lost),
            unknown: self.unknown.saturating_sub(earlier.unknown),
            malformed: self.malformed.saturating_sub(earlier.malformed),
            bytes: self.bytes.saturating_sub(earlier.bytes),
        }
    }
}

/// Decode every record currently in the ring buffer
///
/// The producer cursor is sampled once at the start, so one pass is bounded
/// even while the kernel keeps writing. Each sample is handed to `on_sample`
/// in write order. The consumer cursor is committed exactly once, and the
/// pass's counters are added to `totals` whether or not it succeeds.
///
/// # Errors
/// On a truncated header, a record larger than the readable bytes, or a
/// producer cursor behind the consumer, the cursor is left at the start of the
/// offending record, everything before it is committed, and the error is
/// returned.
pub fn drain<F>(
    reader: &mut RingBufferReader,
    totals: &mut DrainStats,
    mut on_sample: F,
) -> Result<DrainStats, DecodeError>
where
    F: FnMut(SampleRecord),
{
    let mut stats = DrainStats::default();
    let head = reader.head();
    let mut outcome = Ok(());

    while reader.tail() != head {
        let start = reader.tail();
        if head < start {
            outcome = Err(DecodeError::CursorInversion { head, tail: start });
            break;
        }

        let available = head - start;
        if available < RECORD_HEADER_LEN as u64 {
            outcome = Err(DecodeError::TruncatedHeader {
                available,
                needed: RECORD_HEADER_LEN as u64,
            });
            break;
        }

        let header_bytes = reader.read(RECORD_HEADER_LEN);
        let Some(header) = RecordHeader::parse(&header_bytes) else {
            reader.rewind_to(start);
            outcome = Err(DecodeError::TruncatedHeader {
                available,
                needed: RECORD_HEADER_LEN as u64,
            });
            break;
        };

        let payload_len = header.payload_len();
        if (RECORD_HEADER_LEN + payload_len) as u64 > available {
            reader.rewind_to(start);
            outcome = Err(DecodeError::TruncatedRecord {
                declared: u64::from(header.size),
                available,
            });
            break;
        }
        let payload = reader.read(payload_len);

        stats.records += 1;
        stats.bytes += reader.tail() - start;

        match header.kind {
            PERF_RECORD_SAMPLE => match SampleRecord::parse(&payload) {
                Some(sample) => {
                    stats.samples += 1;
                    on_sample(sample);
                }
                None => {
                    debug!("skipping sample record with inconsistent size {}", header.size);
                    stats.malformed += 1;
                }
            },
            PERF_RECORD_LOST => match LostRecord::parse(&payload) {
                Some(lost) => {
                    trace!("kernel dropped {} samples (id {})", lost.lost, lost.id);
                    stats.lost += lost.lost;
                }
                None => stats.malformed += 1,
            },
            other => {
                trace!("skipping record type {other} ({} bytes)", header.size);
                stats.unknown += 1;
            }
        }
    }

    reader.commit();
    totals.add(&stats);
    outcome.map(|()| stats)
}
