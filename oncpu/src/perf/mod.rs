//! Kernel sampling ring buffer: ABI layout, shared region, reader and decoder
//!
//! ```text
//! layout       - offsets of the metadata fields and record constants
//! region       - bounds-checked access to the mapping, wraparound math
//! ring_buffer  - consumer cursor over the data region
//! record       - record parsing and the drain pass
//! ```

pub mod layout;
pub mod record;
pub mod region;
pub mod ring_buffer;

pub use record::{drain, DrainStats, LostRecord, RecordHeader, SampleRecord};
pub use region::SharedRegion;
pub use ring_buffer::RingBufferReader;

/// System page size, 4096 if `sysconf` cannot tell
#[must_use]
#[allow(unsafe_code)]
pub fn page_size() -> usize {
    // SAFETY: sysconf has no memory-safety preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(size).ok().filter(|&s| s > 0).unwrap_or(4096)
}
