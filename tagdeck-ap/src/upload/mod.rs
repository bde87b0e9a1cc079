//! Streaming file upload
//!
//! A network-facing producer ([`UploadSession`]) fills slots of a fixed ring
//! while a dedicated storage writer task drains them to disk. Backpressure is
//! natural: the producer cannot get ahead of the writer by more than the ring.

pub mod pipeline;
pub mod ring;
pub mod writer;

pub use pipeline::{UploadPipeline, UploadSession};
pub use ring::{allocate_ring, BufferAllocator, HeapAllocator, Ring, Slot, SlotState};

use std::path::PathBuf;
use std::time::Duration;

/// Control messages from the producer to the writer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterSignal {
    /// Last slot has been handed off; drain and close
    Finished,
    /// Abort and discard the partial file
    Cancelled,
}

/// Outcome of a completed transfer
#[derive(Debug, Clone)]
pub struct UploadReport {
    pub path: PathBuf,
    pub bytes_ok: u64,
    pub bytes_failed: u64,
    /// Length of every drained slot, in order
    pub chunk_lengths: Vec<usize>,
    pub elapsed: Duration,
}

impl UploadReport {
    pub fn total_bytes(&self) -> u64 {
        self.bytes_ok + self.bytes_failed
    }

    pub fn chunks(&self) -> usize {
        self.chunk_lengths.len()
    }

    /// Throughput in bytes per millisecond (~KB/s)
    pub fn throughput(&self) -> u64 {
        let millis = self.elapsed.as_millis().max(1) as u64;
        self.total_bytes() / millis
    }
}
