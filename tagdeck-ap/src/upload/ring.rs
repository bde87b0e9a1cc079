//! Transfer ring: a fixed number of equally sized byte slots
//!
//! Slots are plain owned values. Whoever holds a `Slot` is the only party
//! that can touch its bytes; the pipeline moves them between the producer
//! and the storage writer over channels.

use crate::config::UploadConfig;
use crate::error::{Error, Result};
use tracing::{debug, warn};

/// Source of slot memory
///
/// Allocation must be fallible: a `None` triggers the halving retry instead of
/// aborting the process.
pub trait BufferAllocator: Send + Sync {
    fn allocate(&self, size: usize) -> Option<Vec<u8>>;
}

/// Heap allocation through `Vec::try_reserve_exact`
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl BufferAllocator for HeapAllocator {
    fn allocate(&self, size: usize) -> Option<Vec<u8>> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(size).ok()?;
        Some(buf)
    }
}

/// Ownership state of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Free, waiting for the producer
    Empty,
    /// Held by the producer, partially filled
    Filling,
    /// Handed to the writer, not yet drained
    Full,
    /// Being written to storage
    Draining,
}

/// One transfer buffer
#[derive(Debug)]
pub struct Slot {
    index: usize,
    capacity: usize,
    buf: Vec<u8>,
    state: SlotState,
}

impl Slot {
    fn new(index: usize, capacity: usize, buf: Vec<u8>) -> Self {
        Self {
            index,
            capacity,
            buf,
            state: SlotState::Empty,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: SlotState) {
        self.state = state;
    }

    /// Bytes currently held
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.buf.len() == self.capacity
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.buf.len()
    }

    pub fn data(&self) -> &[u8] {
        &self.buf
    }

    /// Copy as much of `data` as fits; returns the number of bytes taken
    pub fn fill_from(&mut self, data: &[u8]) -> usize {
        let take = data.len().min(self.remaining());
        // Capacity was reserved up front, so this never reallocates
        self.buf.extend_from_slice(&data[..take]);
        self.state = SlotState::Filling;
        take
    }

    /// Clear contents and mark free
    pub fn reset(&mut self) {
        self.buf.clear();
        self.state = SlotState::Empty;
    }
}

/// The allocated slots and the chunk size they were allocated with
#[derive(Debug)]
pub struct Ring {
    pub chunk_size: usize,
    pub slots: Vec<Slot>,
}

/// Allocate `buffer_count` slots of `start_chunk_size` bytes
///
/// When any slot fails to allocate, everything allocated so far is released
/// and the chunk size is halved. At most `retry_count` attempts are made, and
/// a chunk size below `min_chunk_size` ends the search immediately.
pub fn allocate_ring(config: &UploadConfig, allocator: &dyn BufferAllocator) -> Result<Ring> {
    let mut chunk_size = config.start_chunk_size;
    let mut retries = config.retry_count;

    while retries > 0 {
        if chunk_size < config.min_chunk_size {
            break;
        }

        let mut slots = Vec::with_capacity(config.buffer_count);
        for index in 0..config.buffer_count {
            match allocator.allocate(chunk_size) {
                Some(buf) => slots.push(Slot::new(index, chunk_size, buf)),
                None => break,
            }
        }

        if slots.len() == config.buffer_count {
            debug!(
                "Allocated {} transfer buffers of {} bytes",
                config.buffer_count, chunk_size
            );
            return Ok(Ring { chunk_size, slots });
        }

        warn!(
            "Transfer buffer allocation of {} bytes failed, retrying smaller",
            chunk_size
        );
        drop(slots);
        chunk_size /= 2;
        retries -= 1;
    }

    Err(Error::BufferAllocation { chunk_size })
}
