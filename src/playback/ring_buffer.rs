//! Lock-free SPSC sample ring buffer
//!
//! The only channel between the decoder worker (producer) and the realtime
//! output callback (consumer). No mutex is ever taken on either side:
//! coordination happens purely through atomic read/write indices with
//! acquire/release ordering, so the consumer observes only fully committed
//! writes. Capacity is fixed at construction; nothing allocates afterwards.
//!
//! Overflow policy: the producer receives a partial write count and
//! retries/yields, never overwriting unread data. Underflow policy: the
//! consumer zero-fills the missing span and bumps a dropout counter, never
//! blocking the callback.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tracing::warn;

/// Fixed-capacity lock-free single-producer single-consumer ring of f32
/// samples.
pub struct SampleRing {
    /// Sample storage, allocated once
    buffer: Box<[UnsafeCell<f32>]>,

    /// Monotonic write index (only advanced by the producer)
    write_pos: AtomicUsize,

    /// Monotonic read index (only advanced by the consumer)
    read_pos: AtomicUsize,

    /// Power-of-two capacity
    capacity: usize,

    /// capacity - 1, for index masking
    mask: usize,

    /// Underruns observed while output was expected
    dropouts: AtomicU64,

    /// Whether audio output is currently expected. Underruns while paused
    /// or idle are normal and do not count as dropouts.
    armed: AtomicBool,
}

impl SampleRing {
    /// Create a ring with the given capacity in samples.
    ///
    /// # Panics
    /// If `capacity` is not a power of two (required for index masking).
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two(),
            "ring capacity must be a power of two"
        );

        let buffer = (0..capacity)
            .map(|_| UnsafeCell::new(0.0f32))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            buffer,
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
            capacity,
            mask: capacity - 1,
            dropouts: AtomicU64::new(0),
            armed: AtomicBool::new(false),
        }
    }

    /// Write samples from the producer side.
    ///
    /// Returns the number of samples actually written; the caller retries
    /// (after yielding) with the remainder when the buffer is full, so no
    /// data is ever lost.
    pub fn write(&self, data: &[f32]) -> usize {
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Acquire);

        // One slot stays empty to distinguish full from empty
        let used = write.wrapping_sub(read);
        let available = self.capacity - 1 - used;
        let to_write = data.len().min(available);

        if to_write == 0 {
            return 0;
        }

        for (i, &sample) in data[..to_write].iter().enumerate() {
            let idx = (write.wrapping_add(i)) & self.mask;
            // Safety: only one producer exists, and it is the sole writer of
            // slots in [write, write + to_write); the consumer will not read
            // them until write_pos is published below.
            unsafe { *self.buffer[idx].get() = sample };
        }

        // Release publishes the sample data before the new index
        self.write_pos
            .store(write.wrapping_add(to_write), Ordering::Release);

        to_write
    }

    /// Read samples from the consumer side without ever blocking.
    ///
    /// Fills as much of `out` as is available, zero-fills the rest, and
    /// returns the number of real samples delivered. A shortfall while the
    /// ring is armed increments the dropout counter.
    pub fn read_or_silence(&self, out: &mut [f32]) -> usize {
        let read = self.read_pos.load(Ordering::Relaxed);
        let write = self.write_pos.load(Ordering::Acquire);

        let available = write.wrapping_sub(read);
        let to_read = out.len().min(available);

        for (i, slot) in out[..to_read].iter_mut().enumerate() {
            let idx = (read.wrapping_add(i)) & self.mask;
            // Safety: only one consumer exists; slots in [read, write) were
            // published by the Release store in write().
            *slot = unsafe { *self.buffer[idx].get() };
        }

        if to_read > 0 {
            self.read_pos
                .store(read.wrapping_add(to_read), Ordering::Release);
        }

        if to_read < out.len() {
            out[to_read..].fill(0.0);

            if self.armed.load(Ordering::Relaxed) {
                let count = self.dropouts.fetch_add(1, Ordering::Relaxed) + 1;
                // Rate-limited: log every 100th dropout to keep the
                // callback path cheap
                if count % 100 == 1 {
                    warn!("Ring buffer underrun, emitting silence (total: {})", count);
                }
            }
        }

        to_read
    }

    /// Samples available to read.
    pub fn len(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Relaxed);
        write.wrapping_sub(read)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Samples the producer could write right now.
    pub fn available_write(&self) -> usize {
        self.capacity - 1 - self.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current fill level as a fraction of capacity.
    pub fn fill_pct(&self) -> f32 {
        self.len() as f32 / self.capacity as f32
    }

    /// Total dropouts since construction (monotonic).
    pub fn dropouts(&self) -> u64 {
        self.dropouts.load(Ordering::Relaxed)
    }

    /// Mark whether audio output is currently expected. Controls dropout
    /// accounting only.
    pub fn set_armed(&self, armed: bool) {
        self.armed.store(armed, Ordering::Release);
    }

    /// Reset both indices, discarding buffered samples.
    ///
    /// Not safe against a concurrently running consumer: the engine only
    /// calls this while the output stream is paused or closed (stop/seek).
    pub fn clear(&self) {
        self.read_pos.store(0, Ordering::SeqCst);
        self.write_pos.store(0, Ordering::SeqCst);
    }
}

// Safety: slot contents are only touched through the index protocol above;
// write_pos is only advanced by the single producer, read_pos only by the
// single consumer, and acquire/release pairs order data against indices.
unsafe impl Send for SampleRing {}
unsafe impl Sync for SampleRing {}
