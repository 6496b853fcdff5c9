//! Lock-free sample queue for one device channel
//!
//! This implements a single-producer single-consumer (SPSC) ring of `f32`
//! samples. The ring holds `capacity + 1` slots and always keeps one of them
//! empty, so `write_index == read_index` means empty and
//! `write_index + 1 == read_index` means full.
//!
//! Each index is owned by one side. The owner publishes it with a release
//! store after the sample copy completes; the other side reads it with an
//! acquire load before computing free space or available data.
//!
//! Samples are stored as `AtomicU32` bit patterns with relaxed ordering, so a
//! caller breaking the single-producer/single-consumer contract gets garbled
//! audio rather than a data race.

use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

/// Fixed-capacity SPSC queue of audio samples
pub struct SampleQueue {
    /// Ring storage, `capacity + 1` slots
    slots: Box<[AtomicU32]>,
    /// Next slot the producer writes, owned by the producer
    write_index: CachePadded<AtomicUsize>,
    /// Next slot the consumer reads, owned by the consumer
    read_index: CachePadded<AtomicUsize>,
}

impl SampleQueue {
    /// Create a queue able to hold `capacity` samples
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity + 1)
            .map(|_| AtomicU32::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            write_index: CachePadded::new(AtomicUsize::new(0)),
            read_index: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Number of samples the queue can hold
    pub fn capacity(&self) -> usize {
        self.slots.len() - 1
    }

    /// Write as many of `samples` as fit. Producer side only.
    ///
    /// Returns the number of samples written, which is less than
    /// `samples.len()` when the queue fills up. Never blocks.
    pub fn write(&self, samples: &[f32]) -> usize {
        let write = self.write_index.load(Ordering::Relaxed);
        let read = self.read_index.load(Ordering::Acquire);

        let count = samples.len().min(self.free_space(write, read));
        if count == 0 {
            return 0;
        }

        let storage = self.slots.len();
        let first = count.min(storage - write);
        store_segment(&self.slots[write..write + first], &samples[..first]);
        store_segment(&self.slots[..count - first], &samples[first..count]);

        self.write_index
            .store((write + count) % storage, Ordering::Release);
        count
    }

    /// Read up to `out.len()` samples. Consumer side only.
    ///
    /// Returns the number of samples read; the rest of `out` is untouched.
    pub fn read(&self, out: &mut [f32]) -> usize {
        let read = self.read_index.load(Ordering::Relaxed);
        let write = self.write_index.load(Ordering::Acquire);

        let count = out.len().min(self.used_space(write, read));
        if count == 0 {
            return 0;
        }

        let storage = self.slots.len();
        let first = count.min(storage - read);
        load_segment(&self.slots[read..read + first], &mut out[..first]);
        load_segment(&self.slots[..count - first], &mut out[first..count]);

        self.read_index
            .store((read + count) % storage, Ordering::Release);
        count
    }

    /// Samples ready to be read. Consumer side query.
    pub fn available(&self) -> usize {
        let read = self.read_index.load(Ordering::Relaxed);
        let write = self.write_index.load(Ordering::Acquire);
        self.used_space(write, read)
    }

    /// Samples that can be written without loss. Producer side query.
    pub fn available_for_write(&self) -> usize {
        let write = self.write_index.load(Ordering::Relaxed);
        let read = self.read_index.load(Ordering::Acquire);
        self.free_space(write, read)
    }

    /// Check if the queue holds no samples
    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    /// Fill level as a fraction of capacity
    pub fn fill_level(&self) -> f32 {
        if self.capacity() == 0 {
            return 0.0;
        }
        self.available() as f32 / self.capacity() as f32
    }

    /// Drop all queued samples.
    ///
    /// Must not be called while a producer or consumer is active.
    pub fn reset(&self) {
        self.write_index.store(0, Ordering::Release);
        self.read_index.store(0, Ordering::Release);
    }

    fn used_space(&self, write: usize, read: usize) -> usize {
        if write >= read {
            write - read
        } else {
            self.slots.len() - read + write
        }
    }

    fn free_space(&self, write: usize, read: usize) -> usize {
        self.capacity() - self.used_space(write, read)
    }
}

impl std::fmt::Debug for SampleQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleQueue")
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .finish()
    }
}

#[inline]
fn store_segment(slots: &[AtomicU32], samples: &[f32]) {
    for (slot, sample) in slots.iter().zip(samples) {
        slot.store(sample.to_bits(), Ordering::Relaxed);
    }
}

#[inline]
fn load_segment(slots: &[AtomicU32], out: &mut [f32]) {
    for (slot, sample) in slots.iter().zip(out.iter_mut()) {
        *sample = f32::from_bits(slot.load(Ordering::Relaxed));
    }
}

/// Thread-safe handle to a sample queue
pub type SharedSampleQueue = Arc<SampleQueue>;

/// Create a new shared sample queue
pub fn create_shared_queue(capacity: usize) -> SharedSampleQueue {
    Arc::new(SampleQueue::new(capacity))
}
