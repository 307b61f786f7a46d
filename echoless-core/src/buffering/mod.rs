//! Sample buffers shared by the callback and the drain path.
//!
//! - [`SlidingBuffer`]: fixed-capacity rolling window of the newest samples.
//! - [`playback::PlaybackQueue`]: FIFO of chunks waiting to be played.
//! - [`OutputProducer`] / [`OutputConsumer`]: lock-free SPSC ring carrying
//!   finished output chunks to the device's output stream.

pub mod chunk;
pub mod playback;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Producer half of the output ring, held by the capture side.
pub type OutputProducer = ringbuf::HeapProd<f32>;

/// Consumer half of the output ring, held by the output stream callback.
pub type OutputConsumer = ringbuf::HeapCons<f32>;

/// Output ring capacity: four chunks, enough to absorb scheduling jitter
/// between the capture and playback callbacks without adding much latency.
pub const OUTPUT_RING_CAPACITY: usize = crate::config::CHUNK_LEN * 4;

/// Create a matched producer/consumer pair for the output ring.
pub fn create_output_ring() -> (OutputProducer, OutputConsumer) {
    HeapRb::<f32>::new(OUTPUT_RING_CAPACITY).split()
}

/// Fixed-capacity buffer that always holds the most recent `capacity` samples.
///
/// Newest samples sit at the tail. The length never changes.
#[derive(Debug, Clone, PartialEq)]
pub struct SlidingBuffer {
    data: Vec<f32>,
}

impl SlidingBuffer {
    /// A buffer of `capacity` zeros.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0.0; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Append `chunk`, discarding the oldest samples.
    ///
    /// A chunk at least as long as the buffer replaces the whole contents
    /// with its trailing `capacity` samples.
    pub fn append(&mut self, chunk: &[f32]) {
        let cap = self.data.len();
        let n = chunk.len();
        if n >= cap {
            self.data.copy_from_slice(&chunk[n - cap..]);
            return;
        }
        self.data.copy_within(n.., 0);
        self.data[cap - n..].copy_from_slice(chunk);
    }
}
