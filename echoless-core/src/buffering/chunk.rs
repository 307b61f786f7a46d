//! Immutable chunk of mono samples exchanged between the callback and the logs.

use std::ops::Deref;
use std::sync::Arc;

use crate::config::{CHUNK_LEN, SAMPLE_RATE};

/// A contiguous block of mono f32 samples in roughly [-1.0, 1.0].
///
/// Cloning is cheap: the samples are shared, never mutated after creation.
/// The same output chunk is held by the echo log and handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    samples: Arc<[f32]>,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>) -> Self {
        Self {
            samples: samples.into(),
        }
    }

    pub fn from_slice(samples: &[f32]) -> Self {
        Self {
            samples: Arc::from(samples),
        }
    }

    /// A chunk of `CHUNK_LEN` zero samples.
    pub fn silence() -> Self {
        Self::new(vec![0.0; CHUNK_LEN])
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Duration of this chunk at the session sample rate.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / SAMPLE_RATE as f64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl Deref for AudioChunk {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.samples
    }
}

impl From<Vec<f32>> for AudioChunk {
    fn from(samples: Vec<f32>) -> Self {
        Self::new(samples)
    }
}

/// Flatten a run of chunks into one contiguous buffer.
pub fn concat_chunks(chunks: &[AudioChunk]) -> Vec<f32> {
    let total = chunks.iter().map(AudioChunk::len).sum();
    let mut out = Vec::with_capacity(total);
    for chunk in chunks {
        out.extend_from_slice(chunk);
    }
    out
}
