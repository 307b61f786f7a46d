//! Full-duplex audio transport.
//!
//! # Contract
//!
//! A transport opens a 16 kHz mono f32 stream and calls its [`ChunkHandler`]
//! exactly once per `CHUNK_LEN` captured samples. The handler returns the
//! chunk to play next; the transport must start playing it within one chunk
//! duration or the device underruns. A handler error aborts the stream.
//!
//! The handler runs on the transport's audio thread. It may take the
//! session lock but must do only `O(CHUNK_LEN)` work under it.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms, so [`duplex::CpalTransport`]
//! creates and drops its streams on a dedicated thread and only exposes
//! `Send` handles.

pub mod device;
pub mod duplex;

use std::sync::Arc;

use crate::{
    buffering::chunk::AudioChunk,
    config::CHUNK_LEN,
    error::{EcholessError, Result},
};

pub use duplex::CpalTransport;

/// Device timing for one callback, in seconds on a common clock.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CallbackTiming {
    /// When the first input sample of this chunk hit the ADC.
    pub input_adc_time: Option<f64>,
    /// When the first output sample returned by this callback will hit the DAC.
    pub output_dac_time: Option<f64>,
}

impl CallbackTiming {
    /// Round trip between capture and playback, when both ends are known.
    pub fn delay_secs(&self) -> Option<f64> {
        match (self.input_adc_time, self.output_dac_time) {
            (Some(input), Some(output)) => Some(output - input),
            _ => None,
        }
    }
}

/// Non-fatal stream conditions reported alongside a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallbackStatus {
    /// Captured samples were dropped before this chunk.
    pub input_overflow: bool,
    /// The output ran dry since the previous chunk.
    pub output_underflow: bool,
}

impl CallbackStatus {
    pub fn is_clean(&self) -> bool {
        !self.input_overflow && !self.output_underflow
    }
}

/// Everything the transport hands to the handler for one chunk.
#[derive(Debug, Clone, Copy)]
pub struct CallbackInput<'a> {
    /// Captured samples; `None` when the transport had no input buffer.
    pub samples: Option<&'a [f32]>,
    /// Frame count the transport claims to deliver.
    pub frame_count: usize,
    pub timing: Option<CallbackTiming>,
    pub status: CallbackStatus,
}

impl<'a> CallbackInput<'a> {
    /// A clean chunk with no timing information.
    pub fn new(samples: &'a [f32]) -> Self {
        Self {
            samples: Some(samples),
            frame_count: samples.len(),
            timing: None,
            status: CallbackStatus::default(),
        }
    }

    pub fn with_timing(mut self, timing: CallbackTiming) -> Self {
        self.timing = Some(timing);
        self
    }

    pub fn with_status(mut self, status: CallbackStatus) -> Self {
        self.status = status;
        self
    }

    /// Check the transport kept its side of the contract and return the samples.
    ///
    /// # Errors
    /// `InvalidFrameCount` or `MissingInput`.
    pub fn validated_samples(&self) -> Result<&'a [f32]> {
        if self.frame_count != CHUNK_LEN {
            return Err(EcholessError::InvalidFrameCount {
                expected: CHUNK_LEN,
                actual: self.frame_count,
            });
        }
        let samples = self.samples.ok_or(EcholessError::MissingInput)?;
        if samples.len() != CHUNK_LEN {
            return Err(EcholessError::InvalidFrameCount {
                expected: CHUNK_LEN,
                actual: samples.len(),
            });
        }
        Ok(samples)
    }
}

/// Decode a native-endian f32 payload from a byte-oriented transport.
///
/// # Errors
/// `MalformedInput` unless the payload is exactly `CHUNK_LEN × 4` bytes.
pub fn samples_from_bytes(bytes: &[u8]) -> Result<Vec<f32>> {
    let expected_bytes = CHUNK_LEN * std::mem::size_of::<f32>();
    if bytes.len() != expected_bytes {
        return Err(EcholessError::MalformedInput {
            expected_bytes,
            actual_bytes: bytes.len(),
        });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Encode samples as a native-endian f32 payload.
pub fn samples_to_bytes(samples: &[f32]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
}

/// Receives one captured chunk per callback and returns the chunk to play.
pub trait ChunkHandler: Send + Sync + 'static {
    /// # Errors
    /// Any error aborts the stream.
    fn on_chunk(&self, input: CallbackInput<'_>) -> Result<AudioChunk>;
}

/// A full-duplex audio stream driving a [`ChunkHandler`].
pub trait AudioTransport: Send {
    /// Open the stream and start calling `handler`.
    fn open(&mut self, handler: Arc<dyn ChunkHandler>) -> Result<()>;

    /// Stop the stream and release the device. After this returns no further
    /// callbacks run.
    fn close(&mut self) -> Result<()>;

    /// Callbacks are being delivered.
    fn is_active(&self) -> bool;

    /// The stream was opened and has since stopped (closed or aborted).
    fn is_stopped(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_needs_both_timestamps() {
        let timing = CallbackTiming {
            input_adc_time: Some(1.0),
            output_dac_time: Some(1.25),
        };
        assert_eq!(timing.delay_secs(), Some(0.25));
        assert_eq!(CallbackTiming::default().delay_secs(), None);
        let half = CallbackTiming {
            input_adc_time: Some(1.0),
            output_dac_time: None,
        };
        assert_eq!(half.delay_secs(), None);
    }

    #[test]
    fn validation_rejects_broken_chunks() {
        let samples = vec![0.0f32; CHUNK_LEN];
        assert!(CallbackInput::new(&samples).validated_samples().is_ok());

        let short = vec![0.0f32; CHUNK_LEN - 1];
        assert!(matches!(
            CallbackInput::new(&short).validated_samples(),
            Err(EcholessError::InvalidFrameCount { actual, .. }) if actual == CHUNK_LEN - 1
        ));

        let missing = CallbackInput {
            samples: None,
            frame_count: CHUNK_LEN,
            timing: None,
            status: CallbackStatus::default(),
        };
        assert!(matches!(
            missing.validated_samples(),
            Err(EcholessError::MissingInput)
        ));
    }

    #[test]
    fn byte_payload_must_be_one_chunk() {
        let samples: Vec<f32> = (0..CHUNK_LEN).map(|i| i as f32 * 1e-4).collect();
        let bytes = samples_to_bytes(&samples);
        assert_eq!(samples_from_bytes(&bytes).unwrap(), samples);

        let err = samples_from_bytes(&bytes[..bytes.len() - 2]).unwrap_err();
        assert!(matches!(
            err,
            EcholessError::MalformedInput { expected_bytes, actual_bytes }
                if expected_bytes == CHUNK_LEN * 4 && actual_bytes == CHUNK_LEN * 4 - 2
        ));
        assert!(err.is_transport_fatal());
    }
}
