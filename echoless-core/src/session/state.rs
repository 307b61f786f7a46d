//! The mutable state shared by the audio callback and the drain path.
//!
//! Every field lives behind the single session lock. Both sides hold it only
//! long enough to move chunks in or out; filtering happens after release.

use crate::{
    buffering::{chunk::AudioChunk, playback::PlaybackQueue, SlidingBuffer},
    config::{ALIGNMENT_CHUNKS, HISTORY_LEN, RETAINED_ECHO_CHUNKS, SAMPLE_RATE},
};

/// Capture-to-playback round trip reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DelayEstimate {
    /// Whole samples, truncated toward zero.
    pub samples: i64,
    pub secs: f64,
}

impl DelayEstimate {
    pub fn from_secs(secs: f64) -> Self {
        Self {
            samples: (secs * SAMPLE_RATE as f64) as i64,
            secs,
        }
    }

    /// Store `secs` if it differs from the current estimate. Returns `true`
    /// when the estimate changed.
    pub fn update(&mut self, secs: f64) -> bool {
        let next = Self::from_secs(secs);
        if next.secs != self.secs || next.samples != self.samples {
            *self = next;
            true
        } else {
            false
        }
    }
}

#[derive(Debug)]
pub(crate) struct SessionState {
    pub playback: PlaybackQueue,
    /// Chunks captured since the last drain.
    pub recording_log: Vec<AudioChunk>,
    /// Chunks written to the output, one per callback, silence included.
    pub echo_log: Vec<AudioChunk>,
    pub rec_history: SlidingBuffer,
    pub echo_history: SlidingBuffer,
    pub delay: DelayEstimate,
    /// Samples of uninterrupted non-silent output; reset by a silent callback.
    pub playback_run: usize,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            playback: PlaybackQueue::new(),
            recording_log: Vec::new(),
            echo_log: vec![AudioChunk::silence(); ALIGNMENT_CHUNKS],
            rec_history: SlidingBuffer::new(HISTORY_LEN),
            echo_history: SlidingBuffer::new(HISTORY_LEN),
            delay: DelayEstimate::default(),
            playback_run: 0,
        }
    }

    /// Hand over the recording log and a copy of the echo log, keeping the
    /// echo tail as context for the next drain.
    ///
    /// Returns `None`, touching nothing, until enough chunks are buffered.
    pub fn take_for_drain(&mut self) -> Option<(Vec<AudioChunk>, Vec<AudioChunk>)> {
        if self.recording_log.len() < RETAINED_ECHO_CHUNKS {
            return None;
        }
        let recorded = std::mem::take(&mut self.recording_log);
        let echo = self.echo_log.clone();
        let cut = self.echo_log.len().saturating_sub(RETAINED_ECHO_CHUNKS);
        self.echo_log.drain(..cut);
        Some((recorded, echo))
    }
}
