//! The per-chunk audio callback.
//!
//! ## Steps (per chunk)
//!
//! ```text
//! 1. Validate frame count and input presence (abort on failure)
//! 2. Update the delay estimate from device timing, if it changed
//! 3. Log the captured chunk (recording log + rolling history)
//! 4. Fill one output chunk from the playback queue, silence-padded
//! 5. Log the output chunk (echo log + rolling history)
//! 6. Return the output chunk to the transport
//! ```
//!
//! Steps 2–5 run under the session lock and do `O(CHUNK_LEN)` work.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::Shared;
use crate::{
    audio::{CallbackInput, ChunkHandler},
    buffering::chunk::AudioChunk,
    config::CHUNK_LEN,
    error::Result,
    events::SessionStatus,
};

/// [`ChunkHandler`] bound to one session. Cheap to clone.
#[derive(Clone)]
pub struct SessionCallback {
    pub(super) shared: Arc<Shared>,
}

impl ChunkHandler for SessionCallback {
    fn on_chunk(&self, input: CallbackInput<'_>) -> Result<AudioChunk> {
        let samples = match input.validated_samples() {
            Ok(samples) => samples,
            Err(e) => {
                error!("rejecting audio callback: {e}");
                self.shared
                    .set_status(SessionStatus::Aborted, Some(e.to_string()));
                return Err(e);
            }
        };

        if !input.status.is_clean() {
            warn!(
                input_overflow = input.status.input_overflow,
                output_underflow = input.status.output_underflow,
                "audio stream status"
            );
        }

        let recorded = AudioChunk::from_slice(samples);
        let mut out = vec![0.0f32; CHUNK_LEN];

        let (played, delay_change) = {
            let mut state = self.shared.state.lock();

            let delay_change = input
                .timing
                .and_then(|t| t.delay_secs())
                .filter(|&secs| state.delay.update(secs))
                .map(|_| state.delay);

            state.rec_history.append(samples);
            state.recording_log.push(recorded);

            let written = state.playback.fill(&mut out);
            state.playback_run = if written > 0 {
                state.playback_run + written
            } else {
                0
            };

            let played = AudioChunk::new(out);
            state.echo_history.append(&played);
            state.echo_log.push(played.clone());
            (played, delay_change)
        };

        if let Some(delay) = delay_change {
            info!(
                delay_samples = delay.samples,
                delay_secs = delay.secs,
                "device round-trip delay changed"
            );
            self.shared.emit_delay(delay);
        } else {
            debug!("audio chunk processed");
        }

        Ok(played)
    }
}
