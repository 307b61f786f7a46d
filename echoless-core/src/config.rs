//! Session configuration and the fixed stream constants.
//!
//! The stream format is fixed: 16 kHz mono f32, delivered in 200 ms chunks.
//! Everything tunable at runtime lives in [`SessionConfig`].

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EcholessError, Result};

/// Stream sample rate (Hz).
pub const SAMPLE_RATE: u32 = 16_000;
/// Mono only.
pub const CHANNELS: u16 = 1;
/// Duration of one transport chunk.
pub const CHUNK_SECS: f32 = 0.2;
/// Samples per transport chunk (3200 at 16 kHz / 0.2 s).
pub const CHUNK_LEN: usize = (SAMPLE_RATE as usize / 1000) * 200;
/// Whole chunks per second, in samples.
pub const BUFFER_LEN: usize = (SAMPLE_RATE as usize / CHUNK_LEN) * CHUNK_LEN;
/// Capacity of each rolling history buffer.
pub const HISTORY_LEN: usize = BUFFER_LEN * 2;

/// Alignment constant, in chunks. The echo log is seeded with this many
/// silent chunks.
pub const ALIGNMENT_CHUNKS: usize = 2;
/// Minimum recorded chunks before a drain runs, and the number of echo chunks
/// kept as context for the next drain. One constant, two uses.
pub const RETAINED_ECHO_CHUNKS: usize = ALIGNMENT_CHUNKS * 3;

/// Samples quieter than this are ignored when averaging amplitude.
pub const ACTIVITY_THRESHOLD: f32 = 0.001;
/// Moving-average window applied to the echo reference before searching.
pub const SMOOTHING_WINDOW: usize = 3;
/// Gain refinement range and step.
pub const GAIN_MIN: f32 = 0.5;
pub const GAIN_MAX: f32 = 1.5;
pub const GAIN_STEP: f32 = 0.1;
/// Boost values outside `(0, MAX_RECORDING_BOOST]` are ignored.
pub const MAX_RECORDING_BOOST: f32 = 10.0;

/// Which cancellation algorithm the drain path runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// Bounded offset + gain search.
    #[default]
    Search,
    /// Adaptive least-mean-squares filter.
    Lms,
}

/// Configuration for an `EchoSession`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct SessionConfig {
    /// Run the cancellation stage at all. When `false` the drain returns the
    /// raw recording as the filtered signal. Default: `true`.
    pub echo_cancel: bool,
    /// Gain applied to the raw recording on drain. Only effective in (0, 10].
    /// Default: `3.0`.
    pub recording_boost: f32,
    /// Rescale the echo reference to the recording's loudness before the
    /// search. Default: `true`.
    pub normalize_loudness: bool,
    /// Algorithm used by the drain path. Default: `Search`.
    pub filter_mode: FilterMode,
    /// Half-width (samples) of the offset search around the delay estimate.
    /// Default: `1000`.
    pub search_radius: usize,
    /// LMS step size. Default: `0.0001`.
    pub lms_learning_rate: f32,
    /// LMS weight count. Default: `32`.
    pub lms_filter_order: usize,
    /// Preferred capture device name. `None` uses the host default.
    pub input_device: Option<String>,
    /// Preferred playback device name. `None` uses the host default.
    pub output_device: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            echo_cancel: true,
            recording_boost: 3.0,
            normalize_loudness: true,
            filter_mode: FilterMode::Search,
            search_radius: 1000,
            lms_learning_rate: 0.0001,
            lms_filter_order: 32,
            input_device: None,
            output_device: None,
        }
    }
}

impl SessionConfig {
    /// Load a config from a JSON file. Missing keys take their defaults.
    ///
    /// # Errors
    /// `Io` if the file cannot be read, `InvalidConfig` if it does not parse
    /// or fails [`validate`](Self::validate).
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| EcholessError::InvalidConfig(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the filters cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.lms_filter_order == 0 {
            return Err(EcholessError::InvalidConfig(
                "lms_filter_order must be at least 1".into(),
            ));
        }
        if !self.lms_learning_rate.is_finite() || self.lms_learning_rate < 0.0 {
            return Err(EcholessError::InvalidConfig(format!(
                "lms_learning_rate must be a non-negative finite number, got {}",
                self.lms_learning_rate
            )));
        }
        if self.search_radius == 0 {
            return Err(EcholessError::InvalidConfig(
                "search_radius must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// The boost to apply on drain, or `None` when the configured value lies
    /// outside (0, 10] and the recording should stay unscaled.
    pub fn effective_boost(&self) -> Option<f32> {
        effective_boost(self.recording_boost)
    }
}

pub(crate) fn effective_boost(boost: f32) -> Option<f32> {
    (boost > 0.0 && boost <= MAX_RECORDING_BOOST).then_some(boost)
}
