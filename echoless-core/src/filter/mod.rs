//! Echo cancellation filters.
//!
//! Both filters turn `(raw recording, echo reference)` into
//! `(residual, matched echo estimate)`:
//!
//! - [`search::AlignmentSearch`]: bounded brute-force search over delay and
//!   gain. Used by the real-time drain path.
//! - [`lms::LmsFilter`]: single-pass adaptive filter. Slower to converge,
//!   sensitive to loudness mismatch, no search.

pub mod lms;
pub mod search;

pub use lms::{lms_filter, LmsFilter};
pub use search::AlignmentSearch;

use crate::config::ACTIVITY_THRESHOLD;

/// Result of one filter pass over a drained recording.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterOutput {
    /// Recording with the matched echo removed.
    pub filtered: Vec<f32>,
    /// The echo estimate that was subtracted (same length as `filtered`).
    pub echo: Vec<f32>,
    /// Offset into the echo reference the estimate was taken from.
    pub offset: usize,
    /// Gain applied to the echo estimate.
    pub gain: f32,
    /// L1 norm of `filtered`.
    pub residual_l1: f32,
    /// `false` when the filter passed the recording through untouched.
    pub searched: bool,
}

/// Mean absolute amplitude over samples at or above [`ACTIVITY_THRESHOLD`].
///
/// Returns `0.0` when no sample is loud enough.
pub fn signal_average(signal: &[f32]) -> f32 {
    let (sum, count) = signal
        .iter()
        .map(|s| s.abs())
        .filter(|a| *a >= ACTIVITY_THRESHOLD)
        .fold((0.0f64, 0usize), |(sum, count), a| (sum + a as f64, count + 1));
    if count == 0 {
        0.0
    } else {
        (sum / count as f64) as f32
    }
}

/// Centered moving average of width `window`, zero-padded at both ends so
/// the output has the same length as the input.
pub fn moving_average(signal: &[f32], window: usize) -> Vec<f32> {
    if window <= 1 || signal.is_empty() {
        return signal.to_vec();
    }
    let n = signal.len();
    let before = (window - 1) / 2;
    let scale = 1.0 / window as f32;
    (0..n)
        .map(|i| {
            let start = i.saturating_sub(before);
            let end = (i + window - before).min(n);
            signal[start..end].iter().sum::<f32>() * scale
        })
        .collect()
}

/// Sum of absolute values of `raw - echo * gain`.
pub fn residual_l1(raw: &[f32], echo: &[f32], gain: f32) -> f32 {
    raw.iter()
        .zip(echo)
        .map(|(r, e)| (r - e * gain).abs())
        .sum()
}

/// `raw - echo * gain`, element-wise.
pub fn subtract_scaled(raw: &[f32], echo: &[f32], gain: f32) -> Vec<f32> {
    raw.iter().zip(echo).map(|(r, e)| r - e * gain).collect()
}

pub fn l1_norm(signal: &[f32]) -> f32 {
    signal.iter().map(|s| s.abs()).sum()
}
