//! Alignment search: find the delay and gain at which the played-back signal
//! best explains the recording, then subtract it.
//!
//! ## Algorithm
//!
//! 1. `bound = len(echo) - len(raw)`; the echo reference must cover the raw
//!    recording at every candidate offset.
//! 2. Centre the search on `bound - delay`, the offset predicted by the
//!    device-reported round trip.
//! 3. Optionally rescale the echo to the recording's mean amplitude.
//! 4. Skip everything when cancellation is off or nothing audible was played.
//! 5. Smooth the echo with a 3-tap moving average.
//! 6. Pick the offset within `±radius` of the centre minimising the L1 norm
//!    of `raw - echo[offset..]`.
//! 7. Refine a gain in `0.5..=1.5` at that offset.
//!
//! Cost is `O(radius × len(raw))` per call.

use tracing::debug;

use super::{l1_norm, moving_average, residual_l1, signal_average, subtract_scaled, FilterOutput};
use crate::config::{
    SessionConfig, ACTIVITY_THRESHOLD, GAIN_MAX, GAIN_MIN, GAIN_STEP, SMOOTHING_WINDOW,
};
use crate::error::{EcholessError, Result};

/// Offset/gain search parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignmentSearch {
    /// When `false` the recording passes through untouched.
    pub enabled: bool,
    /// Rescale the echo reference to the recording's loudness first.
    pub normalize_loudness: bool,
    /// Half-width of the offset search window, in samples.
    pub radius: usize,
}

impl Default for AlignmentSearch {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

impl AlignmentSearch {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            enabled: config.echo_cancel,
            normalize_loudness: config.normalize_loudness,
            radius: config.search_radius,
        }
    }

    /// Remove the best-matching window of `echo_ref` from `raw`.
    ///
    /// `delay_samples` is the current round-trip estimate; it only positions
    /// the search window.
    ///
    /// # Errors
    /// `EchoReferenceTooShort` if `echo_ref` is shorter than `raw`. That can
    /// only happen through broken log bookkeeping.
    pub fn apply(&self, raw: &[f32], echo_ref: &[f32], delay_samples: i64) -> Result<FilterOutput> {
        let raw_len = raw.len();
        let bound = echo_ref
            .len()
            .checked_sub(raw_len)
            .ok_or(EcholessError::EchoReferenceTooShort {
                echo_len: echo_ref.len(),
                raw_len,
            })?;
        let center = center_offset(bound, delay_samples);

        let echo_avg = signal_average(echo_ref);
        let (echo, scaled_avg) = if self.normalize_loudness && echo_avg > ACTIVITY_THRESHOLD {
            let ratio = signal_average(raw) / echo_avg;
            let scaled: Vec<f32> = echo_ref.iter().map(|s| s * ratio).collect();
            let avg = signal_average(&scaled);
            (scaled, avg)
        } else {
            (echo_ref.to_vec(), echo_avg)
        };

        if !self.enabled || scaled_avg <= ACTIVITY_THRESHOLD {
            return Ok(FilterOutput {
                filtered: raw.to_vec(),
                echo: echo[center..center + raw_len].to_vec(),
                offset: center,
                gain: 1.0,
                residual_l1: l1_norm(raw),
                searched: false,
            });
        }

        let smoothed = moving_average(&echo, SMOOTHING_WINDOW);

        let lo = center.saturating_sub(self.radius);
        let hi = bound.min(center.saturating_add(self.radius));
        let mut best_offset = lo;
        let mut best_l1 = f32::MAX;
        for offset in lo..=hi {
            let l1 = residual_l1(raw, &smoothed[offset..offset + raw_len], 1.0);
            if l1 < best_l1 {
                best_l1 = l1;
                best_offset = offset;
            }
        }

        // Unit gain already scored `best_l1`; keep it unless a scan step beats it.
        let mask = &smoothed[best_offset..best_offset + raw_len];
        let mut best_gain = 1.0f32;
        for gain in gain_steps() {
            let l1 = residual_l1(raw, mask, gain);
            if l1 < best_l1 {
                best_l1 = l1;
                best_gain = gain;
            }
        }

        debug!(
            offset = best_offset,
            gain = best_gain,
            residual_l1 = best_l1,
            "alignment search finished"
        );

        Ok(FilterOutput {
            filtered: subtract_scaled(raw, mask, best_gain),
            echo: echo[best_offset..best_offset + raw_len]
                .iter()
                .map(|s| s * best_gain)
                .collect(),
            offset: best_offset,
            gain: best_gain,
            residual_l1: best_l1,
            searched: true,
        })
    }
}

/// Best-guess alignment of the echo reference, clamped to `[0, bound]`.
pub fn center_offset(bound: usize, delay_samples: i64) -> usize {
    let center = (bound as i64).saturating_sub(delay_samples);
    center.clamp(0, bound as i64) as usize
}

/// `GAIN_MIN, GAIN_MIN + GAIN_STEP, ..., GAIN_MAX`, computed by index so
/// float accumulation never drops the last step.
fn gain_steps() -> impl Iterator<Item = f32> {
    let steps = ((GAIN_MAX - GAIN_MIN) / GAIN_STEP).round() as usize;
    (0..=steps).map(|k| GAIN_MIN + GAIN_STEP * k as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f32::consts::PI;

    fn sine(len: usize, freq: f32, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|n| amplitude * (2.0 * PI * freq * n as f32 / 16_000.0).sin())
            .collect()
    }

    /// Linear sweep from 200 Hz to 600 Hz. Unlike a pure tone it never lines
    /// up with a shifted copy of itself.
    fn chirp(len: usize, amplitude: f32) -> Vec<f32> {
        let duration = len as f64 / 16_000.0;
        let rate = 400.0 / duration;
        (0..len)
            .map(|n| {
                let t = n as f64 / 16_000.0;
                let phase = 2.0 * std::f64::consts::PI * (200.0 * t + 0.5 * rate * t * t);
                amplitude * phase.sin() as f32
            })
            .collect()
    }

    fn search(enabled: bool, normalize_loudness: bool) -> AlignmentSearch {
        AlignmentSearch {
            enabled,
            normalize_loudness,
            radius: 1000,
        }
    }

    #[test]
    fn gain_steps_cover_both_ends() {
        let steps: Vec<f32> = gain_steps().collect();
        assert_eq!(steps.len(), 11);
        assert_abs_diff_eq!(steps[0], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(steps[10], 1.5, epsilon = 1e-6);
    }

    #[test]
    fn center_offset_is_clamped() {
        assert_eq!(center_offset(100, 0), 100);
        assert_eq!(center_offset(100, 30), 70);
        assert_eq!(center_offset(100, 500), 0);
        assert_eq!(center_offset(100, -20), 100);
        assert_eq!(center_offset(10, i64::MIN), 10);
        assert_eq!(center_offset(10, i64::MAX), 0);
    }

    #[test]
    fn unbounded_radius_searches_whole_reference() {
        let echo = chirp(1200, 0.5);
        let raw: Vec<f32> = echo[150..950].to_vec();
        let wide = AlignmentSearch {
            enabled: true,
            normalize_loudness: false,
            radius: usize::MAX,
        };
        let out = wide.apply(&raw, &echo, 0).unwrap();
        assert!(out.searched);
        assert!((out.offset as i64 - 150).abs() <= 1, "offset={}", out.offset);
    }

    #[test]
    fn short_echo_reference_is_rejected() {
        let err = search(true, true)
            .apply(&[0.1; 10], &[0.1; 9], 0)
            .unwrap_err();
        assert!(matches!(
            err,
            EcholessError::EchoReferenceTooShort {
                echo_len: 9,
                raw_len: 10
            }
        ));
    }

    #[test]
    fn disabled_passes_raw_through() {
        let raw = sine(800, 233.0, 0.4);
        let echo = sine(1200, 233.0, 0.5);
        let out = search(false, true).apply(&raw, &echo, 0).unwrap();
        assert_eq!(out.filtered, raw);
        assert!(!out.searched);
        assert_eq!(out.offset, 400);
        assert_eq!(out.echo.len(), raw.len());
    }

    #[test]
    fn silent_echo_passes_raw_through() {
        let raw = sine(800, 233.0, 0.4);
        let echo = vec![0.0005; 1200];
        let out = search(true, true).apply(&raw, &echo, 100).unwrap();
        assert_eq!(out.filtered, raw);
        assert!(!out.searched);
        assert_eq!(out.offset, 300);
        assert_eq!(out.echo, vec![0.0005; 800]);
    }

    #[test]
    fn recovers_delay_and_gain_without_normalization() {
        let raw_len = 3200;
        let delay = 1200;
        let echo = chirp(raw_len + 1500, 0.5);

        for gain in [0.8f32, 1.3] {
            let raw: Vec<f32> = echo[delay..delay + raw_len].iter().map(|s| s * gain).collect();
            let out = search(true, false).apply(&raw, &echo, 0).unwrap();

            assert!(out.searched);
            assert!(
                (out.offset as i64 - delay as i64).abs() <= 1,
                "offset={} expected={delay}",
                out.offset
            );
            assert!((out.gain - gain).abs() <= 0.1 + 1e-4, "gain={} expected={gain}", out.gain);
            assert!(out.residual_l1 < l1_norm(&raw));
            assert_abs_diff_eq!(out.residual_l1, l1_norm(&out.filtered), epsilon = 1e-2);
        }
    }

    #[test]
    fn normalization_absorbs_loudness_mismatch() {
        let raw_len = 3200;
        let delay = 900;
        let echo = chirp(raw_len + 1500, 0.5);
        let raw: Vec<f32> = echo[delay..delay + raw_len].iter().map(|s| s * 0.3).collect();

        // Device delay of 300 samples centres the search on 1200.
        let out = search(true, true).apply(&raw, &echo, 300).unwrap();
        assert!((out.offset as i64 - delay as i64).abs() <= 1);
        assert!((out.gain - 1.0).abs() <= 0.1 + 1e-4, "gain={}", out.gain);
        assert!(out.residual_l1 < 0.1 * l1_norm(&raw));
    }

    #[test]
    fn exact_match_keeps_unit_gain() {
        let echo = sine(2000, 311.0, 0.5);
        let smoothed = moving_average(&echo, SMOOTHING_WINDOW);
        let raw = smoothed[600..1600].to_vec();
        let out = search(true, false).apply(&raw, &echo, 400).unwrap();
        assert_eq!(out.offset, 600);
        assert_eq!(out.gain, 1.0);
        assert_abs_diff_eq!(out.residual_l1, 0.0, epsilon = 1e-4);
    }

    #[test]
    fn silent_recording_over_constant_echo() {
        let raw = [0.0f32; 5];
        let echo = [1.0f32; 7];

        // Normalization scales the echo to the silent recording: nothing to cancel.
        let out = search(true, true).apply(&raw, &echo, 0).unwrap();
        assert_eq!(out.filtered, raw.to_vec());
        assert!(!out.searched);

        // Without it the gain scan bottoms out at its 0.5 floor.
        // Offsets 0 and 2 tie; either way the smoothed edge lands on one end.
        let out = search(true, false).apply(&raw, &echo, 0).unwrap();
        assert!(out.searched);
        assert!(out.offset == 0 || out.offset == 2, "offset={}", out.offset);
        assert_abs_diff_eq!(out.gain, 0.5, epsilon = 1e-6);
        let edge = if out.offset == 0 { 0 } else { 4 };
        for (i, sample) in out.filtered.iter().enumerate() {
            let expected = if i == edge { -1.0 / 3.0 } else { -0.5 };
            assert_abs_diff_eq!(*sample, expected, epsilon = 1e-6);
        }
        for sample in &out.echo {
            assert_abs_diff_eq!(*sample, 0.5, epsilon = 1e-6);
        }
    }
}
