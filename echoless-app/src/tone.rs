//! Test-tone synthesis.
//!
//! One `CHUNK_LEN` burst of sine, faded in and out with the two halves of a
//! Hann window, tiled to the requested duration. The fades keep the chunk
//! boundaries click-free.

use std::f32::consts::PI;

use echoless_core::config::{CHUNK_LEN, SAMPLE_RATE};

/// Fade length at each end of the burst.
const FADE_LEN: usize = CHUNK_LEN / 5;

/// Symmetric Hann window of `len` points (both endpoints zero).
pub fn hann(len: usize) -> Vec<f32> {
    match len {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => {
            let denom = (len - 1) as f32;
            (0..len)
                .map(|n| 0.5 - 0.5 * (2.0 * PI * n as f32 / denom).cos())
                .collect()
        }
    }
}

/// `duration_secs` of faded sine bursts at `freq_hz`, peak amplitude `volume`.
pub fn tone(freq_hz: f32, duration_secs: f32, volume: f32) -> Vec<f32> {
    let mut burst: Vec<f32> = (0..CHUNK_LEN)
        .map(|n| volume * (2.0 * PI * freq_hz * n as f32 / SAMPLE_RATE as f32).sin())
        .collect();

    let window = hann(FADE_LEN * 2);
    let (fade_in, fade_out) = window.split_at(FADE_LEN);
    for (sample, w) in burst[..FADE_LEN].iter_mut().zip(fade_in) {
        *sample *= w;
    }
    for (sample, w) in burst[CHUNK_LEN - FADE_LEN..].iter_mut().zip(fade_out) {
        *sample *= w;
    }

    let total = (SAMPLE_RATE as f32 * duration_secs.max(0.0)) as usize;
    burst.iter().copied().cycle().take(total).collect()
}
