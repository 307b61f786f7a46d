//! WAV file I/O and sample-rate conversion for playback files.
//!
//! Files are read with `hound`, mixed down to mono, and converted to the
//! session rate with a rubato `FastFixedIn` resampler. Results are written
//! back as 16-bit PCM.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use echoless_core::config::SAMPLE_RATE;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::info;

/// Input frames per rubato call.
const RESAMPLE_CHUNK: usize = 1024;

/// Read a WAV file as mono f32 in `[-1, 1]`. Returns the samples and the
/// file's sample rate.
pub fn read_wav_mono_f32(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader =
        hound::WavReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            if spec.bits_per_sample <= 16 {
                reader
                    .samples::<i16>()
                    .map(|s| s.map(|v| v as f32 / 32768.0))
                    .collect::<Result<Vec<_>, _>>()?
            } else {
                let max = (1_i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / max))
                    .collect::<Result<Vec<_>, _>>()?
            }
        }
    };

    if channels == 1 {
        return Ok((interleaved, spec.sample_rate));
    }
    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();
    Ok((mono, spec.sample_rate))
}

/// Convert mono `samples` from `from_rate` to `to_rate`.
///
/// The output length is `len × to_rate / from_rate`, rounded. Equal rates
/// return the input unchanged.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let mut resampler =
        FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, RESAMPLE_CHUNK, 1)
            .context("resampler init")?;
    let mut output_buf = vec![vec![0f32; resampler.output_frames_max()]; 1];
    let expected = (samples.len() as f64 * ratio).round() as usize;

    let mut out = Vec::with_capacity(expected + RESAMPLE_CHUNK);
    let mut block = vec![0f32; RESAMPLE_CHUNK];
    // Zero blocks past the end flush the resampler's internal delay.
    let mut pos = 0;
    while out.len() < expected {
        block.fill(0.0);
        if pos < samples.len() {
            let take = (samples.len() - pos).min(RESAMPLE_CHUNK);
            block[..take].copy_from_slice(&samples[pos..pos + take]);
        }
        pos += RESAMPLE_CHUNK;

        let (_consumed, produced) = resampler
            .process_into_buffer(&[block.as_slice()], &mut output_buf, None)
            .context("resampling")?;
        out.extend_from_slice(&output_buf[0][..produced]);
    }
    out.truncate(expected);
    Ok(out)
}

/// Load a playback file at the session rate.
pub fn load_playback(path: &Path) -> Result<Vec<f32>> {
    let (samples, rate) = read_wav_mono_f32(path)?;
    if rate != SAMPLE_RATE {
        info!(from = rate, to = SAMPLE_RATE, "resampling playback file");
    }
    resample(&samples, rate, SAMPLE_RATE)
}

/// Write mono f32 samples as 16-bit PCM, clipping to `[-1, 1]`.
pub fn write_wav_i16(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("creating {}", path.display()))?;
    for &sample in samples {
        writer.write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}
