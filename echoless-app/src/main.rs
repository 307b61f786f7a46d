//! Echoless command-line recorder.
//!
//! Plays a test tone or a WAV file through the default output device while
//! recording the default input device, drains the echo-cancelled recording
//! once per interval, and writes `raw.wav`, `filtered.wav` and `echo.wav`.
//!
//! `--lms-demo` runs an offline LMS simulation instead and needs no device.
//! `--save-settings` writes the effective settings, overrides applied, back
//! to the settings file and exits.

mod settings;
mod tone;
mod wav;

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use echoless_core::{
    audio::device::{list_input_devices, list_output_devices},
    config::SAMPLE_RATE,
    filter::l1_norm,
    lms_filter, EchoSession, FilterMode, FilterResult, SessionStatus,
};
use tracing::{error, info, warn};

use settings::{default_settings_path, load_settings, save_settings, AppSettings};

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    play: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    mode: Option<FilterMode>,
    boost: Option<f32>,
    no_echo_cancel: bool,
    list_devices: bool,
    lms_demo: bool,
    save_settings: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args::default();

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --config".into());
                };
                args.config = Some(PathBuf::from(v));
            }
            "--play" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --play".into());
                };
                args.play = Some(PathBuf::from(v));
            }
            "--output" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --output".into());
                };
                args.output_dir = Some(PathBuf::from(v));
            }
            "--mode" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --mode".into());
                };
                args.mode = Some(match v.as_str() {
                    "search" => FilterMode::Search,
                    "lms" => FilterMode::Lms,
                    other => return Err(format!("unknown filter mode: {other}")),
                });
            }
            "--boost" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --boost".into());
                };
                args.boost = Some(
                    v.parse::<f32>()
                        .map_err(|_| "invalid value for --boost".to_string())?,
                );
            }
            "--no-echo-cancel" => args.no_echo_cancel = true,
            "--list-devices" => args.list_devices = true,
            "--lms-demo" => args.lms_demo = true,
            "--save-settings" => args.save_settings = true,
            "--help" | "-h" => {
                println!(
                    "Usage: echoless [--config <settings.json>] [--play <file.wav>] \\
  [--output <dir>] [--mode search|lms] [--boost <k>] [--no-echo-cancel] \\
  [--save-settings]
       echoless --list-devices
       echoless --lms-demo [--output <dir>]"
                );
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(args)
}

fn main() {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("echoless=info")),
        )
        .init();

    if let Err(e) = run() {
        error!("echoless failed: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = parse_args().map_err(anyhow::Error::msg)?;

    if args.list_devices {
        return print_devices();
    }

    let settings_path = args.config.clone().unwrap_or_else(default_settings_path);
    let mut settings = load_settings(&settings_path);
    info!("settings loaded from {}", settings_path.display());
    apply_overrides(&mut settings, &args);

    if args.save_settings {
        save_settings(&settings_path, &settings)
            .with_context(|| format!("saving settings to {}", settings_path.display()))?;
        info!("settings saved to {}", settings_path.display());
        return Ok(());
    }

    if args.lms_demo {
        return lms_demo(&settings.output_dir);
    }
    record(&settings)
}

fn apply_overrides(settings: &mut AppSettings, args: &Args) {
    if let Some(path) = &args.play {
        settings.playback_file = Some(path.clone());
    }
    if let Some(dir) = &args.output_dir {
        settings.output_dir = dir.clone();
    }
    if let Some(mode) = args.mode {
        settings.session.filter_mode = mode;
    }
    if let Some(boost) = args.boost {
        settings.session.recording_boost = boost;
    }
    if args.no_echo_cancel {
        settings.session.echo_cancel = false;
    }
}

fn print_devices() -> Result<()> {
    for (label, devices) in [
        ("input", list_input_devices()),
        ("output", list_output_devices()),
    ] {
        println!("{label} devices:");
        for device in devices {
            println!(
                "  {}{}{}",
                device.name,
                if device.is_default { " (default)" } else { "" },
                if device.is_loopback_like { " [loopback]" } else { "" },
            );
        }
    }
    Ok(())
}

/// Drained segments, concatenated in order.
#[derive(Debug, Default)]
struct Recording {
    filtered: Vec<f32>,
    raw: Vec<f32>,
    echo: Vec<f32>,
}

impl Recording {
    fn extend(&mut self, segment: FilterResult) {
        self.filtered.extend(segment.filtered);
        self.raw.extend(segment.raw);
        self.echo.extend(segment.echo);
    }

    fn write(&self, dir: &Path) -> Result<()> {
        for (name, samples) in [
            ("raw.wav", &self.raw),
            ("echo.wav", &self.echo),
            ("filtered.wav", &self.filtered),
        ] {
            let path = dir.join(name);
            wav::write_wav_i16(&path, samples, SAMPLE_RATE)?;
            info!(samples = samples.len(), "wrote {}", path.display());
        }
        Ok(())
    }
}

fn record(settings: &AppSettings) -> Result<()> {
    let playback = match &settings.playback_file {
        Some(path) => wav::load_playback(path)?,
        None => tone::tone(settings.tone_hz, settings.tone_secs, settings.tone_volume),
    };
    if playback.is_empty() {
        bail!("nothing to play");
    }

    let session = EchoSession::new(settings.session.clone()).context("creating session")?;
    let mut reports = session.subscribe_filter_reports();

    session.enqueue_for_playback(&playback);
    session.start().context("starting audio")?;

    let interval = Duration::from_millis(settings.drain_interval_ms);
    let mut recording = Recording::default();
    while session.is_active() && session.is_playing() > 0 {
        recording.extend(session.drain_audio()?);
        while let Ok(report) = reports.try_recv() {
            info!(
                offset = report.offset,
                gain = report.gain,
                residual_l1 = report.residual_l1,
                samples = report.raw_len,
                "echo filtered"
            );
        }
        thread::sleep(interval);
    }

    if session.status() == SessionStatus::Aborted {
        bail!("audio stream aborted");
    }
    if session.is_active() {
        session.stop()?;
    }
    recording.extend(session.drain_audio()?);

    if recording.raw.is_empty() {
        warn!("playback finished before a full drain window was recorded");
        return Ok(());
    }
    recording.write(&settings.output_dir)
}

/// Offline LMS check: a 100 Hz tone whose microphone copy carries a
/// half-amplitude echo 100 samples late.
fn lms_demo(output_dir: &Path) -> Result<()> {
    let len = 2 * SAMPLE_RATE as usize;
    let speaker: Vec<f32> = (0..len)
        .map(|n| (2.0 * std::f32::consts::PI * 100.0 * n as f32 / SAMPLE_RATE as f32).sin())
        .collect();
    let mic: Vec<f32> = (0..len)
        .map(|n| speaker[n] + 0.5 * speaker[(n + len - 100) % len])
        .collect();

    let (_prediction, residual) = lms_filter(&mic, &speaker, 0.01, 32)?;

    let half = len / 2;
    let before = l1_norm(&mic[half..]);
    let after = l1_norm(&residual[half..]);
    info!(
        mic_l1 = before,
        residual_l1 = after,
        reduction_db = 20.0 * (before / after.max(f32::EPSILON)).log10(),
        "lms demo finished"
    );

    wav::write_wav_i16(&output_dir.join("lms_mic.wav"), &mic, SAMPLE_RATE)?;
    wav::write_wav_i16(&output_dir.join("lms_residual.wav"), &residual, SAMPLE_RATE)?;
    Ok(())
}
