//! cpal-backed full-duplex transport.
//!
//! cpal has no duplex stream, so this opens one input and one output stream:
//!
//! ```text
//! input callback ─► accumulate CHUNK_LEN ─► ChunkHandler::on_chunk ─► output ring ─► output callback
//! ```
//!
//! Timing is reported relative to the input callback that completed the
//! chunk: the ADC time is negative (capture latency plus the chunk length),
//! the DAC time positive (samples already queued for output plus the output
//! stream's own latency).

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

#[cfg(feature = "audio-cpal")]
use std::thread::JoinHandle;

#[cfg(feature = "audio-cpal")]
use crossbeam_channel::{bounded, Sender};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

use super::{AudioTransport, ChunkHandler};
use crate::error::{EcholessError, Result};

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig, SupportedStreamConfigRange,
};

#[cfg(feature = "audio-cpal")]
use super::{
    device::{is_loopback_like_name, select_device, Direction},
    CallbackInput, CallbackStatus, CallbackTiming,
};
#[cfg(feature = "audio-cpal")]
use crate::{
    buffering::{create_output_ring, Consumer, Observer, Producer},
    config::{CHUNK_LEN, CHUNK_SECS, SAMPLE_RATE},
};

/// Lifecycle flags shared between the handle, the stream thread and the callbacks.
#[derive(Debug, Default)]
struct TransportFlags {
    active: AtomicBool,
    stopped: AtomicBool,
    aborted: AtomicBool,
}

#[cfg(feature = "audio-cpal")]
struct Worker {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Full-duplex transport over the host's default (or preferred) devices.
pub struct CpalTransport {
    input_device: Option<String>,
    output_device: Option<String>,
    flags: Arc<TransportFlags>,
    #[cfg(feature = "audio-cpal")]
    worker: Option<Worker>,
}

impl CpalTransport {
    /// Use the named devices, or the host defaults for `None`.
    pub fn new(input_device: Option<String>, output_device: Option<String>) -> Self {
        Self {
            input_device,
            output_device,
            flags: Arc::new(TransportFlags::default()),
            #[cfg(feature = "audio-cpal")]
            worker: None,
        }
    }

    /// `true` if a handler error tore the stream down.
    pub fn is_aborted(&self) -> bool {
        self.flags.aborted.load(Ordering::Acquire)
    }
}

impl Default for CpalTransport {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[cfg(feature = "audio-cpal")]
impl AudioTransport for CpalTransport {
    fn open(&mut self, handler: Arc<dyn ChunkHandler>) -> Result<()> {
        if self.worker.is_some() {
            if self.is_active() {
                return Err(EcholessError::AlreadyRunning);
            }
            // Reap the thread left behind by an aborted stream.
            self.close()?;
        }

        self.flags.stopped.store(false, Ordering::SeqCst);
        self.flags.aborted.store(false, Ordering::SeqCst);

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (open_tx, open_rx) = bounded::<Result<()>>(1);
        let flags = Arc::clone(&self.flags);
        let abort_tx = stop_tx.clone();
        let input_device = self.input_device.clone();
        let output_device = self.output_device.clone();

        let handle = std::thread::Builder::new()
            .name("echoless-audio".into())
            .spawn(move || {
                // Streams are !Send: build, run and drop them on this thread.
                let streams = match open_streams(
                    input_device.as_deref(),
                    output_device.as_deref(),
                    handler,
                    Arc::clone(&flags),
                    abort_tx,
                ) {
                    Ok(streams) => {
                        flags.active.store(true, Ordering::SeqCst);
                        let _ = open_tx.send(Ok(()));
                        streams
                    }
                    Err(e) => {
                        flags.stopped.store(true, Ordering::SeqCst);
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };

                // Returns on close() or on a callback abort.
                let _ = stop_rx.recv();
                flags.active.store(false, Ordering::SeqCst);
                drop(streams);
                flags.stopped.store(true, Ordering::SeqCst);
                info!("audio streams closed");
            })
            .map_err(EcholessError::Io)?;

        match open_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some(Worker { stop_tx, handle });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(EcholessError::Other(anyhow::anyhow!(
                    "audio thread died before opening the device"
                )))
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        let worker = self.worker.take().ok_or(EcholessError::NotRunning)?;
        // A full channel means an abort already requested the stop.
        let _ = worker.stop_tx.try_send(());
        worker
            .handle
            .join()
            .map_err(|_| EcholessError::Other(anyhow::anyhow!("audio thread panicked")))?;
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.flags.active.load(Ordering::Acquire)
    }

    fn is_stopped(&self) -> bool {
        self.flags.stopped.load(Ordering::Acquire)
    }
}

#[cfg(feature = "audio-cpal")]
impl Drop for CpalTransport {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.close();
        }
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl AudioTransport for CpalTransport {
    fn open(&mut self, _handler: Arc<dyn ChunkHandler>) -> Result<()> {
        Err(EcholessError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    fn close(&mut self) -> Result<()> {
        Err(EcholessError::NotRunning)
    }

    fn is_active(&self) -> bool {
        self.flags.active.load(Ordering::Acquire)
    }

    fn is_stopped(&self) -> bool {
        self.flags.stopped.load(Ordering::Acquire)
    }
}

/// Pick an f32 configuration at the session rate, preferring fewer channels.
#[cfg(feature = "audio-cpal")]
fn pick_config(ranges: impl Iterator<Item = SupportedStreamConfigRange>) -> Option<StreamConfig> {
    ranges
        .filter(|r| {
            r.sample_format() == SampleFormat::F32
                && r.min_sample_rate().0 <= SAMPLE_RATE
                && r.max_sample_rate().0 >= SAMPLE_RATE
        })
        .min_by_key(|r| r.channels())
        .map(|r| r.with_sample_rate(SampleRate(SAMPLE_RATE)).config())
}

#[cfg(feature = "audio-cpal")]
fn store_secs(cell: &AtomicU64, secs: f64) {
    cell.store(secs.to_bits(), Ordering::Relaxed);
}

#[cfg(feature = "audio-cpal")]
fn load_secs(cell: &AtomicU64) -> f64 {
    f64::from_bits(cell.load(Ordering::Relaxed))
}

#[cfg(feature = "audio-cpal")]
fn open_streams(
    input_pref: Option<&str>,
    output_pref: Option<&str>,
    handler: Arc<dyn ChunkHandler>,
    flags: Arc<TransportFlags>,
    abort_tx: Sender<()>,
) -> Result<(Stream, Stream)> {
    let host = cpal::default_host();
    let input = select_device(&host, Direction::Input, input_pref)?;
    let output = select_device(&host, Direction::Output, output_pref)?;

    let input_name = input.name().unwrap_or_default();
    let output_name = output.name().unwrap_or_default();
    info!(
        input = input_name.as_str(),
        output = output_name.as_str(),
        "opening duplex audio devices"
    );
    if is_loopback_like_name(&input_name) {
        warn!(
            "input device '{}' looks like a loopback capture; the echo will be captured digitally",
            input_name
        );
    }

    let input_config = input
        .supported_input_configs()
        .map_err(|e| EcholessError::AudioDevice(e.to_string()))
        .map(pick_config)?
        .ok_or_else(|| {
            EcholessError::AudioStream(format!(
                "input device '{input_name}' does not support f32 at {SAMPLE_RATE} Hz"
            ))
        })?;
    let output_config = output
        .supported_output_configs()
        .map_err(|e| EcholessError::AudioDevice(e.to_string()))
        .map(pick_config)?
        .ok_or_else(|| {
            EcholessError::AudioStream(format!(
                "output device '{output_name}' does not support f32 at {SAMPLE_RATE} Hz"
            ))
        })?;

    info!(
        sample_rate = SAMPLE_RATE,
        input_channels = input_config.channels,
        output_channels = output_config.channels,
        "audio config selected"
    );

    let (mut producer, mut consumer) = create_output_ring();
    let output_latency = Arc::new(AtomicU64::new(0f64.to_bits()));
    let output_underflow = Arc::new(AtomicBool::new(false));

    // ── Output: drain the ring, pad with silence, fan out to every channel ──
    let out_ch = output_config.channels as usize;
    let latency_out = Arc::clone(&output_latency);
    let underflow_out = Arc::clone(&output_underflow);
    let mut mono_out: Vec<f32> = Vec::new();
    let mut primed = false;
    let output_stream = output
        .build_output_stream(
            &output_config,
            move |data: &mut [f32], info: &cpal::OutputCallbackInfo| {
                let frames = data.len() / out_ch;
                mono_out.resize(frames, 0.0);
                let n = consumer.pop_slice(&mut mono_out);
                if n < frames {
                    mono_out[n..].fill(0.0);
                    if primed {
                        underflow_out.store(true, Ordering::Relaxed);
                    }
                }
                primed |= n > 0;
                for (frame, sample) in data.chunks_exact_mut(out_ch).zip(&mono_out) {
                    frame.fill(*sample);
                }

                let ts = info.timestamp();
                if let Some(latency) = ts.playback.duration_since(&ts.callback) {
                    store_secs(&latency_out, latency.as_secs_f64());
                }
            },
            |err| error!("output stream error: {err}"),
            None,
        )
        .map_err(|e| EcholessError::AudioStream(e.to_string()))?;

    // ── Input: mix down, accumulate one chunk, run the handler ──
    let in_ch = input_config.channels as usize;
    let latency_in = Arc::clone(&output_latency);
    let underflow_in = Arc::clone(&output_underflow);
    let flags_in = Arc::clone(&flags);
    let mut pending: Vec<f32> = Vec::with_capacity(CHUNK_LEN);
    let input_stream = input
        .build_input_stream(
            &input_config,
            move |data: &[f32], info: &cpal::InputCallbackInfo| {
                if flags_in.aborted.load(Ordering::Relaxed) {
                    return;
                }
                let ts = info.timestamp();
                let capture_latency = ts
                    .callback
                    .duration_since(&ts.capture)
                    .map(|d| d.as_secs_f64())
                    .unwrap_or(0.0);

                for frame in data.chunks_exact(in_ch) {
                    pending.push(frame.iter().sum::<f32>() / in_ch as f32);
                    if pending.len() < CHUNK_LEN {
                        continue;
                    }

                    let queued = producer.occupied_len() as f64 / SAMPLE_RATE as f64;
                    let timing = CallbackTiming {
                        input_adc_time: Some(-(capture_latency + CHUNK_SECS as f64)),
                        output_dac_time: Some(queued + load_secs(&latency_in)),
                    };
                    let status = CallbackStatus {
                        input_overflow: false,
                        output_underflow: underflow_in.swap(false, Ordering::Relaxed),
                    };
                    let input = CallbackInput::new(&pending)
                        .with_timing(timing)
                        .with_status(status);

                    match handler.on_chunk(input) {
                        Ok(chunk) => {
                            let written = producer.push_slice(&chunk);
                            if written < chunk.len() {
                                warn!(
                                    "output ring full: dropped {} samples",
                                    chunk.len() - written
                                );
                            }
                        }
                        Err(e) => {
                            error!("aborting audio stream: {e}");
                            flags_in.aborted.store(true, Ordering::SeqCst);
                            flags_in.active.store(false, Ordering::SeqCst);
                            let _ = abort_tx.try_send(());
                            return;
                        }
                    }
                    pending.clear();
                }
            },
            |err| error!("input stream error: {err}"),
            None,
        )
        .map_err(|e| EcholessError::AudioStream(e.to_string()))?;

    output_stream
        .play()
        .map_err(|e| EcholessError::AudioStream(e.to_string()))?;
    input_stream
        .play()
        .map_err(|e| EcholessError::AudioStream(e.to_string()))?;

    Ok((input_stream, output_stream))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_transport_is_idle() {
        let transport = CpalTransport::default();
        assert!(!transport.is_active());
        assert!(!transport.is_stopped());
        assert!(!transport.is_aborted());
    }

    #[test]
    fn close_without_open_is_an_error() {
        let mut transport = CpalTransport::new(Some("nope".into()), None);
        assert!(matches!(transport.close(), Err(EcholessError::NotRunning)));
    }
}
