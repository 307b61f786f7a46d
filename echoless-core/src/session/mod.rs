//! `EchoSession`: full-duplex recorder with echo cancellation.
//!
//! ## Lifecycle
//!
//! ```text
//! EchoSession::new()
//!     └─► start()   → transport open, callbacks flowing, status = Running
//!         └─► stop() → transport closed, status = Stopped
//! ```
//!
//! ## Threading
//!
//! Two threads touch a session: the transport's audio thread, which runs
//! [`SessionCallback`] once per chunk, and the caller, which enqueues
//! playback and polls [`EchoSession::drain_audio`]. Both share one lock over
//! [`state::SessionState`]. The transport handle sits behind its own lock so
//! `stop()` can wait for an in-flight callback without deadlocking on it.

pub mod callback;
pub mod drain;
pub mod state;

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::info;

pub use callback::SessionCallback;
pub use drain::FilterResult;
pub use state::DelayEstimate;

use crate::{
    audio::{AudioTransport, CpalTransport},
    buffering::chunk::AudioChunk,
    config::{FilterMode, SessionConfig},
    error::{EcholessError, Result},
    events::{DelayChangedEvent, FilterReportEvent, SessionStatus, SessionStatusEvent},
    filter::LmsFilter,
};
use state::SessionState;

/// Broadcast channel capacity: events buffered for slow subscribers.
const BROADCAST_CAP: usize = 64;

/// Everything the callback and the drain path share.
pub(crate) struct Shared {
    state: Mutex<SessionState>,
    /// Runtime-tunable settings; read once per drain.
    settings: RwLock<SessionConfig>,
    /// Only the drain path touches the LMS weights.
    lms: Mutex<LmsFilter>,
    status: Mutex<SessionStatus>,
    seq: AtomicU64,
    delay_tx: broadcast::Sender<DelayChangedEvent>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    report_tx: broadcast::Sender<FilterReportEvent>,
}

impl Shared {
    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn set_status(&self, status: SessionStatus, detail: Option<String>) {
        *self.status.lock() = status;
        let _ = self.status_tx.send(SessionStatusEvent { status, detail });
    }

    fn emit_delay(&self, delay: DelayEstimate) {
        let _ = self.delay_tx.send(DelayChangedEvent {
            seq: self.next_seq(),
            delay_samples: delay.samples,
            delay_secs: delay.secs,
        });
    }

    fn emit_report(&self, report: FilterReportEvent) {
        let _ = self.report_tx.send(report);
    }
}

/// The session handle. `Send + Sync`; wrap in `Arc` to share.
pub struct EchoSession {
    shared: Arc<Shared>,
    transport: Mutex<Box<dyn AudioTransport>>,
}

impl EchoSession {
    /// A session on the cpal transport, using the configured devices.
    ///
    /// # Errors
    /// `InvalidConfig` if the configuration fails validation.
    pub fn new(config: SessionConfig) -> Result<Self> {
        let transport = CpalTransport::new(config.input_device.clone(), config.output_device.clone());
        Self::with_transport(config, Box::new(transport))
    }

    /// A session on a caller-supplied transport.
    pub fn with_transport(config: SessionConfig, transport: Box<dyn AudioTransport>) -> Result<Self> {
        config.validate()?;
        let lms = LmsFilter::from_config(&config)?;
        let (delay_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (report_tx, _) = broadcast::channel(BROADCAST_CAP);

        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SessionState::new()),
                settings: RwLock::new(config),
                lms: Mutex::new(lms),
                status: Mutex::new(SessionStatus::Idle),
                seq: AtomicU64::new(0),
                delay_tx,
                status_tx,
                report_tx,
            }),
            transport: Mutex::new(transport),
        })
    }

    /// Open the transport with this session's callback bound to it.
    ///
    /// # Errors
    /// `AlreadyRunning` if the transport is active, or whatever the
    /// transport reports while opening the device.
    pub fn start(&self) -> Result<()> {
        let mut transport = self.transport.lock();
        if transport.is_active() {
            return Err(EcholessError::AlreadyRunning);
        }
        self.shared.lms.lock().reset();
        if let Err(e) = transport.open(Arc::new(self.callback_handler())) {
            self.shared
                .set_status(SessionStatus::Aborted, Some(e.to_string()));
            return Err(e);
        }
        self.shared.set_status(SessionStatus::Running, None);
        info!("echo session started");
        Ok(())
    }

    /// Stop and release the transport. Safe while a callback is in flight.
    ///
    /// A session the callback already aborted stays `Aborted`.
    ///
    /// # Errors
    /// `NotRunning` if the transport was never opened.
    pub fn stop(&self) -> Result<()> {
        self.transport.lock().close()?;
        if self.status() != SessionStatus::Aborted {
            self.shared.set_status(SessionStatus::Stopped, None);
        }
        info!("echo session stopped");
        Ok(())
    }

    /// The callback a transport should invoke once per chunk.
    pub fn callback_handler(&self) -> SessionCallback {
        SessionCallback {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Queue samples for playback. Callable from any thread at any time.
    pub fn enqueue_for_playback(&self, samples: &[f32]) {
        self.shared
            .state
            .lock()
            .playback
            .push(AudioChunk::from_slice(samples));
    }

    /// Number of queued playback buffers, counting the one being played.
    pub fn is_playing(&self) -> usize {
        self.shared.state.lock().playback.len()
    }

    /// Transport is delivering callbacks.
    pub fn is_active(&self) -> bool {
        self.transport.lock().is_active()
    }

    /// Transport was opened and has since stopped.
    pub fn is_stopped(&self) -> bool {
        self.transport.lock().is_stopped()
    }

    pub fn status(&self) -> SessionStatus {
        *self.shared.status.lock()
    }

    pub fn delay_estimate(&self) -> DelayEstimate {
        self.shared.state.lock().delay
    }

    /// Copies of the rolling capture and playback history, oldest first.
    pub fn rolling_history(&self) -> (Vec<f32>, Vec<f32>) {
        let state = self.shared.state.lock();
        (
            state.rec_history.as_slice().to_vec(),
            state.echo_history.as_slice().to_vec(),
        )
    }

    /// `(recorded, echo)` chunk counts currently held in the logs.
    pub fn buffered_chunks(&self) -> (usize, usize) {
        let state = self.shared.state.lock();
        (state.recording_log.len(), state.echo_log.len())
    }

    /// Samples of uninterrupted non-silent output so far.
    pub fn playback_run_samples(&self) -> usize {
        self.shared.state.lock().playback_run
    }

    /// Snapshot of the current settings.
    pub fn config(&self) -> SessionConfig {
        self.shared.settings.read().clone()
    }

    pub fn set_echo_cancel(&self, enabled: bool) {
        self.shared.settings.write().echo_cancel = enabled;
    }

    /// Values outside (0, 10] are stored but leave the recording unscaled.
    pub fn set_recording_boost(&self, boost: f32) {
        self.shared.settings.write().recording_boost = boost;
    }

    pub fn set_filter_mode(&self, mode: FilterMode) {
        self.shared.settings.write().filter_mode = mode;
    }

    /// Subscribe to device delay changes.
    pub fn subscribe_delay(&self) -> broadcast::Receiver<DelayChangedEvent> {
        self.shared.delay_tx.subscribe()
    }

    /// Subscribe to lifecycle changes.
    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.shared.status_tx.subscribe()
    }

    /// Subscribe to per-drain filter reports.
    pub fn subscribe_filter_reports(&self) -> broadcast::Receiver<FilterReportEvent> {
        self.shared.report_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{CallbackInput, CallbackTiming, ChunkHandler},
        config::{CHUNK_LEN, HISTORY_LEN, RETAINED_ECHO_CHUNKS},
    };

    /// Transport that never opens a device; tests drive the callback directly.
    #[derive(Default)]
    struct NullTransport {
        open: bool,
        closed: bool,
    }

    impl AudioTransport for NullTransport {
        fn open(&mut self, _handler: Arc<dyn crate::audio::ChunkHandler>) -> Result<()> {
            self.open = true;
            self.closed = false;
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            if !self.open {
                return Err(EcholessError::NotRunning);
            }
            self.open = false;
            self.closed = true;
            Ok(())
        }

        fn is_active(&self) -> bool {
            self.open
        }

        fn is_stopped(&self) -> bool {
            self.closed
        }
    }

    fn session(config: SessionConfig) -> EchoSession {
        EchoSession::with_transport(config, Box::<NullTransport>::default()).unwrap()
    }

    fn ramp(start: f32) -> Vec<f32> {
        (0..CHUNK_LEN).map(|i| start + i as f32 * 1e-5).collect()
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = SessionConfig {
            lms_filter_order: 0,
            ..SessionConfig::default()
        };
        assert!(EchoSession::with_transport(config, Box::<NullTransport>::default()).is_err());
    }

    #[test]
    fn lifecycle_tracks_transport() {
        let session = session(SessionConfig::default());
        let mut status_rx = session.subscribe_status();
        assert_eq!(session.status(), SessionStatus::Idle);
        assert!(matches!(session.stop(), Err(EcholessError::NotRunning)));

        session.start().unwrap();
        assert!(session.is_active());
        assert!(matches!(session.start(), Err(EcholessError::AlreadyRunning)));
        assert_eq!(status_rx.try_recv().unwrap().status, SessionStatus::Running);

        session.stop().unwrap();
        assert!(!session.is_active());
        assert!(session.is_stopped());
        assert_eq!(session.status(), SessionStatus::Stopped);
    }

    #[test]
    fn callback_plays_queue_then_silence() {
        let session = session(SessionConfig::default());
        let handler = session.callback_handler();
        let tone = vec![0.25f32; CHUNK_LEN + CHUNK_LEN / 2];
        session.enqueue_for_playback(&tone);
        session.enqueue_for_playback(&[0.5; 10]);
        assert_eq!(session.is_playing(), 2);

        let input = ramp(0.0);
        let first = handler.on_chunk(CallbackInput::new(&input)).unwrap();
        assert!(first.iter().all(|&s| s == 0.25));
        assert_eq!(session.is_playing(), 2);
        assert_eq!(session.playback_run_samples(), CHUNK_LEN);

        let second = handler.on_chunk(CallbackInput::new(&input)).unwrap();
        assert!(second[..CHUNK_LEN / 2].iter().all(|&s| s == 0.25));
        assert!(second[CHUNK_LEN / 2..CHUNK_LEN / 2 + 10].iter().all(|&s| s == 0.5));
        assert!(second[CHUNK_LEN / 2 + 10..].iter().all(|&s| s == 0.0));
        assert_eq!(session.is_playing(), 0);
        assert_eq!(session.playback_run_samples(), CHUNK_LEN + CHUNK_LEN / 2 + 10);

        let third = handler.on_chunk(CallbackInput::new(&input)).unwrap();
        assert!(third.iter().all(|&s| s == 0.0));
        assert_eq!(session.playback_run_samples(), 0);

        // Two silent seed chunks plus one per callback.
        assert_eq!(session.buffered_chunks(), (3, 5));
    }

    #[test]
    fn callback_rejects_wrong_length_and_aborts() {
        let session = session(SessionConfig::default());
        let handler = session.callback_handler();
        let short = vec![0.0f32; CHUNK_LEN / 2];
        let err = handler.on_chunk(CallbackInput::new(&short)).unwrap_err();
        assert!(err.is_transport_fatal());
        assert_eq!(session.status(), SessionStatus::Aborted);
        assert_eq!(session.buffered_chunks(), (0, 2));
    }

    #[test]
    fn stop_after_abort_keeps_aborted() {
        let session = session(SessionConfig::default());
        session.start().unwrap();
        let handler = session.callback_handler();
        assert!(handler.on_chunk(CallbackInput::new(&[0.0; 10])).is_err());

        let mut status_rx = session.subscribe_status();
        session.stop().unwrap();
        assert_eq!(session.status(), SessionStatus::Aborted);
        assert!(status_rx.try_recv().is_err());

        session.start().unwrap();
        assert_eq!(session.status(), SessionStatus::Running);
    }

    #[test]
    fn delay_event_fires_only_on_change() {
        let session = session(SessionConfig::default());
        let handler = session.callback_handler();
        let mut delay_rx = session.subscribe_delay();
        let input = ramp(0.0);
        let timing = CallbackTiming {
            input_adc_time: Some(10.0),
            output_dac_time: Some(10.25),
        };

        handler
            .on_chunk(CallbackInput::new(&input).with_timing(timing))
            .unwrap();
        handler
            .on_chunk(CallbackInput::new(&input).with_timing(timing))
            .unwrap();
        handler.on_chunk(CallbackInput::new(&input)).unwrap();

        let event = delay_rx.try_recv().unwrap();
        assert_eq!(event.delay_samples, 4000);
        assert!(delay_rx.try_recv().is_err());
        assert_eq!(session.delay_estimate().samples, 4000);
        assert_eq!(session.delay_estimate().secs, 0.25);
    }

    #[test]
    fn rolling_history_holds_newest_samples() {
        let session = session(SessionConfig::default());
        let handler = session.callback_handler();
        session.enqueue_for_playback(&[0.75; CHUNK_LEN]);
        let input = ramp(0.1);
        handler.on_chunk(CallbackInput::new(&input)).unwrap();

        let (rec, echo) = session.rolling_history();
        assert_eq!(rec.len(), HISTORY_LEN);
        assert_eq!(echo.len(), HISTORY_LEN);
        assert_eq!(&rec[HISTORY_LEN - CHUNK_LEN..], input.as_slice());
        assert!(echo[HISTORY_LEN - CHUNK_LEN..].iter().all(|&s| s == 0.75));
        assert!(echo[..HISTORY_LEN - CHUNK_LEN].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn drain_needs_enough_chunks() {
        let session = session(SessionConfig::default());
        let handler = session.callback_handler();
        let input = ramp(0.0);
        for _ in 0..RETAINED_ECHO_CHUNKS - 1 {
            handler.on_chunk(CallbackInput::new(&input)).unwrap();
        }
        assert!(session.drain_audio().unwrap().is_empty());
        assert_eq!(session.buffered_chunks(), (RETAINED_ECHO_CHUNKS - 1, RETAINED_ECHO_CHUNKS + 1));

        handler.on_chunk(CallbackInput::new(&input)).unwrap();
        let result = session.drain_audio().unwrap();
        assert_eq!(result.len(), RETAINED_ECHO_CHUNKS * CHUNK_LEN);
        assert_eq!(result.filtered.len(), result.raw.len());
        assert_eq!(result.echo.len(), result.raw.len());
        assert_eq!(session.buffered_chunks(), (0, RETAINED_ECHO_CHUNKS));
    }

    #[test]
    fn boost_scales_raw_exactly() {
        for (boost, scale) in [(1.0f32, 1.0f32), (2.5, 2.5), (10.0, 10.0), (0.0, 1.0), (12.0, 1.0)] {
            let session = session(SessionConfig {
                recording_boost: boost,
                echo_cancel: false,
                ..SessionConfig::default()
            });
            let handler = session.callback_handler();
            let input = ramp(0.01);
            for _ in 0..RETAINED_ECHO_CHUNKS {
                handler.on_chunk(CallbackInput::new(&input)).unwrap();
            }
            let result = session.drain_audio().unwrap();
            for (i, sample) in result.raw.iter().enumerate() {
                assert_eq!(*sample, input[i % CHUNK_LEN] * scale, "boost={boost}");
            }
            assert_eq!(result.filtered, result.raw);
        }
    }

    #[test]
    fn runtime_settings_apply_to_next_drain() {
        let session = session(SessionConfig::default());
        let mut reports = session.subscribe_filter_reports();
        session.set_filter_mode(FilterMode::Lms);
        session.set_recording_boost(1.0);
        assert_eq!(session.config().filter_mode, FilterMode::Lms);

        let handler = session.callback_handler();
        session.enqueue_for_playback(&vec![0.3; CHUNK_LEN * RETAINED_ECHO_CHUNKS]);
        let input = ramp(0.0);
        for _ in 0..RETAINED_ECHO_CHUNKS {
            handler.on_chunk(CallbackInput::new(&input)).unwrap();
        }
        let result = session.drain_audio().unwrap();
        assert_eq!(result.len(), RETAINED_ECHO_CHUNKS * CHUNK_LEN);

        let report = reports.try_recv().unwrap();
        assert_eq!(report.mode, FilterMode::Lms);
        assert_eq!(report.raw_len, result.len());
        assert!(report.searched);
    }
}
