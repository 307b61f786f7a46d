//! # echoless-core
//!
//! Full-duplex recorder that cancels its own playback out of the capture.
//!
//! ## Architecture
//!
//! ```text
//! enqueue_for_playback ─► PlaybackQueue ─┐
//!                                        │
//! Microphone ─► AudioTransport ─► SessionCallback ─► output chunk ─► Speaker
//!                                   │        │
//!                           recording log   echo log
//!                                   │        │
//!                                   └─ drain_audio ─► AlignmentSearch | LmsFilter
//!                                                          │
//!                                         FilterResult { filtered, raw, echo }
//! ```
//!
//! The callback only moves chunks under a short lock. All filtering happens
//! on the caller's thread inside `drain_audio`.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod config;
pub mod error;
pub mod events;
pub mod filter;
pub mod session;

// Convenience re-exports for downstream crates
pub use audio::{
    device::DeviceInfo, AudioTransport, CallbackInput, CallbackStatus, CallbackTiming,
    ChunkHandler, CpalTransport,
};
pub use buffering::chunk::AudioChunk;
pub use config::{FilterMode, SessionConfig};
pub use error::EcholessError;
pub use events::{DelayChangedEvent, FilterReportEvent, SessionStatus, SessionStatusEvent};
pub use filter::{lms_filter, AlignmentSearch, LmsFilter};
pub use session::{DelayEstimate, EchoSession, FilterResult, SessionCallback};
