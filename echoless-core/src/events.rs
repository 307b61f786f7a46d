//! Events broadcast by an `EchoSession`.
//!
//! | Event | Subscribe with |
//! |-------|----------------|
//! | `DelayChangedEvent` | `EchoSession::subscribe_delay` |
//! | `SessionStatusEvent` | `EchoSession::subscribe_status` |
//! | `FilterReportEvent` | `EchoSession::subscribe_filter_reports` |
//!
//! All events serialize as camelCase JSON.

use serde::{Deserialize, Serialize};

use crate::config::FilterMode;

// ---------------------------------------------------------------------------
// Delay events
// ---------------------------------------------------------------------------

/// Emitted from the audio callback when the device-reported round trip changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayChangedEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Round trip in whole samples (truncated toward zero).
    pub delay_samples: i64,
    /// Round trip in seconds.
    pub delay_secs: f64,
}

// ---------------------------------------------------------------------------
// Filter reports
// ---------------------------------------------------------------------------

/// Emitted once per drain that produced output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterReportEvent {
    pub seq: u64,
    pub mode: FilterMode,
    /// Offset into the drained echo reference the estimate came from.
    pub offset: usize,
    /// Gain applied to the echo estimate (1.0 for LMS and pass-through).
    pub gain: f32,
    /// L1 norm of the filtered signal.
    pub residual_l1: f32,
    /// Samples drained.
    pub raw_len: usize,
    /// `false` when cancellation was skipped.
    pub searched: bool,
}

// ---------------------------------------------------------------------------
// Session status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub status: SessionStatus,
    /// Optional human-readable detail (e.g. the abort reason).
    pub detail: Option<String>,
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created, never started.
    Idle,
    /// Transport open, callbacks flowing.
    Running,
    /// Stopped by the caller.
    Stopped,
    /// The callback rejected a chunk and the stream was torn down.
    Aborted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_event_serializes_camel_case() {
        let event = DelayChangedEvent {
            seq: 3,
            delay_samples: 1600,
            delay_secs: 0.1,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["delaySamples"], 1600);
        assert_eq!(json["delaySecs"], 0.1);
    }

    #[test]
    fn status_serializes_lowercase() {
        let event = SessionStatusEvent {
            status: SessionStatus::Aborted,
            detail: Some("transport delivered no input samples".into()),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""status":"aborted""#));
    }
}
