use thiserror::Error;

/// All errors produced by echoless-core.
#[derive(Debug, Error)]
pub enum EcholessError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default {0} device found")]
    NoDefaultDevice(&'static str),

    #[error("transport delivered {actual} frames, expected {expected}")]
    InvalidFrameCount { expected: usize, actual: usize },

    #[error("transport delivered no input samples")]
    MissingInput,

    #[error("transport delivered {actual_bytes} input bytes, expected {expected_bytes}")]
    MalformedInput {
        expected_bytes: usize,
        actual_bytes: usize,
    },

    #[error("echo reference ({echo_len} samples) is shorter than the recording ({raw_len} samples)")]
    EchoReferenceTooShort { echo_len: usize, raw_len: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("session is already running")]
    AlreadyRunning,

    #[error("session is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EcholessError {
    /// `true` for errors that mean the audio transport broke its contract and
    /// the stream must be aborted.
    pub fn is_transport_fatal(&self) -> bool {
        matches!(
            self,
            EcholessError::InvalidFrameCount { .. }
                | EcholessError::MissingInput
                | EcholessError::MalformedInput { .. }
                | EcholessError::AudioStream(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EcholessError>;
