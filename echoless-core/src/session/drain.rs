//! Consumer side: snapshot the logs, flatten them, run the filter.

use tracing::debug;

use super::EchoSession;
use crate::{
    buffering::chunk::concat_chunks,
    config::{FilterMode, SessionConfig},
    error::{EcholessError, Result},
    events::FilterReportEvent,
    filter::{l1_norm, search::center_offset, AlignmentSearch, FilterOutput, LmsFilter},
};

/// One drain's worth of audio. All three are empty (insufficient data) or
/// all have the length of the drained recording.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterResult {
    /// Recording with the echo removed.
    pub filtered: Vec<f32>,
    /// Recording as captured, boost applied.
    pub raw: Vec<f32>,
    /// The echo estimate that was removed.
    pub echo: Vec<f32>,
}

impl FilterResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }
}

impl EchoSession {
    /// Take everything recorded since the last drain and cancel the echo.
    ///
    /// Returns an empty result, without touching the logs, until at least
    /// `RETAINED_ECHO_CHUNKS` chunks have been recorded. Callers poll.
    ///
    /// # Errors
    /// `EchoReferenceTooShort` if the echo log fell behind the recording log.
    pub fn drain_audio(&self) -> Result<FilterResult> {
        let (recorded, echo_chunks, delay) = {
            let mut state = self.shared.state.lock();
            match state.take_for_drain() {
                Some((recorded, echo)) => (recorded, echo, state.delay.samples),
                None => return Ok(FilterResult::empty()),
            }
        };

        let settings = self.shared.settings.read().clone();

        let mut raw = concat_chunks(&recorded);
        if let Some(boost) = settings.effective_boost() {
            for sample in raw.iter_mut() {
                *sample *= boost;
            }
        }
        let echo_ref = concat_chunks(&echo_chunks);

        let output = match settings.filter_mode {
            FilterMode::Search => {
                AlignmentSearch::from_config(&settings).apply(&raw, &echo_ref, delay)?
            }
            FilterMode::Lms => {
                let mut lms = self.shared.lms.lock();
                apply_lms_aligned(&mut lms, &settings, &raw, &echo_ref, delay)?
            }
        };

        debug!(
            mode = ?settings.filter_mode,
            offset = output.offset,
            gain = output.gain,
            residual_l1 = output.residual_l1,
            raw_len = raw.len(),
            "drained audio"
        );
        self.shared.emit_report(FilterReportEvent {
            seq: self.shared.next_seq(),
            mode: settings.filter_mode,
            offset: output.offset,
            gain: output.gain,
            residual_l1: output.residual_l1,
            raw_len: raw.len(),
            searched: output.searched,
        });

        Ok(FilterResult {
            filtered: output.filtered,
            raw,
            echo: output.echo,
        })
    }
}

/// Run LMS against the echo window the delay estimate points at. The echo
/// samples before that window serve as filter history.
fn apply_lms_aligned(
    lms: &mut LmsFilter,
    settings: &SessionConfig,
    raw: &[f32],
    echo_ref: &[f32],
    delay: i64,
) -> Result<FilterOutput> {
    let raw_len = raw.len();
    let bound = echo_ref
        .len()
        .checked_sub(raw_len)
        .ok_or(EcholessError::EchoReferenceTooShort {
            echo_len: echo_ref.len(),
            raw_len,
        })?;
    let center = center_offset(bound, delay);
    let window = &echo_ref[center..center + raw_len];

    if !settings.echo_cancel {
        return Ok(FilterOutput {
            filtered: raw.to_vec(),
            echo: window.to_vec(),
            offset: center,
            gain: 1.0,
            residual_l1: l1_norm(raw),
            searched: false,
        });
    }

    let out = lms.process_from(raw, echo_ref, center)?;
    Ok(FilterOutput {
        residual_l1: l1_norm(&out.error),
        filtered: out.error,
        echo: out.prediction,
        offset: center,
        gain: 1.0,
        searched: true,
    })
}
