//! Least-mean-squares adaptive echo filter.
//!
//! ## Update rule (per sample `i ≥ order`)
//!
//! ```text
//! x = reference[i], reference[i-1], ..., reference[i-order+1]
//! y = w · x
//! e = desired[i] - y
//! w += 2 μ e x
//! ```
//!
//! `e` is the filtered (echo-free) sample and `y` the echo estimate. The
//! first `order` samples have no full history window and produce no output
//! (zero estimate, zero error).

use crate::config::SessionConfig;
use crate::error::{EcholessError, Result};

/// Stateful LMS filter. Weights carry over between calls so adaptation
/// continues across drains.
#[derive(Debug, Clone)]
pub struct LmsFilter {
    weights: Vec<f32>,
    learning_rate: f32,
}

/// Output of one LMS pass.
#[derive(Debug, Clone, PartialEq)]
pub struct LmsOutput {
    /// Predicted echo per sample.
    pub prediction: Vec<f32>,
    /// `desired - prediction`: the residual signal.
    pub error: Vec<f32>,
}

impl LmsFilter {
    /// # Errors
    /// `InvalidConfig` for a zero order or a negative / non-finite rate.
    pub fn new(order: usize, learning_rate: f32) -> Result<Self> {
        if order == 0 {
            return Err(EcholessError::InvalidConfig(
                "LMS filter order must be at least 1".into(),
            ));
        }
        if !learning_rate.is_finite() || learning_rate < 0.0 {
            return Err(EcholessError::InvalidConfig(format!(
                "LMS learning rate must be non-negative, got {learning_rate}"
            )));
        }
        Ok(Self {
            weights: vec![0.0; order],
            learning_rate,
        })
    }

    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        Self::new(config.lms_filter_order, config.lms_learning_rate)
    }

    pub fn order(&self) -> usize {
        self.weights.len()
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    /// Zero the weights.
    pub fn reset(&mut self) {
        self.weights.fill(0.0);
    }

    /// Run one adaptive pass over `desired` using `reference` as the echo
    /// source. Only the first `desired.len()` reference samples are used.
    ///
    /// # Errors
    /// `EchoReferenceTooShort` if `reference` is shorter than `desired`.
    pub fn process(&mut self, desired: &[f32], reference: &[f32]) -> Result<LmsOutput> {
        self.process_from(desired, reference, 0)
    }

    /// Like [`process`](Self::process), with `desired[i]` aligned to
    /// `reference[start + i]`. Samples before `start` fill the window for the
    /// head of `desired`, so a filter carried over from an earlier pass
    /// cancels from the first sample.
    ///
    /// Positions whose reference index is below `order` have no output:
    /// both prediction and error are zero there.
    ///
    /// # Errors
    /// `EchoReferenceTooShort` if `reference` ends before `start + desired.len()`.
    pub fn process_from(
        &mut self,
        desired: &[f32],
        reference: &[f32],
        start: usize,
    ) -> Result<LmsOutput> {
        let n = desired.len();
        if reference.len() < start.saturating_add(n) {
            return Err(EcholessError::EchoReferenceTooShort {
                echo_len: reference.len().saturating_sub(start),
                raw_len: n,
            });
        }

        let order = self.weights.len();
        let step = 2.0 * self.learning_rate;
        let mut prediction = vec![0.0f32; n];
        let mut error = vec![0.0f32; n];

        for i in order.saturating_sub(start).min(n)..n {
            let j = start + i;
            // Newest sample first: x[k] = reference[j - k].
            let window = &reference[j + 1 - order..=j];
            let y: f32 = self
                .weights
                .iter()
                .zip(window.iter().rev())
                .map(|(w, x)| w * x)
                .sum();
            let e = desired[i] - y;
            for (w, x) in self.weights.iter_mut().zip(window.iter().rev()) {
                *w += step * e * x;
            }
            prediction[i] = y;
            error[i] = e;
        }

        Ok(LmsOutput { prediction, error })
    }
}

/// One-shot LMS pass with fresh weights. Returns `(prediction, error)`.
pub fn lms_filter(
    desired: &[f32],
    reference: &[f32],
    learning_rate: f32,
    order: usize,
) -> Result<(Vec<f32>, Vec<f32>)> {
    let out = LmsFilter::new(order, learning_rate)?.process(desired, reference)?;
    Ok((out.prediction, out.error))
}
