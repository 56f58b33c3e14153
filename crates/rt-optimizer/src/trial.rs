//! Per-iteration trial records and the outcome of a tuning run.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rt_types::ParameterValue;

use crate::optimizer::Evaluation;

/// Lifecycle state of a [`ParameterOptimizer`](crate::ParameterOptimizer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TuningState {
    /// Constructed with a validated space, `fit` not yet called.
    SpaceBuilt,
    Looping,
    /// All `n_iter` iterations ran.
    Exhausted,
    /// The remaining budget could not cover another evaluation.
    TimeExpired,
    Interrupted,
    Finalizing,
    Done,
}

/// Why the search loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    Exhausted,
    TimeExpired,
    Interrupted,
}

impl StopReason {
    pub fn state(&self) -> TuningState {
        match self {
            Self::Exhausted => TuningState::Exhausted,
            Self::TimeExpired => TuningState::TimeExpired,
            Self::Interrupted => TuningState::Interrupted,
        }
    }

    /// Whether the best point gets refit on the full dataset.
    pub fn finalizes(&self) -> bool {
        !matches!(self, Self::Interrupted)
    }
}

/// What happened in one loop iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub iteration: usize,
    pub point: Vec<ParameterValue>,
    /// Mean validation loss over the folds.
    pub loss: f64,
    pub mean_fit_secs: f64,
    /// Summed duration over the folds.
    pub total_fit_secs: f64,
    pub finished_at: DateTime<Utc>,
}

impl TrialRecord {
    pub fn new(
        iteration: usize,
        point: Vec<ParameterValue>,
        fold_losses: &[f64],
        fold_secs: &[f64],
    ) -> Self {
        let total_fit_secs: f64 = fold_secs.iter().sum();
        Self {
            iteration,
            point,
            loss: mean(fold_losses),
            mean_fit_secs: mean(fold_secs),
            total_fit_secs,
            finished_at: Utc::now(),
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Returned by `ParameterOptimizer::fit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningSummary {
    pub stop_reason: StopReason,
    /// Iterations completed in this run.
    pub iterations: usize,
    /// Best evaluation known to the optimizer, resumed trials included.
    pub best: Option<Evaluation>,
    pub elapsed: Duration,
}
