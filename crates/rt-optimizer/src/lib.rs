//! # rt-optimizer
//!
//! Bayesian hyperparameter search for ranking models.
//!
//! Provides search space definitions, a Gaussian-process ask/tell optimizer
//! with checkpointing, tuning callbacks, and [`ParameterOptimizer`], which
//! cross-validates candidate parameters under a time budget and refits the
//! best configuration on the complete dataset.

mod callbacks;
mod checkpoint;
mod optimizer;
mod space;
pub mod surrogate;
mod trial;
mod tuner;

pub use callbacks::{CallbackRegistry, TuningCallback};
pub use checkpoint::Checkpointer;
pub use optimizer::{
    log_best_params, AcquisitionFunction, Evaluation, GpOptimizer, GpOptimizerConfig,
    Observation, Optimizer, OptimizerFactory,
};
pub use space::{Dimension, ParameterRange, ParameterSpace};
pub use trial::{StopReason, TrialRecord, TuningState, TuningSummary};
pub use tuner::{FitOptions, InterruptHandle, ParameterOptimizer, TunerConfig, DEFAULT_FINAL_EPOCHS};
