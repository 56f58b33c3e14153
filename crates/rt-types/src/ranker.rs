use ndarray::ArrayD;

use crate::batch::Batch;
use crate::errors::TuneResult;
use crate::params::{FitParams, ParameterAssignment, TargetId};

/// An object whose hyperparameters can be assigned by the tuner.
pub trait Tunable {
    fn set_tunable_parameters(&mut self, params: &ParameterAssignment) -> TuneResult<()>;
}

/// Capability interface every tunable ranking model must provide.
///
/// Object rankers, label rankers, discrete choice and dyad ranking models all
/// fit this shape: `fit` on features/labels, then produce rankings or scores.
pub trait Ranker: Tunable + Clone + Send {
    /// Name used in log lines.
    fn name(&self) -> &str;

    fn fit(&mut self, x: &Batch, y: &Batch, params: &FitParams) -> TuneResult<()>;

    /// Predicted rankings (or choices) for every instance.
    fn predict(&self, x: &Batch) -> TuneResult<Batch>;

    fn predict_scores(&self, x: &Batch) -> TuneResult<Batch>;

    /// Preference of `a` over `b` for aligned object pairs.
    fn predict_pair(&self, a: &ArrayD<f64>, b: &ArrayD<f64>) -> TuneResult<ArrayD<f64>>;

    /// Scores for instances that share one fixed problem size.
    fn predict_scores_fixed(&self, x: &ArrayD<f64>) -> TuneResult<ArrayD<f64>>;

    /// Named sub-components that take their own tunable parameters.
    fn component_mut(&mut self, _name: &str) -> Option<&mut dyn Tunable> {
        None
    }

    /// Reset the model's random stream before a fit.
    fn reseed(&mut self, _seed: u64) {}

    /// Resolve a target handle to the object that receives its parameters.
    fn tunable_mut(&mut self, target: &TargetId) -> Option<&mut dyn Tunable> {
        match target {
            TargetId::Ranker => Some(self),
            TargetId::Component(name) => self.component_mut(name),
        }
    }
}
