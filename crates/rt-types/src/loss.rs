//! Validation losses used to score held-out predictions.

use ndarray::{ArrayD, ArrayView2, Ix2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::batch::Batch;
use crate::errors::{DataError, TuneError, TuneResult};

/// The learning problem a ranker solves; picks the default validation loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LearningProblem {
    #[default]
    ObjectRanking,
    LabelRanking,
    DiscreteChoice,
    DyadRanking,
}

impl LearningProblem {
    pub fn default_validation_loss(&self) -> Box<dyn ValidationLoss> {
        match self {
            Self::DiscreteChoice => Box::new(CategoricalHinge),
            Self::ObjectRanking | Self::LabelRanking | Self::DyadRanking => {
                Box::new(ZeroOneRankLoss)
            }
        }
    }
}

/// Mean loss of predictions against the true labels of one array.
pub trait ValidationLoss: Send + Sync {
    fn name(&self) -> &str;

    fn loss(&self, y_true: &ArrayD<f64>, y_pred: &ArrayD<f64>) -> TuneResult<f64>;
}

/// Adapts a closure into a [`ValidationLoss`].
pub struct FnLoss<F> {
    name: String,
    f: F,
}

impl<F> FnLoss<F>
where
    F: Fn(&ArrayD<f64>, &ArrayD<f64>) -> TuneResult<f64> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> ValidationLoss for FnLoss<F>
where
    F: Fn(&ArrayD<f64>, &ArrayD<f64>) -> TuneResult<f64> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn loss(&self, y_true: &ArrayD<f64>, y_pred: &ArrayD<f64>) -> TuneResult<f64> {
        (self.f)(y_true, y_pred)
    }
}

fn as_matrix<'a>(arr: &'a ArrayD<f64>, what: &str) -> TuneResult<ArrayView2<'a, f64>> {
    arr.view().into_dimensionality::<Ix2>().map_err(|_| {
        TuneError::from(DataError::ShapeMismatch {
            message: format!("{what} must be (n_instances, n_objects), got {:?}", arr.shape()),
        })
    })
}

fn check_same_shape(y_true: &ArrayView2<f64>, y_pred: &ArrayView2<f64>) -> TuneResult<()> {
    if y_true.shape() != y_pred.shape() {
        return Err(DataError::ShapeMismatch {
            message: format!(
                "true labels {:?} vs predictions {:?}",
                y_true.shape(),
                y_pred.shape()
            ),
        }
        .into());
    }
    if y_true.nrows() == 0 {
        return Err(DataError::Empty {
            message: "no instances to score".to_string(),
        }
        .into());
    }
    Ok(())
}

/// Fraction of object pairs whose predicted order contradicts the true
/// ranking; tied predictions count half.
///
/// Both arrays hold rank positions (0 = first), one row per instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroOneRankLoss;

impl ValidationLoss for ZeroOneRankLoss {
    fn name(&self) -> &str {
        "zero_one_rank_loss"
    }

    fn loss(&self, y_true: &ArrayD<f64>, y_pred: &ArrayD<f64>) -> TuneResult<f64> {
        let truth = as_matrix(y_true, "rankings")?;
        let pred = as_matrix(y_pred, "predicted rankings")?;
        check_same_shape(&truth, &pred)?;

        let n_objects = truth.ncols();
        if n_objects < 2 {
            return Ok(0.0);
        }
        let n_pairs = (n_objects * (n_objects - 1)) as f64 / 2.0;

        let mut total = 0.0;
        for (t, p) in truth.rows().into_iter().zip(pred.rows()) {
            let mut mistakes = 0.0;
            for i in 0..n_objects {
                for j in (i + 1)..n_objects {
                    if p[i] == p[j] {
                        mistakes += 0.5;
                    } else if (t[i] < t[j] && p[i] > p[j]) || (t[i] > t[j] && p[i] < p[j]) {
                        mistakes += 1.0;
                    }
                }
            }
            total += mistakes / n_pairs;
        }
        Ok(total / truth.nrows() as f64)
    }
}

/// Categorical hinge on one-hot choices against predicted scores.
#[derive(Debug, Clone, Copy, Default)]
pub struct CategoricalHinge;

impl ValidationLoss for CategoricalHinge {
    fn name(&self) -> &str {
        "categorical_hinge"
    }

    fn loss(&self, y_true: &ArrayD<f64>, y_pred: &ArrayD<f64>) -> TuneResult<f64> {
        let truth = as_matrix(y_true, "choices")?;
        let pred = as_matrix(y_pred, "predicted scores")?;
        check_same_shape(&truth, &pred)?;

        let mut total = 0.0;
        for (t, p) in truth.rows().into_iter().zip(pred.rows()) {
            let pos: f64 = t.iter().zip(p.iter()).map(|(a, b)| a * b).sum();
            let neg = t
                .iter()
                .zip(p.iter())
                .map(|(a, b)| (1.0 - a) * b)
                .fold(f64::NEG_INFINITY, f64::max);
            total += (neg - pos + 1.0).max(0.0);
        }
        Ok(total / truth.nrows() as f64)
    }
}

/// Loss over a whole batch. Grouped batches are scored per group and
/// averaged, weighting each group by its number of instances.
pub fn batch_loss(loss: &dyn ValidationLoss, y_true: &Batch, y_pred: &Batch) -> TuneResult<f64> {
    match (y_true, y_pred) {
        (Batch::Flat(t), Batch::Flat(p)) => loss.loss(t, p),
        (Batch::Grouped(truth), Batch::Grouped(preds)) => {
            let mut weighted = 0.0;
            let mut total_instances = 0usize;
            for (n_objects, pred) in preds {
                let t = truth
                    .get(n_objects)
                    .ok_or(DataError::GroupMismatch { key: *n_objects })?;
                let value = loss.loss(t, pred)?;
                let instances = pred.shape().first().copied().unwrap_or(0);
                debug!(
                    "n_objects={} {}={:.4} instances={}",
                    n_objects,
                    loss.name(),
                    value,
                    instances
                );
                weighted += value * instances as f64;
                total_instances += instances;
            }
            if total_instances == 0 {
                return Err(DataError::Empty {
                    message: "no held-out instances in any group".to_string(),
                }
                .into());
            }
            Ok(weighted / total_instances as f64)
        }
        _ => Err(DataError::VariantMismatch {
            expected: if y_true.is_grouped() { "grouped" } else { "flat" }.to_string(),
            actual: if y_pred.is_grouped() { "grouped" } else { "flat" }.to_string(),
        }
        .into()),
    }
}
