//! Ask/tell black-box optimizers.
//!
//! [`GpOptimizer`] proposes random points until it has seen
//! `n_initial_points` observations, then fits a Gaussian process on the
//! normalized points and picks the best of `n_candidates` random candidates
//! under the configured acquisition function. Its whole state, RNGs
//! included, serializes to JSON so a run can be checkpointed and resumed.

use std::path::Path;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use rt_types::{config_error, ParameterValue, SurrogateError, TuneResult};

use crate::space::ParameterSpace;
use crate::surrogate::{
    expected_improvement, negative_lcb, probability_of_improvement, GaussianProcess,
};

/// Acquisition function used to rank candidate points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionFunction {
    /// Expected improvement.
    Ei,
    /// Probability of improvement.
    Pi,
    /// Lower confidence bound.
    Lcb,
    /// Portfolio of EI, PI and LCB chosen by softmax over past gains.
    #[default]
    GpHedge,
    /// Expected improvement per second of fitting time.
    EiPerSecond,
    /// Probability of improvement per second of fitting time.
    PiPerSecond,
}

impl AcquisitionFunction {
    /// Whether observations must carry a fit duration as second objective.
    pub fn is_per_second(&self) -> bool {
        matches!(self, Self::EiPerSecond | Self::PiPerSecond)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ei => "EI",
            Self::Pi => "PI",
            Self::Lcb => "LCB",
            Self::GpHedge => "gp_hedge",
            Self::EiPerSecond => "EIps",
            Self::PiPerSecond => "PIps",
        }
    }
}

impl std::fmt::Display for AcquisitionFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The objective value reported for one point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Observation {
    Loss(f64),
    /// Loss plus mean fit duration, for the per-second acquisitions.
    LossAndDuration { loss: f64, duration_secs: f64 },
}

impl Observation {
    /// The first objective.
    pub fn loss(&self) -> f64 {
        match self {
            Self::Loss(loss) | Self::LossAndDuration { loss, .. } => *loss,
        }
    }

    pub fn duration_secs(&self) -> Option<f64> {
        match self {
            Self::Loss(_) => None,
            Self::LossAndDuration { duration_secs, .. } => Some(*duration_secs),
        }
    }
}

impl std::fmt::Display for Observation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Loss(loss) => write!(f, "loss {loss:.4}"),
            Self::LossAndDuration {
                loss,
                duration_secs,
            } => write!(f, "loss {loss:.4} time {duration_secs:.4}s"),
        }
    }
}

/// A point together with what was observed for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub point: Vec<ParameterValue>,
    pub observation: Observation,
}

/// Sequential black-box minimizer.
pub trait Optimizer: Send {
    fn n_dims(&self) -> usize;

    fn acquisition(&self) -> AcquisitionFunction;

    /// Propose the next point to evaluate.
    fn ask(&mut self) -> TuneResult<Vec<ParameterValue>>;

    fn tell(&mut self, point: Vec<ParameterValue>, observation: Observation) -> TuneResult<()>;

    /// Every evaluation told so far, in order.
    fn trials(&self) -> &[Evaluation];

    /// Full state as JSON text.
    fn checkpoint(&self) -> TuneResult<String>;

    /// Lowest first objective; the earliest wins ties.
    fn best_trial(&self) -> Option<&Evaluation> {
        let mut best: Option<&Evaluation> = None;
        for evaluation in self.trials() {
            let improves = match best {
                None => true,
                Some(current) => evaluation.observation.loss() < current.observation.loss(),
            };
            if improves {
                best = Some(evaluation);
            }
        }
        best
    }
}

/// Tuning knobs of [`GpOptimizer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpOptimizerConfig {
    /// Random points proposed before the surrogate takes over.
    pub n_initial_points: usize,
    /// Random candidates scored by the acquisition at each ask.
    pub n_candidates: usize,
    /// Improvement margin for EI and PI.
    pub xi: f64,
    /// Exploration weight for LCB.
    pub kappa: f64,
    /// Observation noise variance on standardized targets.
    pub noise: f64,
}

impl Default for GpOptimizerConfig {
    fn default() -> Self {
        Self {
            n_initial_points: 10,
            n_candidates: 1000,
            xi: 0.01,
            kappa: 1.96,
            noise: 1e-6,
        }
    }
}

impl GpOptimizerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_n_initial_points(mut self, n: usize) -> Self {
        self.n_initial_points = n;
        self
    }

    pub fn with_n_candidates(mut self, n: usize) -> Self {
        self.n_candidates = n;
        self
    }

    pub fn with_xi(mut self, xi: f64) -> Self {
        self.xi = xi;
        self
    }

    pub fn with_kappa(mut self, kappa: f64) -> Self {
        self.kappa = kappa;
        self
    }

    pub fn with_noise(mut self, noise: f64) -> Self {
        self.noise = noise;
        self
    }

    pub fn validate(&self) -> TuneResult<()> {
        if self.n_candidates == 0 {
            return Err(config_error!("n_candidates must be at least 1"));
        }
        if !(self.xi.is_finite() && self.kappa.is_finite() && self.noise.is_finite()) {
            return Err(config_error!("xi, kappa and noise must be finite"));
        }
        if self.noise < 0.0 {
            return Err(config_error!("noise must be non-negative, got {}", self.noise));
        }
        Ok(())
    }
}

/// Best unit-cube candidate of each hedged acquisition at the last ask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct HedgeProposals {
    candidates: [Vec<f64>; 3],
}

/// Gaussian-process driven optimizer over a [`ParameterSpace`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpOptimizer {
    space: ParameterSpace,
    acquisition: AcquisitionFunction,
    config: GpOptimizerConfig,
    /// Draws the initial random points.
    rng: ChaCha8Rng,
    /// Draws surrogate candidates and hedge choices.
    surrogate_rng: ChaCha8Rng,
    evaluations: Vec<Evaluation>,
    /// Cumulative gains of EI, PI and LCB under `GpHedge`.
    hedge_gains: [f64; 3],
    pending_hedge: Option<HedgeProposals>,
}

impl GpOptimizer {
    pub fn new(
        space: ParameterSpace,
        acquisition: AcquisitionFunction,
        config: GpOptimizerConfig,
        seed: u64,
        surrogate_seed: u64,
    ) -> TuneResult<Self> {
        space.validate()?;
        config.validate()?;
        info!(
            "Creating GP optimizer over {} dimensions with {} acquisition",
            space.len(),
            acquisition
        );
        Ok(Self {
            space,
            acquisition,
            config,
            rng: ChaCha8Rng::seed_from_u64(seed),
            surrogate_rng: ChaCha8Rng::seed_from_u64(surrogate_seed),
            evaluations: Vec::new(),
            hedge_gains: [0.0; 3],
            pending_hedge: None,
        })
    }

    /// Restore an optimizer from a checkpoint file.
    pub fn load<P: AsRef<Path>>(path: P) -> TuneResult<Self> {
        let path = path.as_ref();
        debug!("Loading optimizer checkpoint from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_checkpoint(&content)
    }

    pub fn from_checkpoint(state: &str) -> TuneResult<Self> {
        let mut optimizer: Self = serde_json::from_str(state)?;
        // Untagged values lose their variant in JSON, e.g. a numeric choice reads back as Int.
        for evaluation in &mut optimizer.evaluations {
            evaluation.point = optimizer.space.canonical(&evaluation.point)?;
        }
        Ok(optimizer)
    }

    pub fn space(&self) -> &ParameterSpace {
        &self.space
    }

    pub fn config(&self) -> &GpOptimizerConfig {
        &self.config
    }

    pub fn hedge_gains(&self) -> [f64; 3] {
        self.hedge_gains
    }

    fn unit_points(&self) -> TuneResult<Vec<Vec<f64>>> {
        self.evaluations
            .iter()
            .map(|e| self.space.to_unit(&e.point))
            .collect()
    }

    fn fit_loss_model(&self, unit: &[Vec<f64>]) -> TuneResult<GaussianProcess> {
        let losses: Vec<f64> = self.evaluations.iter().map(|e| e.observation.loss()).collect();
        GaussianProcess::fit(unit, &losses, self.config.noise)
    }

    /// Surrogate on log durations, used to turn improvement into improvement per second.
    fn fit_duration_model(&self, unit: &[Vec<f64>]) -> TuneResult<GaussianProcess> {
        let log_durations = self
            .evaluations
            .iter()
            .map(|e| {
                e.observation
                    .duration_secs()
                    .map(|d| d.max(1e-9).ln())
                    .ok_or_else(|| SurrogateError::InvalidObservation {
                        message: format!("{} needs fit durations", self.acquisition),
                    })
            })
            .collect::<Result<Vec<f64>, SurrogateError>>()?;
        GaussianProcess::fit(unit, &log_durations, self.config.noise)
    }

    fn propose(&mut self) -> TuneResult<Vec<ParameterValue>> {
        let unit = self.unit_points()?;
        let loss_model = self.fit_loss_model(&unit)?;
        let duration_model = if self.acquisition.is_per_second() {
            Some(self.fit_duration_model(&unit)?)
        } else {
            None
        };
        let y_best = self
            .evaluations
            .iter()
            .map(|e| e.observation.loss())
            .fold(f64::INFINITY, f64::min);

        let mut candidates = Vec::with_capacity(self.config.n_candidates);
        for _ in 0..self.config.n_candidates {
            let point = self.space.sample(&mut self.surrogate_rng);
            let u = self.space.to_unit(&point)?;
            candidates.push((point, u));
        }

        // [ei, pi, -lcb] per candidate
        let scores: Vec<[f64; 3]> = candidates
            .iter()
            .map(|(_, u)| {
                let (mean, std) = loss_model.predict(u);
                let mut ei = expected_improvement(mean, std, y_best, self.config.xi);
                let mut pi = probability_of_improvement(mean, std, y_best, self.config.xi);
                if let Some(model) = &duration_model {
                    let (log_secs, _) = model.predict(u);
                    let secs = log_secs.exp().max(1e-9);
                    ei /= secs;
                    pi /= secs;
                }
                [ei, pi, negative_lcb(mean, std, self.config.kappa)]
            })
            .collect();

        let chosen = match self.acquisition {
            AcquisitionFunction::Ei | AcquisitionFunction::EiPerSecond => argmax(&scores, 0),
            AcquisitionFunction::Pi | AcquisitionFunction::PiPerSecond => argmax(&scores, 1),
            AcquisitionFunction::Lcb => argmax(&scores, 2),
            AcquisitionFunction::GpHedge => {
                let picks = [argmax(&scores, 0), argmax(&scores, 1), argmax(&scores, 2)];
                let strategy = softmax_choice(&self.hedge_gains, &mut self.surrogate_rng);
                debug!(
                    "gp_hedge gains {:?}, picked {}",
                    self.hedge_gains,
                    ["EI", "PI", "LCB"][strategy]
                );
                self.pending_hedge = Some(HedgeProposals {
                    candidates: picks.map(|i| candidates[i].1.clone()),
                });
                picks[strategy]
            }
        };

        Ok(candidates.swap_remove(chosen).0)
    }

    /// Penalize every hedged acquisition by the posterior mean at the point it proposed.
    fn update_hedge_gains(&mut self) -> TuneResult<()> {
        let Some(proposals) = self.pending_hedge.take() else {
            return Ok(());
        };
        let unit = self.unit_points()?;
        let model = self.fit_loss_model(&unit)?;
        for (gain, candidate) in self.hedge_gains.iter_mut().zip(&proposals.candidates) {
            *gain -= model.predict(candidate).0;
        }
        Ok(())
    }
}

fn argmax(scores: &[[f64; 3]], column: usize) -> usize {
    let mut best = 0;
    for (i, row) in scores.iter().enumerate() {
        if row[column] > scores[best][column] {
            best = i;
        }
    }
    best
}

fn softmax_choice<R: Rng + ?Sized>(gains: &[f64; 3], rng: &mut R) -> usize {
    let max = gains.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let weights: Vec<f64> = gains.iter().map(|g| (g - max).exp()).collect();
    let total: f64 = weights.iter().sum();
    let mut draw = rng.gen::<f64>() * total;
    for (i, w) in weights.iter().enumerate() {
        if draw < *w {
            return i;
        }
        draw -= w;
    }
    weights.len() - 1
}

impl Optimizer for GpOptimizer {
    fn n_dims(&self) -> usize {
        self.space.len()
    }

    fn acquisition(&self) -> AcquisitionFunction {
        self.acquisition
    }

    fn ask(&mut self) -> TuneResult<Vec<ParameterValue>> {
        if self.evaluations.len() < self.config.n_initial_points.max(1) {
            return Ok(self.space.sample(&mut self.rng));
        }
        self.propose()
    }

    fn tell(&mut self, point: Vec<ParameterValue>, observation: Observation) -> TuneResult<()> {
        self.space.to_unit(&point)?;
        let point = self.space.canonical(&point)?;
        if !observation.loss().is_finite() {
            return Err(SurrogateError::InvalidObservation {
                message: format!("non-finite loss {}", observation.loss()),
            }
            .into());
        }
        match observation.duration_secs() {
            None if self.acquisition.is_per_second() => {
                return Err(SurrogateError::InvalidObservation {
                    message: format!("{} expects (loss, duration) observations", self.acquisition),
                }
                .into());
            }
            Some(d) if !d.is_finite() || d < 0.0 => {
                return Err(SurrogateError::InvalidObservation {
                    message: format!("invalid duration {d}"),
                }
                .into());
            }
            _ => {}
        }

        self.evaluations.push(Evaluation { point, observation });
        self.update_hedge_gains()
    }

    fn trials(&self) -> &[Evaluation] {
        &self.evaluations
    }

    fn checkpoint(&self) -> TuneResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Log the best point so far, split per target.
pub fn log_best_params(space: &ParameterSpace, optimizer: &dyn Optimizer) {
    let Some(best) = optimizer.best_trial() else {
        debug!("No trials recorded yet");
        return;
    };
    let params = match space.assignments(&best.point) {
        Ok(assignments) => assignments
            .iter()
            .map(|(target, params)| format!("{target}: {params}"))
            .collect::<Vec<_>>()
            .join(", "),
        Err(_) => format!("{:?}", best.point),
    };
    info!("Best parameters so far with a {}: {}", best.observation, params);
}

/// Picks the optimizer a tuning run drives.
pub struct OptimizerFactory;

impl OptimizerFactory {
    /// Reuse `supplied` when given, otherwise build a fresh [`GpOptimizer`].
    pub fn resolve(
        supplied: Option<Box<dyn Optimizer>>,
        space: &ParameterSpace,
        acquisition: AcquisitionFunction,
        config: &GpOptimizerConfig,
        optimizer_seed: u64,
        surrogate_seed: u64,
    ) -> TuneResult<Box<dyn Optimizer>> {
        match supplied {
            Some(optimizer) => {
                if optimizer.n_dims() != space.len() {
                    return Err(SurrogateError::DimensionMismatch {
                        expected: space.len(),
                        actual: optimizer.n_dims(),
                    }
                    .into());
                }
                debug!(
                    "Setting the provided optimizer with {} previous trials",
                    optimizer.trials().len()
                );
                log_best_params(space, optimizer.as_ref());
                Ok(optimizer)
            }
            None => {
                info!("Parameter space: {:?}", space.dimensions());
                let optimizer = GpOptimizer::new(
                    space.clone(),
                    acquisition,
                    config.clone(),
                    optimizer_seed,
                    surrogate_seed,
                )?;
                Ok(Box::new(optimizer))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_types::TargetId;

    fn quadratic_space() -> ParameterSpace {
        ParameterSpace::new()
            .add_float(TargetId::Ranker, "x", -2.0, 2.0)
            .add_float(TargetId::Ranker, "y", -2.0, 2.0)
    }

    fn quadratic(point: &[ParameterValue]) -> f64 {
        let x = point[0].as_f64().unwrap();
        let y = point[1].as_f64().unwrap();
        (x - 0.5).powi(2) + (y + 0.3).powi(2)
    }

    fn small_config() -> GpOptimizerConfig {
        GpOptimizerConfig::new()
            .with_n_initial_points(5)
            .with_n_candidates(200)
    }

    fn run(opt: &mut GpOptimizer, n: usize) {
        for _ in 0..n {
            let point = opt.ask().unwrap();
            let loss = quadratic(&point);
            opt.tell(point, Observation::Loss(loss)).unwrap();
        }
    }

    #[test]
    fn same_seeds_propose_same_points() {
        let mut a =
            GpOptimizer::new(quadratic_space(), AcquisitionFunction::GpHedge, small_config(), 1, 2)
                .unwrap();
        let mut b =
            GpOptimizer::new(quadratic_space(), AcquisitionFunction::GpHedge, small_config(), 1, 2)
                .unwrap();
        run(&mut a, 8);
        run(&mut b, 8);
        assert_eq!(a.trials(), b.trials());
        assert_eq!(a.hedge_gains(), b.hedge_gains());
    }

    #[test]
    fn surrogate_beats_initial_design() {
        let mut opt =
            GpOptimizer::new(quadratic_space(), AcquisitionFunction::Ei, small_config(), 7, 8)
                .unwrap();
        run(&mut opt, 25);
        let initial_best = opt.trials()[..5]
            .iter()
            .map(|e| e.observation.loss())
            .fold(f64::INFINITY, f64::min);
        let best = opt.best_trial().unwrap().observation.loss();
        assert!(best <= initial_best);
        assert!(best < 0.5, "best loss {best}");
    }

    #[test]
    fn checkpoint_restores_the_same_stream() {
        let mut opt =
            GpOptimizer::new(quadratic_space(), AcquisitionFunction::GpHedge, small_config(), 3, 4)
                .unwrap();
        run(&mut opt, 7);
        let mut restored = GpOptimizer::from_checkpoint(&opt.checkpoint().unwrap()).unwrap();
        assert_eq!(restored.trials(), opt.trials());
        assert_eq!(restored.ask().unwrap(), opt.ask().unwrap());
    }

    #[test]
    fn numeric_choices_survive_a_checkpoint() {
        let space = ParameterSpace::new().add_choice(
            TargetId::Ranker,
            "batch_size",
            vec![
                serde_json::json!(32),
                serde_json::json!(64),
                serde_json::json!(128),
            ],
        );
        let config = GpOptimizerConfig::new()
            .with_n_initial_points(2)
            .with_n_candidates(50);
        let mut opt =
            GpOptimizer::new(space, AcquisitionFunction::GpHedge, config, 11, 12).unwrap();
        for _ in 0..2 {
            let point = opt.ask().unwrap();
            let loss = (point[0].as_f64().unwrap() - 64.0).abs();
            opt.tell(point, Observation::Loss(loss)).unwrap();
        }

        let mut restored = GpOptimizer::from_checkpoint(&opt.checkpoint().unwrap()).unwrap();
        assert_eq!(restored.trials(), opt.trials());
        assert!(matches!(restored.trials()[0].point[0], ParameterValue::Json(_)));

        let point = restored.ask().unwrap();
        assert_eq!(point, opt.ask().unwrap());
        restored.tell(point, Observation::Loss(1.0)).unwrap();
        restored.tell(vec![ParameterValue::Int(32)], Observation::Loss(2.0)).unwrap();
        assert_eq!(restored.trials().len(), 4);
        assert_eq!(
            restored.trials()[3].point,
            vec![ParameterValue::Json(serde_json::json!(32))]
        );
    }

    #[test]
    fn per_second_acquisition_needs_durations() {
        let mut opt = GpOptimizer::new(
            quadratic_space(),
            AcquisitionFunction::EiPerSecond,
            small_config(),
            1,
            1,
        )
        .unwrap();
        let point = opt.ask().unwrap();
        assert!(opt.tell(point.clone(), Observation::Loss(1.0)).is_err());
        opt.tell(
            point,
            Observation::LossAndDuration {
                loss: 1.0,
                duration_secs: 0.2,
            },
        )
        .unwrap();
        assert_eq!(opt.trials().len(), 1);
    }

    #[test]
    fn per_second_acquisition_proposes_after_initial_points() {
        let mut opt = GpOptimizer::new(
            quadratic_space(),
            AcquisitionFunction::PiPerSecond,
            small_config(),
            5,
            6,
        )
        .unwrap();
        for i in 0..8 {
            let point = opt.ask().unwrap();
            let loss = quadratic(&point);
            opt.tell(
                point,
                Observation::LossAndDuration {
                    loss,
                    duration_secs: 0.1 + i as f64 * 0.01,
                },
            )
            .unwrap();
        }
        assert_eq!(opt.trials().len(), 8);
    }

    #[test]
    fn tell_rejects_foreign_points_and_nan() {
        let mut opt =
            GpOptimizer::new(quadratic_space(), AcquisitionFunction::Ei, small_config(), 1, 1)
                .unwrap();
        assert!(opt.tell(vec![ParameterValue::Float(0.0)], Observation::Loss(1.0)).is_err());
        let point = opt.ask().unwrap();
        assert!(opt.tell(point, Observation::Loss(f64::NAN)).is_err());
        assert!(opt.trials().is_empty());
    }

    #[test]
    fn best_trial_prefers_first_on_ties() {
        let mut opt =
            GpOptimizer::new(quadratic_space(), AcquisitionFunction::Ei, small_config(), 1, 1)
                .unwrap();
        let first = vec![ParameterValue::Float(0.0), ParameterValue::Float(0.0)];
        let second = vec![ParameterValue::Float(1.0), ParameterValue::Float(1.0)];
        opt.tell(first.clone(), Observation::Loss(0.5)).unwrap();
        opt.tell(second, Observation::Loss(0.5)).unwrap();
        assert_eq!(opt.best_trial().unwrap().point, first);
    }

    #[test]
    fn factory_checks_resumed_dimensionality() {
        let opt =
            GpOptimizer::new(quadratic_space(), AcquisitionFunction::Ei, small_config(), 1, 1)
                .unwrap();
        let other = ParameterSpace::new().add_float(TargetId::Ranker, "x", 0.0, 1.0);
        let err = OptimizerFactory::resolve(
            Some(Box::new(opt)),
            &other,
            AcquisitionFunction::Ei,
            &GpOptimizerConfig::default(),
            0,
            0,
        );
        assert!(err.is_err());

        let fresh = OptimizerFactory::resolve(
            None,
            &other,
            AcquisitionFunction::Lcb,
            &GpOptimizerConfig::default(),
            0,
            0,
        )
        .unwrap();
        assert_eq!(fresh.n_dims(), 1);
        assert_eq!(fresh.acquisition(), AcquisitionFunction::Lcb);
    }

    #[test]
    fn config_validation() {
        assert!(GpOptimizerConfig::default().validate().is_ok());
        assert!(GpOptimizerConfig::default().with_n_candidates(0).validate().is_err());
        assert!(GpOptimizerConfig::default().with_noise(-1.0).validate().is_err());
    }
}
