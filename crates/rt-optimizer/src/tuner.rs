//! The tuning driver: searches hyperparameters of a ranker by cross-validated
//! Bayesian optimization, then refits the best configuration on all data.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Duration;
use ndarray::ArrayD;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use rt_data::{CrossValidator, FoldPlan, ShuffleSplit};
use rt_types::{
    batch_loss, config_error, internal_error, Batch, FitParams, LearningProblem, ModelError,
    ParameterValue, Ranker, TuneError, TuneResult, ValidationLoss,
};

use crate::callbacks::{CallbackRegistry, TuningCallback};
use crate::checkpoint::Checkpointer;
use crate::optimizer::{
    log_best_params, AcquisitionFunction, GpOptimizerConfig, Observation, Optimizer,
    OptimizerFactory,
};
use crate::space::ParameterSpace;
use crate::trial::{StopReason, TrialRecord, TuningState, TuningSummary};

/// Epochs used for the final refit when the fit params leave them unset.
pub const DEFAULT_FINAL_EPOCHS: usize = 1000;

/// Construction-time settings of a [`ParameterOptimizer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunerConfig {
    /// Where the optimizer state is checkpointed.
    pub optimizer_path: PathBuf,
    /// Forwarded to every ranker fit.
    pub fit_params: FitParams,
    /// Seed of the driver RNG; entropy when unset.
    pub random_state: Option<u64>,
    pub learning_problem: LearningProblem,
}

impl TunerConfig {
    pub fn new(optimizer_path: impl Into<PathBuf>) -> Self {
        Self {
            optimizer_path: optimizer_path.into(),
            fit_params: FitParams::default(),
            random_state: None,
            learning_problem: LearningProblem::default(),
        }
    }

    pub fn with_fit_params(mut self, fit_params: FitParams) -> Self {
        self.fit_params = fit_params;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    pub fn with_learning_problem(mut self, problem: LearningProblem) -> Self {
        self.learning_problem = problem;
        self
    }
}

/// Per-run options of [`ParameterOptimizer::fit`].
pub struct FitOptions {
    /// Wall-clock budget for the whole search.
    pub total_duration: std::time::Duration,
    pub n_iter: usize,
    /// Fold generator; `ShuffleSplit(3, 0.1)` when unset.
    pub cv: Option<Box<dyn CrossValidator>>,
    /// Optimizer to resume; a fresh `GpOptimizer` when unset.
    pub optimizer: Option<Box<dyn Optimizer>>,
    pub acq_func: AcquisitionFunction,
    pub optimizer_config: GpOptimizerConfig,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            total_duration: std::time::Duration::from_secs(60),
            n_iter: 100,
            cv: None,
            optimizer: None,
            acq_func: AcquisitionFunction::default(),
            optimizer_config: GpOptimizerConfig::default(),
        }
    }
}

impl FitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_total_duration(mut self, total_duration: std::time::Duration) -> Self {
        self.total_duration = total_duration;
        self
    }

    pub fn with_n_iter(mut self, n_iter: usize) -> Self {
        self.n_iter = n_iter;
        self
    }

    pub fn with_cv(mut self, cv: impl CrossValidator + 'static) -> Self {
        self.cv = Some(Box::new(cv));
        self
    }

    pub fn with_optimizer(mut self, optimizer: Box<dyn Optimizer>) -> Self {
        self.optimizer = Some(optimizer);
        self
    }

    pub fn with_acquisition(mut self, acq_func: AcquisitionFunction) -> Self {
        self.acq_func = acq_func;
        self
    }

    pub fn with_optimizer_config(mut self, config: GpOptimizerConfig) -> Self {
        self.optimizer_config = config;
        self
    }
}

/// Cooperative stop signal, checked at iteration boundaries.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle(Arc<AtomicBool>);

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Hyperparameter search around a [`Ranker`].
pub struct ParameterOptimizer<R: Ranker> {
    ranker: R,
    space: ParameterSpace,
    config: TunerConfig,
    checkpointer: Checkpointer,
    validation_loss: Box<dyn ValidationLoss>,
    /// Set once `with_validation_loss` replaced the learning problem's default.
    custom_loss: bool,
    callbacks: CallbackRegistry,
    rng: ChaCha8Rng,
    model: Option<R>,
    optimizer: Option<Box<dyn Optimizer>>,
    history: Vec<TrialRecord>,
    state: TuningState,
    interrupt: InterruptHandle,
}

impl<R: Ranker> ParameterOptimizer<R> {
    pub fn new(mut ranker: R, space: ParameterSpace, config: TunerConfig) -> TuneResult<Self> {
        space.validate()?;
        for target in space.targets() {
            if ranker.tunable_mut(&target).is_none() {
                let err = ModelError::UnknownComponent {
                    ranker: ranker.name().to_string(),
                    component: target.to_string(),
                };
                return Err(config_error!("{}", err));
            }
        }
        info!("Parameter space: {} dimensions over {:?}", space.len(), space.targets());

        let checkpointer = Checkpointer::new(&config.optimizer_path)?;

        let validation_loss = config.learning_problem.default_validation_loss();
        if config.fit_params.is_empty() {
            warn!("Fit params are empty, the default parameters will be applied");
        }

        let rng = match config.random_state {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };

        Ok(Self {
            ranker,
            space,
            config,
            checkpointer,
            validation_loss,
            callbacks: CallbackRegistry::new(),
            rng,
            model: None,
            optimizer: None,
            history: Vec::new(),
            state: TuningState::SpaceBuilt,
            interrupt: InterruptHandle::default(),
            custom_loss: false,
        })
    }

    pub fn with_callback(mut self, callback: impl TuningCallback + 'static) -> Self {
        self.callbacks.register(Box::new(callback));
        self
    }

    pub fn with_validation_loss(mut self, loss: impl ValidationLoss + 'static) -> Self {
        info!("Using validation loss {}", loss.name());
        self.validation_loss = Box::new(loss);
        self.custom_loss = true;
        self
    }

    /// Search the space on `x`/`y` and keep the best model.
    pub fn fit(&mut self, x: &Batch, y: &Batch, options: FitOptions) -> TuneResult<TuningSummary> {
        let start = Instant::now();
        x.check_aligned(y)?;
        if !self.custom_loss {
            info!("Loss function is not specified, using {}", self.validation_loss.name());
        }
        let FitOptions {
            total_duration,
            n_iter,
            cv,
            optimizer,
            acq_func,
            optimizer_config,
        } = options;

        let mut cv = match cv {
            Some(cv) => cv,
            None => {
                let seed: u64 = self.rng.gen();
                Box::new(ShuffleSplit::new(3, 0.1, Some(seed))?) as Box<dyn CrossValidator>
            }
        };
        let plan = FoldPlan::compute(x, cv.as_mut())?;

        // One seed per random stream so runs with the same state correlate.
        let ranker_seed: u64 = self.rng.gen();
        debug!("Random seed for the ranking algorithm: {}", ranker_seed);
        let optimizer_seed: u64 = self.rng.gen();
        debug!("Random seed for the optimizer: {}", optimizer_seed);
        let surrogate_seed: u64 = self.rng.gen();
        debug!("Random seed for the GP surrogate: {}", surrogate_seed);

        let mut optimizer = OptimizerFactory::resolve(
            optimizer,
            &self.space,
            acq_func,
            &optimizer_config,
            optimizer_seed,
            surrogate_seed,
        )?;
        self.history.clear();

        let begun = self
            .callbacks
            .set_optimizer(optimizer.as_ref())
            .and_then(|_| self.callbacks.on_optimization_begin(optimizer.as_ref()));
        if let Err(e) = begun {
            self.optimizer = Some(optimizer);
            return Err(e);
        }

        let budget = to_chrono(total_duration)? - to_chrono(start.elapsed())?;
        info!(
            "Time left for {} iterations is {}",
            n_iter,
            format_duration(budget)
        );

        self.state = TuningState::Looping;
        let outcome = self
            .run_loop(optimizer.as_mut(), x, y, &plan, ranker_seed, budget, n_iter)
            .and_then(|reason| {
                self.state = reason.state();
                if reason.finalizes() {
                    self.state = TuningState::Finalizing;
                    self.finalize(optimizer.as_ref(), x, y, ranker_seed)?;
                    self.state = TuningState::Done;
                } else {
                    debug!(
                        "Optimizer interrupted saving the model at {}",
                        self.checkpointer.path().display()
                    );
                    log_best_params(&self.space, optimizer.as_ref());
                }
                Ok(reason)
            });

        self.optimizer = Some(optimizer);
        let teardown = self.teardown();
        self.interrupt.reset();

        let stop_reason = outcome?;
        teardown?;
        Ok(TuningSummary {
            stop_reason,
            iterations: self.history.len(),
            best: self
                .optimizer
                .as_deref()
                .and_then(|opt| opt.best_trial().cloned()),
            elapsed: start.elapsed(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn run_loop(
        &mut self,
        optimizer: &mut dyn Optimizer,
        x: &Batch,
        y: &Batch,
        plan: &FoldPlan,
        ranker_seed: u64,
        mut remaining: Duration,
        n_iter: usize,
    ) -> TuneResult<StopReason> {
        let mut max_fit_duration = Duration::microseconds(-10_000);

        for t in 0..n_iter {
            if self.interrupt.is_interrupted() {
                return Ok(StopReason::Interrupted);
            }
            let iteration_start = Instant::now();
            self.callbacks.on_iteration_begin(t, &*optimizer)?;
            info!("Starting optimization iteration: {}", t);
            if t > 0 {
                log_best_params(&self.space, &*optimizer);
            }

            let point = optimizer.ask()?;
            info!("Next parameters: {}", format_point(&point));

            let (losses, durations) = self.evaluate(&point, plan, x, y, ranker_seed)?;
            let fold_secs: Vec<f64> = durations.iter().map(|d| d.as_secs_f64()).collect();
            let record = TrialRecord::new(t, point.clone(), &losses, &fold_secs);

            let fold_sum = to_chrono(durations.iter().sum())?;
            if max_fit_duration < fold_sum {
                max_fit_duration = fold_sum;
            }
            info!("Validation error for the parameters is {:.4}", record.loss);
            info!("Time taken for the parameters is {}", format_duration(fold_sum));

            let observation = if optimizer.acquisition().is_per_second() {
                Observation::LossAndDuration {
                    loss: record.loss,
                    duration_secs: record.mean_fit_secs,
                }
            } else {
                Observation::Loss(record.loss)
            };
            optimizer.tell(point, observation)?;
            self.history.push(record);
            self.callbacks.on_iteration_end(t, &*optimizer)?;

            info!(
                "Main optimizer iterations done {} and saving the model",
                optimizer.trials().len()
            );
            self.checkpointer.dump(&*optimizer)?;

            remaining = remaining - to_chrono(iteration_start.elapsed())?;
            info!("Time left for simulations is {}", format_duration(remaining));

            if self.interrupt.is_interrupted() {
                return Ok(StopReason::Interrupted);
            }
            if remaining - max_fit_duration < Duration::zero() {
                info!(
                    "Maximum time required by the model to validate parameter values is {}",
                    format_duration(max_fit_duration)
                );
                info!("At iteration {} simulation stops, due to time deficiency", t);
                return Ok(StopReason::TimeExpired);
            }
        }
        Ok(StopReason::Exhausted)
    }

    /// Fit and score `point` on every fold; returns fold losses and durations.
    fn evaluate(
        &mut self,
        point: &[ParameterValue],
        plan: &FoldPlan,
        x: &Batch,
        y: &Batch,
        ranker_seed: u64,
    ) -> TuneResult<(Vec<f64>, Vec<std::time::Duration>)> {
        let mut losses = Vec::with_capacity(plan.n_splits());
        let mut durations = Vec::with_capacity(plan.n_splits());
        for split in plan.splits(x, y) {
            let split = split?;
            let start = Instant::now();
            self.apply_point(point)?;
            self.ranker.reseed(ranker_seed);
            self.ranker
                .fit(&split.x_train, &split.y_train, &self.config.fit_params)?;
            let predicted = self.ranker.predict(&split.x_test)?;
            losses.push(batch_loss(
                self.validation_loss.as_ref(),
                &split.y_test,
                &predicted,
            )?);
            durations.push(start.elapsed());
        }
        if losses.is_empty() {
            return Err(internal_error!("fold plan produced no splits"));
        }
        Ok((losses, durations))
    }

    /// Hand every target its slice of `point`, in space order.
    fn apply_point(&mut self, point: &[ParameterValue]) -> TuneResult<()> {
        for (target, params) in self.space.assignments(point)? {
            info!("{}: current parameters {}", target, params);
            match self.ranker.tunable_mut(&target) {
                Some(tunable) => tunable.set_tunable_parameters(&params)?,
                None => {
                    return Err(ModelError::UnknownComponent {
                        ranker: self.ranker.name().to_string(),
                        component: target.to_string(),
                    }
                    .into())
                }
            }
        }
        Ok(())
    }

    fn finalize(
        &mut self,
        optimizer: &dyn Optimizer,
        x: &Batch,
        y: &Batch,
        ranker_seed: u64,
    ) -> TuneResult<()> {
        debug!(
            "Finally, fit a model on the complete training set and storing the model at {}",
            self.checkpointer.path().display()
        );
        if self.config.fit_params.epochs.is_none() {
            self.config.fit_params.epochs = Some(DEFAULT_FINAL_EPOCHS);
        }
        let best = optimizer.best_trial().ok_or(TuneError::NoTrials)?;
        self.apply_point(&best.point)?;

        let mut model = self.ranker.clone();
        model.reseed(ranker_seed);
        model.fit(x, y, &self.config.fit_params)?;
        self.model = Some(model);
        Ok(())
    }

    /// Runs even when the loop failed; the first error is returned.
    fn teardown(&mut self) -> TuneResult<()> {
        let Some(optimizer) = self.optimizer.as_deref() else {
            return Ok(());
        };
        let ended = self.callbacks.on_optimization_end(optimizer);
        let dumped = if optimizer.trials().is_empty() {
            Ok(())
        } else {
            self.checkpointer.dump(optimizer)
        };
        ended.and(dumped)
    }

    fn fitted(&self) -> TuneResult<&R> {
        self.model.as_ref().ok_or_else(|| {
            error!("The ranking model was not fit yet");
            TuneError::NotFitted
        })
    }

    pub fn predict(&self, x: &Batch) -> TuneResult<Batch> {
        self.fitted()?.predict(x)
    }

    pub fn predict_scores(&self, x: &Batch) -> TuneResult<Batch> {
        self.fitted()?.predict_scores(x)
    }

    pub fn predict_pair(&self, a: &ArrayD<f64>, b: &ArrayD<f64>) -> TuneResult<ArrayD<f64>> {
        self.fitted()?.predict_pair(a, b)
    }

    pub fn predict_scores_fixed(&self, x: &ArrayD<f64>) -> TuneResult<ArrayD<f64>> {
        self.fitted()?.predict_scores_fixed(x)
    }

    /// The best configuration refit on all data, once `fit` finished normally.
    pub fn model(&self) -> Option<&R> {
        self.model.as_ref()
    }

    pub fn ranker(&self) -> &R {
        &self.ranker
    }

    pub fn optimizer(&self) -> Option<&dyn Optimizer> {
        self.optimizer.as_deref()
    }

    /// Hand the optimizer back, e.g. to resume it in another run.
    pub fn take_optimizer(&mut self) -> Option<Box<dyn Optimizer>> {
        self.optimizer.take()
    }

    pub fn space(&self) -> &ParameterSpace {
        &self.space
    }

    pub fn fit_params(&self) -> &FitParams {
        &self.config.fit_params
    }

    pub fn state(&self) -> TuningState {
        self.state
    }

    /// Trials of the last `fit`, in iteration order.
    pub fn history(&self) -> &[TrialRecord] {
        &self.history
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }
}

fn to_chrono(d: std::time::Duration) -> TuneResult<Duration> {
    Duration::from_std(d).map_err(|e| internal_error!("duration out of range: {}", e))
}

/// `[-]HH:MM:SS.mmm`
fn format_duration(d: Duration) -> String {
    let millis = d.num_milliseconds();
    let sign = if millis < 0 { "-" } else { "" };
    let millis = millis.unsigned_abs();
    format!(
        "{}{:02}:{:02}:{:02}.{:03}",
        sign,
        millis / 3_600_000,
        millis / 60_000 % 60,
        millis / 1000 % 60,
        millis % 1000
    )
}

fn format_point(point: &[ParameterValue]) -> String {
    let values: Vec<String> = point.iter().map(ToString::to_string).collect();
    format!("[{}]", values.join(", "))
}
