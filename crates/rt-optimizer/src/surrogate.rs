//! Gaussian-process surrogate and acquisition functions.
//!
//! The surrogate works on points normalized to the unit hypercube. Targets
//! are standardized before fitting; predictions are returned in the original
//! units. Kernel hyperparameters are not optimized: ARD length scales follow
//! the spread of the training inputs and the signal variance is fixed to 1
//! on the standardized targets.

use nalgebra::{DMatrix, DVector};

use rt_types::{SurrogateError, TuneResult};

/// Precomputed √5 constant.
const SQRT_5: f64 = 2.236_067_977_499_79;

/// Floor for length scales so a collapsed dimension cannot blow up distances.
const MIN_LENGTHSCALE: f64 = 0.05;

/// Matérn 5/2 kernel with ARD lengthscales.
///
/// `k(x1, x2) = σ² (1 + √5 r + 5/3 r²) exp(-√5 r)`
/// where `r = sqrt(Σ ((x1_i - x2_i) / l_i)²)`
fn matern52(x1: &[f64], x2: &[f64], lengthscales: &[f64], signal_var: f64) -> f64 {
    let r_sq: f64 = x1
        .iter()
        .zip(x2)
        .zip(lengthscales)
        .map(|((a, b), l)| ((a - b) / l).powi(2))
        .sum();
    let r = r_sq.sqrt();
    let sqrt5_r = SQRT_5 * r;
    signal_var * (1.0 + sqrt5_r + 5.0 / 3.0 * r_sq) * (-sqrt5_r).exp()
}

/// A fitted GP ready for predictions.
pub struct GaussianProcess {
    /// Cholesky factor of K + σ²I.
    cholesky: nalgebra::linalg::Cholesky<f64, nalgebra::Dyn>,
    /// α = (K + σ²I)^{-1} y
    alpha: DVector<f64>,
    x_train: Vec<Vec<f64>>,
    lengthscales: Vec<f64>,
    signal_var: f64,
    y_mean: f64,
    y_std: f64,
}

impl GaussianProcess {
    /// Fit on unit-cube inputs `x` and targets `y`.
    ///
    /// `noise_variance` is added to the kernel diagonal (in standardized
    /// units); it is raised tenfold up to five times if the kernel matrix is
    /// not numerically positive definite.
    pub fn fit(x: &[Vec<f64>], y: &[f64], noise_variance: f64) -> TuneResult<Self> {
        let n = y.len();
        if n == 0 || x.len() != n {
            return Err(SurrogateError::FitFailed {
                message: format!("{} inputs for {} targets", x.len(), n),
            }
            .into());
        }
        if y.iter().any(|v| !v.is_finite()) {
            return Err(SurrogateError::FitFailed {
                message: "non-finite target value".to_string(),
            }
            .into());
        }

        let y_mean = y.iter().sum::<f64>() / n as f64;
        let y_var = if n > 1 {
            y.iter().map(|v| (v - y_mean).powi(2)).sum::<f64>() / (n - 1) as f64
        } else {
            1.0
        };
        let y_std = y_var.sqrt().max(1e-10);
        let y_standardized: Vec<f64> = y.iter().map(|v| (v - y_mean) / y_std).collect();

        let d = x[0].len();
        let lengthscales: Vec<f64> = (0..d)
            .map(|j| {
                let mean_j = x.iter().map(|p| p[j]).sum::<f64>() / n as f64;
                let var_j = x.iter().map(|p| (p[j] - mean_j).powi(2)).sum::<f64>() / n as f64;
                var_j.sqrt().max(MIN_LENGTHSCALE)
            })
            .collect();
        let signal_var = 1.0;

        let mut noise = noise_variance.max(1e-10);
        let mut attempts = 0;
        let cholesky = loop {
            let k = DMatrix::from_fn(n, n, |i, j| {
                let k = matern52(&x[i], &x[j], &lengthscales, signal_var);
                if i == j {
                    k + noise
                } else {
                    k
                }
            });
            if let Some(chol) = nalgebra::linalg::Cholesky::new(k) {
                break chol;
            }
            attempts += 1;
            if attempts > 5 {
                return Err(SurrogateError::FitFailed {
                    message: format!("kernel matrix not positive definite (noise {noise:e})"),
                }
                .into());
            }
            noise *= 10.0;
        };

        let alpha = cholesky.solve(&DVector::from_column_slice(&y_standardized));

        Ok(Self {
            cholesky,
            alpha,
            x_train: x.to_vec(),
            lengthscales,
            signal_var,
            y_mean,
            y_std,
        })
    }

    /// Posterior mean and standard deviation at `x`, in target units.
    pub fn predict(&self, x: &[f64]) -> (f64, f64) {
        let k_star = DVector::from_fn(self.x_train.len(), |i, _| {
            matern52(x, &self.x_train[i], &self.lengthscales, self.signal_var)
        });
        let mean = k_star.dot(&self.alpha);
        let v = self.cholesky.solve(&k_star);
        let var = (self.signal_var - k_star.dot(&v)).max(0.0);
        (
            mean * self.y_std + self.y_mean,
            var.sqrt() * self.y_std,
        )
    }
}

/// Standard normal PDF.
pub fn norm_pdf(x: f64) -> f64 {
    const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;
    INV_SQRT_2PI * (-0.5 * x * x).exp()
}

/// Standard normal CDF (Abramowitz-Stegun rational approximation).
pub fn norm_cdf(x: f64) -> f64 {
    if x < -8.0 {
        return 0.0;
    }
    if x > 8.0 {
        return 1.0;
    }

    let abs_x = x.abs();
    let t = 1.0 / (1.0 + 0.231_641_9 * abs_x);
    let inner = -0.356_563_782 + t * (1.781_477_937 + t * (-1.821_255_978 + t * 1.330_274_429));
    let poly = t * (0.319_381_530 + t * inner);
    let cdf = 1.0 - norm_pdf(abs_x) * poly;

    if x >= 0.0 {
        cdf
    } else {
        1.0 - cdf
    }
}

/// Expected improvement over `y_best` for minimization.
pub fn expected_improvement(mean: f64, std: f64, y_best: f64, xi: f64) -> f64 {
    let improvement = y_best - mean - xi;
    if std < 1e-12 {
        return improvement.max(0.0);
    }
    let z = improvement / std;
    (improvement * norm_cdf(z) + std * norm_pdf(z)).max(0.0)
}

/// Probability of improving on `y_best` by at least `xi`.
pub fn probability_of_improvement(mean: f64, std: f64, y_best: f64, xi: f64) -> f64 {
    let improvement = y_best - mean - xi;
    if std < 1e-12 {
        return if improvement > 0.0 { 1.0 } else { 0.0 };
    }
    norm_cdf(improvement / std)
}

/// Negated lower confidence bound, so that larger is better like the others.
pub fn negative_lcb(mean: f64, std: f64, kappa: f64) -> f64 {
    -(mean - kappa * std)
}
