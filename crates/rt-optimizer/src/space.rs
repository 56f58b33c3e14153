//! Search space definitions for tunable targets.

use rand::Rng;
use serde::{Deserialize, Serialize};

use rt_types::{
    config_error, ParameterAssignment, ParameterValue, SurrogateError, TargetId, TuneError,
    TuneResult,
};

/// Describes how a parameter is sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterRange {
    /// Continuous uniform range [low, high].
    FloatRange { low: f64, high: f64 },
    /// Integer range [low, high] inclusive.
    IntRange { low: i64, high: i64 },
    /// Log-uniform range (sampled in log-space then exponentiated).
    LogUniform { low: f64, high: f64 },
    /// Categorical choices.
    Choice { values: Vec<serde_json::Value> },
}

impl ParameterRange {
    /// Reject ranges the surrogate cannot search.
    pub fn check(&self) -> Result<(), String> {
        match self {
            Self::FloatRange { low, high } => {
                if !low.is_finite() || !high.is_finite() || low >= high {
                    return Err(format!("float range needs finite low < high, got [{low}, {high}]"));
                }
            }
            Self::LogUniform { low, high } => {
                if !low.is_finite() || !high.is_finite() || *low <= 0.0 || low >= high {
                    return Err(format!(
                        "log-uniform range needs 0 < low < high, got [{low}, {high}]"
                    ));
                }
            }
            Self::IntRange { low, high } => {
                if low >= high {
                    return Err(format!("integer range needs low < high, got [{low}, {high}]"));
                }
                if high.checked_sub(*low).and_then(|d| d.checked_add(1)).is_none() {
                    return Err(format!("integer range [{low}, {high}] is too wide"));
                }
            }
            Self::Choice { values } => {
                if values.is_empty() {
                    return Err("categorical range needs at least one value".to_string());
                }
            }
        }
        Ok(())
    }

    /// Map a value of this range into [0, 1].
    pub fn to_unit(&self, value: &ParameterValue) -> Option<f64> {
        let u = match (self, value) {
            (Self::FloatRange { low, high }, v) => (v.as_f64()? - low) / (high - low),
            (Self::LogUniform { low, high }, v) => {
                let v = v.as_f64()?;
                if v <= 0.0 {
                    return None;
                }
                (v.ln() - low.ln()) / (high.ln() - low.ln())
            }
            (Self::IntRange { low, high }, v) => {
                let bins = (high - low + 1) as f64;
                v.as_i64()?.checked_sub(*low)? as f64 / bins + 0.5 / bins
            }
            // Numeric choices come back from a checkpoint as Int or Float.
            (Self::Choice { values }, v) => {
                let v = v.to_json()?;
                let idx = values.iter().position(|c| *c == v)?;
                (idx as f64 + 0.5) / values.len() as f64
            }
        };
        Some(u.clamp(0.0, 1.0))
    }

    /// Map a point of [0, 1] back into this range.
    pub fn from_unit(&self, u: f64) -> ParameterValue {
        let u = u.clamp(0.0, 1.0);
        match self {
            Self::FloatRange { low, high } => ParameterValue::Float(low + u * (high - low)),
            Self::LogUniform { low, high } => {
                let log_v = low.ln() + u * (high.ln() - low.ln());
                ParameterValue::Float(log_v.exp().clamp(*low, *high))
            }
            Self::IntRange { low, high } => {
                let bins = (high - low + 1) as f64;
                let offset = ((u * bins).floor() as i64).min(high - low);
                ParameterValue::Int(low + offset)
            }
            Self::Choice { values } => {
                let idx = ((u * values.len() as f64).floor() as usize).min(values.len() - 1);
                ParameterValue::Json(values[idx].clone())
            }
        }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ParameterValue {
        self.from_unit(rng.gen::<f64>())
    }

    /// The value in the representation `from_unit` produces for this range.
    pub fn canonical(&self, value: &ParameterValue) -> Option<ParameterValue> {
        match (self, value) {
            (Self::Choice { values }, v) => {
                let v = v.to_json()?;
                values.iter().find(|c| **c == v).cloned().map(ParameterValue::Json)
            }
            (Self::IntRange { .. }, v) => v.as_i64().map(ParameterValue::Int),
            (Self::FloatRange { .. } | Self::LogUniform { .. }, v) => {
                v.as_f64().map(ParameterValue::Float)
            }
        }
    }
}

/// A single dimension: one parameter of one tunable target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub target: TargetId,
    /// Parameter name passed to the target (e.g. "learning_rate").
    pub name: String,
    pub range: ParameterRange,
}

/// The full search space: an ordered list of (target, parameter, range)
/// triples. The order fixes the position of every value in a candidate
/// point and is used both to build points and to split them back up.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpace {
    dimensions: Vec<Dimension>,
}

impl ParameterSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, target: TargetId, name: impl Into<String>, range: ParameterRange) -> Self {
        self.dimensions.push(Dimension {
            target,
            name: name.into(),
            range,
        });
        self
    }

    pub fn add_float(self, target: TargetId, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.add(target, name, ParameterRange::FloatRange { low, high })
    }

    pub fn add_int(self, target: TargetId, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.add(target, name, ParameterRange::IntRange { low, high })
    }

    pub fn add_log_uniform(
        self,
        target: TargetId,
        name: impl Into<String>,
        low: f64,
        high: f64,
    ) -> Self {
        self.add(target, name, ParameterRange::LogUniform { low, high })
    }

    pub fn add_choice(
        self,
        target: TargetId,
        name: impl Into<String>,
        values: Vec<serde_json::Value>,
    ) -> Self {
        self.add(target, name, ParameterRange::Choice { values })
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    /// Targets in order of first appearance.
    pub fn targets(&self) -> Vec<TargetId> {
        let mut targets: Vec<TargetId> = Vec::new();
        for dim in &self.dimensions {
            if !targets.contains(&dim.target) {
                targets.push(dim.target.clone());
            }
        }
        targets
    }

    /// Check every dimension and reject duplicate (target, name) pairs.
    pub fn validate(&self) -> TuneResult<()> {
        if self.dimensions.is_empty() {
            return Err(config_error!("parameter space has no dimensions"));
        }
        for (index, dim) in self.dimensions.iter().enumerate() {
            dim.range.check().map_err(|message| {
                config_error!(
                    "{}",
                    SurrogateError::InvalidDimension {
                        index,
                        message: format!("{}.{}: {}", dim.target, dim.name, message),
                    }
                )
            })?;
            let duplicate = self.dimensions[..index]
                .iter()
                .any(|d| d.target == dim.target && d.name == dim.name);
            if duplicate {
                return Err(config_error!(
                    "parameter {} declared twice for {}",
                    dim.name,
                    dim.target
                ));
            }
        }
        Ok(())
    }

    fn check_len(&self, actual: usize) -> TuneResult<()> {
        if actual != self.dimensions.len() {
            return Err(SurrogateError::DimensionMismatch {
                expected: self.dimensions.len(),
                actual,
            }
            .into());
        }
        Ok(())
    }

    /// Split a candidate point into per-target assignments, in space order.
    pub fn assignments(
        &self,
        point: &[ParameterValue],
    ) -> TuneResult<Vec<(TargetId, ParameterAssignment)>> {
        self.check_len(point.len())?;
        let mut grouped: Vec<(TargetId, ParameterAssignment)> = Vec::new();
        for (dim, value) in self.dimensions.iter().zip(point) {
            match grouped.iter_mut().find(|(t, _)| *t == dim.target) {
                Some((_, params)) => params.insert(dim.name.clone(), value.clone()),
                None => {
                    let mut params = ParameterAssignment::new();
                    params.insert(dim.name.clone(), value.clone());
                    grouped.push((dim.target.clone(), params));
                }
            }
        }
        Ok(grouped)
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<ParameterValue> {
        self.dimensions.iter().map(|d| d.range.sample(rng)).collect()
    }

    /// Normalize a point into the unit hypercube.
    pub fn to_unit(&self, point: &[ParameterValue]) -> TuneResult<Vec<f64>> {
        self.check_len(point.len())?;
        self.dimensions
            .iter()
            .zip(point)
            .enumerate()
            .map(|(index, (dim, value))| {
                dim.range.to_unit(value).ok_or_else(|| {
                    TuneError::from(SurrogateError::InvalidDimension {
                        index,
                        message: format!("value {value} does not belong to {:?}", dim.range),
                    })
                })
            })
            .collect()
    }

    /// Rewrite every value of `point` in the form this space samples it.
    pub fn canonical(&self, point: &[ParameterValue]) -> TuneResult<Vec<ParameterValue>> {
        self.check_len(point.len())?;
        self.dimensions
            .iter()
            .zip(point)
            .enumerate()
            .map(|(index, (dim, value))| {
                dim.range.canonical(value).ok_or_else(|| {
                    TuneError::from(SurrogateError::InvalidDimension {
                        index,
                        message: format!("value {value} does not belong to {:?}", dim.range),
                    })
                })
            })
            .collect()
    }

    pub fn from_unit(&self, unit: &[f64]) -> TuneResult<Vec<ParameterValue>> {
        self.check_len(unit.len())?;
        Ok(self
            .dimensions
            .iter()
            .zip(unit)
            .map(|(dim, &u)| dim.range.from_unit(u))
            .collect())
    }
}
