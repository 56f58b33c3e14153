//! Parameter values, per-target assignments and fit parameters.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A concrete parameter value proposed by the optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    // Int before Float so integral JSON numbers round-trip as integers.
    Int(i64),
    Float(f64),
    Json(serde_json::Value),
}

impl ParameterValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Json(v) => v.as_f64(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(_) => None,
            Self::Json(v) => v.as_i64(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Json(v) => v.as_str(),
            _ => None,
        }
    }

    /// The value as plain JSON. `None` for non-finite floats.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        match self {
            Self::Int(v) => Some(serde_json::Value::from(*v)),
            Self::Float(v) => serde_json::Number::from_f64(*v).map(serde_json::Value::Number),
            Self::Json(v) => Some(v.clone()),
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

/// The object a group of parameters is applied to: the ranker itself or one
/// of its named sub-components (optimizer, regularizer, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TargetId {
    Ranker,
    Component(String),
}

impl TargetId {
    pub fn component(name: impl Into<String>) -> Self {
        Self::Component(name.into())
    }
}

impl std::fmt::Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ranker => write!(f, "ranker"),
            Self::Component(name) => write!(f, "{name}"),
        }
    }
}

/// Ordered name/value pairs handed to one tunable target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterAssignment {
    values: Vec<(String, ParameterValue)>,
}

impl ParameterAssignment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ParameterValue) {
        let name = name.into();
        match self.values.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.values.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(ParameterValue::as_f64)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(ParameterValue::as_i64)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParameterValue)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::fmt::Display for ParameterAssignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        write!(f, "}}")
    }
}

/// Parameters forwarded to every `Ranker::fit` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitParams {
    pub epochs: Option<usize>,
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl FitParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = Some(epochs);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_none() && self.batch_size.is_none() && self.extra.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untagged_values_keep_their_kind() {
        let values = vec![
            ParameterValue::Int(7),
            ParameterValue::Float(0.25),
            ParameterValue::Json(serde_json::json!("relu")),
        ];
        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(json, r#"[7,0.25,"relu"]"#);
        let back: Vec<ParameterValue> = serde_json::from_str(&json).unwrap();
        assert_eq!(values, back);
    }

    #[test]
    fn assignment_preserves_insertion_order_and_overwrites() {
        let mut params = ParameterAssignment::new();
        params.insert("n_hidden", ParameterValue::Int(8));
        params.insert("learning_rate", ParameterValue::Float(0.01));
        params.insert("n_hidden", ParameterValue::Int(16));

        let names: Vec<&str> = params.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["n_hidden", "learning_rate"]);
        assert_eq!(params.get_i64("n_hidden"), Some(16));
        assert_eq!(params.get_f64("learning_rate"), Some(0.01));
        assert_eq!(params.to_string(), "{n_hidden: 16, learning_rate: 0.01}");
    }

    #[test]
    fn empty_fit_params() {
        assert!(FitParams::new().is_empty());
        assert!(!FitParams::new().with_epochs(10).is_empty());
        assert!(!FitParams::new()
            .with_extra("verbose", serde_json::json!(0))
            .is_empty());
    }
}
