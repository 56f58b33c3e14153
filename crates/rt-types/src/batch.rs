//! Sample containers shared by rankers, splitters and losses.
//!
//! Ranking data either arrives as one array whose first axis indexes the
//! instances, or grouped by problem size (number of objects per instance),
//! where every group is such an array.

use ndarray::{ArrayD, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::{DataError, TuneResult};

/// Features, labels or predictions for a set of instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Batch {
    /// All instances in one array, instances along axis 0.
    Flat(ArrayD<f64>),
    /// Instances grouped by ranking-problem size.
    Grouped(BTreeMap<usize, ArrayD<f64>>),
}

impl Batch {
    pub fn is_grouped(&self) -> bool {
        matches!(self, Self::Grouped(_))
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Flat(_) => "flat",
            Self::Grouped(_) => "grouped",
        }
    }

    /// Total number of instances across all groups.
    pub fn n_samples(&self) -> usize {
        match self {
            Self::Flat(arr) => instances(arr),
            Self::Grouped(groups) => groups.values().map(instances).sum(),
        }
    }

    pub fn as_flat(&self) -> Option<&ArrayD<f64>> {
        match self {
            Self::Flat(arr) => Some(arr),
            Self::Grouped(_) => None,
        }
    }

    pub fn groups(&self) -> Option<&BTreeMap<usize, ArrayD<f64>>> {
        match self {
            Self::Flat(_) => None,
            Self::Grouped(groups) => Some(groups),
        }
    }

    /// Select instances of a flat batch by index.
    pub fn select(&self, indices: &[usize]) -> TuneResult<Batch> {
        match self {
            Self::Flat(arr) => Ok(Self::Flat(select_rows(arr, indices)?)),
            Self::Grouped(_) => Err(DataError::VariantMismatch {
                expected: "flat".to_string(),
                actual: "grouped".to_string(),
            }
            .into()),
        }
    }

    /// Check that `other` holds labels for exactly these instances.
    pub fn check_aligned(&self, other: &Batch) -> TuneResult<()> {
        match (self, other) {
            (Self::Flat(x), Self::Flat(y)) => {
                if x.ndim() == 0 || y.ndim() == 0 || instances(x) != instances(y) {
                    return Err(DataError::ShapeMismatch {
                        message: format!(
                            "features have shape {:?}, labels have shape {:?}",
                            x.shape(),
                            y.shape()
                        ),
                    }
                    .into());
                }
                Ok(())
            }
            (Self::Grouped(xs), Self::Grouped(ys)) => {
                if xs.len() != ys.len() {
                    return Err(DataError::ShapeMismatch {
                        message: format!(
                            "features have {} groups, labels have {}",
                            xs.len(),
                            ys.len()
                        ),
                    }
                    .into());
                }
                for (key, x) in xs {
                    let y = ys.get(key).ok_or(DataError::GroupMismatch { key: *key })?;
                    if x.ndim() == 0 || y.ndim() == 0 || instances(x) != instances(y) {
                        return Err(DataError::GroupMismatch { key: *key }.into());
                    }
                }
                Ok(())
            }
            _ => Err(DataError::VariantMismatch {
                expected: self.kind().to_string(),
                actual: other.kind().to_string(),
            }
            .into()),
        }
    }
}

fn instances(arr: &ArrayD<f64>) -> usize {
    if arr.ndim() == 0 {
        0
    } else {
        arr.len_of(Axis(0))
    }
}

/// Copy the rows of `arr` (axis 0) named by `indices`.
pub fn select_rows(arr: &ArrayD<f64>, indices: &[usize]) -> TuneResult<ArrayD<f64>> {
    let n = instances(arr);
    if let Some(&bad) = indices.iter().find(|&&i| i >= n) {
        return Err(DataError::InvalidSplit {
            message: format!("index {bad} out of range for {n} instances"),
        }
        .into());
    }
    Ok(arr.select(Axis(0), indices))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, IxDyn};

    fn rows(n: usize, width: usize) -> ArrayD<f64> {
        Array::from_shape_fn(IxDyn(&[n, width]), |idx| (idx[0] * 10 + idx[1]) as f64)
    }

    #[test]
    fn select_copies_requested_rows() {
        let batch = Batch::Flat(rows(5, 2));
        let picked = batch.select(&[4, 1]).unwrap();
        let arr = picked.as_flat().unwrap();
        assert_eq!(arr.shape(), &[2, 2]);
        assert_eq!(arr[[0, 0]], 40.0);
        assert_eq!(arr[[1, 1]], 11.0);
    }

    #[test]
    fn select_rejects_out_of_range_index() {
        let batch = Batch::Flat(rows(3, 2));
        assert!(batch.select(&[0, 3]).is_err());
    }

    #[test]
    fn grouped_sample_count_sums_groups() {
        let mut groups = BTreeMap::new();
        groups.insert(3, rows(4, 3));
        groups.insert(5, rows(1, 5));
        let batch = Batch::Grouped(groups);
        assert!(batch.is_grouped());
        assert_eq!(batch.n_samples(), 5);
        assert!(batch.select(&[0]).is_err());
    }

    #[test]
    fn alignment_checks_variant_and_lengths() {
        let x = Batch::Flat(rows(4, 3));
        assert!(x.check_aligned(&Batch::Flat(rows(4, 1))).is_ok());
        assert!(x.check_aligned(&Batch::Flat(rows(3, 1))).is_err());

        let mut groups = BTreeMap::new();
        groups.insert(3, rows(4, 3));
        assert!(x.check_aligned(&Batch::Grouped(groups)).is_err());
    }
}
