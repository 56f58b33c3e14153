//! Precomputed cross-validation plans over flat or grouped batches.
//!
//! Folds are computed once, as concrete index lists, and can then be walked
//! any number of times. The tuner relies on this so that every candidate
//! point is evaluated on the same held-out data.

use std::collections::BTreeMap;

use rt_types::{select_rows, Batch, DataError, TuneResult};

use crate::folds::{CrossValidator, Fold};

/// Fold indices for one dataset, shaped like the dataset.
#[derive(Debug, Clone, PartialEq)]
pub enum FoldPlan {
    Flat(Vec<Fold>),
    /// One fold list per problem size; all lists have the same length.
    Grouped(BTreeMap<usize, Vec<Fold>>),
}

/// Train and held-out parts of one fold.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub x_train: Batch,
    pub y_train: Batch,
    pub x_test: Batch,
    pub y_test: Batch,
}

impl FoldPlan {
    /// Ask `cv` for folds over `x`. Groups with a single instance cannot be
    /// split and get a trivial self-split for every fold instead.
    pub fn compute(x: &Batch, cv: &mut dyn CrossValidator) -> TuneResult<Self> {
        match x {
            Batch::Flat(_) => Ok(Self::Flat(cv.split(x.n_samples())?)),
            Batch::Grouped(groups) => {
                if groups.is_empty() {
                    return Err(DataError::Empty {
                        message: "grouped input holds no groups".to_string(),
                    }
                    .into());
                }
                let mut plan = BTreeMap::new();
                for (&n_objects, arr) in groups {
                    let n_instances = arr.shape().first().copied().unwrap_or(0);
                    let folds = if n_instances == 1 {
                        vec![Fold::trivial(); cv.n_splits()]
                    } else {
                        cv.split(n_instances)?
                    };
                    plan.insert(n_objects, folds);
                }
                Ok(Self::Grouped(plan))
            }
        }
    }

    pub fn n_splits(&self) -> usize {
        match self {
            Self::Flat(folds) => folds.len(),
            Self::Grouped(plan) => plan.values().next().map_or(0, Vec::len),
        }
    }

    /// Lazily materialize each fold of `x`/`y`.
    pub fn splits<'a>(&'a self, x: &'a Batch, y: &'a Batch) -> Splits<'a> {
        Splits {
            plan: self,
            x,
            y,
            next: 0,
        }
    }

    fn materialize(&self, i: usize, x: &Batch, y: &Batch) -> TuneResult<Split> {
        match (self, x, y) {
            (Self::Flat(folds), Batch::Flat(_), Batch::Flat(_)) => {
                let fold = &folds[i];
                Ok(Split {
                    x_train: x.select(&fold.train)?,
                    y_train: y.select(&fold.train)?,
                    x_test: x.select(&fold.test)?,
                    y_test: y.select(&fold.test)?,
                })
            }
            (Self::Grouped(plan), Batch::Grouped(xs), Batch::Grouped(ys)) => {
                let mut x_train = BTreeMap::new();
                let mut y_train = BTreeMap::new();
                let mut x_test = BTreeMap::new();
                let mut y_test = BTreeMap::new();
                for (&n_objects, folds) in plan {
                    let fold = folds
                        .get(i)
                        .ok_or_else(|| DataError::InvalidSplit {
                            message: format!("group {n_objects} has only {} folds", folds.len()),
                        })?;
                    let xg = xs.get(&n_objects).ok_or(DataError::GroupMismatch { key: n_objects })?;
                    let yg = ys.get(&n_objects).ok_or(DataError::GroupMismatch { key: n_objects })?;
                    x_train.insert(n_objects, select_rows(xg, &fold.train)?);
                    y_train.insert(n_objects, select_rows(yg, &fold.train)?);
                    x_test.insert(n_objects, select_rows(xg, &fold.test)?);
                    y_test.insert(n_objects, select_rows(yg, &fold.test)?);
                }
                Ok(Split {
                    x_train: Batch::Grouped(x_train),
                    y_train: Batch::Grouped(y_train),
                    x_test: Batch::Grouped(x_test),
                    y_test: Batch::Grouped(y_test),
                })
            }
            _ => Err(DataError::VariantMismatch {
                expected: match self {
                    Self::Flat(_) => "flat",
                    Self::Grouped(_) => "grouped",
                }
                .to_string(),
                actual: if x.is_grouped() { "grouped" } else { "flat" }.to_string(),
            }
            .into()),
        }
    }
}

/// Iterator returned by [`FoldPlan::splits`].
pub struct Splits<'a> {
    plan: &'a FoldPlan,
    x: &'a Batch,
    y: &'a Batch,
    next: usize,
}

impl Iterator for Splits<'_> {
    type Item = TuneResult<Split>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.plan.n_splits() {
            return None;
        }
        let i = self.next;
        self.next += 1;
        Some(self.plan.materialize(i, self.x, self.y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::folds::ShuffleSplit;
    use ndarray::{Array, ArrayD, IxDyn};

    fn features(n: usize, n_objects: usize) -> ArrayD<f64> {
        Array::from_shape_fn(IxDyn(&[n, n_objects, 2]), |idx| idx[0] as f64)
    }

    fn rankings(n: usize, n_objects: usize) -> ArrayD<f64> {
        Array::from_shape_fn(IxDyn(&[n, n_objects]), |idx| idx[1] as f64)
    }

    #[test]
    fn single_instance_group_gets_trivial_folds() {
        let mut groups = BTreeMap::new();
        groups.insert(3, features(1, 3));
        groups.insert(4, features(12, 4));
        let x = Batch::Grouped(groups);

        let mut cv = ShuffleSplit::new(5, 0.25, Some(3)).unwrap();
        let plan = FoldPlan::compute(&x, &mut cv).unwrap();
        match &plan {
            FoldPlan::Grouped(per_group) => {
                assert_eq!(per_group[&3], vec![Fold::trivial(); 5]);
                assert_eq!(per_group[&4].len(), 5);
                assert_eq!(per_group[&4][0].test.len(), 3);
            }
            other => panic!("expected grouped plan, got {other:?}"),
        }
        assert_eq!(plan.n_splits(), 5);
    }

    #[test]
    fn flat_splits_follow_fold_indices() {
        let x = Batch::Flat(features(10, 3));
        let y = Batch::Flat(rankings(10, 3));
        let mut cv = ShuffleSplit::new(2, 0.3, Some(9)).unwrap();
        let plan = FoldPlan::compute(&x, &mut cv).unwrap();

        let splits: Vec<Split> = plan.splits(&x, &y).collect::<TuneResult<_>>().unwrap();
        assert_eq!(splits.len(), 2);
        let FoldPlan::Flat(folds) = &plan else {
            panic!("expected flat plan");
        };
        for (split, fold) in splits.iter().zip(folds) {
            let x_test = split.x_test.as_flat().unwrap();
            assert_eq!(x_test.shape(), &[3, 3, 2]);
            // first feature encodes the original instance index
            for (row, &idx) in fold.test.iter().enumerate() {
                assert_eq!(x_test[[row, 0, 0]], idx as f64);
            }
            assert_eq!(split.y_train.n_samples(), 7);
        }
    }

    #[test]
    fn splits_are_restartable() {
        let x = Batch::Flat(features(8, 3));
        let y = Batch::Flat(rankings(8, 3));
        let mut cv = ShuffleSplit::new(3, 0.25, Some(1)).unwrap();
        let plan = FoldPlan::compute(&x, &mut cv).unwrap();

        let first: Vec<Split> = plan.splits(&x, &y).collect::<TuneResult<_>>().unwrap();
        let second: Vec<Split> = plan.splits(&x, &y).collect::<TuneResult<_>>().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn grouped_splits_cover_every_group() {
        let mut xs = BTreeMap::new();
        let mut ys = BTreeMap::new();
        xs.insert(3, features(1, 3));
        ys.insert(3, rankings(1, 3));
        xs.insert(5, features(10, 5));
        ys.insert(5, rankings(10, 5));
        let x = Batch::Grouped(xs);
        let y = Batch::Grouped(ys);

        let mut cv = ShuffleSplit::new(2, 0.2, Some(4)).unwrap();
        let plan = FoldPlan::compute(&x, &mut cv).unwrap();
        for split in plan.splits(&x, &y) {
            let split = split.unwrap();
            let x_test = split.x_test.groups().unwrap();
            assert_eq!(x_test[&3].shape()[0], 1);
            assert_eq!(x_test[&5].shape()[0], 2);
            assert_eq!(split.y_train.groups().unwrap()[&5].shape()[0], 8);
        }
    }

    #[test]
    fn plan_shape_must_match_batch() {
        let x = Batch::Flat(features(10, 3));
        let y = Batch::Flat(rankings(10, 3));
        let mut cv = ShuffleSplit::new(1, 0.3, Some(2)).unwrap();
        let plan = FoldPlan::compute(&x, &mut cv).unwrap();

        let mut groups = BTreeMap::new();
        groups.insert(3, features(10, 3));
        let grouped = Batch::Grouped(groups);
        let mut splits = plan.splits(&grouped, &y);
        assert!(splits.next().unwrap().is_err());
    }
}
