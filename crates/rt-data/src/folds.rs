//! Fold generators over the sample axis.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use rt_types::{config_error, DataError, TuneResult};

/// One train/test partition of sample indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fold {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

impl Fold {
    /// Self-split used for groups holding a single instance.
    pub fn trivial() -> Self {
        Self {
            train: vec![0],
            test: vec![0],
        }
    }
}

/// Produces repeatable cross-validation folds for `n_samples` instances.
pub trait CrossValidator: Send {
    fn n_splits(&self) -> usize;

    fn split(&mut self, n_samples: usize) -> TuneResult<Vec<Fold>>;
}

fn seeded(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    }
}

/// Repeated random sub-sampling: every split draws a fresh permutation and
/// holds out the first `ceil(test_size * n)` indices.
#[derive(Debug, Clone)]
pub struct ShuffleSplit {
    n_splits: usize,
    test_size: f64,
    rng: ChaCha8Rng,
}

impl ShuffleSplit {
    pub fn new(n_splits: usize, test_size: f64, seed: Option<u64>) -> TuneResult<Self> {
        if n_splits == 0 {
            return Err(config_error!("ShuffleSplit needs at least one split"));
        }
        if !(test_size > 0.0 && test_size < 1.0) {
            return Err(config_error!(
                "test_size must lie strictly between 0 and 1, got {test_size}"
            ));
        }
        Ok(Self {
            n_splits,
            test_size,
            rng: seeded(seed),
        })
    }

    pub fn test_size(&self) -> f64 {
        self.test_size
    }
}

impl CrossValidator for ShuffleSplit {
    fn n_splits(&self) -> usize {
        self.n_splits
    }

    fn split(&mut self, n_samples: usize) -> TuneResult<Vec<Fold>> {
        let n_test = (self.test_size * n_samples as f64).ceil() as usize;
        let n_train = n_samples.saturating_sub(n_test);
        if n_test == 0 || n_train == 0 {
            return Err(DataError::InvalidSplit {
                message: format!(
                    "test_size={} on {} samples leaves train={} test={}",
                    self.test_size, n_samples, n_train, n_test
                ),
            }
            .into());
        }

        let mut folds = Vec::with_capacity(self.n_splits);
        for _ in 0..self.n_splits {
            let mut permutation: Vec<usize> = (0..n_samples).collect();
            permutation.shuffle(&mut self.rng);
            let train = permutation[n_test..].to_vec();
            permutation.truncate(n_test);
            folds.push(Fold {
                train,
                test: permutation,
            });
        }
        Ok(folds)
    }
}

/// K consecutive folds over (optionally shuffled) indices; the first
/// `n % k` folds are one sample larger.
#[derive(Debug, Clone)]
pub struct KFold {
    n_splits: usize,
    shuffle: bool,
    rng: ChaCha8Rng,
}

impl KFold {
    pub fn new(n_splits: usize, shuffle: bool, seed: Option<u64>) -> TuneResult<Self> {
        if n_splits < 2 {
            return Err(config_error!(
                "KFold needs at least two splits, got {n_splits}"
            ));
        }
        Ok(Self {
            n_splits,
            shuffle,
            rng: seeded(seed),
        })
    }
}

impl CrossValidator for KFold {
    fn n_splits(&self) -> usize {
        self.n_splits
    }

    fn split(&mut self, n_samples: usize) -> TuneResult<Vec<Fold>> {
        if n_samples < self.n_splits {
            return Err(DataError::InvalidSplit {
                message: format!(
                    "cannot make {} folds from {} samples",
                    self.n_splits, n_samples
                ),
            }
            .into());
        }

        let mut indices: Vec<usize> = (0..n_samples).collect();
        if self.shuffle {
            indices.shuffle(&mut self.rng);
        }

        let base = n_samples / self.n_splits;
        let extra = n_samples % self.n_splits;
        let mut folds = Vec::with_capacity(self.n_splits);
        let mut start = 0;
        for k in 0..self.n_splits {
            let stop = start + base + usize::from(k < extra);
            let mut in_test = vec![false; n_samples];
            for &i in &indices[start..stop] {
                in_test[i] = true;
            }
            let (test, train): (Vec<usize>, Vec<usize>) =
                (0..n_samples).partition(|&i| in_test[i]);
            folds.push(Fold { train, test });
            start = stop;
        }
        Ok(folds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn single_shuffle_split_partitions_all_indices() {
        let mut cv = ShuffleSplit::new(1, 0.3, Some(42)).unwrap();
        let folds = cv.split(10).unwrap();
        assert_eq!(folds.len(), 1);

        let fold = &folds[0];
        assert_eq!(fold.train.len(), 7);
        assert_eq!(fold.test.len(), 3);

        let train: HashSet<usize> = fold.train.iter().copied().collect();
        let test: HashSet<usize> = fold.test.iter().copied().collect();
        assert!(train.is_disjoint(&test));
        let all: HashSet<usize> = train.union(&test).copied().collect();
        assert_eq!(all, (0..10).collect());
    }

    #[test]
    fn default_shuffle_split_holds_out_ten_percent() {
        let mut cv = ShuffleSplit::new(3, 0.1, Some(7)).unwrap();
        let folds = cv.split(25).unwrap();
        assert_eq!(folds.len(), 3);
        for fold in &folds {
            assert_eq!(fold.test.len(), 3); // ceil(2.5)
            assert_eq!(fold.train.len(), 22);
        }
    }

    #[test]
    fn same_seed_gives_same_folds() {
        let a = ShuffleSplit::new(3, 0.2, Some(11)).unwrap().split(20).unwrap();
        let b = ShuffleSplit::new(3, 0.2, Some(11)).unwrap().split(20).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn shuffle_split_rejects_degenerate_sizes() {
        assert!(ShuffleSplit::new(0, 0.1, None).is_err());
        assert!(ShuffleSplit::new(3, 1.0, None).is_err());
        let mut cv = ShuffleSplit::new(3, 0.1, Some(1)).unwrap();
        assert!(cv.split(1).is_err());
    }

    #[test]
    fn kfold_covers_every_index_once_as_test() {
        let mut cv = KFold::new(3, true, Some(5)).unwrap();
        let folds = cv.split(10).unwrap();
        let sizes: Vec<usize> = folds.iter().map(|f| f.test.len()).collect();
        assert_eq!(sizes, vec![4, 3, 3]);

        let mut seen: Vec<usize> = folds.iter().flat_map(|f| f.test.clone()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        for fold in &folds {
            assert_eq!(fold.train.len() + fold.test.len(), 10);
        }
    }

    #[test]
    fn unshuffled_kfold_is_contiguous() {
        let mut cv = KFold::new(2, false, None).unwrap();
        let folds = cv.split(4).unwrap();
        assert_eq!(folds[0].test, vec![0, 1]);
        assert_eq!(folds[0].train, vec![2, 3]);
        assert_eq!(folds[1].test, vec![2, 3]);
    }
}
