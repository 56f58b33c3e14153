//! In-memory object ranking dataset with the usual split entry points.

use std::path::Path;

use ndarray::{Array, ArrayD, IxDyn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use rt_types::{Batch, DataError, TuneResult};

use crate::folds::{KFold, ShuffleSplit};
use crate::splitter::{FoldPlan, Split};

/// Object ranking dataset: `x` is `(n_instances, n_objects, n_features)`,
/// `rankings` is `(n_instances, n_objects)` with rank positions.
#[derive(Debug, Clone)]
pub struct RankingDatasetReader {
    x: ArrayD<f64>,
    rankings: ArrayD<f64>,
    rng: ChaCha8Rng,
}

impl RankingDatasetReader {
    pub fn new(x: ArrayD<f64>, rankings: ArrayD<f64>, seed: Option<u64>) -> TuneResult<Self> {
        if x.ndim() != 3 || rankings.ndim() != 2 {
            return Err(DataError::ShapeMismatch {
                message: format!(
                    "expected x (n, objects, features) and rankings (n, objects), got {:?} and {:?}",
                    x.shape(),
                    rankings.shape()
                ),
            }
            .into());
        }
        if x.shape()[..2] != rankings.shape()[..2] {
            return Err(DataError::ShapeMismatch {
                message: format!(
                    "x has shape {:?} but rankings have shape {:?}",
                    x.shape(),
                    rankings.shape()
                ),
            }
            .into());
        }
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Ok(Self { x, rankings, rng })
    }

    /// Load a CSV file where each row holds `n_objects * n_features` feature
    /// values (object-major) followed by `n_objects` rank positions.
    pub fn load_csv<P: AsRef<Path>>(
        path: P,
        n_objects: usize,
        n_features: usize,
        has_headers: bool,
        seed: Option<u64>,
    ) -> TuneResult<Self> {
        use csv::ReaderBuilder;

        let path = path.as_ref();
        tracing::info!("Loading ranking dataset from: {}", path.display());

        let width = n_objects * n_features + n_objects;
        let mut rdr = ReaderBuilder::new()
            .has_headers(has_headers)
            .from_path(path)
            .map_err(|e| DataError::LoadingFailed {
                message: format!("Failed to open CSV file {}: {}", path.display(), e),
            })?;

        let mut features = Vec::new();
        let mut ranks = Vec::new();
        let mut n_instances = 0;
        for (line_num, result) in rdr.records().enumerate() {
            let line = line_num + if has_headers { 2 } else { 1 };
            let record = result.map_err(|e| DataError::LoadingFailed {
                message: format!("Failed to read CSV record at line {line}: {e}"),
            })?;

            match parse_record(&record, width) {
                Ok(values) => {
                    let split_at = n_objects * n_features;
                    features.extend_from_slice(&values[..split_at]);
                    ranks.extend_from_slice(&values[split_at..]);
                    n_instances += 1;
                }
                Err(e) => {
                    tracing::warn!("Skipping invalid record at line {}: {}", line, e);
                    continue;
                }
            }
        }

        if n_instances == 0 {
            return Err(DataError::Empty {
                message: format!("no valid records in {}", path.display()),
            }
            .into());
        }
        tracing::info!("Loaded {} ranking instances", n_instances);

        let x = Array::from_shape_vec(IxDyn(&[n_instances, n_objects, n_features]), features)
            .map_err(|e| DataError::ParseError {
                message: e.to_string(),
            })?;
        let rankings = Array::from_shape_vec(IxDyn(&[n_instances, n_objects]), ranks)
            .map_err(|e| DataError::ParseError {
                message: e.to_string(),
            })?;
        Self::new(x, rankings, seed)
    }

    pub fn n_instances(&self) -> usize {
        self.x.shape()[0]
    }

    /// The whole dataset, as handed to `ParameterOptimizer::fit`.
    pub fn complete_dataset(&self) -> (Batch, Batch) {
        (Batch::Flat(self.x.clone()), Batch::Flat(self.rankings.clone()))
    }

    /// `n_datasets` shuffled k-fold train/test pairs.
    pub fn train_test_datasets(&mut self, n_datasets: usize) -> TuneResult<Vec<Split>> {
        let mut cv = KFold::new(n_datasets, true, Some(self.rng.gen()))?;
        self.materialize(&mut cv)
    }

    /// One shuffled split holding out 30% of the instances.
    pub fn single_train_test_split(&mut self) -> TuneResult<Split> {
        let mut cv = ShuffleSplit::new(1, 0.30, Some(self.rng.gen()))?;
        self.materialize(&mut cv)?
            .pop()
            .ok_or_else(|| {
                DataError::InvalidSplit {
                    message: "shuffle split produced no fold".to_string(),
                }
                .into()
            })
    }

    fn materialize(&self, cv: &mut dyn crate::CrossValidator) -> TuneResult<Vec<Split>> {
        let (x, y) = self.complete_dataset();
        let plan = FoldPlan::compute(&x, cv)?;
        plan.splits(&x, &y).collect()
    }
}

fn parse_record(record: &csv::StringRecord, width: usize) -> Result<Vec<f64>, String> {
    if record.len() != width {
        return Err(format!(
            "record has {} columns, expected {}",
            record.len(),
            width
        ));
    }
    record
        .iter()
        .map(|field| {
            field
                .trim()
                .parse::<f64>()
                .map_err(|e| format!("invalid number {field:?}: {e}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn toy(n: usize) -> RankingDatasetReader {
        let x = Array::from_shape_fn(IxDyn(&[n, 3, 2]), |idx| (idx[0] + idx[1]) as f64);
        let y = Array::from_shape_fn(IxDyn(&[n, 3]), |idx| idx[1] as f64);
        RankingDatasetReader::new(x, y, Some(17)).unwrap()
    }

    #[test]
    fn single_split_holds_out_thirty_percent() {
        let mut reader = toy(10);
        let split = reader.single_train_test_split().unwrap();
        assert_eq!(split.x_train.n_samples(), 7);
        assert_eq!(split.x_test.n_samples(), 3);
        assert_eq!(split.y_test.n_samples(), 3);
    }

    #[test]
    fn train_test_datasets_yield_requested_count() {
        let mut reader = toy(10);
        let splits = reader.train_test_datasets(5).unwrap();
        assert_eq!(splits.len(), 5);
        let held_out: usize = splits.iter().map(|s| s.x_test.n_samples()).sum();
        assert_eq!(held_out, 10);
    }

    #[test]
    fn rejects_misaligned_shapes() {
        let x = Array::zeros(IxDyn(&[4, 3, 2]));
        let y = Array::zeros(IxDyn(&[5, 3]));
        assert!(RankingDatasetReader::new(x, y, None).is_err());
    }

    #[test]
    fn loads_csv_and_skips_bad_rows() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        // 2 objects x 2 features + 2 ranks per row
        writeln!(file, "f00,f01,f10,f11,r0,r1").unwrap();
        writeln!(file, "0.1,0.2,0.3,0.4,0,1").unwrap();
        writeln!(file, "0.5,oops,0.7,0.8,1,0").unwrap();
        writeln!(file, "0.9,1.0,1.1,1.2,1,0").unwrap();
        file.flush().unwrap();

        let reader = RankingDatasetReader::load_csv(file.path(), 2, 2, true, Some(1)).unwrap();
        assert_eq!(reader.n_instances(), 2);
        let (x, y) = reader.complete_dataset();
        let x = x.as_flat().unwrap();
        assert_eq!(x.shape(), &[2, 2, 2]);
        assert_eq!(x[[1, 1, 0]], 1.1);
        assert_eq!(y.as_flat().unwrap()[[1, 0]], 1.0);
    }
}
