//! # rt-data
//!
//! Cross-validation fold generators, the fold-plan splitter used by the tuner,
//! and an in-memory ranking dataset reader with CSV loading.

pub mod folds;
pub mod reader;
pub mod splitter;

pub use folds::{CrossValidator, Fold, KFold, ShuffleSplit};
pub use reader::RankingDatasetReader;
pub use splitter::{FoldPlan, Split, Splits};
