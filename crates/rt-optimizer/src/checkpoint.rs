use std::path::{Path, PathBuf};

use tracing::debug;

use rt_types::TuneResult;

use crate::optimizer::Optimizer;

/// Writes optimizer state to a fixed JSON file.
#[derive(Debug, Clone)]
pub struct Checkpointer {
    path: PathBuf,
}

impl Checkpointer {
    /// Creates the parent directories of `path` right away.
    pub fn new<P: AsRef<Path>>(path: P) -> TuneResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the checkpoint. A partially written file never replaces a good one.
    pub fn dump(&self, optimizer: &dyn Optimizer) -> TuneResult<()> {
        let state = optimizer.checkpoint()?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, state)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(
            "Saved optimizer with {} trials to {}",
            optimizer.trials().len(),
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::{AcquisitionFunction, GpOptimizer, GpOptimizerConfig, Observation};
    use crate::space::ParameterSpace;
    use rt_types::TargetId;

    #[test]
    fn creates_parent_dirs_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs").join("nested").join("optimizer.json");
        let checkpointer = Checkpointer::new(&path).unwrap();
        assert!(path.parent().unwrap().is_dir());
        assert!(!path.exists());

        let space = ParameterSpace::new().add_int(TargetId::Ranker, "n_hidden", 1, 10);
        let mut opt = GpOptimizer::new(
            space,
            AcquisitionFunction::GpHedge,
            GpOptimizerConfig::default(),
            4,
            5,
        )
        .unwrap();
        let point = opt.ask().unwrap();
        opt.tell(point, Observation::Loss(0.3)).unwrap();
        checkpointer.dump(&opt).unwrap();

        let loaded = GpOptimizer::load(&path).unwrap();
        assert_eq!(loaded.trials(), opt.trials());
        assert!(!dir.path().join("runs/nested/optimizer.json.tmp").exists());
    }
}
