//! Hooks notified around the search loop.

use tracing::info;

use rt_types::TuneResult;

use crate::optimizer::Optimizer;

/// Observer of a tuning run. Every hook defaults to a no-op.
///
/// Hooks get the live optimizer so they can inspect trials as they arrive.
/// Returning an error aborts the run; `on_optimization_end` still fires.
pub trait TuningCallback: Send {
    fn set_optimizer(&mut self, _optimizer: &dyn Optimizer) -> TuneResult<()> {
        Ok(())
    }

    fn on_optimization_begin(&mut self, _optimizer: &dyn Optimizer) -> TuneResult<()> {
        Ok(())
    }

    fn on_optimization_end(&mut self, _optimizer: &dyn Optimizer) -> TuneResult<()> {
        Ok(())
    }

    fn on_iteration_begin(
        &mut self,
        _iteration: usize,
        _optimizer: &dyn Optimizer,
    ) -> TuneResult<()> {
        Ok(())
    }

    fn on_iteration_end(
        &mut self,
        _iteration: usize,
        _optimizer: &dyn Optimizer,
    ) -> TuneResult<()> {
        Ok(())
    }
}

/// Ordered callbacks; dispatch stops at the first error.
#[derive(Default)]
pub struct CallbackRegistry {
    callbacks: Vec<Box<dyn TuningCallback>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, callback: Box<dyn TuningCallback>) {
        self.callbacks.push(callback);
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn set_optimizer(&mut self, optimizer: &dyn Optimizer) -> TuneResult<()> {
        for cb in &mut self.callbacks {
            cb.set_optimizer(optimizer)?;
        }
        Ok(())
    }

    pub fn on_optimization_begin(&mut self, optimizer: &dyn Optimizer) -> TuneResult<()> {
        info!("Optimizer begin");
        for cb in &mut self.callbacks {
            cb.on_optimization_begin(optimizer)?;
        }
        Ok(())
    }

    pub fn on_optimization_end(&mut self, optimizer: &dyn Optimizer) -> TuneResult<()> {
        info!("Optimizer end");
        for cb in &mut self.callbacks {
            cb.on_optimization_end(optimizer)?;
        }
        Ok(())
    }

    pub fn on_iteration_begin(
        &mut self,
        iteration: usize,
        optimizer: &dyn Optimizer,
    ) -> TuneResult<()> {
        info!("Optimizer iteration begin {}", iteration);
        for cb in &mut self.callbacks {
            cb.on_iteration_begin(iteration, optimizer)?;
        }
        Ok(())
    }

    pub fn on_iteration_end(
        &mut self,
        iteration: usize,
        optimizer: &dyn Optimizer,
    ) -> TuneResult<()> {
        info!("Optimizer iteration end {}", iteration);
        for cb in &mut self.callbacks {
            cb.on_iteration_end(iteration, optimizer)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::{AcquisitionFunction, GpOptimizer, GpOptimizerConfig};
    use crate::space::ParameterSpace;
    use rt_types::{validation_error, TargetId};
    use std::sync::{Arc, Mutex};

    struct Recorder {
        tag: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_on_begin: bool,
    }

    impl TuningCallback for Recorder {
        fn on_optimization_begin(&mut self, _optimizer: &dyn Optimizer) -> TuneResult<()> {
            self.log.lock().unwrap().push(format!("{}:begin", self.tag));
            if self.fail_on_begin {
                return Err(validation_error!("{} refused to start", self.tag));
            }
            Ok(())
        }

        fn on_iteration_end(
            &mut self,
            iteration: usize,
            optimizer: &dyn Optimizer,
        ) -> TuneResult<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:end{}:{}", self.tag, iteration, optimizer.trials().len()));
            Ok(())
        }
    }

    fn optimizer() -> GpOptimizer {
        let space = ParameterSpace::new().add_float(TargetId::Ranker, "alpha", 0.0, 1.0);
        GpOptimizer::new(
            space,
            AcquisitionFunction::Ei,
            GpOptimizerConfig::default(),
            0,
            0,
        )
        .unwrap()
    }

    #[test]
    fn empty_registry_is_a_no_op() {
        let mut registry = CallbackRegistry::new();
        let opt = optimizer();
        assert!(registry.is_empty());
        registry.set_optimizer(&opt).unwrap();
        registry.on_optimization_begin(&opt).unwrap();
        registry.on_iteration_begin(0, &opt).unwrap();
        registry.on_iteration_end(0, &opt).unwrap();
        registry.on_optimization_end(&opt).unwrap();
    }

    #[test]
    fn dispatch_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = CallbackRegistry::new();
        for tag in ["a", "b"] {
            registry.register(Box::new(Recorder {
                tag,
                log: log.clone(),
                fail_on_begin: false,
            }));
        }
        let opt = optimizer();
        registry.on_optimization_begin(&opt).unwrap();
        registry.on_iteration_end(3, &opt).unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:begin", "b:begin", "a:end3:0", "b:end3:0"]
        );
    }

    #[test]
    fn first_error_stops_dispatch() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = CallbackRegistry::new();
        registry.register(Box::new(Recorder {
            tag: "a",
            log: log.clone(),
            fail_on_begin: true,
        }));
        registry.register(Box::new(Recorder {
            tag: "b",
            log: log.clone(),
            fail_on_begin: false,
        }));
        let opt = optimizer();
        assert!(registry.on_optimization_begin(&opt).is_err());
        assert_eq!(*log.lock().unwrap(), vec!["a:begin"]);
    }
}
