use crate::error::Result;
use crate::gas::GasEngine;
use std::any::Any;

/// Observer of a self-consistent run, called around every gas pass.
pub trait IterationHook {
    /// The name of this hook (for identification and timing)
    fn name(&self) -> &str;

    fn as_any(&self) -> &dyn Any;

    /// Called once before the first pass
    fn init_run(&mut self, _engine: &GasEngine) -> Result<()> {
        Ok(())
    }

    /// Called after every iteration, once its transport phases have finished
    fn after_pass(&mut self, _engine: &GasEngine, _iteration: usize) -> Result<()> {
        Ok(())
    }

    /// Called once after the last iteration
    fn after_run(&mut self, _engine: &GasEngine) -> Result<()> {
        Ok(())
    }
}

pub struct IterationHookHandle {
    pub hook: Box<dyn IterationHook>,
}

impl IterationHookHandle {
    pub fn new(hook: Box<dyn IterationHook>) -> Self {
        IterationHookHandle { hook }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureSummary {
    pub iteration: usize,
    pub mean_k: f64,
    pub min_k: f64,
    pub max_k: f64,
}

/// Logs gas temperature statistics after every iteration and keeps them.
#[derive(Debug, Default)]
pub struct TemperatureReportingHook {
    history: Vec<TemperatureSummary>,
}

impl TemperatureReportingHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> &[TemperatureSummary] {
        &self.history
    }

    fn summarize(engine: &GasEngine, iteration: usize) -> Option<TemperatureSummary> {
        let n = engine.num_cells();
        if n == 0 {
            return None;
        }
        let mut total = 0.0;
        let mut min_k = f64::INFINITY;
        let mut max_k = f64::NEG_INFINITY;
        for m in 0..n {
            let t = engine.temperature(m);
            total += t;
            min_k = min_k.min(t);
            max_k = max_k.max(t);
        }
        Some(TemperatureSummary {
            iteration,
            mean_k: total / n as f64,
            min_k,
            max_k,
        })
    }
}

impl IterationHook for TemperatureReportingHook {
    fn name(&self) -> &str {
        "TemperatureReporting"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn after_pass(&mut self, engine: &GasEngine, iteration: usize) -> Result<()> {
        if let Some(summary) = Self::summarize(engine, iteration) {
            log::info!(
                "🌡️  Iteration {}: gas temperature {:.1} K (min {:.1} K, max {:.1} K)",
                iteration,
                summary.mean_k,
                summary.min_k,
                summary.max_k
            );
            self.history.push(summary);
        }
        Ok(())
    }
}
