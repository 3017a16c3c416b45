//! Run configuration: self-consistent iteration settings and engine settings.
//!
//! Field names follow the camelCase spelling used in configuration files, so
//! `{"minIterations": 4}` is a valid options file; anything left out keeps its
//! default.

use crate::constants::{
    DEFAULT_FRACTION_OF_PRIMARY, DEFAULT_MAX_FRACTION_OF_PREVIOUS, DEFAULT_MAX_ITERATIONS,
    DEFAULT_MIN_ITERATIONS, DEFAULT_PACKETS_MULTIPLIER, ITERATION_BOUND_MAX, ITERATION_BOUND_MIN,
    PACKETS_MULTIPLIER_MAX, VERBOSE_CELL_INTERVAL,
};
use crate::error::{GasError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SelfConsistentOpacityOptions {
    /// also include secondary emission in the convergence decision
    pub iterate_secondary: bool,
    pub min_iterations: usize,
    pub max_iterations: usize,
    pub max_fraction_of_primary_gas: f64,
    pub max_fraction_of_previous_gas: f64,
    pub max_fraction_of_primary_dust: f64,
    pub max_fraction_of_previous_dust: f64,
    pub iteration_packets_multiplier: f64,
    pub secondary_packets_multiplier: f64,
}

impl Default for SelfConsistentOpacityOptions {
    fn default() -> Self {
        Self {
            iterate_secondary: true,
            min_iterations: DEFAULT_MIN_ITERATIONS,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_fraction_of_primary_gas: DEFAULT_FRACTION_OF_PRIMARY,
            max_fraction_of_previous_gas: DEFAULT_MAX_FRACTION_OF_PREVIOUS,
            max_fraction_of_primary_dust: DEFAULT_FRACTION_OF_PRIMARY,
            max_fraction_of_previous_dust: DEFAULT_MAX_FRACTION_OF_PREVIOUS,
            iteration_packets_multiplier: DEFAULT_PACKETS_MULTIPLIER,
            secondary_packets_multiplier: DEFAULT_PACKETS_MULTIPLIER,
        }
    }
}

fn check_open_unit(name: &str, value: f64) -> Result<()> {
    if value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(GasError::options(format!("{name} must lie in (0, 1), got {value}")))
    }
}

impl SelfConsistentOpacityOptions {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("minIterations", self.min_iterations),
            ("maxIterations", self.max_iterations),
        ] {
            if !(ITERATION_BOUND_MIN..=ITERATION_BOUND_MAX).contains(&value) {
                return Err(GasError::options(format!(
                    "{name} must lie in [{ITERATION_BOUND_MIN}, {ITERATION_BOUND_MAX}], got {value}"
                )));
            }
        }
        if self.min_iterations > self.max_iterations {
            return Err(GasError::options(format!(
                "minIterations ({}) exceeds maxIterations ({})",
                self.min_iterations, self.max_iterations
            )));
        }

        check_open_unit("maxFractionOfPrimaryGas", self.max_fraction_of_primary_gas)?;
        check_open_unit("maxFractionOfPreviousGas", self.max_fraction_of_previous_gas)?;
        check_open_unit("maxFractionOfPrimaryDust", self.max_fraction_of_primary_dust)?;
        check_open_unit("maxFractionOfPreviousDust", self.max_fraction_of_previous_dust)?;

        for (name, value) in [
            ("iterationPacketsMultiplier", self.iteration_packets_multiplier),
            ("secondaryPacketsMultiplier", self.secondary_packets_multiplier),
        ] {
            if !(value > 0.0 && value <= PACKETS_MULTIPLIER_MAX) {
                return Err(GasError::options(format!(
                    "{name} must lie in (0, {PACKETS_MULTIPLIER_MAX}], got {value}"
                )));
            }
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineOptions {
    /// worker threads per process, 0 lets rayon decide
    pub num_threads: usize,
    /// every n-th cell of a pass is logged in detail; 0 disables
    pub verbose_cell_interval: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            num_threads: 0,
            verbose_cell_interval: VERBOSE_CELL_INTERVAL,
        }
    }
}

impl EngineOptions {
    pub fn is_verbose_cell(&self, m: usize) -> bool {
        self.verbose_cell_interval != 0 && m % self.verbose_cell_interval == 0
    }
}

/// Everything a self-consistent run reads from its options file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunOptions {
    pub opacity: SelfConsistentOpacityOptions,
    pub engine: EngineOptions,
}

impl RunOptions {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.opacity.validate()?;
        Ok(options)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }
}
