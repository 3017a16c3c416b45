//! Outer-loop convergence decisions for self-consistent opacity iterations.
//!
//! After every transport pass the driver hands the controller one observation
//! per tracked quantity (typically the luminosity absorbed by gas and by dust,
//! per emission phase). The controller answers whether to iterate again.

use crate::error::{GasError, Result};
use crate::options::SelfConsistentOpacityOptions;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MaterialType {
    Gas,
    Dust,
}

impl MaterialType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaterialType::Gas => "gas",
            MaterialType::Dust => "dust",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmissionPhase {
    Primary,
    Secondary,
}

impl EmissionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmissionPhase::Primary => "primary",
            EmissionPhase::Secondary => "secondary",
        }
    }
}

/// Thresholds applied to one material type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceCriterion {
    pub fraction_of_primary: f64,
    pub fraction_of_previous: f64,
}

impl ConvergenceCriterion {
    pub fn for_material(options: &SelfConsistentOpacityOptions, material: MaterialType) -> Self {
        match material {
            MaterialType::Gas => Self {
                fraction_of_primary: options.max_fraction_of_primary_gas,
                fraction_of_previous: options.max_fraction_of_previous_gas,
            },
            MaterialType::Dust => Self {
                fraction_of_primary: options.max_fraction_of_primary_dust,
                fraction_of_previous: options.max_fraction_of_previous_dust,
            },
        }
    }
}

/// One tracked quantity at an iteration boundary, after reduction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantityObservation {
    pub material: MaterialType,
    pub phase: EmissionPhase,
    pub current: f64,
    /// `None` on the first iteration
    pub previous: Option<f64>,
    /// `None` when the quantity has no primary reference (the primary quantity itself)
    pub primary_reference: Option<f64>,
}

impl QuantityObservation {
    pub fn primary(material: MaterialType, current: f64, previous: Option<f64>) -> Self {
        Self {
            material,
            phase: EmissionPhase::Primary,
            current,
            previous,
            primary_reference: None,
        }
    }

    pub fn secondary(material: MaterialType, current: f64, previous: Option<f64>, primary_reference: f64) -> Self {
        Self {
            material,
            phase: EmissionPhase::Secondary,
            current,
            previous,
            primary_reference: Some(primary_reference),
        }
    }

    pub fn label(&self) -> String {
        format!("{} {}", self.phase.as_str(), self.material.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConvergenceState {
    NotStarted,
    Iterating,
    Converged,
    MaxIterationsReached,
}

impl ConvergenceState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConvergenceState::Converged | ConvergenceState::MaxIterationsReached)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConvergenceState::NotStarted => "not started",
            ConvergenceState::Iterating => "iterating",
            ConvergenceState::Converged => "converged",
            ConvergenceState::MaxIterationsReached => "max iterations reached",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuantityVerdict {
    pub label: String,
    /// current / primary reference, `None` when not tested
    pub primary_ratio: Option<f64>,
    /// |current - previous| / previous, `None` on the first iteration
    pub change_ratio: Option<f64>,
    pub converged: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceReport {
    pub iteration: usize,
    pub verdicts: Vec<QuantityVerdict>,
    pub state: ConvergenceState,
}

impl ConvergenceReport {
    fn log(&self) {
        log::info!("Self-consistent iteration {}: {}", self.iteration, self.state.as_str());
        for verdict in &self.verdicts {
            let primary = verdict
                .primary_ratio
                .map(|r| format!("{:.3}%", 100.0 * r))
                .unwrap_or_else(|| "-".into());
            let change = verdict
                .change_ratio
                .map(|r| format!("{:.3}%", 100.0 * r))
                .unwrap_or_else(|| "-".into());
            log::info!(
                "  {:<16} of primary {:>10}  change {:>10}  {}",
                verdict.label,
                primary,
                change,
                if verdict.converged { "ok" } else { "not yet" }
            );
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConvergenceController {
    gas: ConvergenceCriterion,
    dust: ConvergenceCriterion,
    min_iterations: usize,
    max_iterations: usize,
    with_secondary: bool,
    iteration_packets_multiplier: f64,
    secondary_packets_multiplier: f64,
    iteration: usize,
    state: ConvergenceState,
    reports: Vec<ConvergenceReport>,
}

impl ConvergenceController {
    pub fn new(options: &SelfConsistentOpacityOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            gas: ConvergenceCriterion::for_material(options, MaterialType::Gas),
            dust: ConvergenceCriterion::for_material(options, MaterialType::Dust),
            min_iterations: options.min_iterations,
            max_iterations: options.max_iterations,
            with_secondary: options.iterate_secondary,
            iteration_packets_multiplier: options.iteration_packets_multiplier,
            secondary_packets_multiplier: options.secondary_packets_multiplier,
            iteration: 0,
            state: ConvergenceState::NotStarted,
            reports: Vec::new(),
        })
    }

    pub fn criterion(&self, material: MaterialType) -> ConvergenceCriterion {
        match material {
            MaterialType::Gas => self.gas,
            MaterialType::Dust => self.dust,
        }
    }

    pub fn with_secondary(&self) -> bool {
        self.with_secondary
    }

    pub fn min_iterations(&self) -> usize {
        self.min_iterations
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    fn verdict(&self, observation: &QuantityObservation) -> QuantityVerdict {
        let criterion = self.criterion(observation.material);

        let primary_ratio = observation.primary_reference.map(|reference| observation.current / reference);
        let primary_ok = match observation.primary_reference {
            Some(reference) => observation.current <= criterion.fraction_of_primary * reference,
            None => true,
        };

        let change_ratio = observation
            .previous
            .map(|previous| (observation.current - previous).abs() / previous);
        let change_ok = match observation.previous {
            Some(previous) => (observation.current - previous).abs() <= criterion.fraction_of_previous * previous,
            None => false,
        };

        QuantityVerdict {
            label: observation.label(),
            primary_ratio,
            change_ratio,
            converged: primary_ok && change_ok,
        }
    }

    /// Closes one iteration and returns the new state.
    pub fn record(&mut self, observations: &[QuantityObservation]) -> Result<ConvergenceState> {
        if self.state.is_terminal() {
            return Err(GasError::ControllerFinished);
        }
        self.iteration += 1;

        let verdicts: Vec<QuantityVerdict> = observations
            .iter()
            .filter(|o| self.with_secondary || o.phase == EmissionPhase::Primary)
            .map(|o| self.verdict(o))
            .collect();
        let all_converged = verdicts.iter().all(|v| v.converged);

        self.state = if self.iteration >= self.min_iterations && all_converged {
            ConvergenceState::Converged
        } else if self.iteration >= self.max_iterations {
            ConvergenceState::MaxIterationsReached
        } else {
            ConvergenceState::Iterating
        };

        let report = ConvergenceReport {
            iteration: self.iteration,
            verdicts,
            state: self.state,
        };
        report.log();
        self.reports.push(report);
        Ok(self.state)
    }

    pub fn state(&self) -> ConvergenceState {
        self.state
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn reports(&self) -> &[ConvergenceReport] {
        &self.reports
    }

    /// Number of packets to launch for a phase during an iteration.
    pub fn packets_for(&self, phase: EmissionPhase, base: usize) -> usize {
        let multiplier = match phase {
            EmissionPhase::Primary => self.iteration_packets_multiplier,
            EmissionPhase::Secondary => self.secondary_packets_multiplier,
        };
        (base as f64 * multiplier).round() as usize
    }
}
