use super::hooks::{IterationHook, IterationHookHandle};
use crate::convergence::{ConvergenceController, ConvergenceState, EmissionPhase, MaterialType, QuantityObservation};
use crate::error::{GasError, Result};
use crate::executor::DistributedExecutor;
use crate::gas::{GasEngine, MediumState, PassSummary};
use crate::options::SelfConsistentOpacityOptions;
use std::time::{Duration, Instant};

/// Luminosity absorbed during one transport phase, summed over all processes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AbsorbedLuminosity {
    pub gas: f64,
    pub dust: f64,
}

impl AbsorbedLuminosity {
    pub fn of(&self, material: MaterialType) -> f64 {
        match material {
            MaterialType::Gas => self.gas,
            MaterialType::Dust => self.dust,
        }
    }
}

/// The transport side of a self-consistent run: launches packets through the
/// medium using the engine's current opacities and updates the radiation field
/// the next gas pass will read.
pub trait TransportPass: MediumState {
    fn run_phase(&mut self, phase: EmissionPhase, packets: usize, engine: &GasEngine) -> Result<AbsorbedLuminosity>;
}

#[derive(Debug, Clone)]
pub struct PhaseTiming {
    pub phase_name: String,
    pub total_time: Duration,
    pub call_count: u32,
}

impl PhaseTiming {
    pub fn new(phase_name: String) -> Self {
        Self {
            phase_name,
            total_time: Duration::ZERO,
            call_count: 0,
        }
    }

    pub fn avg_time(&self) -> Duration {
        if self.call_count > 0 {
            self.total_time / self.call_count
        } else {
            Duration::ZERO
        }
    }

    fn add(&mut self, elapsed: Duration) {
        self.total_time += elapsed;
        self.call_count += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    Converged { iterations: usize },
    /// `max_iterations` passed without meeting the criteria; the last state stays in use
    NotConverged { iterations: usize },
}

impl IterationOutcome {
    pub fn iterations(&self) -> usize {
        match self {
            IterationOutcome::Converged { iterations } | IterationOutcome::NotConverged { iterations } => *iterations,
        }
    }

    pub fn is_converged(&self) -> bool {
        matches!(self, IterationOutcome::Converged { .. })
    }
}

pub struct IterationProps {
    pub options: SelfConsistentOpacityOptions,
    /// packets per primary phase before the multiplier is applied
    pub primary_packets: usize,
    pub secondary_packets: usize,
    pub hooks: Vec<IterationHookHandle>,
}

const GAS_PHASE: usize = 0;
const PRIMARY_PHASE: usize = 1;
const SECONDARY_PHASE: usize = 2;

/// Alternates gas passes and transport phases until the convergence
/// controller stops the loop.
pub struct SelfConsistentIteration {
    controller: ConvergenceController,
    primary_packets: usize,
    secondary_packets: usize,
    hooks: Vec<Box<dyn IterationHook>>,
    pub phase_timings: Vec<PhaseTiming>,
    pub pass_summaries: Vec<PassSummary>,
}

impl SelfConsistentIteration {
    pub fn new(props: IterationProps) -> Result<Self> {
        Ok(Self {
            controller: ConvergenceController::new(&props.options)?,
            primary_packets: props.primary_packets,
            secondary_packets: props.secondary_packets,
            hooks: props.hooks.into_iter().map(|h| h.hook).collect(),
            phase_timings: vec![
                PhaseTiming::new("gas state".to_string()),
                PhaseTiming::new("primary emission".to_string()),
                PhaseTiming::new("secondary emission".to_string()),
            ],
            pass_summaries: Vec::new(),
        })
    }

    pub fn controller(&self) -> &ConvergenceController {
        &self.controller
    }

    pub fn hooks(&self) -> &[Box<dyn IterationHook>] {
        &self.hooks
    }

    /// The first hook of type `H`, if any.
    pub fn hook<H: IterationHook + 'static>(&self) -> Option<&H> {
        self.hooks.iter().find_map(|h| h.as_any().downcast_ref::<H>())
    }

    /// Runs the loop to completion. A run can execute only once.
    pub fn run<T: TransportPass>(
        &mut self,
        engine: &mut GasEngine,
        executor: &DistributedExecutor,
        transport: &mut T,
    ) -> Result<IterationOutcome> {
        if self.controller.state() != ConvergenceState::NotStarted {
            return Err(GasError::ControllerFinished);
        }

        for hook in self.hooks.iter_mut() {
            hook.init_run(engine)?;
        }

        let with_secondary = self.controller.with_secondary();
        let mut previous_primary: Option<AbsorbedLuminosity> = None;
        let mut previous_secondary: Option<AbsorbedLuminosity> = None;

        loop {
            let iteration = self.controller.iteration() + 1;
            log::info!("Starting self-consistent iteration {iteration}...");

            let start = Instant::now();
            let summary = engine.update_all(executor, &*transport)?;
            self.phase_timings[GAS_PHASE].add(start.elapsed());
            self.pass_summaries.push(summary);

            let start = Instant::now();
            let packets = self.controller.packets_for(EmissionPhase::Primary, self.primary_packets);
            let primary = transport.run_phase(EmissionPhase::Primary, packets, engine)?;
            self.phase_timings[PRIMARY_PHASE].add(start.elapsed());

            let mut observations = Vec::with_capacity(4);
            for material in [MaterialType::Gas, MaterialType::Dust] {
                observations.push(QuantityObservation::primary(
                    material,
                    primary.of(material),
                    previous_primary.map(|p| p.of(material)),
                ));
            }

            if with_secondary {
                let start = Instant::now();
                let packets = self.controller.packets_for(EmissionPhase::Secondary, self.secondary_packets);
                let secondary = transport.run_phase(EmissionPhase::Secondary, packets, engine)?;
                self.phase_timings[SECONDARY_PHASE].add(start.elapsed());

                for material in [MaterialType::Gas, MaterialType::Dust] {
                    observations.push(QuantityObservation::secondary(
                        material,
                        secondary.of(material),
                        previous_secondary.map(|p| p.of(material)),
                        primary.of(material),
                    ));
                }
                previous_secondary = Some(secondary);
            }
            previous_primary = Some(primary);

            for hook in self.hooks.iter_mut() {
                hook.after_pass(engine, iteration)?;
            }

            if self.controller.record(&observations)?.is_terminal() {
                break;
            }
        }

        for hook in self.hooks.iter_mut() {
            hook.after_run(engine)?;
        }
        self.log_timing_report();

        let iterations = self.controller.iteration();
        let outcome = match self.controller.state() {
            ConvergenceState::Converged => IterationOutcome::Converged { iterations },
            _ => IterationOutcome::NotConverged { iterations },
        };
        if !outcome.is_converged() {
            log::warn!("Self-consistent iteration did not converge after {iterations} iterations");
        }
        Ok(outcome)
    }

    pub fn log_timing_report(&self) {
        let total: Duration = self.phase_timings.iter().map(|t| t.total_time).sum();
        log::info!("📊 === SELF-CONSISTENT ITERATION TIMING ===");
        log::info!("🔄 Iterations: {}", self.controller.iteration());
        for timing in self.phase_timings.iter().filter(|t| t.call_count > 0) {
            let share = if total.as_secs_f64() > 0.0 {
                timing.total_time.as_secs_f64() / total.as_secs_f64() * 100.0
            } else {
                0.0
            };
            log::info!(
                "  🔧 {:<20} | Total: {:>10.2}ms | Avg: {:>10.2}ms | Share: {:>5.1}%",
                timing.phase_name,
                timing.total_time.as_secs_f64() * 1e3,
                timing.avg_time().as_secs_f64() * 1e3,
                share
            );
        }
        log::info!("⏱️  Total: {:.2}s", total.as_secs_f64());
    }
}
