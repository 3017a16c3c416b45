// src/bin/self_consistent_demo.rs - self-consistent gas opacity iteration on a toy slab
//
// Usage: self_consistent_demo [options.json]
//
// Runs three cooperating in-memory processes. Every process owns a contiguous
// block of slab cells, computes their gas state on its own worker pool, and
// the opacity table is summed across processes after every pass.

use colored::Colorize;
use gas_opacity_rust::constants::{BOLTZMANN_J_K, PLANCK_J_S, SPEED_OF_LIGHT_M_S};
use gas_opacity_rust::convergence::EmissionPhase;
use gas_opacity_rust::executor::block_range;
use gas_opacity_rust::iteration::{
    AbsorbedLuminosity, IterationHookHandle, IterationProps, SelfConsistentIteration, TemperatureReportingHook,
    TransportPass,
};
use gas_opacity_rust::probe::GasProbe;
use gas_opacity_rust::{
    DistributedExecutor, DustPopulation, GasEngine, GasError, LocalProcessGroup, MediumState, ProcessGroup,
    ReferenceSolver, Result, RunOptions,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::thread;

const NUM_PROCESSES: usize = 3;
const NUM_CELLS: usize = 60;
const CELL_WIDTH_M: f64 = 3.0e15;
const STELLAR_TEMPERATURE_K: f64 = 40_000.0;
const BASE_PACKETS: usize = 1_000_000;

fn log_grid(min: f64, max: f64, n: usize) -> Vec<f64> {
    let ratio = (max / min).powf(1.0 / (n - 1) as f64);
    (0..n).map(|i| min * ratio.powi(i as i32)).collect()
}

/// Diluted blackbody J_λ (W m-2 sr-1 m-1).
fn stellar_field(wavelengths: &[f64]) -> Vec<f64> {
    let dilution = 1.0e-14;
    wavelengths
        .iter()
        .map(|lambda| {
            let x = PLANCK_J_S * SPEED_OF_LIGHT_M_S / (lambda * BOLTZMANN_J_K * STELLAR_TEMPERATURE_K);
            dilution * 2.0 * PLANCK_J_S * SPEED_OF_LIGHT_M_S * SPEED_OF_LIGHT_M_S / lambda.powi(5) / x.exp_m1()
        })
        .collect()
}

fn silicate(wavelengths: &[f64]) -> DustPopulation {
    let sizes = vec![1.0e-8, 1.0e-7];
    let qabs = sizes
        .iter()
        .map(|a| {
            wavelengths
                .iter()
                .map(|lambda| (2.0 * std::f64::consts::PI * a / lambda).min(1.0))
                .collect()
        })
        .collect();
    DustPopulation {
        h: 1,
        grain_type: "DraineSilicate".into(),
        sizes,
        number_density_ratios: vec![1.0e-10, 1.0e-12],
        qabs,
    }
}

/// A one-dimensional slab lit from one side. The radiation field is attenuated
/// by the gas opacity of the previous pass plus a fixed dust opacity.
struct SlabTransport {
    group: Arc<LocalProcessGroup>,
    wavelengths: Vec<f64>,
    source: Vec<f64>,
    gas_density: Vec<f64>,
    field: Vec<Vec<f64>>,
    dust_opacity: f64,
    rng: StdRng,
}

impl SlabTransport {
    fn new(group: Arc<LocalProcessGroup>, wavelengths: Vec<f64>) -> Self {
        let source = stellar_field(&wavelengths);
        let gas_density = (0..NUM_CELLS)
            .map(|m| 1.0e8 * (1.0 + 0.5 * (m as f64 / 7.0).sin()))
            .collect();
        Self {
            group,
            field: vec![source.clone(); NUM_CELLS],
            wavelengths,
            source,
            gas_density,
            dust_opacity: 2.0e-18,
            // same seed on every process, so the sampled noise agrees everywhere
            rng: StdRng::seed_from_u64(20_240_611),
        }
    }

    fn propagate(&mut self, engine: &GasEngine) -> AbsorbedLuminosity {
        let mut depth = vec![0.0_f64; self.wavelengths.len()];
        let owned = block_range(NUM_CELLS, self.group.size(), self.group.rank());
        let mut absorbed = AbsorbedLuminosity::default();

        for m in 0..NUM_CELLS {
            for (ell, tau) in depth.iter_mut().enumerate() {
                let kappa_gas = engine.opacity_abs_at(ell, m);
                let kappa_dust = self.dust_opacity * self.gas_density[m];
                let j = self.source[ell] * (-*tau).exp();
                self.field[m][ell] = j;
                if owned.contains(&m) {
                    let dlambda = if ell + 1 < self.wavelengths.len() {
                        self.wavelengths[ell + 1] - self.wavelengths[ell]
                    } else {
                        0.0
                    };
                    absorbed.gas += 4.0 * std::f64::consts::PI * kappa_gas * j * dlambda;
                    absorbed.dust += 4.0 * std::f64::consts::PI * kappa_dust * j * dlambda;
                }
                *tau += (kappa_gas + kappa_dust) * CELL_WIDTH_M;
            }
        }
        absorbed
    }
}

impl MediumState for SlabTransport {
    fn num_cells(&self) -> usize {
        NUM_CELLS
    }

    fn mean_intensity(&self, m: usize) -> Vec<f64> {
        self.field[m].clone()
    }

    fn gas_number_density(&self, m: usize) -> f64 {
        self.gas_density[m]
    }

    fn number_density(&self, m: usize, _h: usize) -> f64 {
        self.gas_density[m]
    }
}

impl TransportPass for SlabTransport {
    fn run_phase(&mut self, phase: EmissionPhase, packets: usize, engine: &GasEngine) -> Result<AbsorbedLuminosity> {
        let local = self.propagate(engine);
        let mut totals = [local.gas, local.dust];
        self.group.sum_to_all(&mut totals)?;

        let noise = 1.0 / (packets.max(1) as f64).sqrt();
        let mut sample = |value: f64| value * (1.0 + noise * self.rng.random_range(-1.0..1.0));
        let absorbed = AbsorbedLuminosity {
            gas: sample(totals[0]),
            dust: sample(totals[1]),
        };
        Ok(match phase {
            EmissionPhase::Primary => absorbed,
            // re-emission by the heated medium, a small fraction of what it absorbed
            EmissionPhase::Secondary => AbsorbedLuminosity {
                gas: 0.002 * absorbed.dust,
                dust: 0.004 * absorbed.gas,
            },
        })
    }
}

fn run_rank(group: LocalProcessGroup, options: RunOptions) -> Result<()> {
    let group = Arc::new(group);
    let is_root = group.is_root();
    let executor = DistributedExecutor::new(group.clone(), options.engine.num_threads.max(2))?;

    let wavelengths = log_grid(5.0e-8, 1.0e-3, 60);
    let emission_wavelengths = log_grid(1.0e-6, 1.0e-4, 20);
    let mut engine = GasEngine::new(Some(Arc::new(ReferenceSolver::default())), options.engine.clone());
    engine.initialize(wavelengths.clone(), vec![silicate(&wavelengths)], emission_wavelengths)?;
    engine.allocate(NUM_CELLS)?;

    let mut transport = SlabTransport::new(group, wavelengths);
    let mut iteration = SelfConsistentIteration::new(IterationProps {
        options: options.opacity.clone(),
        primary_packets: BASE_PACKETS,
        secondary_packets: BASE_PACKETS / 10,
        hooks: if is_root {
            vec![IterationHookHandle::new(Box::new(TemperatureReportingHook::new()))]
        } else {
            Vec::new()
        },
    })?;
    let outcome = iteration.run(&mut engine, &executor, &mut transport)?;

    let table = GasProbe::new(true).collect(&engine, &executor, &transport)?;
    if is_root {
        let status = if outcome.is_converged() {
            "converged".green().bold()
        } else {
            "did not converge".yellow().bold()
        };
        println!("\n🔁 Self-consistent iteration {} after {} iterations", status, outcome.iterations());
        if let Some(table) = table {
            println!("{:>6} {:>12} {:>12} {:>12} {:>12}", "cell", "T (K)", "np", "nH", "nH2");
            for m in (0..table.num_rows()).step_by(10) {
                let row = table.row(m);
                println!(
                    "{:>6} {:>12.1} {:>12.4e} {:>12.4e} {:>12.4e}",
                    m, row[1], row[2], row[3], row[4]
                );
            }
        }
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options = match std::env::args().nth(1) {
        Some(path) => RunOptions::from_json_file(&path),
        None => Ok(RunOptions::default()),
    };
    let options = match options {
        Ok(options) => options,
        Err(err) => {
            eprintln!("{} {}", "error:".red().bold(), err);
            std::process::exit(2);
        }
    };

    let handles: Vec<_> = LocalProcessGroup::create(NUM_PROCESSES)
        .into_iter()
        .map(|group| {
            let options = options.clone();
            thread::Builder::new()
                .name(format!("rank-{}", group.rank()))
                .spawn(move || run_rank(group, options))
        })
        .collect();

    let mut failed = false;
    for handle in handles {
        let result = match handle {
            Ok(handle) => handle
                .join()
                .unwrap_or_else(|_| Err(GasError::Collective("a rank panicked".into()))),
            Err(err) => Err(GasError::Io(err)),
        };
        if let Err(err) = result {
            eprintln!("{} {}", "error:".red().bold(), err);
            failed = true;
        }
    }
    if failed {
        std::process::exit(1);
    }
}
