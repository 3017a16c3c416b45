//! Common utilities for integration tests

#![allow(dead_code)]

pub mod mock_medium;
pub mod mock_solver;

pub use mock_medium::{FixedTransport, MockMedium};
pub use mock_solver::{MockSolver, expected_opacity};

use gas_opacity_rust::{DustPopulation, GasEngine, ProcessGroup};
use std::sync::Arc;

/// Wavelength grid shared by most tests (m).
pub fn wavelengths() -> Vec<f64> {
    vec![1.0e-7, 2.0e-7, 4.0e-7, 8.0e-7, 1.6e-6]
}

pub fn silicate_population(num_wavelengths: usize) -> DustPopulation {
    DustPopulation {
        h: 1,
        grain_type: "DraineSilicate".into(),
        sizes: vec![1.0e-8, 1.0e-7],
        number_density_ratios: vec![1.0e-10, 1.0e-12],
        qabs: vec![vec![0.5; num_wavelengths], vec![0.9; num_wavelengths]],
    }
}

/// An initialized and allocated engine around a [`MockSolver`].
pub fn mock_engine(num_cells: usize) -> GasEngine {
    let wavelengths = wavelengths();
    let dust = vec![silicate_population(wavelengths.len())];
    let mut engine = GasEngine::with_solver(Arc::new(MockSolver::new()));
    engine
        .initialize(wavelengths.clone(), dust, wavelengths)
        .expect("engine initializes");
    engine.allocate(num_cells).expect("engine allocates");
    engine
}

/// Runs `f` once per rank of an in-memory process group, each on its own thread,
/// and returns the per-rank results in rank order.
pub fn on_every_rank<T, F>(num_processes: usize, f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(Arc<dyn ProcessGroup>) -> T + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let handles: Vec<_> = gas_opacity_rust::LocalProcessGroup::create(num_processes)
        .into_iter()
        .map(|group| {
            let f = f.clone();
            std::thread::spawn(move || f(Arc::new(group)))
        })
        .collect();
    handles
        .into_iter()
        .map(|h| h.join().expect("rank thread panicked"))
        .collect()
}
