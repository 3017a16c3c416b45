//! A solver with known, cell-indexed outputs.

use gas_opacity_rust::constants::PER_CM_TO_PER_M;
use gas_opacity_rust::{EquilibriumSolver, GasError, GasState, PhysicsContext, Result, SolveRequest};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Opacity (m-1) the mock solver produces for cell `m` in wavelength bin `ell`.
pub fn expected_opacity(m: usize, ell: usize) -> f64 {
    1.0 + m as f64 + 0.1 * ell as f64
}

/// Temperature is `100 + cell`, densities are fixed fractions of the gas
/// density, and the opacity follows [`expected_opacity`] in wavelength order.
pub struct MockSolver {
    pub fail_at: Option<usize>,
    pub solves: AtomicUsize,
    pub releases: AtomicUsize,
}

impl MockSolver {
    pub fn new() -> Self {
        Self {
            fail_at: None,
            solves: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        }
    }

    pub fn failing_at(cell: usize) -> Self {
        Self {
            fail_at: Some(cell),
            solves: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        }
    }
}

impl EquilibriumSolver for MockSolver {
    fn name(&self) -> &str {
        "mock"
    }

    fn solve(
        &self,
        request: &SolveRequest<'_>,
        grains: &PhysicsContext,
        diagnostics: Option<&mut Vec<(String, f64)>>,
    ) -> Result<GasState> {
        self.solves.fetch_add(1, Ordering::Relaxed);
        if self.fail_at == Some(request.cell) {
            return Err(GasError::Solver(format!("refusing cell {}", request.cell)));
        }
        if let Some(out) = diagnostics {
            out.push(("cell".into(), request.cell as f64));
            out.push(("gas density".into(), request.gas_density_cm3));
            out.push(("grain populations".into(), grains.len() as f64));
        }
        let n = request.gas_density_cm3;
        Ok(GasState::new(100.0 + request.cell as f64, 0.1 * n, 0.5 * n, 0.2 * n))
    }

    fn opacity(&self, _state: &GasState, request: &SolveRequest<'_>, _grains: &PhysicsContext) -> Result<Vec<f64>> {
        let n = request.frequencies.len();
        // per frequency, in cm-1
        Ok((0..n)
            .map(|i| expected_opacity(request.cell, n - 1 - i) / PER_CM_TO_PER_M)
            .collect())
    }

    fn emissivity(&self, state: &GasState, frequencies: &[f64]) -> Vec<f64> {
        vec![state.temperature_k; frequencies.len()]
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }
}
