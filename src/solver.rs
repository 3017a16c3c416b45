//! The equilibrium solver seam.
//!
//! Given a cell's radiation field and gas density, a solver returns the cell's
//! equilibrium [`GasState`] and the matching absorption opacity. The engine
//! treats it as opaque: every solver call for one cell happens on the worker
//! that owns the cell, with that worker's grain context.

use crate::cell_store::GasState;
use crate::constants::{
    BOLTZMANN_ERG_K, PLANCK_ERG_S, RADIATION_DENSITY_CGS, SPEED_OF_LIGHT_CM_S,
};
use crate::error::{GasError, Result};
use crate::physics_context::PhysicsContext;
use std::f64::consts::PI;

/// Inputs of one cell's equilibrium calculation, all cgs on the ascending
/// frequency grid.
#[derive(Debug, Clone, Copy)]
pub struct SolveRequest<'a> {
    pub cell: usize,
    /// total hydrogen number density, cm-3
    pub gas_density_cm3: f64,
    /// erg s-1 cm-2 sr-1 Hz-1
    pub mean_intensity_nu: &'a [f64],
    /// Hz, ascending
    pub frequencies: &'a [f64],
}

pub trait EquilibriumSolver: Send + Sync {
    fn name(&self) -> &str;

    /// Equilibrium state of one cell. When `diagnostics` is given, the solver
    /// appends its named diagnostic values for this cell in a fixed order.
    fn solve(
        &self,
        request: &SolveRequest<'_>,
        grains: &PhysicsContext,
        diagnostics: Option<&mut Vec<(String, f64)>>,
    ) -> Result<GasState>;

    /// Absorption opacity (cm-1) at every frequency of the request, ascending.
    fn opacity(&self, state: &GasState, request: &SolveRequest<'_>, grains: &PhysicsContext) -> Result<Vec<f64>>;

    /// Emissivity (erg s-1 cm-3 sr-1 Hz-1) at the given ascending frequencies.
    fn emissivity(&self, state: &GasState, frequencies: &[f64]) -> Vec<f64>;

    /// Releases whatever the solver set up for a run. Called by
    /// `GasEngine::finalize`; the solver may be used again afterwards.
    fn release(&self) {}
}

/// Trapezoidal integral of `y` over `x`, restricted to `x >= from`.
pub fn integrate_from(x: &[f64], y: &[f64], from: f64) -> f64 {
    x.windows(2)
        .zip(y.windows(2))
        .filter(|(xs, _)| xs[0] >= from)
        .map(|(xs, ys)| 0.5 * (ys[0] + ys[1]) * (xs[1] - xs[0]))
        .sum()
}

/// Closed-form stand-in for a full photoionization/photodissociation code.
///
/// Temperature follows from the radiation energy density, the ionized fraction
/// from photoionization balanced against case B recombination, and the
/// molecular fraction from Lyman-Werner dissociation balanced against
/// formation on grains.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceSolver {
    pub min_temperature_k: f64,
    /// 13.6 eV
    pub ionization_threshold_hz: f64,
    /// 11.2 eV
    pub dissociation_threshold_hz: f64,
    pub ionization_cross_section_cm2: f64,
    pub dissociation_cross_section_cm2: f64,
    pub recombination_coefficient_cm3_s: f64,
    pub formation_coefficient_cm3_s: f64,
}

impl Default for ReferenceSolver {
    fn default() -> Self {
        Self {
            min_temperature_k: 10.0,
            ionization_threshold_hz: 3.288e15,
            dissociation_threshold_hz: 2.708e15,
            ionization_cross_section_cm2: 6.3e-18,
            dissociation_cross_section_cm2: 2.5e-19,
            recombination_coefficient_cm3_s: 2.6e-13,
            formation_coefficient_cm3_s: 3.0e-17,
        }
    }
}

struct Rates {
    energy_density: f64,
    ionizing_flux: f64,
    dissociating_flux: f64,
    photoionization: f64,
    dissociation: f64,
}

impl ReferenceSolver {
    fn check(&self, request: &SolveRequest<'_>) -> Result<()> {
        if request.mean_intensity_nu.len() != request.frequencies.len() {
            return Err(GasError::GridMismatch {
                expected: request.frequencies.len(),
                actual: request.mean_intensity_nu.len(),
            });
        }
        if !(request.gas_density_cm3 >= 0.0) {
            return Err(GasError::Solver(format!(
                "gas density {} is not a non-negative number",
                request.gas_density_cm3
            )));
        }
        Ok(())
    }

    fn rates(&self, request: &SolveRequest<'_>) -> Rates {
        let nu = request.frequencies;
        let j = request.mean_intensity_nu;
        let photons: Vec<f64> = nu
            .iter()
            .zip(j)
            .map(|(nu, j)| 4.0 * PI * j.max(0.0) / (PLANCK_ERG_S * nu))
            .collect();
        let positive: Vec<f64> = j.iter().map(|j| j.max(0.0)).collect();

        let energy_density = 4.0 * PI / SPEED_OF_LIGHT_CM_S * integrate_from(nu, &positive, 0.0);
        let ionizing_flux = integrate_from(nu, &photons, self.ionization_threshold_hz);
        let dissociating_flux =
            integrate_from(nu, &photons, self.dissociation_threshold_hz) - ionizing_flux;

        Rates {
            energy_density,
            ionizing_flux,
            dissociating_flux: dissociating_flux.max(0.0),
            photoionization: self.ionization_cross_section_cm2 * ionizing_flux,
            dissociation: self.dissociation_cross_section_cm2 * dissociating_flux.max(0.0),
        }
    }

    fn ionized_fraction(&self, photoionization: f64, n: f64) -> f64 {
        if photoionization <= 0.0 {
            return 0.0;
        }
        let a = self.recombination_coefficient_cm3_s * n;
        if a <= 0.0 {
            return 1.0;
        }
        // a x^2 + G x - G = 0
        let g = photoionization;
        ((-g + (g * g + 4.0 * a * g).sqrt()) / (2.0 * a)).clamp(0.0, 1.0)
    }

    fn molecular_fraction(&self, dissociation: f64, n: f64, grains: &PhysicsContext) -> f64 {
        if grains.is_empty() {
            return 0.0;
        }
        let formation = self.formation_coefficient_cm3_s * n;
        if formation + dissociation <= 0.0 {
            return 0.0;
        }
        formation / (formation + dissociation)
    }
}

impl EquilibriumSolver for ReferenceSolver {
    fn name(&self) -> &str {
        "reference"
    }

    fn solve(
        &self,
        request: &SolveRequest<'_>,
        grains: &PhysicsContext,
        diagnostics: Option<&mut Vec<(String, f64)>>,
    ) -> Result<GasState> {
        self.check(request)?;
        let n = request.gas_density_cm3;
        let rates = self.rates(request);

        let temperature = (rates.energy_density / RADIATION_DENSITY_CGS)
            .powf(0.25)
            .max(self.min_temperature_k);
        let x = self.ionized_fraction(rates.photoionization, n);
        let neutral = (1.0 - x) * n;
        let f_mol = self.molecular_fraction(rates.dissociation, n, grains);

        if let Some(out) = diagnostics {
            out.push(("radiation energy density".into(), rates.energy_density));
            out.push(("ionizing photon flux".into(), rates.ionizing_flux));
            out.push(("dissociating photon flux".into(), rates.dissociating_flux));
            out.push(("photoionization rate".into(), rates.photoionization));
            out.push(("photodissociation rate".into(), rates.dissociation));
            out.push(("grain number density".into(), grains.total_grain_density()));
        }

        Ok(GasState::new(
            temperature,
            x * n,
            (1.0 - f_mol) * neutral,
            0.5 * f_mol * neutral,
        ))
    }

    fn opacity(&self, state: &GasState, request: &SolveRequest<'_>, grains: &PhysicsContext) -> Result<Vec<f64>> {
        let nu = request.frequencies;
        let mut kappa: Vec<f64> = nu
            .iter()
            .map(|&nu| {
                if nu >= self.ionization_threshold_hz {
                    let scale = self.ionization_threshold_hz / nu;
                    state.densities_cm3[1] * self.ionization_cross_section_cm2 * scale * scale * scale
                } else {
                    0.0
                }
            })
            .collect();

        for population in grains.populations() {
            for ((size, density), qabs) in population
                .sizes()
                .iter()
                .zip(population.densities())
                .zip(population.qabs())
            {
                if qabs.len() != nu.len() {
                    return Err(GasError::GridMismatch {
                        expected: nu.len(),
                        actual: qabs.len(),
                    });
                }
                let area = PI * size * size;
                for (k, q) in kappa.iter_mut().zip(qabs) {
                    *k += density * area * q;
                }
            }
        }
        Ok(kappa)
    }

    fn emissivity(&self, state: &GasState, frequencies: &[f64]) -> Vec<f64> {
        let t = state.temperature_k;
        let np = state.densities_cm3[0];
        if t <= 0.0 || np <= 0.0 {
            return vec![0.0; frequencies.len()];
        }
        // thermal bremsstrahlung, Gaunt factor 1, n_e = n_p
        frequencies
            .iter()
            .map(|nu| 5.4e-39 * np * np / t.sqrt() * (-PLANCK_ERG_S * nu / (BOLTZMANN_ERG_K * t)).exp())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use more_asserts::{assert_gt, assert_lt};

    fn frequencies() -> Vec<f64> {
        (0..40).map(|i| 1.0e14 * 1.2f64.powi(i)).collect()
    }

    fn request<'a>(nu: &'a [f64], j: &'a [f64], n: f64) -> SolveRequest<'a> {
        SolveRequest {
            cell: 0,
            gas_density_cm3: n,
            mean_intensity_nu: j,
            frequencies: nu,
        }
    }

    #[test]
    fn dark_cell_is_cold_and_neutral() {
        let nu = frequencies();
        let j = vec![0.0; nu.len()];
        let state = ReferenceSolver::default()
            .solve(&request(&nu, &j, 100.0), &PhysicsContext::empty(), None)
            .unwrap();
        assert_eq!(state.temperature_k, 10.0);
        assert_eq!(state.densities_cm3[0], 0.0);
        assert_relative_eq!(state.densities_cm3[1], 100.0);
    }

    #[test]
    fn hydrogen_is_conserved() {
        let nu = frequencies();
        let j = vec![1.0e-17; nu.len()];
        let state = ReferenceSolver::default()
            .solve(&request(&nu, &j, 50.0), &PhysicsContext::empty(), None)
            .unwrap();
        let total = state.densities_cm3[0] + state.densities_cm3[1] + 2.0 * state.densities_cm3[2];
        assert_relative_eq!(total, 50.0, max_relative = 1e-9);
        assert_gt!(state.densities_cm3[0], 0.0);
        assert_lt!(state.densities_cm3[0], 50.0);
    }

    #[test]
    fn diagnostics_come_in_a_fixed_order() {
        let nu = frequencies();
        let j = vec![1.0e-18; nu.len()];
        let solver = ReferenceSolver::default();
        let mut first = Vec::new();
        let mut second = Vec::new();
        solver
            .solve(&request(&nu, &j, 1.0), &PhysicsContext::empty(), Some(&mut first))
            .unwrap();
        solver
            .solve(&request(&nu, &j, 9.0), &PhysicsContext::empty(), Some(&mut second))
            .unwrap();
        let names = |d: &[(String, f64)]| d.iter().map(|(n, _)| n.clone()).collect::<Vec<_>>();
        assert_eq!(names(&first), names(&second));
        assert_eq!(first.len(), 6);
    }

    #[test]
    fn mismatched_intensity_is_rejected() {
        let nu = frequencies();
        let err = ReferenceSolver::default()
            .solve(&request(&nu, &[1.0], 1.0), &PhysicsContext::empty(), None)
            .unwrap_err();
        assert!(matches!(err, GasError::GridMismatch { .. }));
    }

    #[test]
    fn opacity_vanishes_below_threshold_without_grains() {
        let nu = frequencies();
        let j = vec![0.0; nu.len()];
        let solver = ReferenceSolver::default();
        let req = request(&nu, &j, 10.0);
        let state = solver.solve(&req, &PhysicsContext::empty(), None).unwrap();
        let kappa = solver.opacity(&state, &req, &PhysicsContext::empty()).unwrap();
        assert_eq!(kappa.len(), nu.len());
        for (nu, k) in nu.iter().zip(&kappa) {
            if *nu < solver.ionization_threshold_hz {
                assert_eq!(*k, 0.0);
            } else {
                assert_gt!(*k, 0.0);
            }
        }
    }

    #[test]
    fn trapezoid_integral() {
        assert_relative_eq!(integrate_from(&[0.0, 1.0, 2.0], &[0.0, 1.0, 2.0], 0.0), 2.0);
        assert_relative_eq!(integrate_from(&[0.0, 1.0, 2.0], &[0.0, 1.0, 2.0], 1.0), 1.5);
    }
}
