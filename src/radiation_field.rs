/// Conversions applied to a cell's mean intensity before it reaches the solver.
///
/// The radiation field arrives per unit wavelength on the wavelength grid (SI);
/// the solver works per unit frequency on the ascending frequency grid (cgs).
/// Since dν = -(c/λ²) dλ, J_ν = λ²/c J_λ, and the conversion is its own inverse.

use crate::constants::{SI_TO_CGS_INTENSITY, SPEED_OF_LIGHT_M_S};
use crate::error::{GasError, Result};

/// Converts a quantity per `x` into a quantity per `c/x`, reversing the order.
pub fn x_to_cxm1(xv: &[f64], quantity_xv: &[f64]) -> Vec<f64> {
    let n = xv.len();
    let mut out = vec![0.0; n];
    for (ix, (&x, &q)) in xv.iter().zip(quantity_xv).enumerate() {
        out[n - 1 - ix] = x * x / SPEED_OF_LIGHT_M_S * q;
    }
    out
}

pub fn lambda_to_nu(lambdav: &[f64], quantity_per_lambda: &[f64]) -> Vec<f64> {
    x_to_cxm1(lambdav, quantity_per_lambda)
}

pub fn nu_to_lambda(nuv: &[f64], quantity_per_nu: &[f64]) -> Vec<f64> {
    x_to_cxm1(nuv, quantity_per_nu)
}

pub fn count_non_positive(samples: &[f64]) -> usize {
    samples.iter().filter(|&&s| s <= 0.0).count()
}

/// Mean intensity ready for the solver.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverIntensity {
    /// erg s-1 cm-2 sr-1 Hz-1 on the ascending frequency grid
    pub j_nu: Vec<f64>,
    /// samples that were zero or negative
    pub zero_samples: usize,
}

impl SolverIntensity {
    pub fn is_dark(&self) -> bool {
        self.zero_samples == self.j_nu.len()
    }
}

/// Checks the sample count, converts to per-frequency cgs and counts zeros.
pub fn prepare_mean_intensity(lambdav: &[f64], mean_intensity: &[f64]) -> Result<SolverIntensity> {
    if mean_intensity.len() != lambdav.len() {
        return Err(GasError::GridMismatch {
            expected: lambdav.len(),
            actual: mean_intensity.len(),
        });
    }
    let mut j_nu = lambda_to_nu(lambdav, mean_intensity);
    for value in &mut j_nu {
        *value *= SI_TO_CGS_INTENSITY;
    }
    let zero_samples = count_non_positive(&j_nu);
    Ok(SolverIntensity { j_nu, zero_samples })
}
