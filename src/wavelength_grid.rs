//! Monotonic wavelength grid with clipped bin lookup.

use crate::constants::SPEED_OF_LIGHT_M_S;
use crate::error::{GasError, Result};

/// Closed wavelength interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WavelengthRange {
    pub min: f64,
    pub max: f64,
}

impl WavelengthRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn is_empty(&self) -> bool {
        !(self.min <= self.max)
    }

    /// Intersection of two ranges, `None` when they do not overlap.
    pub fn intersect(&self, other: &WavelengthRange) -> Option<WavelengthRange> {
        let range = WavelengthRange::new(self.min.max(other.min), self.max.min(other.max));
        if range.is_empty() { None } else { Some(range) }
    }
}

/// Strictly increasing, positive wavelengths. Fixed for the life of the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct WavelengthGrid {
    wavelengths: Vec<f64>,
}

impl WavelengthGrid {
    pub fn new(wavelengths: Vec<f64>) -> Result<Self> {
        if wavelengths.is_empty() {
            return Err(GasError::InvalidGrid("wavelength grid is empty".into()));
        }
        if let Some(bad) = wavelengths.iter().find(|w| !w.is_finite() || **w <= 0.0) {
            return Err(GasError::InvalidGrid(format!(
                "wavelength {bad} is not a positive finite number"
            )));
        }
        if let Some(pos) = wavelengths.windows(2).position(|w| w[1] <= w[0]) {
            return Err(GasError::InvalidGrid(format!(
                "wavelengths must increase strictly (index {} -> {})",
                pos,
                pos + 1
            )));
        }
        Ok(Self { wavelengths })
    }

    pub fn len(&self) -> usize {
        self.wavelengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wavelengths.is_empty()
    }

    pub fn wavelengths(&self) -> &[f64] {
        &self.wavelengths
    }

    pub fn wavelength(&self, ell: usize) -> f64 {
        self.wavelengths[ell]
    }

    pub fn range(&self) -> WavelengthRange {
        WavelengthRange::new(self.wavelengths[0], self.wavelengths[self.len() - 1])
    }

    /// Bin index for a wavelength: the nearest bin at or below `lambda`,
    /// clipped to the first and last bin.
    pub fn index_for(&self, lambda: f64) -> usize {
        locate_clip(&self.wavelengths, lambda)
    }

    /// Frequencies c/λ in increasing order (the grid reversed).
    pub fn frequencies(&self) -> Vec<f64> {
        self.wavelengths
            .iter()
            .rev()
            .map(|lambda| SPEED_OF_LIGHT_M_S / lambda)
            .collect()
    }

    /// Fails when `other` has no wavelength in common with this grid.
    pub fn require_overlap(&self, other: &WavelengthGrid, what: &str) -> Result<WavelengthRange> {
        self.range()
            .intersect(&other.range())
            .ok_or_else(|| GasError::NoOverlap { what: what.to_string() })
    }
}

/// Index `i` with `xv[i] <= x < xv[i + 1]`, clipped to `[0, xv.len() - 1]`.
///
/// `xv` must be sorted ascending and non-empty.
pub fn locate_clip(xv: &[f64], x: f64) -> usize {
    let above = xv.partition_point(|&v| v <= x);
    above.saturating_sub(1).min(xv.len().saturating_sub(1))
}
