// src/dust.rs - static dust population descriptors handed to the engine at initialization

use crate::constants::{M_TO_CM, PER_M3_TO_PER_CM3};
use crate::error::{GasError, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GrainType {
    Silicate,
    Carbonaceous,
    Other,
}

impl GrainType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrainType::Silicate => "silicate",
            GrainType::Carbonaceous => "carbonaceous",
            GrainType::Other => "other",
        }
    }

    /// Classifies a population grain type description by keyword.
    pub fn from_population_type(population_grain_type: &str) -> Self {
        GRAIN_TYPE_KEYWORDS
            .iter()
            .find(|(keyword, _)| population_grain_type.contains(keyword))
            .map(|(_, kind)| *kind)
            .unwrap_or(GrainType::Other)
    }
}

// first match wins
static GRAIN_TYPE_KEYWORDS: Lazy<Vec<(&'static str, GrainType)>> = Lazy::new(|| {
    vec![
        ("Silicate", GrainType::Silicate),
        ("Graphite", GrainType::Carbonaceous),
        ("PAH", GrainType::Carbonaceous),
    ]
});

/// True when the solver has a built-in model for this population's grains.
pub fn has_grain_type_support(population_grain_type: &str) -> bool {
    GrainType::from_population_type(population_grain_type) != GrainType::Other
}

/// One dust population as seen by the gas engine.
///
/// Sizes are processed separately by the solver and summed, so `sizes` are
/// representative sizes rather than a distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DustPopulation {
    /// Medium index used to look up this population's mix number density.
    pub h: usize,
    pub grain_type: String,
    /// Representative grain sizes (m on input, cm after initialization).
    pub sizes: Vec<f64>,
    /// Grains per hydrogen atom, one per size.
    pub number_density_ratios: Vec<f64>,
    /// Qabs(size, wavelength) on input; Qabs(size, frequency) after initialization.
    pub qabs: Vec<Vec<f64>>,
}

impl DustPopulation {
    pub fn grain_type_label(&self) -> GrainType {
        GrainType::from_population_type(&self.grain_type)
    }

    pub fn validate(&self, index: usize, num_wavelengths: usize) -> Result<()> {
        let fail = |reason: String| GasError::InvalidDustPopulation { index, reason };
        if self.sizes.is_empty() {
            return Err(fail("no representative sizes".into()));
        }
        if self.number_density_ratios.len() != self.sizes.len() {
            return Err(fail(format!(
                "{} number density ratios for {} sizes",
                self.number_density_ratios.len(),
                self.sizes.len()
            )));
        }
        if self.qabs.len() != self.sizes.len() {
            return Err(fail(format!(
                "{} absorption efficiency rows for {} sizes",
                self.qabs.len(),
                self.sizes.len()
            )));
        }
        if let Some(row) = self.qabs.iter().position(|q| q.len() != num_wavelengths) {
            return Err(fail(format!(
                "absorption efficiency row {row} has {} values, wavelength grid has {num_wavelengths}",
                self.qabs[row].len()
            )));
        }
        Ok(())
    }

    /// Sizes to cm and Qabs rows to ascending frequency order.
    pub(crate) fn into_solver_units(mut self) -> Self {
        for size in &mut self.sizes {
            *size *= M_TO_CM;
        }
        for row in &mut self.qabs {
            row.reverse();
        }
        self
    }

    /// Grain number densities (cm-3) for a mix number density given in m-3.
    pub fn grain_densities(&self, mix_number_density: f64) -> Vec<f64> {
        self.number_density_ratios
            .iter()
            .map(|ratio| ratio * mix_number_density * PER_M3_TO_PER_CM3)
            .collect()
    }
}
