//! Media with analytically known inputs.

use gas_opacity_rust::convergence::EmissionPhase;
use gas_opacity_rust::iteration::{AbsorbedLuminosity, TransportPass};
use gas_opacity_rust::{GasEngine, MediumState, Result};

/// Uniform mean intensity and densities that grow with the cell index.
pub struct MockMedium {
    pub cells: usize,
    pub samples: usize,
    pub intensity: f64,
}

impl MockMedium {
    pub fn new(cells: usize, samples: usize) -> Self {
        Self {
            cells,
            samples,
            intensity: 1.0e-3,
        }
    }

    pub fn dark(cells: usize, samples: usize) -> Self {
        Self {
            intensity: 0.0,
            ..Self::new(cells, samples)
        }
    }
}

impl MediumState for MockMedium {
    fn num_cells(&self) -> usize {
        self.cells
    }

    fn mean_intensity(&self, _m: usize) -> Vec<f64> {
        vec![self.intensity; self.samples]
    }

    fn gas_number_density(&self, m: usize) -> f64 {
        1.0e6 * (m + 1) as f64
    }

    fn number_density(&self, m: usize, _h: usize) -> f64 {
        1.0e6 * (m + 1) as f64
    }
}

/// Transport that reports scripted absorbed luminosities, one entry per call
/// of each phase; the last entry repeats.
pub struct FixedTransport {
    pub medium: MockMedium,
    pub primary: Vec<AbsorbedLuminosity>,
    pub secondary: Vec<AbsorbedLuminosity>,
    pub primary_calls: usize,
    pub secondary_calls: usize,
    pub packets_seen: Vec<(EmissionPhase, usize)>,
}

impl FixedTransport {
    pub fn new(medium: MockMedium, primary: Vec<AbsorbedLuminosity>, secondary: Vec<AbsorbedLuminosity>) -> Self {
        Self {
            medium,
            primary,
            secondary,
            primary_calls: 0,
            secondary_calls: 0,
            packets_seen: Vec::new(),
        }
    }

    pub fn steady(medium: MockMedium) -> Self {
        Self::new(
            medium,
            vec![AbsorbedLuminosity { gas: 100.0, dust: 50.0 }],
            vec![AbsorbedLuminosity { gas: 0.1, dust: 0.2 }],
        )
    }
}

fn pick(script: &[AbsorbedLuminosity], call: usize) -> AbsorbedLuminosity {
    script
        .get(call)
        .or_else(|| script.last())
        .copied()
        .unwrap_or_default()
}

impl MediumState for FixedTransport {
    fn num_cells(&self) -> usize {
        self.medium.num_cells()
    }

    fn mean_intensity(&self, m: usize) -> Vec<f64> {
        self.medium.mean_intensity(m)
    }

    fn gas_number_density(&self, m: usize) -> f64 {
        self.medium.gas_number_density(m)
    }

    fn number_density(&self, m: usize, h: usize) -> f64 {
        self.medium.number_density(m, h)
    }
}

impl TransportPass for FixedTransport {
    fn run_phase(&mut self, phase: EmissionPhase, packets: usize, _engine: &GasEngine) -> Result<AbsorbedLuminosity> {
        self.packets_seen.push((phase, packets));
        Ok(match phase {
            EmissionPhase::Primary => {
                self.primary_calls += 1;
                pick(&self.primary, self.primary_calls - 1)
            }
            EmissionPhase::Secondary => {
                self.secondary_calls += 1;
                pick(&self.secondary, self.secondary_calls - 1)
            }
        })
    }
}
