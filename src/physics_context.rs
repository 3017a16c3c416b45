//! Per-worker grain population context.
//!
//! Building a [`PhysicsContext`] copies the size grids and absorption tables of
//! every dust population, which is the expensive part of preparing a cell. Each
//! worker therefore owns one [`ContextSlot`]: the first cell it handles builds
//! the context, every later cell only refreshes the grain number densities.
//! Slots are handed out as `&mut`, one per worker, so no locking is involved.

use crate::constants::{INITIAL_GRAIN_TEMPERATURE_K, PER_M3_TO_PER_CM3};
use crate::dust::{DustPopulation, GrainType};
use crate::error::{GasError, Result};

/// Grain state of one population inside a worker's context.
#[derive(Debug, Clone, PartialEq)]
pub struct GrainPopulation {
    grain_type: GrainType,
    sizes: Vec<f64>,
    densities: Vec<f64>,
    temperatures: Vec<f64>,
    qabs: Vec<Vec<f64>>,
}

impl GrainPopulation {
    fn from_descriptor(descriptor: &DustPopulation, mix_number_density: f64) -> Self {
        Self {
            grain_type: descriptor.grain_type_label(),
            sizes: descriptor.sizes.clone(),
            densities: descriptor.grain_densities(mix_number_density),
            temperatures: vec![INITIAL_GRAIN_TEMPERATURE_K; descriptor.sizes.len()],
            qabs: descriptor.qabs.clone(),
        }
    }

    pub fn grain_type(&self) -> GrainType {
        self.grain_type
    }

    /// Sizes in cm.
    pub fn sizes(&self) -> &[f64] {
        &self.sizes
    }

    /// Number densities in cm-3, one per size.
    pub fn densities(&self) -> &[f64] {
        &self.densities
    }

    pub fn temperatures(&self) -> &[f64] {
        &self.temperatures
    }

    /// Qabs(size, frequency).
    pub fn qabs(&self) -> &[Vec<f64>] {
        &self.qabs
    }

    pub fn total_density(&self) -> f64 {
        self.densities.iter().sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhysicsContext {
    populations: Vec<GrainPopulation>,
}

impl PhysicsContext {
    /// An empty context, for solver calls that need no grains.
    pub fn empty() -> Self {
        Self::default()
    }

    fn build(descriptors: &[DustPopulation], mix_number_densities: &[f64]) -> Self {
        let populations = descriptors
            .iter()
            .zip(mix_number_densities)
            .map(|(descriptor, n)| GrainPopulation::from_descriptor(descriptor, *n))
            .collect();
        Self { populations }
    }

    fn refresh_densities(&mut self, descriptors: &[DustPopulation], mix_number_densities: &[f64]) {
        for ((population, descriptor), n) in self
            .populations
            .iter_mut()
            .zip(descriptors)
            .zip(mix_number_densities)
        {
            for (density, ratio) in population.densities.iter_mut().zip(&descriptor.number_density_ratios) {
                *density = ratio * n * PER_M3_TO_PER_CM3;
            }
        }
    }

    pub fn populations(&self) -> &[GrainPopulation] {
        &self.populations
    }

    pub fn len(&self) -> usize {
        self.populations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.populations.is_empty()
    }

    pub fn total_grain_density(&self) -> f64 {
        self.populations.iter().map(GrainPopulation::total_density).sum()
    }
}

/// A single worker's lazily built context.
#[derive(Debug, Default)]
pub struct ContextSlot {
    context: Option<PhysicsContext>,
    builds: usize,
    refreshes: usize,
}

impl ContextSlot {
    /// Returns this worker's context for a cell with the given mix number
    /// densities (m-3, one per dust population, in descriptor order).
    pub fn prepare(
        &mut self,
        descriptors: &[DustPopulation],
        mix_number_densities: &[f64],
        verbose: bool,
    ) -> Result<&mut PhysicsContext> {
        if mix_number_densities.len() != descriptors.len() {
            return Err(GasError::row_width(
                "mix number densities",
                descriptors.len(),
                mix_number_densities.len(),
            ));
        }

        match self.context {
            Some(ref mut context) => {
                context.refresh_densities(descriptors, mix_number_densities);
                self.refreshes += 1;
                if verbose {
                    for (i, population) in context.populations().iter().enumerate() {
                        log::trace!(
                            "pop {} grain sizes: {:?}; grain densities: {:?}",
                            i,
                            population.sizes(),
                            population.densities()
                        );
                    }
                }
            }
            None => {
                self.context = Some(PhysicsContext::build(descriptors, mix_number_densities));
                self.builds += 1;
            }
        }

        self.context
            .as_mut()
            .ok_or_else(|| GasError::Solver("worker context missing after build".into()))
    }

    pub fn context(&self) -> Option<&PhysicsContext> {
        self.context.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        self.context.is_some()
    }

    pub fn build_count(&self) -> usize {
        self.builds
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes
    }
}

/// One [`ContextSlot`] per local worker, addressed by worker id.
#[derive(Debug, Default)]
pub struct PhysicsContextCache {
    slots: Vec<ContextSlot>,
}

impl PhysicsContextCache {
    pub fn new(num_workers: usize) -> Self {
        let mut cache = Self::default();
        cache.ensure_workers(num_workers);
        cache
    }

    /// Grows the cache to at least `num_workers` slots; existing contexts are kept.
    pub fn ensure_workers(&mut self, num_workers: usize) {
        if self.slots.len() < num_workers {
            self.slots.resize_with(num_workers, ContextSlot::default);
        }
    }

    pub fn num_workers(&self) -> usize {
        self.slots.len()
    }

    pub fn get(
        &mut self,
        worker_id: usize,
        descriptors: &[DustPopulation],
        mix_number_densities: &[f64],
    ) -> Result<&mut PhysicsContext> {
        self.ensure_workers(worker_id + 1);
        self.slots[worker_id].prepare(descriptors, mix_number_densities, false)
    }

    pub fn slot(&self, worker_id: usize) -> Option<&ContextSlot> {
        self.slots.get(worker_id)
    }

    pub fn slots_mut(&mut self) -> &mut [ContextSlot] {
        &mut self.slots
    }

    pub fn total_builds(&self) -> usize {
        self.slots.iter().map(ContextSlot::build_count).sum()
    }

    /// Drops every context; the next use of each slot rebuilds it.
    pub fn reset(&mut self) {
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn descriptors() -> Vec<DustPopulation> {
        vec![
            DustPopulation {
                h: 1,
                grain_type: "Silicate".into(),
                sizes: vec![1.0e-6, 1.0e-5],
                number_density_ratios: vec![2.0, 4.0],
                qabs: vec![vec![0.1, 0.2], vec![0.3, 0.4]],
            },
            DustPopulation {
                h: 2,
                grain_type: "Graphite".into(),
                sizes: vec![3.0e-6],
                number_density_ratios: vec![1.0],
                qabs: vec![vec![0.5, 0.6]],
            },
        ]
    }

    #[test]
    fn first_use_builds_with_placeholder_temperature() {
        let mut slot = ContextSlot::default();
        let context = slot.prepare(&descriptors(), &[1.0e6, 2.0e6], false).unwrap();
        assert_eq!(context.len(), 2);
        assert_eq!(context.populations()[0].temperatures(), &[30.0, 30.0]);
        assert_relative_eq!(context.populations()[0].densities()[1], 4.0, max_relative = 1e-12);
        assert_relative_eq!(context.populations()[1].densities()[0], 2.0, max_relative = 1e-12);
        assert_eq!(slot.build_count(), 1);
        assert_eq!(slot.refresh_count(), 0);
    }

    #[test]
    fn later_uses_only_refresh_densities() {
        let descriptors = descriptors();
        let mut slot = ContextSlot::default();
        let before = slot.prepare(&descriptors, &[1.0e6, 1.0e6], false).unwrap().clone();
        let after = slot.prepare(&descriptors, &[3.0e6, 5.0e6], true).unwrap().clone();

        assert_eq!(slot.build_count(), 1);
        assert_eq!(slot.refresh_count(), 1);
        assert_eq!(before.len(), after.len());
        for (b, a) in before.populations().iter().zip(after.populations()) {
            assert_eq!(b.grain_type(), a.grain_type());
            assert_eq!(b.sizes(), a.sizes());
            assert_eq!(b.qabs(), a.qabs());
            assert_eq!(b.temperatures(), a.temperatures());
        }
        assert_relative_eq!(after.populations()[0].densities()[0], 6.0, max_relative = 1e-12);
        assert_relative_eq!(after.populations()[1].densities()[0], 5.0, max_relative = 1e-12);
    }

    #[test]
    fn wrong_mix_density_count_is_fatal() {
        let mut slot = ContextSlot::default();
        let err = slot.prepare(&descriptors(), &[1.0], false).unwrap_err();
        assert!(matches!(err, GasError::RowWidthMismatch { expected: 2, actual: 1, .. }));
        assert!(!slot.is_ready());
    }

    #[test]
    fn cache_keeps_one_context_per_worker() {
        let descriptors = descriptors();
        let mut cache = PhysicsContextCache::new(2);
        cache.get(0, &descriptors, &[1.0, 1.0]).unwrap();
        cache.get(0, &descriptors, &[2.0, 2.0]).unwrap();
        cache.get(3, &descriptors, &[1.0, 1.0]).unwrap();
        assert_eq!(cache.num_workers(), 4);
        assert_eq!(cache.total_builds(), 2);
        assert!(!cache.slot(1).unwrap().is_ready());

        cache.reset();
        assert_eq!(cache.num_workers(), 0);
    }
}
