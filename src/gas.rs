//! The gas state engine.
//!
//! One [`GasEngine`] owns everything a run needs to compute and serve per-cell
//! gas states: the optional equilibrium solver, the grids and dust descriptors
//! fixed at initialization, the [`CellStateStore`] and one grain context per
//! worker. Lifecycle: `initialize` once, `allocate`, then any number of
//! `update_all` passes, then `finalize`.

use crate::cell_store::{CellStateStore, GasState, Species};
use crate::constants::{CGS_TO_SI_EMISSIVITY, PER_CM_TO_PER_M, PER_M3_TO_PER_CM3};
use crate::dust::{self, DustPopulation};
use crate::error::{GasError, Result};
use crate::executor::DistributedExecutor;
use crate::options::EngineOptions;
use crate::physics_context::{ContextSlot, PhysicsContext, PhysicsContextCache};
use crate::process_group::{ProcessGroup, ReduceTarget};
use crate::radiation_field::{nu_to_lambda, prepare_mean_intensity};
use crate::solver::{EquilibriumSolver, SolveRequest};
use crate::wavelength_grid::WavelengthGrid;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Per-cell inputs supplied by the surrounding simulation.
pub trait MediumState: Sync {
    fn num_cells(&self) -> usize;

    /// Mean intensity J_λ (W m-2 sr-1 m-1), one sample per wavelength of the
    /// grid the engine was initialized with.
    fn mean_intensity(&self, m: usize) -> Vec<f64>;

    /// Hydrogen number density (m-3).
    fn gas_number_density(&self, m: usize) -> f64;

    /// Number density (m-3) of medium component `h`.
    fn number_density(&self, m: usize, h: usize) -> f64;
}

/// Diagnostic values of one cell, positionally matched with their names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diagnostics {
    pub names: Vec<String>,
    pub values: Vec<f64>,
}

impl Diagnostics {
    fn from_pairs(pairs: Vec<(String, f64)>) -> Self {
        let (names, values) = pairs.into_iter().unzip();
        Self { names, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PassSummary {
    pub num_cells: usize,
    /// cells computed by this process
    pub local_cells: usize,
    /// cells, over all processes, with at least one non-positive intensity sample
    pub zero_intensity_cells: usize,
    pub elapsed: Duration,
}

/// Everything fixed by `initialize`.
struct Setup {
    grid: Arc<WavelengthGrid>,
    frequencies: Vec<f64>,
    emission_frequencies: Vec<f64>,
    populations: Vec<DustPopulation>,
    h_indices: Vec<usize>,
}

struct CellResult {
    state: GasState,
    /// m-1, ascending wavelength
    opacity: Vec<f64>,
    zero_samples: usize,
}

pub struct GasEngine {
    solver: Option<Arc<dyn EquilibriumSolver>>,
    setup: Option<Setup>,
    store: CellStateStore,
    contexts: PhysicsContextCache,
    options: EngineOptions,
}

impl GasEngine {
    pub fn new(solver: Option<Arc<dyn EquilibriumSolver>>, options: EngineOptions) -> Self {
        Self {
            solver,
            setup: None,
            store: CellStateStore::new(),
            contexts: PhysicsContextCache::default(),
            options,
        }
    }

    pub fn with_solver(solver: Arc<dyn EquilibriumSolver>) -> Self {
        Self::new(Some(solver), EngineOptions::default())
    }

    /// An engine without equilibrium solver; every operation needing one fails
    /// with [`GasError::Unsupported`].
    pub fn without_solver() -> Self {
        Self::new(None, EngineOptions::default())
    }

    pub fn has_solver(&self) -> bool {
        self.solver.is_some()
    }

    fn require_solver(&self) -> Result<&Arc<dyn EquilibriumSolver>> {
        self.solver
            .as_ref()
            .ok_or_else(|| GasError::Unsupported("this engine was created without an equilibrium solver".into()))
    }

    fn require_setup(&self, operation: &'static str) -> Result<&Setup> {
        self.setup.as_ref().ok_or(GasError::not_initialized(operation))
    }

    /// Fixes the radiation field wavelength grid, the dust populations and the
    /// emission wavelength grid. Dust sizes and absorption tables are converted
    /// to the solver's cgs, frequency-ordered form here, once.
    pub fn initialize(
        &mut self,
        wavelengths: Vec<f64>,
        dust_populations: Vec<DustPopulation>,
        emission_wavelengths: Vec<f64>,
    ) -> Result<()> {
        let solver_name = self.require_solver()?.name().to_string();
        if self.setup.is_some() {
            return Err(GasError::AlreadyInitialized);
        }

        let grid = WavelengthGrid::new(wavelengths)?;
        let emission_grid = WavelengthGrid::new(emission_wavelengths)?;
        grid.require_overlap(&emission_grid, "emission wavelength grid")?;

        for (index, population) in dust_populations.iter().enumerate() {
            population.validate(index, grid.len())?;
        }
        let h_indices = dust_populations.iter().map(|d| d.h).collect();
        let populations: Vec<DustPopulation> = dust_populations
            .into_iter()
            .map(DustPopulation::into_solver_units)
            .collect();

        log::info!(
            "Gas engine initialized: {} wavelengths, {} emission wavelengths, {} dust populations, solver '{}'",
            grid.len(),
            emission_grid.len(),
            populations.len(),
            solver_name
        );

        self.setup = Some(Setup {
            frequencies: grid.frequencies(),
            emission_frequencies: emission_grid.frequencies(),
            grid: Arc::new(grid),
            populations,
            h_indices,
        });
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.setup.is_some()
    }

    /// Releases the solver and invalidates all stored cell data. The solver
    /// handle is kept, so the engine may be initialized again.
    pub fn finalize(&mut self) {
        if let Some(solver) = &self.solver {
            if self.setup.is_some() {
                solver.release();
                log::debug!("released equilibrium solver '{}'", solver.name());
            }
        }
        self.setup = None;
        self.store = CellStateStore::new();
        self.contexts.reset();
    }

    pub fn allocate(&mut self, num_cells: usize) -> Result<()> {
        self.require_solver()?;
        let grid = self.require_setup("allocate")?.grid.clone();
        self.store.allocate(num_cells, grid);
        log::debug!("allocated gas states for {num_cells} cells");
        Ok(())
    }

    /// Zeroes the opacity table ahead of a pass.
    pub fn clear(&mut self) -> Result<()> {
        self.require_solver()?;
        self.require_setup("clear")?;
        self.store.clear()
    }

    /// Sums the opacity table over all processes.
    pub fn reduce_opacity(&mut self, group: &dyn ProcessGroup, target: ReduceTarget) -> Result<()> {
        self.require_setup("reduce_opacity")?;
        self.store.reduce_opacity(group, target)
    }

    /// Recomputes and stores a single cell, using worker context 0. No
    /// reduction happens.
    pub fn update_gas_state(&mut self, m: usize, medium: &dyn MediumState) -> Result<()> {
        let GasEngine {
            solver,
            setup,
            store,
            contexts,
            options,
        } = self;
        let solver = solver
            .as_deref()
            .ok_or_else(|| GasError::Unsupported("this engine was created without an equilibrium solver".into()))?;
        let setup = setup.as_ref().ok_or(GasError::not_initialized("update_gas_state"))?;
        if !store.is_allocated() {
            return Err(GasError::not_allocated("update_gas_state"));
        }

        contexts.ensure_workers(1);
        let slot = &mut contexts.slots_mut()[0];
        let cell = compute_cell(solver, setup, slot, medium, m, options.is_verbose_cell(m), None)
            .map_err(|e| e.at_cell(m, "update_gas_state"))?;
        store
            .write_cell(m, cell.state, &cell.opacity)
            .map_err(|e| e.at_cell(m, "update_gas_state"))
    }

    /// One full pass: clear, compute every cell this process owns on the
    /// executor's workers, then reduce so every process holds all cells.
    pub fn update_all(&mut self, executor: &DistributedExecutor, medium: &dyn MediumState) -> Result<PassSummary> {
        let start = Instant::now();
        let GasEngine {
            solver,
            setup,
            store,
            contexts,
            options,
        } = self;
        let solver = solver
            .as_deref()
            .ok_or_else(|| GasError::Unsupported("this engine was created without an equilibrium solver".into()))?;
        let setup = setup.as_ref().ok_or(GasError::not_initialized("update_all"))?;
        if !store.is_allocated() {
            return Err(GasError::not_allocated("update_all"));
        }
        if medium.num_cells() != store.num_cells() {
            return Err(GasError::CellCountMismatch {
                expected: store.num_cells(),
                actual: medium.num_cells(),
            });
        }

        store.clear()?;
        let assignment = executor.assignment(store.num_cells());
        contexts.ensure_workers(assignment.num_workers());
        let zero_cells = AtomicUsize::new(0);
        let options: &EngineOptions = options;

        {
            let windows = store.windows_mut(&assignment.worker_ranges)?;
            let lanes: Vec<_> = windows.into_iter().zip(contexts.slots_mut().iter_mut()).collect();
            executor.run_lanes(&assignment, lanes, |(mut window, slot), first, count| {
                for m in first..first + count {
                    let cell = compute_cell(solver, setup, slot, medium, m, options.is_verbose_cell(m), None)
                        .map_err(|e| e.at_cell(m, "update_gas_state"))?;
                    if cell.zero_samples > 0 {
                        zero_cells.fetch_add(1, Ordering::Relaxed);
                    }
                    window
                        .write(m, cell.state, &cell.opacity)
                        .map_err(|e| e.at_cell(m, "update_gas_state"))?;
                }
                Ok(())
            })?;
        }

        let group = executor.group();
        store.reduce_opacity(group, ReduceTarget::AllProcesses)?;
        store.gather_states(group, assignment.rank_range.clone(), ReduceTarget::AllProcesses)?;

        let mut zeros = [zero_cells.into_inner() as f64];
        group.sum_to_all(&mut zeros)?;

        let summary = PassSummary {
            num_cells: store.num_cells(),
            local_cells: assignment.local_items(),
            zero_intensity_cells: zeros[0] as usize,
            elapsed: start.elapsed(),
        };
        if summary.zero_intensity_cells > 0 {
            log::debug!(
                "{} of {} cells had non-positive mean intensity samples",
                summary.zero_intensity_cells,
                summary.num_cells
            );
        }
        log::debug!(
            "gas pass on rank {}: {} local cells in {:.3}s",
            group.rank(),
            summary.local_cells,
            summary.elapsed.as_secs_f64()
        );
        Ok(summary)
    }

    /// Recomputes cell `m` with diagnostics enabled, using the given worker
    /// context. Nothing is stored.
    pub fn diagnostics_with(&self, slot: &mut ContextSlot, m: usize, medium: &dyn MediumState) -> Result<Diagnostics> {
        let solver = self.require_solver()?.as_ref();
        let setup = self.require_setup("diagnostics")?;
        let mut pairs = Vec::new();
        compute_cell(solver, setup, slot, medium, m, false, Some(&mut pairs)).map_err(|e| e.at_cell(m, "diagnostics"))?;
        Ok(Diagnostics::from_pairs(pairs))
    }

    pub fn diagnostics(&self, m: usize, medium: &dyn MediumState) -> Result<Diagnostics> {
        self.diagnostics_with(&mut ContextSlot::default(), m, medium)
    }

    /// Names of the values returned by [`diagnostics`](Self::diagnostics),
    /// taken from a calculation for a dark, empty cell.
    pub fn diagnostic_names(&self) -> Result<Vec<String>> {
        let solver = self.require_solver()?;
        let setup = self.require_setup("diagnostic_names")?;
        let dark = vec![0.0; setup.frequencies.len()];
        let request = SolveRequest {
            cell: 0,
            gas_density_cm3: 0.0,
            mean_intensity_nu: &dark,
            frequencies: &setup.frequencies,
        };
        let mut pairs = Vec::new();
        solver.solve(&request, &PhysicsContext::empty(), Some(&mut pairs))?;
        Ok(pairs.into_iter().map(|(name, _)| name).collect())
    }

    /// Emissivity (W m-3 sr-1 m-1) of cell `m` on the emission wavelength grid.
    pub fn emissivity(&self, m: usize) -> Result<Vec<f64>> {
        let solver = self.require_solver()?;
        let setup = self.require_setup("emissivity")?;
        let per_nu: Vec<f64> = solver
            .emissivity(&self.store.gas_state(m), &setup.emission_frequencies)
            .into_iter()
            .map(|e| e * CGS_TO_SI_EMISSIVITY)
            .collect();
        Ok(nu_to_lambda(&setup.emission_frequencies, &per_nu))
    }

    pub fn temperature(&self, m: usize) -> f64 {
        self.store.temperature(m)
    }

    pub fn density(&self, m: usize, species: Species) -> f64 {
        self.store.density(m, species)
    }

    pub fn np(&self, m: usize) -> f64 {
        self.density(m, Species::Proton)
    }

    pub fn n_h(&self, m: usize) -> f64 {
        self.density(m, Species::AtomicHydrogen)
    }

    pub fn n_h2(&self, m: usize) -> f64 {
        self.density(m, Species::MolecularHydrogen)
    }

    /// Absorption opacity (m-1) of cell `m` at wavelength `lambda` (m).
    pub fn opacity_abs(&self, lambda: f64, m: usize) -> f64 {
        self.store.opacity(lambda, m)
    }

    pub fn opacity_abs_at(&self, ell: usize, m: usize) -> f64 {
        self.store.opacity_at(ell, m)
    }

    pub fn index_for_lambda(&self, lambda: f64) -> Result<usize> {
        Ok(self.require_setup("index_for_lambda")?.grid.index_for(lambda))
    }

    /// Medium indices of the dust populations, in population order.
    pub fn h_indices(&self) -> &[usize] {
        self.setup.as_ref().map(|s| s.h_indices.as_slice()).unwrap_or(&[])
    }

    pub fn has_grain_type_support(&self, population_grain_type: &str) -> bool {
        self.has_solver() && dust::has_grain_type_support(population_grain_type)
    }

    pub fn wavelength_grid(&self) -> Option<&WavelengthGrid> {
        self.setup.as_ref().map(|s| s.grid.as_ref())
    }

    pub fn num_cells(&self) -> usize {
        self.store.num_cells()
    }

    pub fn store(&self) -> &CellStateStore {
        &self.store
    }

    pub fn contexts(&self) -> &PhysicsContextCache {
        &self.contexts
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }
}

/// Mix number densities (m-3) of cell `m`, one per dust population.
pub fn mix_number_densities(h_indices: &[usize], medium: &dyn MediumState, m: usize) -> Vec<f64> {
    h_indices.iter().map(|&h| medium.number_density(m, h)).collect()
}

fn compute_cell(
    solver: &dyn EquilibriumSolver,
    setup: &Setup,
    slot: &mut ContextSlot,
    medium: &dyn MediumState,
    m: usize,
    verbose: bool,
    diagnostics: Option<&mut Vec<(String, f64)>>,
) -> Result<CellResult> {
    let start = Instant::now();
    let intensity = prepare_mean_intensity(setup.grid.wavelengths(), &medium.mean_intensity(m))?;
    if verbose && intensity.zero_samples > 0 {
        log::debug!("{} zeros in cell {}", intensity.zero_samples, m);
    }

    let mix = mix_number_densities(&setup.h_indices, medium, m);
    let grains = slot.prepare(&setup.populations, &mix, verbose)?;

    let n_cm3 = medium.gas_number_density(m) * PER_M3_TO_PER_CM3;
    let request = SolveRequest {
        cell: m,
        gas_density_cm3: n_cm3,
        mean_intensity_nu: &intensity.j_nu,
        frequencies: &setup.frequencies,
    };
    let state = solver.solve(&request, grains, diagnostics)?;
    let opacity_nu = solver.opacity(&state, &request, grains)?;
    if opacity_nu.len() != setup.frequencies.len() {
        return Err(GasError::row_width("opacity row", setup.frequencies.len(), opacity_nu.len()));
    }
    // stored per wavelength, so the frequency order is flipped
    let opacity = opacity_nu.iter().rev().map(|k| k * PER_CM_TO_PER_M).collect();

    if verbose {
        log::trace!(
            "gas sample {} n {:e} time {} ms; T {:.1} K",
            m,
            n_cm3,
            start.elapsed().as_millis(),
            state.temperature_k
        );
    }

    Ok(CellResult {
        state,
        opacity,
        zero_samples: intensity.zero_samples,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::ReferenceSolver;

    struct Uniform {
        cells: usize,
        samples: usize,
    }

    impl MediumState for Uniform {
        fn num_cells(&self) -> usize {
            self.cells
        }

        fn mean_intensity(&self, _m: usize) -> Vec<f64> {
            vec![1.0e-3; self.samples]
        }

        fn gas_number_density(&self, _m: usize) -> f64 {
            1.0e8
        }

        fn number_density(&self, _m: usize, _h: usize) -> f64 {
            1.0e8
        }
    }

    fn wavelengths() -> Vec<f64> {
        vec![1.0e-7, 2.0e-7, 5.0e-7, 1.0e-6]
    }

    fn engine() -> GasEngine {
        let mut engine = GasEngine::with_solver(Arc::new(ReferenceSolver::default()));
        engine.initialize(wavelengths(), vec![], vec![5.0e-7, 2.0e-6]).unwrap();
        engine
    }

    #[test]
    fn solver_absence_is_unsupported_not_uninitialized() {
        let mut engine = GasEngine::without_solver();
        assert!(matches!(engine.allocate(3), Err(GasError::Unsupported(_))));
        assert!(matches!(
            engine.initialize(wavelengths(), vec![], wavelengths()),
            Err(GasError::Unsupported(_))
        ));
        assert!(!engine.has_grain_type_support("Silicate"));
    }

    #[test]
    fn lifecycle_guards() {
        let mut engine = GasEngine::with_solver(Arc::new(ReferenceSolver::default()));
        assert!(matches!(engine.allocate(3), Err(GasError::NotInitialized { .. })));
        engine.initialize(wavelengths(), vec![], wavelengths()).unwrap();
        assert!(matches!(
            engine.initialize(wavelengths(), vec![], wavelengths()),
            Err(GasError::AlreadyInitialized)
        ));
        engine.finalize();
        assert!(!engine.is_initialized());
        engine.initialize(wavelengths(), vec![], wavelengths()).unwrap();
    }

    #[test]
    fn emission_grid_must_overlap() {
        let mut engine = GasEngine::with_solver(Arc::new(ReferenceSolver::default()));
        let err = engine.initialize(wavelengths(), vec![], vec![1.0, 2.0]).unwrap_err();
        assert!(matches!(err, GasError::NoOverlap { .. }));
        assert!(!engine.is_initialized());
    }

    #[test]
    fn single_cell_update_writes_only_that_cell() {
        let mut engine = engine();
        engine.allocate(3).unwrap();
        let medium = Uniform { cells: 3, samples: 4 };
        engine.update_gas_state(1, &medium).unwrap();
        assert!(engine.temperature(1) > 0.0);
        assert_eq!(engine.temperature(0), 0.0);
        assert_eq!(engine.contexts().total_builds(), 1);
    }

    #[test]
    fn wrong_intensity_length_reports_cell() {
        let mut engine = engine();
        engine.allocate(3).unwrap();
        let medium = Uniform { cells: 3, samples: 2 };
        let err = engine.update_gas_state(2, &medium).unwrap_err();
        assert!(matches!(err, GasError::CellFailure { cell: 2, .. }));
        assert!(matches!(err.root_cause(), GasError::GridMismatch { expected: 4, actual: 2 }));
    }

    #[test]
    fn diagnostics_names_match_values() {
        let engine = engine();
        let medium = Uniform { cells: 1, samples: 4 };
        let diagnostics = engine.diagnostics(0, &medium).unwrap();
        assert_eq!(diagnostics.names, engine.diagnostic_names().unwrap());
        assert_eq!(diagnostics.names.len(), diagnostics.values.len());
    }

    #[test]
    fn emissivity_is_on_the_emission_grid() {
        let mut engine = engine();
        engine.allocate(1).unwrap();
        assert_eq!(engine.emissivity(0).unwrap().len(), 2);
    }
}
