//! Per-cell equilibrium records and the cell × wavelength opacity table.
//!
//! The store is written during a pass through disjoint [`CellWindow`]s, one per
//! worker, and combined across processes with an explicit reduction afterwards.
//! Reads never fail: cells that were never written (or lie outside the store)
//! read as zero, which for opacity means transparent.

use crate::error::{GasError, Result};
use crate::process_group::{ProcessGroup, ReduceTarget};
use crate::table::{RowWindow, Table2, split_by_ranges};
use crate::wavelength_grid::WavelengthGrid;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Species {
    Proton,
    AtomicHydrogen,
    MolecularHydrogen,
}

impl Species {
    pub const COUNT: usize = 3;
    pub const ALL: [Species; Species::COUNT] = [
        Species::Proton,
        Species::AtomicHydrogen,
        Species::MolecularHydrogen,
    ];

    pub fn as_index(&self) -> usize {
        match self {
            Species::Proton => 0,
            Species::AtomicHydrogen => 1,
            Species::MolecularHydrogen => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Species::Proton => "H+",
            Species::AtomicHydrogen => "H",
            Species::MolecularHydrogen => "H2",
        }
    }

}

impl FromStr for Species {
    type Err = GasError;

    /// Accepts the species symbol or the probe column name.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "H+" | "np" => Ok(Species::Proton),
            "H" | "nH" => Ok(Species::AtomicHydrogen),
            "H2" | "nH2" => Ok(Species::MolecularHydrogen),
            other => Err(GasError::UnknownSpecies(other.to_string())),
        }
    }
}

/// Equilibrium state of the gas in one cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GasState {
    pub temperature_k: f64,
    /// cm-3, indexed by [`Species::as_index`]
    pub densities_cm3: [f64; Species::COUNT],
}

impl GasState {
    /// Length of the packed `[T, np, nH, nH2]` form.
    pub const PACKED_LEN: usize = 1 + Species::COUNT;

    pub fn new(temperature_k: f64, np: f64, n_h: f64, n_h2: f64) -> Self {
        Self {
            temperature_k,
            densities_cm3: [np, n_h, n_h2],
        }
    }

    pub fn density(&self, species: Species) -> f64 {
        self.densities_cm3[species.as_index()]
    }

    pub fn pack(&self, out: &mut [f64]) {
        out[0] = self.temperature_k;
        out[1..Self::PACKED_LEN].copy_from_slice(&self.densities_cm3);
    }

    pub fn unpack(packed: &[f64]) -> Self {
        Self {
            temperature_k: packed[0],
            densities_cm3: [packed[1], packed[2], packed[3]],
        }
    }
}

#[derive(Debug, Default)]
pub struct CellStateStore {
    states: Vec<GasState>,
    opacity: Table2,
    grid: Option<Arc<WavelengthGrid>>,
}

impl CellStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sizes the store for `num_cells` cells on `grid`; previous contents are discarded.
    pub fn allocate(&mut self, num_cells: usize, grid: Arc<WavelengthGrid>) {
        self.states.clear();
        self.states.resize(num_cells, GasState::default());
        self.opacity.resize(num_cells, grid.len());
        self.grid = Some(grid);
    }

    pub fn is_allocated(&self) -> bool {
        self.grid.is_some()
    }

    pub fn num_cells(&self) -> usize {
        self.states.len()
    }

    pub fn num_wavelengths(&self) -> usize {
        self.opacity.cols()
    }

    pub fn grid(&self) -> Option<&WavelengthGrid> {
        self.grid.as_deref()
    }

    /// Zeroes the opacity table. Equilibrium records are overwritten by every
    /// pass and are left as they are.
    pub fn clear(&mut self) -> Result<()> {
        if !self.is_allocated() {
            return Err(GasError::not_allocated("clear"));
        }
        self.opacity.set_to_zero();
        Ok(())
    }

    pub fn write_cell(&mut self, m: usize, state: GasState, opacity_row: &[f64]) -> Result<()> {
        if !self.is_allocated() {
            return Err(GasError::not_allocated("write_cell"));
        }
        let cells = self.num_cells();
        let mut windows = self.windows_mut(&[0..cells])?;
        windows[0].write(m, state, opacity_row)
    }

    /// One exclusive window per range; ranges must be ascending and disjoint.
    pub fn windows_mut(&mut self, ranges: &[Range<usize>]) -> Result<Vec<CellWindow<'_>>> {
        if !self.is_allocated() {
            return Err(GasError::not_allocated("windows_mut"));
        }
        let cells = self.states.len();
        let states = split_by_ranges(self.states.as_mut_slice(), 1, cells, ranges)?;
        let rows = self.opacity.windows_mut(ranges)?;
        Ok(states
            .into_iter()
            .zip(rows)
            .zip(ranges)
            .map(|((states, opacity), range)| CellWindow {
                first: range.start,
                states,
                opacity,
            })
            .collect())
    }

    fn state(&self, m: usize) -> GasState {
        self.states.get(m).copied().unwrap_or_default()
    }

    pub fn temperature(&self, m: usize) -> f64 {
        self.state(m).temperature_k
    }

    pub fn density(&self, m: usize, species: Species) -> f64 {
        self.state(m).density(species)
    }

    pub fn gas_state(&self, m: usize) -> GasState {
        self.state(m)
    }

    /// Opacity (m-1) of cell `m` in wavelength bin `ell`.
    pub fn opacity_at(&self, ell: usize, m: usize) -> f64 {
        if m < self.opacity.rows() && ell < self.opacity.cols() {
            self.opacity.get(m, ell)
        } else {
            0.0
        }
    }

    /// Opacity (m-1) of cell `m` at wavelength `lambda` (m).
    pub fn opacity(&self, lambda: f64, m: usize) -> f64 {
        match self.index_for_lambda(lambda) {
            Some(ell) => self.opacity_at(ell, m),
            None => 0.0,
        }
    }

    pub fn index_for_lambda(&self, lambda: f64) -> Option<usize> {
        self.grid.as_ref().map(|grid| grid.index_for(lambda))
    }

    pub fn opacity_row(&self, m: usize) -> Option<&[f64]> {
        (m < self.opacity.rows()).then(|| self.opacity.row(m))
    }

    pub fn opacity_table(&self) -> &Table2 {
        &self.opacity
    }

    /// Sums the opacity table element-wise over all processes.
    pub fn reduce_opacity(&mut self, group: &dyn ProcessGroup, target: ReduceTarget) -> Result<()> {
        if !self.is_allocated() {
            return Err(GasError::not_allocated("reduce_opacity"));
        }
        group.reduce(self.opacity.data_mut(), target)
    }

    /// Gathers the equilibrium records: every process contributes the records
    /// of the cells it owns and zeros elsewhere, and the packed buffers are summed.
    pub fn gather_states(
        &mut self,
        group: &dyn ProcessGroup,
        owned: Range<usize>,
        target: ReduceTarget,
    ) -> Result<()> {
        if !self.is_allocated() {
            return Err(GasError::not_allocated("gather_states"));
        }
        if owned.end > self.states.len() || owned.start > owned.end {
            return Err(GasError::InvalidPartition(format!(
                "owned range {}..{} outside {} cells",
                owned.start,
                owned.end,
                self.states.len()
            )));
        }

        let mut packed = vec![0.0; self.states.len() * GasState::PACKED_LEN];
        for m in owned {
            let start = m * GasState::PACKED_LEN;
            self.states[m].pack(&mut packed[start..start + GasState::PACKED_LEN]);
        }
        group.reduce(&mut packed, target)?;

        if group.receives(target) {
            for (state, chunk) in self.states.iter_mut().zip(packed.chunks_exact(GasState::PACKED_LEN)) {
                *state = GasState::unpack(chunk);
            }
        }
        Ok(())
    }
}

/// A worker's exclusive slice of the store: cells `first..first + len()`.
#[derive(Debug)]
pub struct CellWindow<'a> {
    first: usize,
    states: &'a mut [GasState],
    opacity: RowWindow<'a>,
}

impl CellWindow<'_> {
    pub fn first_cell(&self) -> usize {
        self.first
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn contains(&self, m: usize) -> bool {
        m >= self.first && m < self.first + self.states.len()
    }

    /// Replaces the record and opacity row of cell `m`.
    pub fn write(&mut self, m: usize, state: GasState, opacity_row: &[f64]) -> Result<()> {
        if !self.contains(m) {
            return Err(GasError::InvalidPartition(format!(
                "cell {m} outside window {}..{}",
                self.first,
                self.first + self.states.len()
            )));
        }
        // checks the row width before anything is modified
        self.opacity.set_row(m, opacity_row)?;
        self.states[m - self.first] = state;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process_group::{LocalProcessGroup, SingleProcess};
    use std::thread;

    fn grid() -> Arc<WavelengthGrid> {
        Arc::new(WavelengthGrid::new(vec![1.0, 2.0, 4.0, 8.0]).unwrap())
    }

    #[test]
    fn species_names_round_trip() {
        for species in Species::ALL {
            assert_eq!(species.as_str().parse::<Species>().unwrap(), species);
        }
        assert_eq!("nH2".parse::<Species>().unwrap(), Species::MolecularHydrogen);
        assert!(matches!("He".parse::<Species>(), Err(GasError::UnknownSpecies(name)) if name == "He"));
    }

    #[test]
    fn unwritten_and_unallocated_cells_read_zero() {
        let mut store = CellStateStore::new();
        assert_eq!(store.temperature(0), 0.0);
        assert_eq!(store.opacity(2.0, 0), 0.0);
        assert!(matches!(store.clear(), Err(GasError::NotAllocated { .. })));

        store.allocate(3, grid());
        assert_eq!(store.num_wavelengths(), 4);
        assert_eq!(store.density(2, Species::MolecularHydrogen), 0.0);
        assert_eq!(store.opacity_at(3, 2), 0.0);
        assert_eq!(store.opacity_at(9, 9), 0.0);
    }

    #[test]
    fn write_and_lookup_by_wavelength() {
        let mut store = CellStateStore::new();
        store.allocate(3, grid());
        store
            .write_cell(2, GasState::new(100.0, 1.0, 2.0, 3.0), &[0.0, 0.3, 0.0, 0.0])
            .unwrap();
        assert_eq!(store.opacity(3.0, 2), 0.3);
        assert_eq!(store.opacity(0.5, 2), 0.0);
        assert_eq!(store.temperature(2), 100.0);
        assert_eq!(store.density(2, Species::AtomicHydrogen), 2.0);
    }

    #[test]
    fn wrong_row_width_leaves_cell_untouched() {
        let mut store = CellStateStore::new();
        store.allocate(2, grid());
        let err = store
            .write_cell(1, GasState::new(50.0, 0.0, 0.0, 0.0), &[1.0, 2.0])
            .unwrap_err();
        assert!(matches!(err, GasError::RowWidthMismatch { expected: 4, actual: 2, .. }));
        assert_eq!(store.temperature(1), 0.0);
    }

    #[test]
    fn clear_is_idempotent() {
        let mut store = CellStateStore::new();
        store.allocate(2, grid());
        store.write_cell(0, GasState::default(), &[1.0; 4]).unwrap();
        store.clear().unwrap();
        let once = store.opacity_table().clone();
        store.clear().unwrap();
        assert_eq!(&once, store.opacity_table());
        assert!(once.data().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn windows_partition_the_cells() {
        let mut store = CellStateStore::new();
        store.allocate(4, grid());
        {
            let mut windows = store.windows_mut(&[0..1, 1..4]).unwrap();
            assert!(windows[0].write(2, GasState::default(), &[0.0; 4]).is_err());
            windows[1].write(2, GasState::new(7.0, 0.0, 0.0, 0.0), &[2.0; 4]).unwrap();
        }
        assert_eq!(store.temperature(2), 7.0);
        assert_eq!(store.opacity_row(2), Some(&[2.0; 4][..]));
    }

    #[test]
    fn single_process_reduction_is_identity() {
        let mut store = CellStateStore::new();
        store.allocate(2, grid());
        store.write_cell(1, GasState::new(5.0, 1.0, 1.0, 1.0), &[1.0, 2.0, 3.0, 4.0]).unwrap();
        store.reduce_opacity(&SingleProcess, ReduceTarget::AllProcesses).unwrap();
        store.gather_states(&SingleProcess, 0..2, ReduceTarget::AllProcesses).unwrap();
        assert_eq!(store.opacity_row(1), Some(&[1.0, 2.0, 3.0, 4.0][..]));
        assert_eq!(store.temperature(1), 5.0);
    }

    #[test]
    fn gather_combines_owned_records() {
        let handles: Vec<_> = LocalProcessGroup::create(2)
            .into_iter()
            .map(|group| {
                thread::spawn(move || {
                    let mut store = CellStateStore::new();
                    store.allocate(2, grid());
                    let m = group.rank();
                    let t = 10.0 * (m + 1) as f64;
                    store.write_cell(m, GasState::new(t, 0.0, 0.0, 0.0), &[t; 4]).unwrap();
                    store.reduce_opacity(&group, ReduceTarget::AllProcesses).unwrap();
                    store.gather_states(&group, m..m + 1, ReduceTarget::AllProcesses).unwrap();
                    (store.temperature(0), store.temperature(1), store.opacity_at(0, 1))
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), (10.0, 20.0, 20.0));
        }
    }
}
