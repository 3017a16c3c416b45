// src/probe.rs - per-cell gas property and opacity tables for output on the root process

use crate::error::{GasError, Result};
use crate::executor::DistributedExecutor;
use crate::gas::{GasEngine, MediumState};
use crate::physics_context::ContextSlot;
use crate::process_group::ReduceTarget;
use crate::table::Table2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeColumn {
    pub name: String,
    pub unit: String,
}

impl ProbeColumn {
    fn new(name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
        }
    }
}

/// One row per cell. `complete` is false on processes that did not receive
/// the reduced values.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeTable {
    pub columns: Vec<ProbeColumn>,
    pub rows: Table2,
    pub complete: bool,
}

impl ProbeTable {
    pub fn num_rows(&self) -> usize {
        self.rows.rows()
    }

    pub fn row(&self, m: usize) -> &[f64] {
        self.rows.row(m)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn value(&self, m: usize, name: &str) -> Option<f64> {
        self.column_index(name).map(|c| self.rows.get(m, c))
    }
}

// index, T, np, nH, nH2
const BASE_COLUMNS: usize = 5;

#[derive(Debug, Clone, Copy, Default)]
pub struct GasProbe {
    /// append the solver's diagnostics to every row (recomputes every cell)
    pub extended_diagnostics: bool,
}

impl GasProbe {
    pub fn new(extended_diagnostics: bool) -> Self {
        Self { extended_diagnostics }
    }

    pub fn property_columns(&self, engine: &GasEngine) -> Result<Vec<ProbeColumn>> {
        let mut columns = vec![
            ProbeColumn::new("index", ""),
            ProbeColumn::new("T", "K"),
            ProbeColumn::new("np", "cm-3"),
            ProbeColumn::new("nH", "cm-3"),
            ProbeColumn::new("nH2", "cm-3"),
        ];
        if self.extended_diagnostics {
            columns.extend(engine.diagnostic_names()?.into_iter().map(|name| ProbeColumn::new(name, "")));
        }
        Ok(columns)
    }

    /// Gathers the property table on the root process. Rows are computed in
    /// parallel over the executor's processes and workers.
    ///
    /// Returns `None`, with a warning, when the engine holds no gas.
    pub fn collect(
        &self,
        engine: &GasEngine,
        executor: &DistributedExecutor,
        medium: &dyn MediumState,
    ) -> Result<Option<ProbeTable>> {
        if !engine.is_initialized() {
            log::warn!("No gas is present! Gas probe will not run!");
            return Ok(None);
        }

        let columns = self.property_columns(engine)?;
        let num_cols = columns.len();
        let num_cells = engine.num_cells();
        let mut rows = Table2::new(num_cells, num_cols);
        let assignment = executor.assignment(num_cells);
        let extended = self.extended_diagnostics;
        let diagnostic_columns: Vec<String> = columns[BASE_COLUMNS..].iter().map(|c| c.name.clone()).collect();

        {
            let windows = rows.windows_mut(&assignment.worker_ranges)?;
            let lanes: Vec<_> = windows
                .into_iter()
                .map(|window| (window, ContextSlot::default()))
                .collect();
            executor.run_lanes(&assignment, lanes, |(mut window, mut slot), first, count| {
                let mut row = Vec::with_capacity(num_cols);
                for m in first..first + count {
                    row.clear();
                    row.extend([
                        m as f64,
                        engine.temperature(m),
                        engine.np(m),
                        engine.n_h(m),
                        engine.n_h2(m),
                    ]);
                    if extended {
                        let diagnostics = engine.diagnostics_with(&mut slot, m, medium)?;
                        // same names in the same order as the columns
                        if diagnostics.names != diagnostic_columns {
                            return Err(GasError::DiagnosticsMismatch {
                                expected: diagnostic_columns.clone(),
                                actual: diagnostics.names,
                            }
                            .at_cell(m, "probe"));
                        }
                        row.extend(diagnostics.values);
                    }
                    if row.len() != num_cols {
                        return Err(GasError::row_width("gas probe row", num_cols, row.len()).at_cell(m, "probe"));
                    }
                    window.set_row(m, &row)?;
                }
                Ok(())
            })?;
        }

        executor.reduce(rows.data_mut(), ReduceTarget::Root)?;
        Ok(Some(ProbeTable {
            columns,
            rows,
            complete: executor.group().is_root(),
        }))
    }
}

/// Opacity of every cell on the radiation field wavelength grid. The opacity
/// table is identical on every process after a pass, so this needs no
/// communication.
pub fn opacity_table(engine: &GasEngine) -> Option<ProbeTable> {
    let grid = engine.wavelength_grid()?;
    let mut columns = vec![ProbeColumn::new("index", "")];
    columns.extend(
        grid.wavelengths()
            .iter()
            .map(|lambda| ProbeColumn::new(format!("opacity at lambda = {lambda:e} m"), "m-1")),
    );

    let num_cells = engine.num_cells();
    let mut rows = Table2::new(num_cells, columns.len());
    for m in 0..num_cells {
        rows.set(m, 0, m as f64);
        for ell in 0..grid.len() {
            rows.set(m, ell + 1, engine.opacity_abs_at(ell, m));
        }
    }
    Some(ProbeTable {
        columns,
        rows,
        complete: true,
    })
}
