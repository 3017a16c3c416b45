//! Error types for the gas state engine.
//!
//! Every variant is fatal for the run that raised it: callers propagate with `?`
//! and never retry. Convergence failure is not an error, see
//! [`crate::iteration::IterationOutcome`].

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GasError {
    /// `initialize` was called on an engine that is already initialized.
    #[error("gas engine should be initialized exactly once")]
    AlreadyInitialized,

    #[error("gas engine is not initialized (called {operation})")]
    NotInitialized { operation: &'static str },

    #[error("gas states are not allocated (called {operation})")]
    NotAllocated { operation: &'static str },

    /// The engine holds no equilibrium solver. Distinct from `NotInitialized`.
    #[error("equilibrium solver not available: {0}")]
    Unsupported(String),

    #[error("incorrect number of elements for {context}: expected {expected}, got {actual}")]
    RowWidthMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },

    #[error("wavelength/frequency grid mismatch: expected {expected} samples, got {actual}")]
    GridMismatch { expected: usize, actual: usize },

    #[error("cell count mismatch: store holds {expected} cells, medium reports {actual}")]
    CellCountMismatch { expected: usize, actual: usize },

    #[error("{what} does not overlap the working wavelength range")]
    NoOverlap { what: String },

    #[error("invalid wavelength grid: {0}")]
    InvalidGrid(String),

    #[error("invalid dust population {index}: {reason}")]
    InvalidDustPopulation { index: usize, reason: String },

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("unknown species '{0}'")]
    UnknownSpecies(String),

    #[error("diagnostic names {actual:?} do not match the table columns {expected:?}")]
    DiagnosticsMismatch { expected: Vec<String>, actual: Vec<String> },

    #[error("invalid partition: {0}")]
    InvalidPartition(String),

    #[error("{operation} failed for cell {cell}: {source}")]
    CellFailure {
        cell: usize,
        operation: &'static str,
        source: Box<GasError>,
    },

    #[error("equilibrium solver failure: {0}")]
    Solver(String),

    #[error("collective operation failed: {0}")]
    Collective(String),

    #[error("worker pool error: {0}")]
    WorkerPool(String),

    #[error("convergence controller already reached a terminal state")]
    ControllerFinished,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GasError>;

impl GasError {
    pub fn not_initialized(operation: &'static str) -> Self {
        GasError::NotInitialized { operation }
    }

    pub fn not_allocated(operation: &'static str) -> Self {
        GasError::NotAllocated { operation }
    }

    pub fn row_width(context: impl Into<String>, expected: usize, actual: usize) -> Self {
        GasError::RowWidthMismatch {
            context: context.into(),
            expected,
            actual,
        }
    }

    pub fn options(message: impl Into<String>) -> Self {
        GasError::InvalidOptions(message.into())
    }

    /// Attaches the cell index and operation, keeping the original error as the source.
    pub fn at_cell(self, cell: usize, operation: &'static str) -> Self {
        match self {
            already @ GasError::CellFailure { .. } => already,
            other => GasError::CellFailure {
                cell,
                operation,
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, with any cell context stripped.
    pub fn root_cause(&self) -> &GasError {
        match self {
            GasError::CellFailure { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_and_not_initialized_read_differently() {
        let unsupported = GasError::Unsupported("built without a solver".into());
        let uninit = GasError::not_initialized("allocate");
        assert!(unsupported.to_string().contains("not available"));
        assert!(uninit.to_string().contains("not initialized"));
        assert!(uninit.to_string().contains("allocate"));
    }

    #[test]
    fn cell_context_wraps_once() {
        let err = GasError::row_width("opacity row", 4, 3)
            .at_cell(7, "update_gas_state")
            .at_cell(9, "outer");
        let msg = err.to_string();
        assert!(msg.contains("cell 7"));
        assert!(!msg.contains("cell 9"));
        assert!(matches!(
            err.root_cause(),
            GasError::RowWidthMismatch { expected: 4, actual: 3, .. }
        ));
    }

    #[test]
    fn json_errors_convert() {
        let parsed: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: GasError = parsed.unwrap_err().into();
        assert!(matches!(err, GasError::Serialization(_)));
    }
}
