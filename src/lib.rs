pub mod cell_store;
pub mod constants;
pub mod convergence;
pub mod dust;
pub mod error;
pub mod executor;
pub mod gas;
pub mod iteration;
pub mod options;
pub mod physics_context;
pub mod probe;
pub mod process_group;
pub mod radiation_field;
pub mod solver;
pub mod table;
pub mod wavelength_grid;

pub use cell_store::{CellStateStore, CellWindow, GasState, Species};
pub use convergence::{ConvergenceController, ConvergenceState, EmissionPhase, MaterialType, QuantityObservation};
pub use dust::{DustPopulation, GrainType};
pub use error::{GasError, Result};
pub use executor::{DistributedExecutor, WorkAssignment};
pub use gas::{Diagnostics, GasEngine, MediumState, PassSummary};
pub use options::{EngineOptions, RunOptions, SelfConsistentOpacityOptions};
pub use physics_context::{ContextSlot, PhysicsContext, PhysicsContextCache};
pub use process_group::{LocalProcessGroup, ProcessGroup, ReduceTarget, SingleProcess};
pub use solver::{EquilibriumSolver, ReferenceSolver, SolveRequest};
pub use wavelength_grid::WavelengthGrid;
