// src/constants.rs - physical and bookkeeping constants for the gas state engine

pub const SPEED_OF_LIGHT_M_S: f64 = 2.997_924_58e8;
pub const PLANCK_J_S: f64 = 6.626_070_15e-34;
pub const BOLTZMANN_J_K: f64 = 1.380_649e-23;

// radiation density constant a = 4 sigma / c, cgs (erg cm-3 K-4)
pub const RADIATION_DENSITY_CGS: f64 = 7.565_723e-15;
pub const SPEED_OF_LIGHT_CM_S: f64 = SPEED_OF_LIGHT_M_S * 100.0;

// unit conversions between the radiation field (SI) and the solver (cgs)
pub const PER_M3_TO_PER_CM3: f64 = 1.0e-6;
pub const M_TO_CM: f64 = 100.0;
pub const SI_TO_CGS_INTENSITY: f64 = 1.0e3; // J s-1 m-2 sr-1 Hz-1 -> erg s-1 cm-2 sr-1 Hz-1

/// Grain temperature assigned to every size when a worker context is first built.
pub const INITIAL_GRAIN_TEMPERATURE_K: f64 = 30.0;

/// Every n-th cell of a pass gets verbose (trace level) logging.
pub const VERBOSE_CELL_INTERVAL: usize = 300;

// default self-consistent opacity iteration settings
pub const DEFAULT_MIN_ITERATIONS: usize = 3;
pub const DEFAULT_MAX_ITERATIONS: usize = 10;
pub const DEFAULT_FRACTION_OF_PRIMARY: f64 = 0.01;
pub const DEFAULT_MAX_FRACTION_OF_PREVIOUS: f64 = 0.03;
pub const DEFAULT_PACKETS_MULTIPLIER: f64 = 1.0;

// accepted option ranges
pub const ITERATION_BOUND_MIN: usize = 2;
pub const ITERATION_BOUND_MAX: usize = 1000;
pub const PACKETS_MULTIPLIER_MAX: f64 = 1000.0;

// cgs counterparts used by the reference solver
pub const PLANCK_ERG_S: f64 = PLANCK_J_S * 1.0e7;
pub const BOLTZMANN_ERG_K: f64 = BOLTZMANN_J_K * 1.0e7;
pub const CGS_TO_SI_EMISSIVITY: f64 = 0.1; // erg s-1 cm-3 sr-1 Hz-1 -> W m-3 sr-1 Hz-1
pub const PER_CM_TO_PER_M: f64 = 100.0;
