//! The self-consistent opacity loop: gas pass, transport phases, convergence
//! check, repeated until the controller stops it.

mod driver;
mod hooks;

pub use driver::{
    AbsorbedLuminosity, IterationOutcome, IterationProps, PhaseTiming, SelfConsistentIteration, TransportPass,
};
pub use hooks::{IterationHook, IterationHookHandle, TemperatureReportingHook, TemperatureSummary};
