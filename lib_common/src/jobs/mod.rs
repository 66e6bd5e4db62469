//! Background jobs driven from inside the process.

pub mod simulator;

pub use simulator::{SimulationManager, SimulatorConfig, SimulatorError};
