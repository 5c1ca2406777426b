pub mod callback;
pub mod config;
pub mod problem;
pub mod solvers;

pub use callback::{CalibrationCallback, History, IterationRecord};
pub use config::{
    Algorithm, BasicInputs, DriverSettings, ExecutionMode, OptimizationArgs, SolveOptions,
};
pub use problem::{CalibrationLoop, CalibrationMode};
pub use solvers::{
    NelderMeadDriver, OptimizationCallback, OptimizationProblem, ParticleSwarm, Problem,
    SearchDriver, SearchInfo, SearchOutcome, select_driver,
};
