//! Calibration of hydrological catchment models.
//!
//! A [`Calibration`] couples a [`CalibrationContext`] (forcing, gauges,
//! observed discharge, parameter bounds) with an objective function and
//! drives a derivative-free search over a [`SimulationEngine`]. Three modes
//! are supported: full-process distributed, first-order routing and lumped.

pub mod calibration;
pub mod core;
pub mod error;
pub mod logging;
pub mod optimization;
pub mod simulation;

pub use self::calibration::Calibration;
pub use self::core::*;
pub use error::{CalibrationError, EvaluationFailure};
pub use optimization::*;
pub use simulation::{
    DistributionError, ExtractionError, HbvVariation, LumpedOutput, LumpedRouting,
    LumpedVariation, MuskingumBounds, ParameterField, RoutingMethod, RoutingVariation,
    SimulationEngine, SimulationError, SimulationOutput, SpatialVariation, active_cells,
    extract_discharge,
};
