//! Error types for the calibration crate.
//!
//! Two families live here. [`CalibrationError`] is fatal: it aborts setup or
//! the whole search and is returned to the caller. [`EvaluationFailure`] is
//! local to one candidate: the calibration loop recovers it and reports the
//! candidate as rejected.

use crate::simulation::{DistributionError, ExtractionError, SimulationError};

/// Fatal errors surfaced to the caller of a calibration run.
#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    /// Bad objective function, missing option keys, inconsistent setup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Simulation inputs disagree with the configured grid.
    #[error("dimension mismatch: {0}")]
    Dimension(String),

    /// The objective function cannot accept the supplied arguments.
    #[error("objective function signature mismatch: {0}")]
    Arity(String),

    /// The search driver could not produce a solution.
    #[error("search failed: {0}")]
    Search(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// Failure of a single candidate evaluation.
///
/// Never propagated past the calibration loop: it becomes `(NaN, [], 1)`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvaluationFailure {
    #[error("parameter distribution failed: {0}")]
    Distribution(#[from] DistributionError),

    #[error("simulation failed: {0}")]
    Simulation(#[from] SimulationError),

    #[error("discharge extraction failed: {0}")]
    ShapeMismatch(#[from] ExtractionError),

    #[error("simulation output has no {0} component")]
    MissingComponent(&'static str),

    #[error("simulation panicked: {0}")]
    Panicked(String),

    #[error("objective function failed: {0}")]
    Objective(String),

    #[error("objective value is not a number")]
    NotANumber,
}

/// Outcome of one candidate that did not yield a value.
#[derive(Debug)]
pub(crate) enum CandidateError {
    Failed(EvaluationFailure),
    Fatal(CalibrationError),
}

impl From<EvaluationFailure> for CandidateError {
    fn from(failure: EvaluationFailure) -> Self {
        CandidateError::Failed(failure)
    }
}

impl From<DistributionError> for CandidateError {
    fn from(err: DistributionError) -> Self {
        CandidateError::Failed(err.into())
    }
}

impl From<SimulationError> for CandidateError {
    fn from(err: SimulationError) -> Self {
        CandidateError::Failed(err.into())
    }
}

impl From<ExtractionError> for CandidateError {
    fn from(err: ExtractionError) -> Self {
        CandidateError::Failed(err.into())
    }
}

impl From<CalibrationError> for CandidateError {
    fn from(err: CalibrationError) -> Self {
        CandidateError::Fatal(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_message() {
        let err = CalibrationError::Configuration("missing key 'hot_start'".into());
        assert_eq!(err.to_string(), "configuration error: missing key 'hot_start'");
    }

    #[test]
    fn simulation_failure_converts() {
        let failure: EvaluationFailure = SimulationError::Diverged("storage < 0".into()).into();
        assert!(matches!(failure, EvaluationFailure::Simulation(_)));
        assert_eq!(
            failure.to_string(),
            "simulation failed: simulation diverged: storage < 0"
        );
    }

    #[test]
    fn candidate_error_from_extraction() {
        let err: CandidateError = ExtractionError::FactorCount {
            expected: 2,
            got: 1,
        }
        .into();
        assert!(matches!(
            err,
            CandidateError::Failed(EvaluationFailure::ShapeMismatch(_))
        ));
    }

    #[test]
    fn errors_are_send_and_sync() {
        fn assert_impl<T: Send + Sync + std::error::Error>() {}
        assert_impl::<CalibrationError>();
        assert_impl::<EvaluationFailure>();
    }
}
