use super::metrics;
use super::types::GaugeTable;
use crate::error::{CalibrationError, CandidateError, EvaluationFailure};
use ndarray::{ArrayView1, ArrayView2, ArrayView3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Argument handed to an objective function after `(observed, simulated)`.
#[derive(Debug, Clone, Copy)]
pub enum ObjectiveArg<'a> {
    Scalar(f64),
    Flag(bool),
    Text(&'a str),
    Series(&'a [f64]),
    Grid(ArrayView3<'a, f64>),
    Gauges(&'a GaugeTable),
}

impl<'a> ObjectiveArg<'a> {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::Flag(_) => "flag",
            Self::Text(_) => "text",
            Self::Series(_) => "series",
            Self::Grid(_) => "grid",
            Self::Gauges(_) => "gauge table",
        }
    }

    pub fn as_scalar(&self, index: usize) -> Result<f64, ObjectiveError> {
        match self {
            Self::Scalar(v) => Ok(*v),
            other => Err(ObjectiveError::mismatch(index, "scalar", other)),
        }
    }

    pub fn as_series(&self, index: usize) -> Result<&'a [f64], ObjectiveError> {
        match self {
            Self::Series(v) => Ok(*v),
            other => Err(ObjectiveError::mismatch(index, "series", other)),
        }
    }

    pub fn as_grid(&self, index: usize) -> Result<ArrayView3<'a, f64>, ObjectiveError> {
        match self {
            Self::Grid(v) => Ok(*v),
            other => Err(ObjectiveError::mismatch(index, "grid", other)),
        }
    }

    pub fn as_gauges(&self, index: usize) -> Result<&'a GaugeTable, ObjectiveError> {
        match self {
            Self::Gauges(v) => Ok(*v),
            other => Err(ObjectiveError::mismatch(index, "gauge table", other)),
        }
    }
}

/// Owned extra argument stored by the adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtraArg {
    Flag(bool),
    Scalar(f64),
    Series(Vec<f64>),
    Text(String),
}

impl ExtraArg {
    pub fn as_arg(&self) -> ObjectiveArg<'_> {
        match self {
            Self::Flag(v) => ObjectiveArg::Flag(*v),
            Self::Scalar(v) => ObjectiveArg::Scalar(*v),
            Self::Series(v) => ObjectiveArg::Series(v),
            Self::Text(v) => ObjectiveArg::Text(v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ObjectiveError {
    /// The function received an argument it cannot take. Treated like an
    /// arity mismatch: fatal on first occurrence.
    #[error("argument {index} should be a {expected}, got a {found}")]
    ArgumentType {
        index: usize,
        expected: &'static str,
        found: &'static str,
    },

    /// The metric itself could not be computed for this candidate.
    #[error("{0}")]
    Computation(String),
}

impl ObjectiveError {
    pub fn mismatch(index: usize, expected: &'static str, found: &ObjectiveArg<'_>) -> Self {
        Self::ArgumentType {
            index,
            expected,
            found: found.kind(),
        }
    }
}

/// Number of extra arguments an objective function accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(self, supplied: usize) -> bool {
        match self {
            Self::Exact(n) => supplied == n,
            Self::AtLeast(n) => supplied >= n,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(n) => write!(f, "exactly {n}"),
            Self::AtLeast(n) => write!(f, "at least {n}"),
        }
    }
}

pub type ObjectiveFn = dyn Fn(ArrayView2<'_, f64>, ArrayView2<'_, f64>, &[ObjectiveArg<'_>]) -> Result<f64, ObjectiveError>
    + Send
    + Sync;

/// Performance function scoring simulated against observed discharge
/// (timestep x gauge tables). Lower is better.
#[derive(Clone)]
pub struct ObjectiveFunction {
    name: String,
    arity: Arity,
    func: Arc<ObjectiveFn>,
}

impl ObjectiveFunction {
    pub fn new<F>(name: impl Into<String>, arity: Arity, func: F) -> Self
    where
        F: Fn(ArrayView2<'_, f64>, ArrayView2<'_, f64>, &[ObjectiveArg<'_>]) -> Result<f64, ObjectiveError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            arity,
            func: Arc::new(func),
        }
    }

    /// Built-in metric by name: `nse`, `log_nse`, `kge`, `rmse`, `pbias`,
    /// `volume`. Efficiencies are turned into losses (`1 - mean score`).
    pub fn builtin(name: &str) -> Result<Self, CalibrationError> {
        let metric: fn(ArrayView2<'_, f64>, ArrayView2<'_, f64>) -> Result<f64, ObjectiveError> =
            match name.to_ascii_lowercase().as_str() {
                "nse" => |o, s| Ok(1.0 - mean(&per_gauge(o, s, metrics::nse)?)),
                "log_nse" => |o, s| Ok(1.0 - mean(&per_gauge(o, s, metrics::log_nse)?)),
                "kge" => |o, s| Ok(1.0 - mean(&per_gauge(o, s, metrics::kge)?)),
                "rmse" => |o, s| Ok(mean(&per_gauge(o, s, metrics::rmse)?)),
                "pbias" => |o, s| {
                    let scores = per_gauge(o, s, metrics::pbias)?;
                    Ok(scores.iter().map(|v| v.abs()).sum::<f64>() / scores.len() as f64)
                },
                "volume" => |o, s| Ok(per_gauge(o, s, metrics::volume_error)?.iter().sum()),
                _ => {
                    return Err(CalibrationError::Configuration(format!(
                        "'{name}' is not a callable objective function"
                    )));
                }
            };
        // Context arguments of the distributed modes are accepted and ignored.
        Ok(Self::new(name, Arity::AtLeast(0), move |o, s, _| metric(o, s)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> Arity {
        self.arity
    }
}

impl fmt::Debug for ObjectiveFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectiveFunction")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// Objective function plus the extra arguments it is always called with.
#[derive(Clone, Debug)]
pub struct ObjectiveAdapter {
    function: ObjectiveFunction,
    args: Vec<ExtraArg>,
}

impl ObjectiveAdapter {
    pub fn new(function: ObjectiveFunction, args: Option<Vec<ExtraArg>>) -> Self {
        let args = args.unwrap_or_default();
        info!(
            objective = function.name(),
            extra_args = args.len(),
            "objective function is read successfully"
        );
        Self { function, args }
    }

    /// Adapter around a built-in metric. Unknown names are a configuration error.
    pub fn from_name(name: &str, args: Option<Vec<ExtraArg>>) -> Result<Self, CalibrationError> {
        Ok(Self::new(ObjectiveFunction::builtin(name)?, args))
    }

    pub fn function(&self) -> &ObjectiveFunction {
        &self.function
    }

    pub fn args(&self) -> &[ExtraArg] {
        &self.args
    }

    /// Fails with an arity error when `supplied` arguments cannot be accepted.
    pub fn check_arity(&self, supplied: usize) -> Result<(), CalibrationError> {
        if self.function.arity.accepts(supplied) {
            Ok(())
        } else {
            Err(CalibrationError::Arity(format!(
                "'{}' takes {} extra argument(s) but {} were supplied",
                self.function.name, self.function.arity, supplied
            )))
        }
    }

    /// Call the function with `context ++ adapter args`.
    pub(crate) fn call<'a>(
        &'a self,
        observed: ArrayView2<'_, f64>,
        simulated: ArrayView2<'_, f64>,
        context: &[ObjectiveArg<'a>],
    ) -> Result<f64, CandidateError> {
        let mut supplied: Vec<ObjectiveArg<'a>> = Vec::with_capacity(context.len() + self.args.len());
        supplied.extend_from_slice(context);
        supplied.extend(self.args.iter().map(ExtraArg::as_arg));
        self.check_arity(supplied.len())?;

        match (self.function.func)(observed, simulated, &supplied) {
            Ok(value) if value.is_nan() => Err(EvaluationFailure::NotANumber.into()),
            Ok(value) => Ok(value),
            Err(err @ ObjectiveError::ArgumentType { .. }) => Err(CalibrationError::Arity(
                format!("'{}': {err}", self.function.name),
            )
            .into()),
            Err(ObjectiveError::Computation(msg)) => Err(EvaluationFailure::Objective(msg).into()),
        }
    }
}

/// Apply `metric` to every gauge column.
fn per_gauge(
    observed: ArrayView2<'_, f64>,
    simulated: ArrayView2<'_, f64>,
    metric: fn(ArrayView1<'_, f64>, ArrayView1<'_, f64>) -> f64,
) -> Result<Vec<f64>, ObjectiveError> {
    if observed.dim() != simulated.dim() {
        let (or, oc) = observed.dim();
        let (sr, sc) = simulated.dim();
        return Err(ObjectiveError::Computation(format!(
            "observed is {or} x {oc} but simulated is {sr} x {sc}"
        )));
    }
    if observed.is_empty() {
        return Err(ObjectiveError::Computation("no discharge to compare".into()));
    }
    Ok(observed
        .columns()
        .into_iter()
        .zip(simulated.columns())
        .map(|(o, s)| metric(o, s))
        .collect())
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}
