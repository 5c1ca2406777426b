//! Optimization bundle read from JSON.
//!
//! ```json
//! {
//!   "ApiObjArgs": { "algorithm": "pso", "swarm_size": 30, "seed": 7 },
//!   "pll_type": null,
//!   "ApiSolveArgs": { "store_sol": true, "display_opts": true,
//!                     "store_hst": false, "hot_start": false }
//! }
//! ```

use crate::error::CalibrationError;
use crate::simulation::RoutingMethod;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Serial,
    Parallel,
}

impl FromStr for ExecutionMode {
    type Err = CalibrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "serial" | "none" => Ok(Self::Serial),
            "parallel" | "poa" | "spm" => Ok(Self::Parallel),
            other => Err(CalibrationError::Configuration(format!(
                "unknown parallel type '{other}'"
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for ExecutionMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(Self::Serial),
            Some(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Solve-time switches. All four keys must be present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolveOptions {
    /// Log the best solution once it is stored on the catchment context.
    pub store_sol: bool,
    /// Log the driver options before the search starts.
    pub display_opts: bool,
    /// Record every iteration (and write it to `history_file` if set).
    pub store_hst: bool,
    /// Start from the best point of a stored history.
    pub hot_start: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationArgs {
    #[serde(rename = "ApiObjArgs", default)]
    pub obj_args: IndexMap<String, Value>,
    #[serde(rename = "pll_type", default)]
    pub execution: ExecutionMode,
    #[serde(rename = "ApiSolveArgs")]
    pub solve: SolveOptions,
}

impl OptimizationArgs {
    pub fn new(obj_args: IndexMap<String, Value>, execution: ExecutionMode, solve: SolveOptions) -> Self {
        Self {
            obj_args,
            execution,
            solve,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, CalibrationError> {
        serde_json::from_str(json).map_err(config_error)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CalibrationError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn driver_settings(&self) -> Result<DriverSettings, CalibrationError> {
        DriverSettings::from_obj_args(&self.obj_args)
    }
}

/// Malformed or incomplete documents are configuration errors; only syntax
/// and I/O problems stay JSON errors.
fn config_error(err: serde_json::Error) -> CalibrationError {
    match err.classify() {
        serde_json::error::Category::Data => CalibrationError::Configuration(err.to_string()),
        _ => CalibrationError::Json(err),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    #[default]
    #[serde(rename = "pso")]
    ParticleSwarm,
    #[serde(rename = "nelder-mead")]
    NelderMead,
}

impl FromStr for Algorithm {
    type Err = CalibrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "pso" | "particle-swarm" => Ok(Self::ParticleSwarm),
            "nelder-mead" | "neldermead" | "simplex" => Ok(Self::NelderMead),
            other => Err(CalibrationError::Configuration(format!(
                "unknown algorithm '{other}', expected 'pso' or 'nelder-mead'"
            ))),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParticleSwarm => write!(f, "pso"),
            Self::NelderMead => write!(f, "nelder-mead"),
        }
    }
}

/// Search driver hyperparameters taken from `ApiObjArgs`.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverSettings {
    pub algorithm: Algorithm,
    pub max_iterations: u32,
    pub swarm_size: usize,
    pub inertia: f64,
    pub cognitive: f64,
    pub social: f64,
    pub precision: f64,
    pub stagnation_limit: u32,
    pub seed: Option<u64>,
    pub workers: usize,
    pub history_file: Option<PathBuf>,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            max_iterations: 100,
            swarm_size: 20,
            inertia: 0.7,
            cognitive: 1.5,
            social: 1.5,
            precision: 1e-6,
            stagnation_limit: 10,
            seed: None,
            workers: num_cpus::get(),
            history_file: None,
        }
    }
}

impl DriverSettings {
    pub fn from_obj_args(args: &IndexMap<String, Value>) -> Result<Self, CalibrationError> {
        let mut settings = Self::default();
        for (key, value) in args {
            match key.as_str() {
                "algorithm" => settings.algorithm = as_str(key, value)?.parse()?,
                "max_iterations" => settings.max_iterations = as_count(key, value)?,
                "swarm_size" => settings.swarm_size = as_count(key, value)?,
                "inertia" => settings.inertia = as_float(key, value)?,
                "cognitive" => settings.cognitive = as_float(key, value)?,
                "social" => settings.social = as_float(key, value)?,
                "precision" => settings.precision = as_float(key, value)?,
                "stagnation_limit" => settings.stagnation_limit = as_count(key, value)?,
                "seed" => settings.seed = Some(as_count(key, value)?),
                "workers" => settings.workers = as_count(key, value)?,
                "history_file" | "filename" => {
                    settings.history_file = Some(PathBuf::from(as_str(key, value)?))
                }
                _ => warn!(option = %key, "ignoring unknown optimizer option"),
            }
        }

        if settings.swarm_size == 0 {
            return Err(CalibrationError::Configuration(
                "'swarm_size' must be at least 1".into(),
            ));
        }
        if settings.workers == 0 {
            return Err(CalibrationError::Configuration(
                "'workers' must be at least 1".into(),
            ));
        }
        Ok(settings)
    }
}

fn ill_typed(key: &str, expected: &str, value: &Value) -> CalibrationError {
    CalibrationError::Configuration(format!("'{key}' should be {expected}, got {value}"))
}

fn as_str<'v>(key: &str, value: &'v Value) -> Result<&'v str, CalibrationError> {
    value.as_str().ok_or_else(|| ill_typed(key, "a string", value))
}

fn as_float(key: &str, value: &Value) -> Result<f64, CalibrationError> {
    value.as_f64().ok_or_else(|| ill_typed(key, "a number", value))
}

fn as_count<T: TryFrom<u64>>(key: &str, value: &Value) -> Result<T, CalibrationError> {
    value
        .as_u64()
        .and_then(|v| T::try_from(v).ok())
        .ok_or_else(|| ill_typed(key, "a non-negative integer", value))
}

/// Inputs of a lumped calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicInputs {
    #[serde(rename = "Route", deserialize_with = "flag")]
    pub route: bool,
    #[serde(rename = "RoutingFn")]
    pub routing_fn: RoutingMethod,
    #[serde(rename = "InitialValues", default, skip_serializing_if = "Option::is_none")]
    pub initial_values: Option<Vec<f64>>,
}

impl BasicInputs {
    pub fn new(route: bool, routing_fn: RoutingMethod) -> Self {
        Self {
            route,
            routing_fn,
            initial_values: None,
        }
    }

    pub fn with_initial_values(mut self, values: Vec<f64>) -> Self {
        self.initial_values = Some(values);
        self
    }

    /// Seed for the driver. An empty `InitialValues` list means no seed.
    pub fn start_point(&self) -> Option<&[f64]> {
        self.initial_values.as_deref().filter(|values| !values.is_empty())
    }

    pub fn from_json_str(json: &str) -> Result<Self, CalibrationError> {
        serde_json::from_str(json).map_err(config_error)
    }
}

/// `true`/`false` or `1`/`0`.
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(u8),
    }
    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Int(0) => Ok(false),
        Flag::Int(1) => Ok(true),
        Flag::Int(other) => Err(serde::de::Error::custom(format!(
            "Route should be 0 or 1, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const FULL: &str = r#"{
        "ApiObjArgs": {"algorithm": "nelder-mead", "max_iterations": 50, "seed": 3,
                       "filename": "hist.json", "hms": 100},
        "pll_type": "POA",
        "ApiSolveArgs": {"store_sol": true, "display_opts": true,
                         "store_hst": false, "hot_start": false}
    }"#;

    #[test]
    fn parses_full_bundle() {
        let args = OptimizationArgs::from_json_str(FULL).unwrap();
        assert_eq!(args.execution, ExecutionMode::Parallel);
        assert!(args.solve.store_sol);
        let keys: Vec<_> = args.obj_args.keys().cloned().collect();
        assert_eq!(keys, ["algorithm", "max_iterations", "seed", "filename", "hms"]);

        let settings = args.driver_settings().unwrap();
        assert_eq!(settings.algorithm, Algorithm::NelderMead);
        assert_eq!(settings.max_iterations, 50);
        assert_eq!(settings.seed, Some(3));
        assert_eq!(settings.history_file, Some(PathBuf::from("hist.json")));
        assert_eq!(settings.swarm_size, 20);
    }

    #[test]
    fn null_parallel_type_is_serial() {
        let json = r#"{"ApiObjArgs": {}, "pll_type": null,
            "ApiSolveArgs": {"store_sol": false, "display_opts": false,
                             "store_hst": false, "hot_start": false}}"#;
        let args = OptimizationArgs::from_json_str(json).unwrap();
        assert_eq!(args.execution, ExecutionMode::Serial);
    }

    #[test]
    fn missing_solve_key_is_configuration_error() {
        let json = r#"{"ApiObjArgs": {}, "pll_type": null,
            "ApiSolveArgs": {"store_sol": true, "display_opts": true, "store_hst": false}}"#;
        let err = OptimizationArgs::from_json_str(json).unwrap_err();
        assert!(matches!(err, CalibrationError::Configuration(_)));
        assert!(err.to_string().contains("hot_start"));
    }

    #[test]
    fn malformed_json_stays_json_error() {
        let err = OptimizationArgs::from_json_str("{").unwrap_err();
        assert!(matches!(err, CalibrationError::Json(_)));
    }

    #[test]
    fn ill_typed_option() {
        let mut obj = IndexMap::new();
        obj.insert("swarm_size".to_string(), json!("many"));
        let err = DriverSettings::from_obj_args(&obj).unwrap_err();
        assert!(err.to_string().contains("swarm_size"));

        obj.clear();
        obj.insert("algorithm".to_string(), json!("annealing"));
        assert!(DriverSettings::from_obj_args(&obj).is_err());
    }

    #[test]
    fn basic_inputs_accept_integer_route() {
        let inputs = BasicInputs::from_json_str(
            r#"{"Route": 1, "RoutingFn": "muskingum", "InitialValues": [1.0, 2.0]}"#,
        )
        .unwrap();
        assert!(inputs.route);
        assert_eq!(inputs.routing_fn, RoutingMethod::Muskingum);
        assert_eq!(inputs.initial_values, Some(vec![1.0, 2.0]));

        let missing = BasicInputs::from_json_str(r#"{"Route": 0}"#);
        assert!(matches!(missing, Err(CalibrationError::Configuration(_))));
    }

    #[test]
    fn empty_initial_values_mean_no_seed() {
        let inputs =
            BasicInputs::from_json_str(r#"{"Route": false, "RoutingFn": "maxbas", "InitialValues": []}"#)
                .unwrap();
        assert_eq!(inputs.start_point(), None);
        let absent = BasicInputs::from_json_str(r#"{"Route": false, "RoutingFn": "maxbas"}"#).unwrap();
        assert_eq!(absent.start_point(), None);
        let seeded = BasicInputs::new(false, RoutingMethod::Maxbas).with_initial_values(vec![3.0]);
        assert_eq!(seeded.start_point(), Some(&[3.0][..]));
    }
}
