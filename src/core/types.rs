use crate::error::{CalibrationError, EvaluationFailure};
use ndarray::{Array1, Array2, Array3, ArrayView2, Axis, s};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// Flat candidate vector handed out by the search driver.
pub type ParameterVector = Vec<f64>;

// ===== ENUMS =====

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpatialResolution {
    #[default]
    Lumped,
    Distributed,
}

impl FromStr for SpatialResolution {
    type Err = CalibrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lumped" => Ok(Self::Lumped),
            "distributed" => Ok(Self::Distributed),
            other => Err(CalibrationError::Configuration(format!(
                "spatial resolution should be 'Lumped' or 'Distributed', got '{other}'"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemporalResolution {
    #[default]
    Daily,
    Hourly,
}

impl TemporalResolution {
    /// Number of hours represented by one timestep.
    pub fn hourly_factor(self) -> f64 {
        match self {
            Self::Daily => 24.0,
            Self::Hourly => 1.0,
        }
    }
}

impl FromStr for TemporalResolution {
    type Err = CalibrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "hourly" => Ok(Self::Hourly),
            other => Err(CalibrationError::Configuration(format!(
                "temporal resolution should be 'Daily' or 'Hourly', got '{other}'"
            ))),
        }
    }
}

// ===== BOUNDS =====

/// Lower and upper bounds of the free parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl Bounds {
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Result<Self, CalibrationError> {
        if lower.len() != upper.len() {
            return Err(CalibrationError::Configuration(format!(
                "lower bound has {} values but upper bound has {}",
                lower.len(),
                upper.len()
            )));
        }
        if lower.is_empty() {
            return Err(CalibrationError::Configuration(
                "bounds should contain at least one parameter".into(),
            ));
        }
        for (i, (&lo, &up)) in lower.iter().zip(upper.iter()).enumerate() {
            if !lo.is_finite() || !up.is_finite() || lo > up {
                return Err(CalibrationError::Configuration(format!(
                    "invalid bounds for parameter {i}: [{lo}, {up}]"
                )));
            }
        }
        Ok(Self { lower, upper })
    }

    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    pub fn lower(&self) -> &[f64] {
        &self.lower
    }

    pub fn upper(&self) -> &[f64] {
        &self.upper
    }

    pub fn pairs(&self) -> Vec<(f64, f64)> {
        self.lower.iter().copied().zip(self.upper.iter().copied()).collect()
    }
}

// ===== GAUGES =====

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Gauge {
    pub id: String,
    pub cell_row: usize,
    pub cell_col: usize,
}

impl Gauge {
    pub fn new(id: impl Into<String>, cell_row: usize, cell_col: usize) -> Self {
        Self {
            id: id.into(),
            cell_row,
            cell_col,
        }
    }
}

/// Ordered gauge records.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GaugeTable {
    gauges: Vec<Gauge>,
}

impl GaugeTable {
    pub fn new(gauges: Vec<Gauge>) -> Self {
        Self { gauges }
    }

    /// Read a table with the columns `id`, `cell_row`, `cell_col`.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, CalibrationError> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let gauges = rdr
            .deserialize::<Gauge>()
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { gauges })
    }

    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self, CalibrationError> {
        let file = std::fs::File::open(path)?;
        Self::from_csv_reader(file)
    }

    pub fn len(&self) -> usize {
        self.gauges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gauges.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Gauge> {
        self.gauges.iter()
    }

    pub fn gauges(&self) -> &[Gauge] {
        &self.gauges
    }

    /// First gauge lying outside a `rows x cols` grid, if any.
    pub fn first_outside(&self, rows: usize, cols: usize) -> Option<&Gauge> {
        self.gauges
            .iter()
            .find(|g| g.cell_row >= rows || g.cell_col >= cols)
    }
}

impl<'a> IntoIterator for &'a GaugeTable {
    type Item = &'a Gauge;
    type IntoIter = std::slice::Iter<'a, Gauge>;

    fn into_iter(self) -> Self::IntoIter {
        self.gauges.iter()
    }
}

// ===== OBSERVED DISCHARGE =====

/// Observed discharge, one column per gauge id (timestep x column).
#[derive(Clone, Debug, PartialEq)]
pub struct ObservedDischarge {
    columns: Vec<String>,
    values: Array2<f64>,
}

impl ObservedDischarge {
    pub fn new(columns: Vec<String>, values: Array2<f64>) -> Result<Self, CalibrationError> {
        if columns.len() != values.ncols() {
            return Err(CalibrationError::Configuration(format!(
                "observed discharge has {} column names for {} columns",
                columns.len(),
                values.ncols()
            )));
        }
        Ok(Self { columns, values })
    }

    /// Single unnamed series, as used by lumped catchments.
    pub fn from_series(id: impl Into<String>, series: Vec<f64>) -> Self {
        Self {
            columns: vec![id.into()],
            values: Array1::from_vec(series).insert_axis(Axis(1)),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    pub fn timesteps(&self) -> usize {
        self.values.nrows()
    }

    /// The last column as a `(timesteps, 1)` table.
    pub fn last_column(&self) -> Option<ArrayView2<'_, f64>> {
        let last = self.values.ncols().checked_sub(1)?;
        Some(self.values.slice(s![.., last..]))
    }

    /// Columns reordered to follow the gauge table.
    pub fn aligned_to(&self, gauges: &GaugeTable) -> Result<Array2<f64>, CalibrationError> {
        let indices = gauges
            .iter()
            .map(|g| {
                self.columns.iter().position(|c| *c == g.id).ok_or_else(|| {
                    CalibrationError::Configuration(format!(
                        "no observed discharge column for gauge '{}'",
                        g.id
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.values.select(Axis(1), &indices))
    }
}

// ===== METEOROLOGY =====

/// Meteorological forcing, each grid is row x col x timestep.
#[derive(Clone, Debug, PartialEq)]
pub struct Meteorology {
    pub precipitation: Array3<f64>,
    pub evapotranspiration: Array3<f64>,
    pub temperature: Array3<f64>,
}

impl Meteorology {
    pub fn new(
        precipitation: Array3<f64>,
        evapotranspiration: Array3<f64>,
        temperature: Array3<f64>,
    ) -> Self {
        Self {
            precipitation,
            evapotranspiration,
            temperature,
        }
    }

    /// Lumped forcing from a table whose first three columns are
    /// precipitation, evapotranspiration and temperature.
    pub fn lumped(data: ArrayView2<'_, f64>) -> Result<Self, CalibrationError> {
        if data.ncols() < 3 {
            return Err(CalibrationError::Dimension(format!(
                "lumped meteorological data needs 3 columns, got {}",
                data.ncols()
            )));
        }
        let grid = |col: usize| {
            data.column(col)
                .to_owned()
                .into_shape_with_order((1, 1, data.nrows()))
                .map_err(|e| CalibrationError::Dimension(e.to_string()))
        };
        Ok(Self {
            precipitation: grid(0)?,
            evapotranspiration: grid(1)?,
            temperature: grid(2)?,
        })
    }

    pub fn timesteps(&self) -> usize {
        self.precipitation.dim().2
    }
}

// ===== RESULTS =====

/// Outcome of one candidate evaluation, as reported to the search driver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub value: f64,
    pub constraints: Vec<f64>,
    pub failed: bool,
}

impl Evaluation {
    pub fn success(value: f64) -> Self {
        Self {
            value,
            constraints: Vec::new(),
            failed: false,
        }
    }

    pub fn failure() -> Self {
        Self {
            value: f64::NAN,
            constraints: Vec::new(),
            failed: true,
        }
    }

    pub fn fail_flag(&self) -> u8 {
        u8::from(self.failed)
    }

    /// `(value, constraints, fail)` projection.
    pub fn as_tuple(&self) -> (f64, Vec<f64>, u8) {
        (self.value, self.constraints.clone(), self.fail_flag())
    }

    /// Cost used for ranking: rejected candidates never win.
    pub fn ranking_cost(&self) -> f64 {
        if self.failed { f64::INFINITY } else { self.value }
    }
}

impl From<Result<f64, EvaluationFailure>> for Evaluation {
    fn from(result: Result<f64, EvaluationFailure>) -> Self {
        match result {
            Ok(value) => Self::success(value),
            Err(_) => Self::failure(),
        }
    }
}

/// Best parameters found by a completed search.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub parameters: ParameterVector,
    pub objective: f64,
    pub driver: String,
    pub evaluations: usize,
}

impl fmt::Display for CalibrationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "objective = {:.6e} after {} evaluations ({})",
            self.objective, self.evaluations, self.driver
        )
    }
}
