use super::types::{
    Bounds, CalibrationResult, GaugeTable, Meteorology, ObservedDischarge, SpatialResolution,
    TemporalResolution,
};
use crate::error::CalibrationError;
use chrono::{NaiveDate, NaiveDateTime};
use ndarray::Array2;
use std::fmt;

pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Everything one catchment run needs: identity, forcing, gauges and bounds.
///
/// Evaluations only ever borrow the context. The single mutation happens
/// after a search completes, when the best result is stored.
#[derive(Clone, Debug)]
pub struct CalibrationContext {
    pub name: String,
    pub start_date: NaiveDateTime,
    pub end_date: NaiveDateTime,
    pub spatial_resolution: SpatialResolution,
    pub temporal_resolution: TemporalResolution,
    pub rows: usize,
    pub cols: usize,
    pub meteorology: Meteorology,
    pub flow_direction: Option<Array2<f64>>,
    pub gauges: GaugeTable,
    pub observed: ObservedDischarge,
    pub bounds: Bounds,
    /// Per-gauge multipliers applied to extracted discharge.
    pub discharge_factors: Option<Vec<f64>>,
    result: Option<CalibrationResult>,
}

impl CalibrationContext {
    pub fn builder(
        name: impl Into<String>,
        start_date: impl Into<String>,
        end_date: impl Into<String>,
    ) -> CalibrationContextBuilder {
        CalibrationContextBuilder::new(name.into(), start_date.into(), end_date.into())
    }

    pub fn hourly_factor(&self) -> f64 {
        self.temporal_resolution.hourly_factor()
    }

    /// Result of the last completed search, if any.
    pub fn result(&self) -> Option<&CalibrationResult> {
        self.result.as_ref()
    }

    pub(crate) fn store_result(&mut self, result: CalibrationResult) {
        self.result = Some(result);
    }
}

impl fmt::Display for CalibrationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Catchment '{}'", self.name)?;
        writeln!(f, "  period       : {} -> {}", self.start_date, self.end_date)?;
        writeln!(
            f,
            "  resolution   : {:?} / {:?} (x{})",
            self.spatial_resolution,
            self.temporal_resolution,
            self.hourly_factor()
        )?;
        writeln!(
            f,
            "  grid         : {} x {} x {}",
            self.rows,
            self.cols,
            self.meteorology.timesteps()
        )?;
        writeln!(f, "  gauges       : {}", self.gauges.len())?;
        writeln!(f, "  parameters   : {}", self.bounds.len())?;
        match &self.result {
            Some(result) => write!(f, "  calibrated   : {result}"),
            None => write!(f, "  calibrated   : no"),
        }
    }
}

pub struct CalibrationContextBuilder {
    name: String,
    start_date: String,
    end_date: String,
    date_format: String,
    spatial_resolution: SpatialResolution,
    temporal_resolution: TemporalResolution,
    grid: Option<(usize, usize)>,
    meteorology: Option<Meteorology>,
    flow_direction: Option<Array2<f64>>,
    gauges: GaugeTable,
    observed: Option<ObservedDischarge>,
    bounds: Option<Bounds>,
    discharge_factors: Option<Vec<f64>>,
}

impl CalibrationContextBuilder {
    fn new(name: String, start_date: String, end_date: String) -> Self {
        Self {
            name,
            start_date,
            end_date,
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            spatial_resolution: SpatialResolution::default(),
            temporal_resolution: TemporalResolution::default(),
            grid: None,
            meteorology: None,
            flow_direction: None,
            gauges: GaugeTable::default(),
            observed: None,
            bounds: None,
            discharge_factors: None,
        }
    }

    pub fn date_format(mut self, fmt: impl Into<String>) -> Self {
        self.date_format = fmt.into();
        self
    }

    pub fn spatial_resolution(mut self, resolution: SpatialResolution) -> Self {
        self.spatial_resolution = resolution;
        self
    }

    pub fn temporal_resolution(mut self, resolution: TemporalResolution) -> Self {
        self.temporal_resolution = resolution;
        self
    }

    /// Configured grid size. Defaults to the flow-direction grid, then to the
    /// precipitation grid.
    pub fn grid(mut self, rows: usize, cols: usize) -> Self {
        self.grid = Some((rows, cols));
        self
    }

    pub fn meteorology(mut self, meteorology: Meteorology) -> Self {
        self.meteorology = Some(meteorology);
        self
    }

    pub fn flow_direction(mut self, grid: Array2<f64>) -> Self {
        self.flow_direction = Some(grid);
        self
    }

    pub fn gauges(mut self, gauges: GaugeTable) -> Self {
        self.gauges = gauges;
        self
    }

    pub fn observed(mut self, observed: ObservedDischarge) -> Self {
        self.observed = Some(observed);
        self
    }

    pub fn bounds(mut self, bounds: Bounds) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn discharge_factors(mut self, factors: Vec<f64>) -> Self {
        self.discharge_factors = Some(factors);
        self
    }

    pub fn build(self) -> Result<CalibrationContext, CalibrationError> {
        let start_date = parse_date(&self.start_date, &self.date_format)?;
        let end_date = parse_date(&self.end_date, &self.date_format)?;
        if end_date < start_date {
            return Err(CalibrationError::Configuration(format!(
                "end date {end_date} is before start date {start_date}"
            )));
        }

        let meteorology = self.meteorology.ok_or_else(|| {
            CalibrationError::Configuration("meteorological inputs are required".into())
        })?;
        let observed = self.observed.ok_or_else(|| {
            CalibrationError::Configuration("observed discharge is required".into())
        })?;
        let bounds = self
            .bounds
            .ok_or_else(|| CalibrationError::Configuration("parameter bounds are required".into()))?;

        let (rows, cols) = match (self.grid, &self.flow_direction) {
            (Some(grid), _) => grid,
            (None, Some(fd)) => fd.dim(),
            (None, None) => {
                let (rows, cols, _) = meteorology.precipitation.dim();
                (rows, cols)
            }
        };

        Ok(CalibrationContext {
            name: self.name,
            start_date,
            end_date,
            spatial_resolution: self.spatial_resolution,
            temporal_resolution: self.temporal_resolution,
            rows,
            cols,
            meteorology,
            flow_direction: self.flow_direction,
            gauges: self.gauges,
            observed,
            bounds,
            discharge_factors: self.discharge_factors,
            result: None,
        })
    }
}

/// Parse a date or date-time with the given format.
fn parse_date(value: &str, fmt: &str) -> Result<NaiveDateTime, CalibrationError> {
    NaiveDateTime::parse_from_str(value, fmt)
        .or_else(|_| {
            NaiveDate::parse_from_str(value, fmt).map(|d| d.and_time(chrono::NaiveTime::MIN))
        })
        .map_err(|e| {
            CalibrationError::Configuration(format!(
                "cannot parse date '{value}' with format '{fmt}': {e}"
            ))
        })
}
