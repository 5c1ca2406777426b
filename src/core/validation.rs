use super::context::CalibrationContext;
use crate::error::CalibrationError;
use ndarray::Array3;

/// Check that every meteorological grid matches the configured rows/cols and
/// that all of them cover the same number of timesteps.
pub fn validate_meteorology(ctx: &CalibrationContext) -> Result<(), CalibrationError> {
    let met = &ctx.meteorology;
    let grids: [(&str, &Array3<f64>); 3] = [
        ("precipitation", &met.precipitation),
        ("evapotranspiration", &met.evapotranspiration),
        ("temperature", &met.temperature),
    ];

    for (name, grid) in &grids {
        let (rows, cols, _) = grid.dim();
        if rows != ctx.rows {
            return Err(CalibrationError::Dimension(format!(
                "{name} has {rows} rows but the catchment has {}",
                ctx.rows
            )));
        }
        if cols != ctx.cols {
            return Err(CalibrationError::Dimension(format!(
                "{name} has {cols} columns but the catchment has {}",
                ctx.cols
            )));
        }
    }

    let timesteps = met.precipitation.dim().2;
    for (name, grid) in &grids[1..] {
        let len = grid.dim().2;
        if len != timesteps {
            return Err(CalibrationError::Dimension(format!(
                "{name} has {len} timesteps but precipitation has {timesteps}"
            )));
        }
    }
    if timesteps == 0 {
        return Err(CalibrationError::Dimension(
            "meteorological inputs contain no timesteps".into(),
        ));
    }

    Ok(())
}

/// Check the flow-direction grid against the configured rows/cols.
pub fn validate_flow_direction(ctx: &CalibrationContext) -> Result<(), CalibrationError> {
    let fd = ctx.flow_direction.as_ref().ok_or_else(|| {
        CalibrationError::Configuration("flow direction grid is required for this mode".into())
    })?;
    let (rows, cols) = fd.dim();
    if rows != ctx.rows || cols != ctx.cols {
        return Err(CalibrationError::Dimension(format!(
            "flow direction grid is {rows} x {cols} but the catchment is {} x {}",
            ctx.rows, ctx.cols
        )));
    }
    Ok(())
}

/// Every gauge must sit inside the simulation grid.
pub fn validate_gauges(ctx: &CalibrationContext) -> Result<(), CalibrationError> {
    if ctx.gauges.is_empty() {
        return Err(CalibrationError::Configuration(
            "gauge table is empty".into(),
        ));
    }
    if let Some(gauge) = ctx.gauges.first_outside(ctx.rows, ctx.cols) {
        return Err(CalibrationError::Dimension(format!(
            "gauge '{}' at ({}, {}) lies outside the {} x {} grid",
            gauge.id, gauge.cell_row, gauge.cell_col, ctx.rows, ctx.cols
        )));
    }
    if let Some(factors) = ctx.discharge_factors.as_deref() {
        if !factors.is_empty() && factors.len() != ctx.gauges.len() {
            return Err(CalibrationError::Configuration(format!(
                "{} discharge factors given for {} gauges",
                factors.len(),
                ctx.gauges.len()
            )));
        }
    }
    Ok(())
}

/// Gauge discharge drops the last forcing step, so the observed table must
/// have one row less than the meteorological inputs.
pub fn validate_observed_length(ctx: &CalibrationContext) -> Result<(), CalibrationError> {
    let expected = ctx.meteorology.timesteps().saturating_sub(1);
    let rows = ctx.observed.timesteps();
    if rows != expected {
        return Err(CalibrationError::Configuration(format!(
            "observed discharge has {rows} rows but {} forcing steps give {expected} simulated steps",
            ctx.meteorology.timesteps()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Bounds, Gauge, GaugeTable, Meteorology, ObservedDischarge};
    use ndarray::Array2;

    fn context(prec: (usize, usize, usize), et: (usize, usize, usize)) -> CalibrationContext {
        CalibrationContext::builder("test", "2000-01-01", "2000-01-10")
            .grid(2, 3)
            .meteorology(Meteorology::new(
                Array3::zeros(prec),
                Array3::zeros(et),
                Array3::zeros((2, 3, 5)),
            ))
            .flow_direction(Array2::zeros((2, 3)))
            .gauges(GaugeTable::new(vec![Gauge::new("g1", 1, 2)]))
            .observed(ObservedDischarge::from_series("g1", vec![0.0; 4]))
            .bounds(Bounds::new(vec![0.0], vec![1.0]).unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn consistent_inputs_pass() {
        let ctx = context((2, 3, 5), (2, 3, 5));
        validate_meteorology(&ctx).unwrap();
        validate_flow_direction(&ctx).unwrap();
        validate_gauges(&ctx).unwrap();
    }

    #[test]
    fn row_mismatch_is_dimension_error() {
        let ctx = context((3, 3, 5), (2, 3, 5));
        let err = validate_meteorology(&ctx).unwrap_err();
        assert!(matches!(err, CalibrationError::Dimension(_)));
        assert!(err.to_string().contains("precipitation has 3 rows"));
    }

    #[test]
    fn timestep_mismatch_is_dimension_error() {
        let ctx = context((2, 3, 5), (2, 3, 4));
        let err = validate_meteorology(&ctx).unwrap_err();
        assert!(err.to_string().contains("evapotranspiration has 4 timesteps"));
    }

    #[test]
    fn flow_direction_mismatch() {
        let mut ctx = context((2, 3, 5), (2, 3, 5));
        ctx.flow_direction = Some(Array2::zeros((3, 3)));
        assert!(matches!(
            validate_flow_direction(&ctx),
            Err(CalibrationError::Dimension(_))
        ));
        ctx.flow_direction = None;
        assert!(matches!(
            validate_flow_direction(&ctx),
            Err(CalibrationError::Configuration(_))
        ));
    }

    #[test]
    fn gauge_outside_grid() {
        let mut ctx = context((2, 3, 5), (2, 3, 5));
        ctx.gauges = GaugeTable::new(vec![Gauge::new("far", 2, 0)]);
        assert!(matches!(
            validate_gauges(&ctx),
            Err(CalibrationError::Dimension(_))
        ));
    }

    #[test]
    fn observed_rows_follow_forcing_steps() {
        let mut ctx = context((2, 3, 5), (2, 3, 5));
        validate_observed_length(&ctx).unwrap();
        ctx.observed = ObservedDischarge::from_series("g1", vec![0.0; 5]);
        let err = validate_observed_length(&ctx).unwrap_err();
        assert!(matches!(err, CalibrationError::Configuration(_)));
        assert!(err.to_string().contains("5 rows"));
    }

    #[test]
    fn factor_count_must_match_gauges() {
        let mut ctx = context((2, 3, 5), (2, 3, 5));
        ctx.discharge_factors = Some(vec![1.0, 2.0]);
        assert!(validate_gauges(&ctx).is_err());
        ctx.discharge_factors = Some(Vec::new());
        assert!(validate_gauges(&ctx).is_ok());
    }
}
