pub mod context;
pub mod metrics;
pub mod objective;
pub mod types;
pub mod validation;

pub use context::{CalibrationContext, CalibrationContextBuilder, DEFAULT_DATE_FORMAT};
pub use objective::{
    Arity, ExtraArg, ObjectiveAdapter, ObjectiveArg, ObjectiveError, ObjectiveFunction,
};
pub use types::*;
pub use validation::{
    validate_flow_direction, validate_gauges, validate_meteorology, validate_observed_length,
};

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use ndarray::{Array2, Array3};

    /// Single-cell catchment observing `series` at its outlet.
    pub fn lumped_context(series: &[f64]) -> CalibrationContext {
        let ts = series.len();
        CalibrationContext::builder("lumped", "2000-01-01", "2000-12-31")
            .meteorology(Meteorology::new(
                Array3::ones((1, 1, ts)),
                Array3::ones((1, 1, ts)),
                Array3::ones((1, 1, ts)),
            ))
            .observed(ObservedDischarge::from_series("Q", series.to_vec()))
            .bounds(Bounds::new(vec![0.0, 0.0], vec![10.0, 10.0]).unwrap())
            .build()
            .unwrap()
    }

    /// 2 x 2 catchment with one gauge at (1, 1) and `ts` forcing steps.
    pub fn grid_context(ts: usize, n_params: usize) -> CalibrationContext {
        CalibrationContext::builder("grid", "2000-01-01", "2000-12-31")
            .spatial_resolution(SpatialResolution::Distributed)
            .meteorology(Meteorology::new(
                Array3::ones((2, 2, ts)),
                Array3::ones((2, 2, ts)),
                Array3::ones((2, 2, ts)),
            ))
            .flow_direction(Array2::ones((2, 2)))
            .gauges(GaugeTable::new(vec![Gauge::new("outlet", 1, 1)]))
            .observed(ObservedDischarge::from_series("outlet", vec![1.0; ts - 1]))
            .bounds(Bounds::new(vec![0.0; n_params], vec![10.0; n_params]).unwrap())
            .build()
            .unwrap()
    }
}
