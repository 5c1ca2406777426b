//! Goodness-of-fit scores for one gauge column.
//!
//! Every function takes the observed and simulated discharge of a single
//! gauge as equally long 1-D views.

use ndarray::{ArrayView1, Zip};

/// Offset added before taking logs so dry steps stay finite.
const LOG_OFFSET: f64 = 0.01;

fn mean(series: ArrayView1<'_, f64>) -> f64 {
    series.mean().unwrap_or(f64::NAN)
}

/// Population standard deviation.
fn std_dev(series: ArrayView1<'_, f64>) -> f64 {
    series.std(0.0)
}

fn squared_error(observed: ArrayView1<'_, f64>, simulated: ArrayView1<'_, f64>) -> f64 {
    Zip::from(observed)
        .and(simulated)
        .fold(0.0, |acc, o, s| acc + (o - s).powi(2))
}

/// Nash-Sutcliffe efficiency, 1 for a perfect fit. A flat observed series
/// has no variance to explain and scores `-inf`.
pub fn nse(observed: ArrayView1<'_, f64>, simulated: ArrayView1<'_, f64>) -> f64 {
    let mean_obs = mean(observed);
    let variance = observed.fold(0.0, |acc, o| acc + (o - mean_obs).powi(2));
    if variance == 0.0 {
        return f64::NEG_INFINITY;
    }
    1.0 - squared_error(observed, simulated) / variance
}

/// NSE of `ln(q + 0.01)`, weighting low flows.
pub fn log_nse(observed: ArrayView1<'_, f64>, simulated: ArrayView1<'_, f64>) -> f64 {
    let log = |q: f64| (q + LOG_OFFSET).ln();
    nse(observed.mapv(log).view(), simulated.mapv(log).view())
}

/// Kling-Gupta efficiency from correlation, variability ratio and bias ratio.
pub fn kge(observed: ArrayView1<'_, f64>, simulated: ArrayView1<'_, f64>) -> f64 {
    let (mean_obs, mean_sim) = (mean(observed), mean(simulated));
    let (std_obs, std_sim) = (std_dev(observed), std_dev(simulated));

    let correlation = if std_obs == 0.0 || std_sim == 0.0 {
        0.0
    } else {
        let covariance = Zip::from(observed)
            .and(simulated)
            .fold(0.0, |acc, o, s| acc + (o - mean_obs) * (s - mean_sim))
            / observed.len() as f64;
        covariance / (std_obs * std_sim)
    };
    let variability = if std_obs == 0.0 { 0.0 } else { std_sim / std_obs };
    let bias = if mean_obs == 0.0 { 0.0 } else { mean_sim / mean_obs };

    let distance = [correlation, variability, bias]
        .iter()
        .map(|c| (c - 1.0).powi(2))
        .sum::<f64>()
        .sqrt();
    1.0 - distance
}

/// Percent bias of the simulated volume; positive means overestimation.
pub fn pbias(observed: ArrayView1<'_, f64>, simulated: ArrayView1<'_, f64>) -> f64 {
    let total_obs = observed.sum();
    if total_obs == 0.0 {
        return f64::INFINITY;
    }
    100.0 * (simulated.sum() - total_obs) / total_obs
}

pub fn rmse(observed: ArrayView1<'_, f64>, simulated: ArrayView1<'_, f64>) -> f64 {
    (squared_error(observed, simulated) / observed.len() as f64).sqrt()
}

/// Absolute difference of the summed discharge.
pub fn volume_error(observed: ArrayView1<'_, f64>, simulated: ArrayView1<'_, f64>) -> f64 {
    (observed.sum() - simulated.sum()).abs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, array};

    fn observed() -> Array1<f64> {
        array![1.0, 2.0, 3.0, 4.0, 5.0]
    }

    #[test]
    fn identical_series_score_perfectly() {
        let obs = observed();
        let v = obs.view();
        assert!((nse(v, v) - 1.0).abs() < 1e-12);
        assert!((log_nse(v, v) - 1.0).abs() < 1e-12);
        assert!((kge(v, v) - 1.0).abs() < 1e-12);
        assert!(rmse(v, v).abs() < 1e-12);
        assert!(pbias(v, v).abs() < 1e-12);
        assert_eq!(volume_error(v, v), 0.0);
    }

    #[test]
    fn observed_mean_as_prediction_has_zero_nse() {
        let obs = observed();
        let flat = Array1::from_elem(5, 3.0);
        assert!(nse(obs.view(), flat.view()).abs() < 1e-12);
    }

    #[test]
    fn degenerate_observations() {
        let flat = Array1::from_elem(3, 2.0);
        let sim = array![1.0, 2.0, 3.0];
        assert_eq!(nse(flat.view(), sim.view()), f64::NEG_INFINITY);
        let dry = Array1::zeros(3);
        assert_eq!(pbias(dry.view(), sim.view()), f64::INFINITY);
    }

    #[test]
    fn ten_percent_overestimation() {
        let obs = observed();
        let sim = obs.mapv(|q| q * 1.1);
        assert!((pbias(obs.view(), sim.view()) - 10.0).abs() < 1e-9);
        // Perfect correlation and variability off by 10%, bias off by 10%.
        let expected = 1.0 - (0.1f64.powi(2) * 2.0).sqrt();
        assert!((kge(obs.view(), sim.view()) - expected).abs() < 1e-9);
    }

    #[test]
    fn constant_offset() {
        let obs = observed();
        let sim = obs.mapv(|q| q + 2.0);
        assert!((rmse(obs.view(), sim.view()) - 2.0).abs() < 1e-12);
        assert!((volume_error(obs.view(), sim.view()) - 10.0).abs() < 1e-12);
    }
}
