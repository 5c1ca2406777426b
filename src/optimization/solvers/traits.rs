use crate::core::Evaluation;
use crate::error::CalibrationError;
use crate::optimization::config::{ExecutionMode, SolveOptions};
use serde::{Deserialize, Serialize};

/// How a search ended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchInfo {
    pub driver: String,
    pub converged: bool,
    pub iterations: u32,
    pub evaluations: usize,
    pub failed_evaluations: usize,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub best_objective: f64,
    pub best_parameters: Vec<f64>,
    pub info: SearchInfo,
}

/// Callback interface for search progress
pub trait OptimizationCallback {
    /// Called at each iteration with the best parameters and cost so far
    fn on_iteration(&mut self, iteration: u32, params: &[f64], cost: f64)
    -> Result<(), CalibrationError>;

    /// Check if the search should stop early
    fn should_stop(&self) -> bool {
        false
    }
}

/// Callback that does nothing.
impl OptimizationCallback for () {
    fn on_iteration(&mut self, _: u32, _: &[f64], _: f64) -> Result<(), CalibrationError> {
        Ok(())
    }
}

/// What a search driver sees of a calibration.
///
/// `evaluate` reports recoverable candidate failures inside the
/// [`Evaluation`]; an `Err` is fatal and aborts the search.
pub trait Problem: Sync {
    fn name(&self) -> &str;

    fn evaluate(&self, params: &[f64]) -> Result<Evaluation, CalibrationError>;

    fn num_params(&self) -> usize {
        self.bounds().len()
    }

    /// Starting point of the search
    fn initial_params(&self) -> &[f64];

    /// Parameter bounds (min, max) for each parameter
    fn bounds(&self) -> &[(f64, f64)];
}

/// Search driver interface
pub trait SearchDriver {
    fn name(&self) -> &str;

    fn solve(
        &mut self,
        problem: &dyn Problem,
        options: &SolveOptions,
        mode: ExecutionMode,
        callback: &mut dyn OptimizationCallback,
    ) -> Result<SearchOutcome, CalibrationError>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct DecisionVariable {
    pub name: String,
    pub lower: f64,
    pub upper: f64,
    pub initial: Option<f64>,
}

type EvaluateFn<'a> = dyn Fn(&[f64]) -> Result<Evaluation, CalibrationError> + Sync + 'a;

/// Named problem built from an evaluation closure and bounded variables.
pub struct OptimizationProblem<'a> {
    name: String,
    evaluate: Box<EvaluateFn<'a>>,
    variables: Vec<DecisionVariable>,
    bounds: Vec<(f64, f64)>,
    initial: Vec<f64>,
}

impl<'a> OptimizationProblem<'a> {
    pub fn new<F>(name: impl Into<String>, evaluate: F) -> Self
    where
        F: Fn(&[f64]) -> Result<Evaluation, CalibrationError> + Sync + 'a,
    {
        Self {
            name: name.into(),
            evaluate: Box::new(evaluate),
            variables: Vec::new(),
            bounds: Vec::new(),
            initial: Vec::new(),
        }
    }

    /// Add a continuous variable. Without an initial value the search starts
    /// at the middle of the range.
    pub fn add_variable(
        &mut self,
        name: impl Into<String>,
        lower: f64,
        upper: f64,
        initial: Option<f64>,
    ) -> Result<(), CalibrationError> {
        let name = name.into();
        if !(lower <= upper) {
            return Err(CalibrationError::Configuration(format!(
                "variable '{name}' has lower bound {lower} above upper bound {upper}"
            )));
        }
        let start = initial.unwrap_or(0.5 * (lower + upper)).clamp(lower, upper);
        self.bounds.push((lower, upper));
        self.initial.push(start);
        self.variables.push(DecisionVariable {
            name,
            lower,
            upper,
            initial,
        });
        Ok(())
    }

    pub fn variables(&self) -> &[DecisionVariable] {
        &self.variables
    }

    /// Replace the starting point, e.g. from a stored history.
    pub fn set_initial(&mut self, start: &[f64]) -> Result<(), CalibrationError> {
        if start.len() != self.bounds.len() {
            return Err(CalibrationError::Configuration(format!(
                "starting point has {} values for {} variables",
                start.len(),
                self.bounds.len()
            )));
        }
        for ((slot, &value), &(lo, hi)) in self.initial.iter_mut().zip(start).zip(&self.bounds) {
            *slot = value.clamp(lo, hi);
        }
        Ok(())
    }
}

impl Problem for OptimizationProblem<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, params: &[f64]) -> Result<Evaluation, CalibrationError> {
        (self.evaluate)(params)
    }

    fn initial_params(&self) -> &[f64] {
        &self.initial
    }

    fn bounds(&self) -> &[(f64, f64)] {
        &self.bounds
    }
}

impl std::fmt::Display for OptimizationProblem<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Optimization problem '{}'", self.name)?;
        for var in &self.variables {
            writeln!(
                f,
                "  {:<6} [{:>12.6e}, {:>12.6e}] start {:.6e}",
                var.name,
                var.lower,
                var.upper,
                var.initial.unwrap_or(0.5 * (var.lower + var.upper))
            )?;
        }
        Ok(())
    }
}

#[inline]
pub(crate) fn clamp_to_bounds(params: &mut [f64], bounds: &[(f64, f64)]) {
    for (p, &(min, max)) in params.iter_mut().zip(bounds) {
        *p = p.clamp(min, max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variables_start_mid_range() {
        let mut problem = OptimizationProblem::new("p", |x: &[f64]| Ok(Evaluation::success(x[0])));
        problem.add_variable("x0", 0.0, 10.0, None).unwrap();
        problem.add_variable("x1", 0.0, 10.0, Some(12.0)).unwrap();
        assert_eq!(problem.initial_params(), &[5.0, 10.0]);
        assert_eq!(problem.num_params(), 2);
        assert!(problem.to_string().contains("x1"));
    }

    #[test]
    fn rejects_inverted_variable() {
        let mut problem = OptimizationProblem::new("p", |_: &[f64]| Ok(Evaluation::failure()));
        assert!(problem.add_variable("x0", 1.0, 0.0, None).is_err());
    }

    #[test]
    fn set_initial_clamps() {
        let mut problem = OptimizationProblem::new("p", |_: &[f64]| Ok(Evaluation::failure()));
        problem.add_variable("x0", 0.0, 1.0, None).unwrap();
        problem.set_initial(&[3.0]).unwrap();
        assert_eq!(problem.initial_params(), &[1.0]);
        assert!(problem.set_initial(&[0.1, 0.2]).is_err());
    }
}
