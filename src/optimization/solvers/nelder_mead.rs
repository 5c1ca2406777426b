//! Nelder-Mead simplex driver backed by `argmin`.

use super::traits::{
    OptimizationCallback, Problem, SearchDriver, SearchInfo, SearchOutcome, clamp_to_bounds,
};
use crate::error::CalibrationError;
use crate::optimization::config::{DriverSettings, ExecutionMode, SolveOptions};
use argmin::core::{CostFunction, Executor, State};
use argmin::solver::neldermead::NelderMead;
use std::cell::RefCell;
use tracing::{info, warn};

/// Relative size of the initial simplex edges.
const SIMPLEX_STEP: f64 = 0.1;

pub struct NelderMeadDriver {
    max_iter: u32,
    precision: f64,
}

impl NelderMeadDriver {
    pub fn new(max_iter: u32, precision: f64) -> Self {
        Self {
            max_iter,
            precision,
        }
    }

    pub fn from_settings(settings: &DriverSettings) -> Self {
        Self::new(settings.max_iterations, settings.precision)
    }

    /// Start point plus one vertex per axis, stepped towards the interior.
    fn initial_simplex(start: &[f64], bounds: &[(f64, f64)]) -> Vec<Vec<f64>> {
        let mut simplex = Vec::with_capacity(start.len() + 1);
        simplex.push(start.to_vec());
        for (i, &(lo, hi)) in bounds.iter().enumerate() {
            let step = ((hi - lo) * SIMPLEX_STEP).max(1e-6);
            let mut vertex = start.to_vec();
            vertex[i] = if vertex[i] + step <= hi {
                vertex[i] + step
            } else {
                vertex[i] - step
            };
            simplex.push(vertex);
        }
        simplex
    }
}

#[derive(Default)]
struct Trace {
    evaluations: usize,
    failed: usize,
    /// Every improvement of the best value: (evaluation, params, cost).
    improvements: Vec<(usize, Vec<f64>, f64)>,
    /// First fatal error. `NelderMead::init` unwraps vertex costs, so fatal
    /// errors never travel through argmin.
    fatal: Option<CalibrationError>,
}

struct CalibrationCost<'a> {
    problem: &'a dyn Problem,
    trace: &'a RefCell<Trace>,
}

impl CostFunction for CalibrationCost<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        if self.trace.borrow().fatal.is_some() {
            return Ok(f64::MAX);
        }
        let mut x = params.clone();
        clamp_to_bounds(&mut x, self.problem.bounds());
        let evaluation = self.problem.evaluate(&x);

        let mut trace = self.trace.borrow_mut();
        trace.evaluations += 1;
        let evaluation = match evaluation {
            Ok(evaluation) => evaluation,
            Err(fatal) => {
                trace.fatal = Some(fatal);
                return Ok(f64::MAX);
            }
        };
        if evaluation.failed {
            trace.failed += 1;
            return Ok(f64::MAX);
        }
        let improves = trace
            .improvements
            .last()
            .is_none_or(|(_, _, best)| evaluation.value < *best);
        if improves {
            let n = trace.evaluations;
            trace.improvements.push((n, x, evaluation.value));
        }
        Ok(evaluation.value)
    }
}

impl SearchDriver for NelderMeadDriver {
    fn name(&self) -> &str {
        "Nelder-Mead"
    }

    fn solve(
        &mut self,
        problem: &dyn Problem,
        options: &SolveOptions,
        mode: ExecutionMode,
        callback: &mut dyn OptimizationCallback,
    ) -> Result<SearchOutcome, CalibrationError> {
        if mode == ExecutionMode::Parallel {
            warn!(driver = self.name(), "driver is sequential, evaluating candidates serially");
        }
        if options.display_opts {
            info!(
                driver = self.name(),
                max_iterations = self.max_iter,
                precision = self.precision,
                "search options"
            );
        }

        let simplex = Self::initial_simplex(problem.initial_params(), problem.bounds());
        let solver = NelderMead::new(simplex)
            .with_sd_tolerance(self.precision)
            .map_err(|e| CalibrationError::Search(e.to_string()))?;

        let trace = RefCell::new(Trace::default());
        let cost = CalibrationCost {
            problem,
            trace: &trace,
        };
        let iterations = Executor::new(cost, solver)
            .configure(|state| state.max_iters(u64::from(self.max_iter)))
            .run()
            .map(|res| u32::try_from(res.state().get_iter()).unwrap_or(u32::MAX));

        let mut trace = trace.into_inner();
        if let Some(fatal) = trace.fatal.take() {
            return Err(fatal);
        }
        let iterations = iterations.map_err(|e| CalibrationError::Search(e.to_string()))?;

        for (evaluation, params, cost) in &trace.improvements {
            let step = u32::try_from(*evaluation).unwrap_or(u32::MAX);
            callback.on_iteration(step, params, *cost)?;
            if callback.should_stop() {
                break;
            }
        }

        let (_, best_parameters, best_objective) =
            trace.improvements.last().cloned().ok_or_else(|| {
                CalibrationError::Search(format!(
                    "all {} candidate evaluations failed",
                    trace.evaluations
                ))
            })?;

        Ok(SearchOutcome {
            best_objective,
            best_parameters,
            info: SearchInfo {
                driver: self.name().to_string(),
                converged: iterations < self.max_iter,
                iterations,
                evaluations: trace.evaluations,
                failed_evaluations: trace.failed,
                message: if iterations < self.max_iter {
                    "Converged".into()
                } else {
                    "Max iterations reached".into()
                },
            },
        })
    }
}
