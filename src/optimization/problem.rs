//! The calibration loop: one stateless evaluation per candidate vector.
//!
//! Each evaluation distributes the candidate, runs the simulation engine,
//! extracts gauge discharge and scores it with the objective function.
//! Anything that goes wrong inside one evaluation is reported as a rejected
//! candidate `(NaN, [], 1)`; only configuration problems (such as an
//! objective that cannot take the supplied arguments) abort the search.

use super::solvers::traits::OptimizationProblem;
use crate::core::{
    CalibrationContext, Evaluation, ObjectiveAdapter, ObjectiveArg, validate_flow_direction,
    validate_gauges, validate_meteorology, validate_observed_length,
};
use crate::error::{CalibrationError, CandidateError, EvaluationFailure};
use crate::simulation::{
    LumpedRouting, SimulationEngine, SimulationError, SimulationOutput, SpatialVariation,
    extract_discharge,
};
use ndarray::Array2;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::{debug, info};

pub const PROBLEM_NAME: &str = "HBV Calibration";

/// Which simulation the loop drives.
#[derive(Clone, Copy)]
pub enum CalibrationMode<'a> {
    /// Conceptual model plus spatial routing. The objective also receives
    /// the upper- and lower-zone discharge grids and the gauge table.
    FullProcess(&'a dyn SpatialVariation),
    /// Simplified first-order routing. The objective also receives the gauge
    /// table.
    FirstOrderRouting(&'a dyn SpatialVariation),
    /// Whole-catchment model scored at the outlet.
    Lumped(&'a LumpedRouting),
}

/// One calibration mode, fixed before the first evaluation.
trait ModeRunner: Sync {
    fn label(&self) -> &'static str;

    fn run(
        &self,
        context: &CalibrationContext,
        engine: &dyn SimulationEngine,
        objective: &ObjectiveAdapter,
        params: &[f64],
    ) -> Result<f64, CandidateError>;
}

/// Panic payload as text.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn check_distribution(
    context: &CalibrationContext,
    distribution: &dyn SpatialVariation,
) -> Result<(), CalibrationError> {
    let (rows, cols) = distribution.shape();
    if (rows, cols) != (context.rows, context.cols) {
        return Err(CalibrationError::Dimension(format!(
            "parameter distribution covers {rows} x {cols} cells but the catchment is {} x {}",
            context.rows, context.cols
        )));
    }
    let expected = distribution.parameter_count();
    if expected != context.bounds.len() {
        return Err(CalibrationError::Configuration(format!(
            "parameter distribution takes {expected} parameters but {} bounds were given",
            context.bounds.len()
        )));
    }
    Ok(())
}

struct FullProcessRunner<'a> {
    distribution: &'a dyn SpatialVariation,
    observed: Array2<f64>,
}

impl ModeRunner for FullProcessRunner<'_> {
    fn label(&self) -> &'static str {
        "full-process"
    }

    fn run(
        &self,
        context: &CalibrationContext,
        engine: &dyn SimulationEngine,
        objective: &ObjectiveAdapter,
        params: &[f64],
    ) -> Result<f64, CandidateError> {
        let field = self.distribution.distribute(params)?;
        let output: SimulationOutput = engine.simulate_full(context, &field)?;
        let simulated = extract_discharge(
            &output.total,
            &context.gauges,
            context.rows,
            context.cols,
            context.discharge_factors.as_deref(),
        )?;
        let upper = output
            .upper_zone
            .as_ref()
            .ok_or(EvaluationFailure::MissingComponent("upper-zone"))?;
        let lower = output
            .lower_zone
            .as_ref()
            .ok_or(EvaluationFailure::MissingComponent("lower-zone"))?;

        let args = [
            ObjectiveArg::Grid(upper.view()),
            ObjectiveArg::Grid(lower.view()),
            ObjectiveArg::Gauges(&context.gauges),
        ];
        objective.call(self.observed.view(), simulated.view(), &args)
    }
}

struct FirstOrderRunner<'a> {
    distribution: &'a dyn SpatialVariation,
    observed: Array2<f64>,
}

impl ModeRunner for FirstOrderRunner<'_> {
    fn label(&self) -> &'static str {
        "first-order routing"
    }

    fn run(
        &self,
        context: &CalibrationContext,
        engine: &dyn SimulationEngine,
        objective: &ObjectiveAdapter,
        params: &[f64],
    ) -> Result<f64, CandidateError> {
        let field = self.distribution.distribute(params)?;
        let output = engine.simulate_first_order(context, &field)?;
        let simulated = extract_discharge(
            &output.total,
            &context.gauges,
            context.rows,
            context.cols,
            context.discharge_factors.as_deref(),
        )?;
        let args = [ObjectiveArg::Gauges(&context.gauges)];
        objective.call(self.observed.view(), simulated.view(), &args)
    }
}

struct LumpedRunner<'a> {
    routing: &'a LumpedRouting,
    observed: Array2<f64>,
}

impl ModeRunner for LumpedRunner<'_> {
    fn label(&self) -> &'static str {
        "lumped"
    }

    fn run(
        &self,
        context: &CalibrationContext,
        engine: &dyn SimulationEngine,
        objective: &ObjectiveAdapter,
        params: &[f64],
    ) -> Result<f64, CandidateError> {
        let output = engine.simulate_lumped(context, params, self.routing)?;
        let n = output.discharge.len();
        let simulated = Array2::from_shape_vec((n, 1), output.discharge).map_err(|e| {
            EvaluationFailure::Simulation(SimulationError::Numerical(e.to_string()))
        })?;
        objective.call(self.observed.view(), simulated.view(), &[])
    }
}

/// Evaluates candidate vectors for one catchment.
pub struct CalibrationLoop<'a> {
    context: &'a CalibrationContext,
    engine: &'a dyn SimulationEngine,
    objective: &'a ObjectiveAdapter,
    runner: Box<dyn ModeRunner + 'a>,
    print_error: bool,
}

impl<'a> CalibrationLoop<'a> {
    /// Check the inputs of `mode` and fix the mode runner.
    ///
    /// Grid disagreements are reported as [`CalibrationError::Dimension`]
    /// before the engine is ever called.
    pub fn new(
        context: &'a CalibrationContext,
        engine: &'a dyn SimulationEngine,
        objective: &'a ObjectiveAdapter,
        mode: CalibrationMode<'a>,
    ) -> Result<Self, CalibrationError> {
        validate_meteorology(context)?;

        let runner: Box<dyn ModeRunner + 'a> = match mode {
            CalibrationMode::FullProcess(distribution) => {
                validate_flow_direction(context)?;
                validate_gauges(context)?;
                validate_observed_length(context)?;
                check_distribution(context, distribution)?;
                Box::new(FullProcessRunner {
                    distribution,
                    observed: context.observed.aligned_to(&context.gauges)?,
                })
            }
            CalibrationMode::FirstOrderRouting(distribution) => {
                validate_gauges(context)?;
                validate_observed_length(context)?;
                check_distribution(context, distribution)?;
                Box::new(FirstOrderRunner {
                    distribution,
                    observed: context.observed.aligned_to(&context.gauges)?,
                })
            }
            CalibrationMode::Lumped(routing) => {
                let observed = context.observed.last_column().ok_or_else(|| {
                    CalibrationError::Configuration("observed discharge has no columns".into())
                })?;
                Box::new(LumpedRunner {
                    routing,
                    observed: observed.to_owned(),
                })
            }
        };

        Ok(Self {
            context,
            engine,
            objective,
            runner,
            print_error: false,
        })
    }

    /// Log every successful value and its parameter vector at info level.
    pub fn with_print_error(mut self, print_error: bool) -> Self {
        self.print_error = print_error;
        self
    }

    pub fn mode(&self) -> &'static str {
        self.runner.label()
    }

    pub fn context(&self) -> &CalibrationContext {
        self.context
    }

    /// Run the mode for one candidate. A panic anywhere in distribution,
    /// simulation, extraction or scoring is a rejected candidate.
    fn run_isolated(&self, params: &[f64]) -> Result<f64, CandidateError> {
        catch_unwind(AssertUnwindSafe(|| {
            self.runner
                .run(self.context, self.engine, self.objective, params)
        }))
        .unwrap_or_else(|payload| {
            Err(EvaluationFailure::Panicked(panic_message(&*payload)).into())
        })
    }

    /// Score one candidate.
    ///
    /// Recoverable failures come back as [`Evaluation::failure`]; an `Err` is
    /// fatal for the whole search.
    pub fn evaluate(&self, params: &[f64]) -> Result<Evaluation, CalibrationError> {
        match self.run_isolated(params) {
            Ok(value) => {
                if self.print_error {
                    info!(error = value, ?params, "candidate evaluated");
                }
                Ok(Evaluation::success(value))
            }
            Err(CandidateError::Failed(failure)) => {
                debug!(%failure, ?params, mode = self.mode(), "candidate rejected");
                Ok(Evaluation::failure())
            }
            Err(CandidateError::Fatal(err)) => Err(err),
        }
    }

    /// Same as [`evaluate`](Self::evaluate) but keeps the failure reason.
    pub fn try_evaluate(&self, params: &[f64]) -> Result<Result<f64, EvaluationFailure>, CalibrationError> {
        match self.run_isolated(params) {
            Ok(value) => Ok(Ok(value)),
            Err(CandidateError::Failed(failure)) => Ok(Err(failure)),
            Err(CandidateError::Fatal(err)) => Err(err),
        }
    }

    /// Search problem over the context bounds, variables `x0..xn`.
    pub fn problem(&self, initial: Option<&[f64]>) -> Result<OptimizationProblem<'_>, CalibrationError> {
        let bounds = &self.context.bounds;
        if let Some(values) = initial {
            if values.len() != bounds.len() {
                return Err(CalibrationError::Configuration(format!(
                    "{} initial values given for {} parameters",
                    values.len(),
                    bounds.len()
                )));
            }
        }

        let mut problem = OptimizationProblem::new(PROBLEM_NAME, move |x: &[f64]| self.evaluate(x));
        for (i, (lower, upper)) in bounds.pairs().into_iter().enumerate() {
            problem.add_variable(
                format!("x{i}"),
                lower,
                upper,
                initial.map(|values| values[i]),
            )?;
        }
        Ok(problem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_support::{grid_context, lumped_context};
    use crate::core::{Arity, ObjectiveFunction};
    use crate::simulation::{LumpedOutput, LumpedVariation, ParameterField, RoutingMethod, active_cells};
    use ndarray::Array3;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Outlet discharge equals the first parameter at every step.
    struct Constant {
        calls: AtomicUsize,
    }

    impl Constant {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }

        fn grid(ctx: &CalibrationContext, field: &ParameterField) -> Array3<f64> {
            let value = field.cell(0, 0).map_or(f64::NAN, |c| c[0]);
            Array3::from_elem((ctx.rows, ctx.cols, ctx.meteorology.timesteps()), value)
        }
    }

    impl SimulationEngine for Constant {
        fn simulate_full(
            &self,
            ctx: &CalibrationContext,
            field: &ParameterField,
        ) -> Result<SimulationOutput, SimulationError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            let total = Self::grid(ctx, field);
            Ok(SimulationOutput::new(total.clone()).with_components(total.clone(), total))
        }

        fn simulate_first_order(
            &self,
            ctx: &CalibrationContext,
            field: &ParameterField,
        ) -> Result<SimulationOutput, SimulationError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(SimulationOutput::new(Self::grid(ctx, field)))
        }

        fn simulate_lumped(
            &self,
            ctx: &CalibrationContext,
            params: &[f64],
            _routing: &LumpedRouting,
        ) -> Result<LumpedOutput, SimulationError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if params[0] > 9.0 {
                panic!("storage overflow");
            }
            if params[0] < 1.0 {
                return Err(SimulationError::Diverged("storage < 0".into()));
            }
            Ok(LumpedOutput {
                discharge: vec![params[0]; ctx.meteorology.timesteps()],
            })
        }
    }

    fn routing() -> LumpedRouting {
        LumpedRouting {
            route: false,
            method: RoutingMethod::Maxbas,
        }
    }

    #[test]
    fn lumped_success_failure_and_panic() {
        let ctx = lumped_context(&[2.0, 2.0, 2.0]);
        let engine = Constant::new();
        let objective = ObjectiveAdapter::from_name("volume", None).unwrap();
        let routing = routing();
        let lp = CalibrationLoop::new(&ctx, &engine, &objective, CalibrationMode::Lumped(&routing))
            .unwrap();

        assert_eq!(lp.evaluate(&[2.0, 0.0]).unwrap(), Evaluation::success(0.0));
        assert_eq!(lp.evaluate(&[3.0, 0.0]).unwrap().value, 3.0);

        let diverged = lp.evaluate(&[0.5, 0.0]).unwrap();
        assert!(diverged.value.is_nan());
        assert_eq!(diverged.fail_flag(), 1);

        let panicked = lp.try_evaluate(&[9.5, 0.0]).unwrap();
        assert!(matches!(panicked, Err(EvaluationFailure::Panicked(ref m)) if m == "storage overflow"));
    }

    #[test]
    fn objective_panic_is_a_rejected_candidate() {
        let ctx = lumped_context(&[2.0, 2.0, 2.0]);
        let engine = Constant::new();
        let fragile = ObjectiveFunction::new("fragile", Arity::AtLeast(0), |_, s, _| {
            let picks: Vec<usize> = Vec::new();
            if s.sum() > 15.0 {
                return Ok(picks[0] as f64);
            }
            Ok(s.sum())
        });
        let objective = ObjectiveAdapter::new(fragile, None);
        let routing = routing();
        let lp = CalibrationLoop::new(&ctx, &engine, &objective, CalibrationMode::Lumped(&routing))
            .unwrap();

        assert_eq!(lp.evaluate(&[2.0, 0.0]).unwrap().value, 6.0);
        let rejected = lp.evaluate(&[6.0, 0.0]).unwrap();
        assert_eq!(rejected.as_tuple().2, 1);
        assert!(rejected.value.is_nan());
        assert!(matches!(lp.try_evaluate(&[6.0, 0.0]).unwrap(), Err(EvaluationFailure::Panicked(_))));
    }

    #[test]
    fn distribution_panic_is_a_rejected_candidate() {
        use crate::simulation::{DistributionError, MuskingumBounds};

        struct Broken;
        impl SpatialVariation for Broken {
            fn parameter_count(&self) -> usize {
                1
            }
            fn shape(&self) -> (usize, usize) {
                (2, 2)
            }
            fn distribute_with(
                &self,
                _params: &[f64],
                _k_bounds: Option<MuskingumBounds>,
            ) -> Result<ParameterField, DistributionError> {
                panic!("layout table is corrupt")
            }
        }

        let ctx = grid_context(4, 1);
        let engine = Constant::new();
        let objective = ObjectiveAdapter::from_name("rmse", None).unwrap();
        let lp = CalibrationLoop::new(
            &ctx,
            &engine,
            &objective,
            CalibrationMode::FirstOrderRouting(&Broken),
        )
        .unwrap();
        assert_eq!(
            lp.try_evaluate(&[1.0]).unwrap(),
            Err(EvaluationFailure::Panicked("layout table is corrupt".into()))
        );
        assert_eq!(engine.calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn observed_rows_must_match_simulated_steps() {
        let mut ctx = grid_context(4, 1);
        ctx.observed = crate::core::ObservedDischarge::from_series("outlet", vec![1.0; 4]);
        let engine = Constant::new();
        let mask = active_cells(ctx.flow_direction.as_ref().unwrap().view());
        let distribution = LumpedVariation::new(mask, 1);
        let objective = ObjectiveAdapter::from_name("rmse", None).unwrap();
        for mode in [
            CalibrationMode::FullProcess(&distribution),
            CalibrationMode::FirstOrderRouting(&distribution),
        ] {
            let err = CalibrationLoop::new(&ctx, &engine, &objective, mode).err().unwrap();
            assert!(matches!(err, CalibrationError::Configuration(_)));
        }
        assert_eq!(engine.calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn distributed_modes_pass_context_arguments() {
        let ctx = grid_context(4, 1);
        let engine = Constant::new();
        let mask = active_cells(ctx.flow_direction.as_ref().unwrap().view());
        let distribution = LumpedVariation::new(mask, 1);

        // Reports how many arguments it received.
        let counting = ObjectiveFunction::new("count", Arity::AtLeast(0), |_, _, args| {
            Ok(args.len() as f64)
        });
        let objective = ObjectiveAdapter::new(counting, None);

        let full = CalibrationLoop::new(
            &ctx,
            &engine,
            &objective,
            CalibrationMode::FullProcess(&distribution),
        )
        .unwrap();
        assert_eq!(full.evaluate(&[1.0]).unwrap().value, 3.0);

        let first = CalibrationLoop::new(
            &ctx,
            &engine,
            &objective,
            CalibrationMode::FirstOrderRouting(&distribution),
        )
        .unwrap();
        assert_eq!(first.evaluate(&[1.0]).unwrap().value, 1.0);
    }

    #[test]
    fn wrong_candidate_length_is_recovered() {
        let ctx = grid_context(4, 1);
        let engine = Constant::new();
        let mask = active_cells(ctx.flow_direction.as_ref().unwrap().view());
        let distribution = LumpedVariation::new(mask, 1);
        let objective = ObjectiveAdapter::from_name("rmse", None).unwrap();
        let lp = CalibrationLoop::new(
            &ctx,
            &engine,
            &objective,
            CalibrationMode::FirstOrderRouting(&distribution),
        )
        .unwrap();

        let result = lp.try_evaluate(&[1.0, 2.0]).unwrap();
        assert!(matches!(result, Err(EvaluationFailure::Distribution(_))));
        assert_eq!(engine.calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn missing_components_fail_full_process() {
        struct TotalOnly;
        impl SimulationEngine for TotalOnly {
            fn simulate_full(
                &self,
                ctx: &CalibrationContext,
                _field: &ParameterField,
            ) -> Result<SimulationOutput, SimulationError> {
                Ok(SimulationOutput::new(Array3::zeros((ctx.rows, ctx.cols, 4))))
            }
        }

        let ctx = grid_context(4, 1);
        let mask = active_cells(ctx.flow_direction.as_ref().unwrap().view());
        let distribution = LumpedVariation::new(mask, 1);
        let objective = ObjectiveAdapter::from_name("rmse", None).unwrap();
        let lp = CalibrationLoop::new(
            &ctx,
            &TotalOnly,
            &objective,
            CalibrationMode::FullProcess(&distribution),
        )
        .unwrap();
        assert_eq!(
            lp.try_evaluate(&[1.0]).unwrap(),
            Err(EvaluationFailure::MissingComponent("upper-zone"))
        );
    }

    #[test]
    fn distribution_must_match_bounds() {
        let ctx = grid_context(4, 2);
        let engine = Constant::new();
        let mask = active_cells(ctx.flow_direction.as_ref().unwrap().view());
        let distribution = LumpedVariation::new(mask, 3);
        let objective = ObjectiveAdapter::from_name("rmse", None).unwrap();
        let err = CalibrationLoop::new(
            &ctx,
            &engine,
            &objective,
            CalibrationMode::FirstOrderRouting(&distribution),
        )
        .err()
        .unwrap();
        assert!(matches!(err, CalibrationError::Configuration(_)));
    }

    #[test]
    fn problem_names_variables() {
        let ctx = lumped_context(&[1.0, 1.0]);
        let engine = Constant::new();
        let objective = ObjectiveAdapter::from_name("rmse", None).unwrap();
        let routing = routing();
        let lp = CalibrationLoop::new(&ctx, &engine, &objective, CalibrationMode::Lumped(&routing))
            .unwrap();

        let problem = lp.problem(Some(&[5.0, 5.0])).unwrap();
        let names: Vec<_> = problem.variables().iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, ["x0", "x1"]);
        assert!(lp.problem(Some(&[1.0])).is_err());
    }
}
