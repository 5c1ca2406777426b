//! Calibration entry points for one catchment.

use crate::core::{CalibrationContext, CalibrationResult, ExtraArg, ObjectiveAdapter, ObjectiveFunction};
use crate::error::CalibrationError;
use crate::optimization::callback::{CalibrationCallback, History};
use crate::optimization::config::{BasicInputs, OptimizationArgs};
use crate::optimization::problem::{CalibrationLoop, CalibrationMode, PROBLEM_NAME};
use crate::optimization::solvers::{Problem, SearchOutcome, select_driver};
use crate::simulation::{LumpedRouting, SimulationEngine, SpatialVariation};
use std::fmt;
use tracing::{info, warn};

/// Couples a catchment with an objective function and runs searches on it.
pub struct Calibration {
    context: CalibrationContext,
    objective: Option<ObjectiveAdapter>,
    print_error: bool,
}

impl Calibration {
    pub fn new(context: CalibrationContext) -> Self {
        Self {
            context,
            objective: None,
            print_error: false,
        }
    }

    /// Log every successful objective value and its parameters.
    pub fn with_print_error(mut self, print_error: bool) -> Self {
        self.print_error = print_error;
        self
    }

    pub fn context(&self) -> &CalibrationContext {
        &self.context
    }

    pub fn into_context(self) -> CalibrationContext {
        self.context
    }

    pub fn objective(&self) -> Option<&ObjectiveAdapter> {
        self.objective.as_ref()
    }

    /// Set the objective function and the extra arguments it is called with.
    pub fn read_objective_fn(&mut self, function: ObjectiveFunction, args: Option<Vec<ExtraArg>>) {
        self.objective = Some(ObjectiveAdapter::new(function, args));
    }

    /// Same as [`read_objective_fn`](Self::read_objective_fn) with a built-in metric.
    pub fn read_objective_by_name(
        &mut self,
        name: &str,
        args: Option<Vec<ExtraArg>>,
    ) -> Result<(), CalibrationError> {
        self.objective = Some(ObjectiveAdapter::from_name(name, args)?);
        Ok(())
    }

    /// Calibrate the full-process distributed model.
    pub fn run_calibration(
        &mut self,
        engine: &dyn SimulationEngine,
        distribution: &dyn SpatialVariation,
        args: &OptimizationArgs,
    ) -> Result<SearchOutcome, CalibrationError> {
        self.calibrate(engine, CalibrationMode::FullProcess(distribution), None, args)
    }

    /// Calibrate the distributed model with first-order routing.
    pub fn fw1_calibration(
        &mut self,
        engine: &dyn SimulationEngine,
        distribution: &dyn SpatialVariation,
        args: &OptimizationArgs,
    ) -> Result<SearchOutcome, CalibrationError> {
        self.calibrate(engine, CalibrationMode::FirstOrderRouting(distribution), None, args)
    }

    /// Calibrate the lumped model against the last observed column.
    pub fn lumped_calibration(
        &mut self,
        engine: &dyn SimulationEngine,
        inputs: &BasicInputs,
        args: &OptimizationArgs,
    ) -> Result<SearchOutcome, CalibrationError> {
        let routing = LumpedRouting {
            route: inputs.route,
            method: inputs.routing_fn.clone(),
        };
        self.calibrate(
            engine,
            CalibrationMode::Lumped(&routing),
            inputs.start_point(),
            args,
        )
    }

    fn calibrate(
        &mut self,
        engine: &dyn SimulationEngine,
        mode: CalibrationMode<'_>,
        initial: Option<&[f64]>,
        args: &OptimizationArgs,
    ) -> Result<SearchOutcome, CalibrationError> {
        let objective = self.objective.as_ref().ok_or_else(|| {
            CalibrationError::Configuration(
                "objective function has not been read, call read_objective_fn first".into(),
            )
        })?;
        let settings = args.driver_settings()?;

        let outcome = {
            let calibration_loop = CalibrationLoop::new(&self.context, engine, objective, mode)?
                .with_print_error(self.print_error);
            info!(
                catchment = %self.context.name,
                mode = calibration_loop.mode(),
                "Calibration starts"
            );

            let mut problem = calibration_loop.problem(initial)?;
            let (mut driver, reason) = select_driver(problem.num_params(), &settings);
            info!(%reason, "search driver selected");

            let history = if args.solve.hot_start {
                hot_start_history(settings.history_file.as_deref())?
            } else {
                None
            };
            if let Some(best) = history.as_ref().and_then(History::best) {
                info!(cost = best.cost, iteration = best.iteration, "hot start from stored history");
                problem.set_initial(&best.params)?;
            }
            if args.solve.display_opts {
                info!(settings = ?settings, execution = ?args.execution, "driver options");
                info!("{problem}");
            }

            let history = history.unwrap_or_else(|| History::new(PROBLEM_NAME, driver.name()));
            let mut callback = CalibrationCallback::new(history, args.solve.store_hst)
                .with_progress(args.solve.display_opts)
                .with_history_file(settings.history_file.clone());

            let outcome = driver.solve(&problem, &args.solve, args.execution, &mut callback)?;
            callback.finish()?;
            outcome
        };

        let result = CalibrationResult {
            parameters: outcome.best_parameters.clone(),
            objective: outcome.best_objective,
            driver: outcome.info.driver.clone(),
            evaluations: outcome.info.evaluations,
        };
        if args.solve.store_sol {
            info!(parameters = ?result.parameters, "{result}");
        }
        self.context.store_result(result);
        info!(
            objective = outcome.best_objective,
            failed = outcome.info.failed_evaluations,
            stop = %outcome.info.message,
            "Calibration finished"
        );
        Ok(outcome)
    }
}

fn hot_start_history(path: Option<&std::path::Path>) -> Result<Option<History>, CalibrationError> {
    match path {
        Some(path) if path.exists() => Ok(Some(History::load(path)?)),
        Some(path) => {
            warn!(path = %path.display(), "hot start requested but the history file does not exist");
            Ok(None)
        }
        None => {
            warn!("hot start requested without a history_file option");
            Ok(None)
        }
    }
}

impl fmt::Display for Calibration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.context)?;
        match &self.objective {
            Some(objective) => write!(
                f,
                "  objective    : {} ({} extra args)",
                objective.function().name(),
                objective.args().len()
            ),
            None => write!(f, "  objective    : not read"),
        }
    }
}
