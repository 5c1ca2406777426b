use super::traits::{
    OptimizationCallback, Problem, SearchDriver, SearchInfo, SearchOutcome, clamp_to_bounds,
};
use crate::core::Evaluation;
use crate::error::CalibrationError;
use crate::optimization::config::{DriverSettings, ExecutionMode, SolveOptions};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, info};

/// Particle Swarm Optimization - robust for noisy, non-convex objectives
/// and tolerant of candidates the model rejects
pub struct ParticleSwarm {
    max_iter: u32,
    precision: f64,
    population_size: usize,
    inertia: f64,   // w - velocity inertia weight
    cognitive: f64, // c1 - personal best influence
    social: f64,    // c2 - global best influence
    stagnation_limit: u32,
    seed: Option<u64>,
    workers: usize,
}

impl ParticleSwarm {
    pub fn new(max_iter: u32, precision: f64) -> Self {
        Self {
            max_iter,
            precision,
            population_size: 20,
            inertia: 0.7,
            cognitive: 1.5,
            social: 1.5,
            stagnation_limit: 10,
            seed: None,
            workers: num_cpus::get(),
        }
    }

    pub fn from_settings(settings: &DriverSettings) -> Self {
        Self::new(settings.max_iterations, settings.precision)
            .with_population_size(settings.swarm_size)
            .with_pso_params(settings.inertia, settings.cognitive, settings.social)
            .with_stagnation_limit(settings.stagnation_limit)
            .with_seed(settings.seed)
            .with_workers(settings.workers)
    }

    /// Configure swarm size (default: 20)
    pub fn with_population_size(mut self, size: usize) -> Self {
        self.population_size = size.max(1);
        self
    }

    /// Configure PSO parameters (defaults: w=0.7, c1=1.5, c2=1.5)
    pub fn with_pso_params(mut self, inertia: f64, cognitive: f64, social: f64) -> Self {
        self.inertia = inertia;
        self.cognitive = cognitive;
        self.social = social;
        self
    }

    pub fn with_stagnation_limit(mut self, limit: u32) -> Self {
        self.stagnation_limit = limit;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    /// Initialize particle positions uniformly within bounds
    fn initialize_particles(
        &self,
        rng: &mut StdRng,
        bounds: &[(f64, f64)],
        initial_params: &[f64],
    ) -> Vec<Vec<f64>> {
        let mut particles = Vec::with_capacity(self.population_size);

        // First particle is the provided starting point
        particles.push(initial_params.to_vec());

        for _ in 1..self.population_size {
            let particle = bounds
                .iter()
                .map(|&(min, max)| if min < max { rng.gen_range(min..=max) } else { min })
                .collect();
            particles.push(particle);
        }

        particles
    }

    /// Initialize velocities (small random values)
    fn initialize_velocities(&self, rng: &mut StdRng, bounds: &[(f64, f64)]) -> Vec<Vec<f64>> {
        (0..self.population_size)
            .map(|_| {
                bounds
                    .iter()
                    .map(|&(min, max)| {
                        let range = (max - min) * 0.1;
                        if range > 0.0 { rng.gen_range(-range..=range) } else { 0.0 }
                    })
                    .collect()
            })
            .collect()
    }

    /// Evaluate one generation. A fatal error from any particle aborts.
    fn evaluate_generation(
        &self,
        problem: &dyn Problem,
        particles: &[Vec<f64>],
        pool: Option<&rayon::ThreadPool>,
    ) -> Result<Vec<Evaluation>, CalibrationError> {
        match pool {
            Some(pool) => pool.install(|| {
                particles
                    .par_iter()
                    .map(|p| problem.evaluate(p))
                    .collect::<Result<Vec<_>, _>>()
            }),
            None => particles.iter().map(|p| problem.evaluate(p)).collect(),
        }
    }

    fn outcome(
        &self,
        best_cost: f64,
        best: &[f64],
        info: SearchInfo,
    ) -> Result<SearchOutcome, CalibrationError> {
        if !best_cost.is_finite() && best_cost != f64::NEG_INFINITY {
            return Err(CalibrationError::Search(format!(
                "all {} candidate evaluations failed",
                info.evaluations
            )));
        }
        Ok(SearchOutcome {
            best_objective: best_cost,
            best_parameters: best.to_vec(),
            info,
        })
    }
}

impl SearchDriver for ParticleSwarm {
    fn name(&self) -> &str {
        "PSO"
    }

    fn solve(
        &mut self,
        problem: &dyn Problem,
        options: &SolveOptions,
        mode: ExecutionMode,
        callback: &mut dyn OptimizationCallback,
    ) -> Result<SearchOutcome, CalibrationError> {
        let n = problem.num_params();
        let bounds = problem.bounds();
        let mut rng = self.rng();

        if options.display_opts {
            info!(
                driver = self.name(),
                swarm = self.population_size,
                max_iterations = self.max_iter,
                inertia = self.inertia,
                cognitive = self.cognitive,
                social = self.social,
                precision = self.precision,
                seed = ?self.seed,
                ?mode,
                "search options"
            );
        }

        let pool = match mode {
            ExecutionMode::Serial => None,
            ExecutionMode::Parallel => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(self.workers)
                    .build()
                    .map_err(|e| CalibrationError::Search(format!("cannot start worker pool: {e}")))?,
            ),
        };

        // Initialize swarm
        let mut particles = self.initialize_particles(&mut rng, bounds, problem.initial_params());
        let mut velocities = self.initialize_velocities(&mut rng, bounds);
        let mut personal_best_positions = particles.clone();
        let mut personal_best_costs = vec![f64::INFINITY; self.population_size];

        let mut global_best_idx = 0;
        let mut global_best_cost = f64::INFINITY;

        let mut info = SearchInfo {
            driver: self.name().to_string(),
            converged: false,
            iterations: 0,
            evaluations: 0,
            failed_evaluations: 0,
            message: String::new(),
        };
        let mut stagnation_counter = 0;

        for iter in 0..self.max_iter {
            let prev_global_best = global_best_cost;
            info.iterations = iter + 1;

            for particle in particles.iter_mut() {
                clamp_to_bounds(particle, bounds);
            }

            let evaluations = self.evaluate_generation(problem, &particles, pool.as_ref())?;
            info.evaluations += evaluations.len();

            for (p, evaluation) in evaluations.iter().enumerate() {
                if evaluation.failed {
                    info.failed_evaluations += 1;
                }
                let cost = evaluation.ranking_cost();

                // Update personal best
                if cost < personal_best_costs[p] {
                    personal_best_costs[p] = cost;
                    personal_best_positions[p].copy_from_slice(&particles[p]);
                }

                // Update global best
                if cost < global_best_cost {
                    global_best_cost = cost;
                    global_best_idx = p;
                }
            }

            debug!(
                iteration = iter + 1,
                best = global_best_cost,
                failed = evaluations.iter().filter(|e| e.failed).count(),
                "generation evaluated"
            );

            if global_best_cost.is_finite() {
                callback.on_iteration(
                    iter + 1,
                    &personal_best_positions[global_best_idx],
                    global_best_cost,
                )?;
            }

            if callback.should_stop() {
                info.message = "Stopped by callback".into();
                return self.outcome(global_best_cost, &personal_best_positions[global_best_idx], info);
            }

            // Objectives may be negative, so convergence is judged on the
            // improvement relative to the best value, never on the value.
            let tolerance = self.precision * global_best_cost.abs().max(1.0);
            if (prev_global_best - global_best_cost).abs() < tolerance {
                stagnation_counter += 1;
                if stagnation_counter >= self.stagnation_limit {
                    info.converged = true;
                    info.message = "Converged".into();
                    return self.outcome(
                        global_best_cost,
                        &personal_best_positions[global_best_idx],
                        info,
                    );
                }
            } else {
                stagnation_counter = 0;
            }

            // Update velocities and positions for all particles
            for p in 0..self.population_size {
                for i in 0..n {
                    let r1 = rng.r#gen::<f64>();
                    let r2 = rng.r#gen::<f64>();

                    velocities[p][i] = self.inertia * velocities[p][i]
                        + self.cognitive * r1 * (personal_best_positions[p][i] - particles[p][i])
                        + self.social
                            * r2
                            * (personal_best_positions[global_best_idx][i] - particles[p][i]);

                    // Clamp velocity to fraction of search space
                    let (min, max) = bounds[i];
                    let v_max = (max - min) * 0.2;
                    velocities[p][i] = velocities[p][i].clamp(-v_max, v_max);

                    particles[p][i] += velocities[p][i];
                }

                clamp_to_bounds(&mut particles[p], bounds);
            }
        }

        info.message = "Max iterations reached".into();
        self.outcome(global_best_cost, &personal_best_positions[global_best_idx], info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::solvers::traits::OptimizationProblem;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn options() -> SolveOptions {
        SolveOptions {
            store_sol: true,
            display_opts: false,
            store_hst: false,
            hot_start: false,
        }
    }

    fn sphere<'a>(calls: &'a AtomicUsize) -> OptimizationProblem<'a> {
        let mut problem = OptimizationProblem::new("sphere", move |x: &[f64]| {
            calls.fetch_add(1, Ordering::Relaxed);
            Ok(Evaluation::success(
                x.iter().map(|v| (v - 3.0).powi(2)).sum(),
            ))
        });
        problem.add_variable("x0", 0.0, 10.0, None).unwrap();
        problem.add_variable("x1", 0.0, 10.0, None).unwrap();
        problem
    }

    #[test]
    fn finds_minimum_serial() {
        let calls = AtomicUsize::new(0);
        let problem = sphere(&calls);
        let mut pso = ParticleSwarm::new(200, 1e-6)
            .with_seed(Some(42))
            .with_stagnation_limit(50);
        let outcome = pso
            .solve(&problem, &options(), ExecutionMode::Serial, &mut ())
            .unwrap();
        assert!(outcome.best_objective < 1e-3);
        assert_eq!(outcome.info.evaluations, calls.load(Ordering::Relaxed));
    }

    #[test]
    fn parallel_matches_serial_with_seed() {
        let calls = AtomicUsize::new(0);
        let problem = sphere(&calls);
        let serial = ParticleSwarm::new(30, 1e-9)
            .with_seed(Some(7))
            .solve(&problem, &options(), ExecutionMode::Serial, &mut ())
            .unwrap();
        let parallel = ParticleSwarm::new(30, 1e-9)
            .with_seed(Some(7))
            .with_workers(4)
            .solve(&problem, &options(), ExecutionMode::Parallel, &mut ())
            .unwrap();
        assert_eq!(serial.best_parameters, parallel.best_parameters);
        assert_eq!(serial.best_objective, parallel.best_objective);
    }

    #[test]
    fn failed_candidates_never_win() {
        // Reject everything left of 5; the true minimum at 0 is unreachable.
        let mut problem = OptimizationProblem::new("half", |x: &[f64]| {
            Ok(if x[0] < 5.0 {
                Evaluation::failure()
            } else {
                Evaluation::success(x[0])
            })
        });
        problem.add_variable("x0", 0.0, 10.0, Some(1.0)).unwrap();
        let outcome = ParticleSwarm::new(20, 1e-9)
            .with_seed(Some(1))
            .solve(&problem, &options(), ExecutionMode::Serial, &mut ())
            .unwrap();
        assert!(outcome.best_parameters[0] >= 5.0);
        assert!(outcome.info.failed_evaluations > 0);
    }

    #[test]
    fn all_failures_is_search_error() {
        let mut problem = OptimizationProblem::new("never", |_: &[f64]| Ok(Evaluation::failure()));
        problem.add_variable("x0", 0.0, 1.0, None).unwrap();
        let err = ParticleSwarm::new(3, 1e-6)
            .with_population_size(4)
            .with_seed(Some(1))
            .solve(&problem, &options(), ExecutionMode::Serial, &mut ())
            .unwrap_err();
        assert!(matches!(err, CalibrationError::Search(_)));
    }

    #[test]
    fn negative_objectives_keep_searching() {
        let mut problem = OptimizationProblem::new("offset", |x: &[f64]| {
            Ok(Evaluation::success(x[0] + x[1] - 100.0))
        });
        problem.add_variable("x0", 0.0, 10.0, None).unwrap();
        problem.add_variable("x1", 0.0, 10.0, None).unwrap();
        let outcome = ParticleSwarm::new(200, 1e-6)
            .with_seed(Some(3))
            .with_stagnation_limit(20)
            .solve(&problem, &options(), ExecutionMode::Serial, &mut ())
            .unwrap();
        assert!(outcome.info.iterations > 1);
        assert!(outcome.best_objective < -99.9);
    }

    #[test]
    fn callback_can_stop_the_search() {
        struct StopAfter(u32);
        impl OptimizationCallback for StopAfter {
            fn on_iteration(&mut self, _: u32, _: &[f64], _: f64) -> Result<(), CalibrationError> {
                self.0 = self.0.saturating_sub(1);
                Ok(())
            }
            fn should_stop(&self) -> bool {
                self.0 == 0
            }
        }

        let calls = AtomicUsize::new(0);
        let problem = sphere(&calls);
        let outcome = ParticleSwarm::new(100, 1e-9)
            .with_seed(Some(5))
            .solve(&problem, &options(), ExecutionMode::Serial, &mut StopAfter(2))
            .unwrap();
        assert_eq!(outcome.info.iterations, 2);
        assert_eq!(outcome.info.message, "Stopped by callback");
    }

    #[test]
    fn fatal_error_aborts() {
        let calls = AtomicUsize::new(0);
        let mut problem = OptimizationProblem::new("fatal", |_: &[f64]| {
            calls.fetch_add(1, Ordering::Relaxed);
            Err(CalibrationError::Arity("needs more".into()))
        });
        problem.add_variable("x0", 0.0, 1.0, None).unwrap();
        let err = ParticleSwarm::new(10, 1e-6)
            .with_population_size(5)
            .solve(&problem, &options(), ExecutionMode::Serial, &mut ())
            .unwrap_err();
        assert!(matches!(err, CalibrationError::Arity(_)));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }
}
