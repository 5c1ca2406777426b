mod nelder_mead;
mod particle;
pub mod traits;

pub use nelder_mead::NelderMeadDriver;
pub use particle::ParticleSwarm;
pub use traits::{
    DecisionVariable, OptimizationCallback, OptimizationProblem, Problem, SearchDriver,
    SearchInfo, SearchOutcome,
};

use super::config::{Algorithm, DriverSettings};

/// Build the driver named by the settings, with a line describing the choice.
pub fn select_driver(num_params: usize, settings: &DriverSettings) -> (Box<dyn SearchDriver>, String) {
    match settings.algorithm {
        Algorithm::ParticleSwarm => (
            Box::new(ParticleSwarm::from_settings(settings)),
            format!(
                "{num_params} params -> PSO (swarm={}, max_iter={})",
                settings.swarm_size, settings.max_iterations
            ),
        ),
        Algorithm::NelderMead => (
            Box::new(NelderMeadDriver::from_settings(settings)),
            format!(
                "{num_params} params -> Nelder-Mead (max_iter={})",
                settings.max_iterations
            ),
        ),
    }
}
