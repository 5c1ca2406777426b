use super::solvers::traits::OptimizationCallback;
use crate::error::CalibrationError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Best point reported at one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,
    pub params: Vec<f64>,
    pub cost: f64,
}

/// Iteration history of a search, persisted as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub problem: String,
    pub driver: String,
    pub created: String,
    pub iterations: Vec<IterationRecord>,
}

impl History {
    pub fn new(problem: impl Into<String>, driver: impl Into<String>) -> Self {
        Self {
            problem: problem.into(),
            driver: driver.into(),
            created: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            iterations: Vec::new(),
        }
    }

    pub fn push(&mut self, iteration: u32, params: &[f64], cost: f64) {
        self.iterations.push(IterationRecord {
            iteration,
            params: params.to_vec(),
            cost,
        });
    }

    /// Lowest-cost record.
    pub fn best(&self) -> Option<&IterationRecord> {
        self.iterations
            .iter()
            .filter(|r| !r.cost.is_nan())
            .min_by(|a, b| a.cost.total_cmp(&b.cost))
    }

    pub fn is_empty(&self) -> bool {
        self.iterations.is_empty()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), CalibrationError> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CalibrationError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

/// Tracks search progress for a calibration run.
pub struct CalibrationCallback {
    store: bool,
    print_progress: bool,
    history: History,
    history_file: Option<PathBuf>,
}

impl CalibrationCallback {
    pub fn new(history: History, store: bool) -> Self {
        Self {
            store,
            print_progress: false,
            history,
            history_file: None,
        }
    }

    pub fn with_progress(mut self, print_progress: bool) -> Self {
        self.print_progress = print_progress;
        self
    }

    /// Where [`CalibrationCallback::finish`] writes the stored history.
    pub fn with_history_file(mut self, path: Option<PathBuf>) -> Self {
        self.history_file = path;
        self
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Persist the history when storing is on and a file is configured.
    pub fn finish(&self) -> Result<(), CalibrationError> {
        match (&self.history_file, self.store) {
            (Some(path), true) => {
                self.history.save(path)?;
                info!(path = %path.display(), records = self.history.iterations.len(), "search history saved");
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

impl OptimizationCallback for CalibrationCallback {
    fn on_iteration(
        &mut self,
        iteration: u32,
        params: &[f64],
        cost: f64,
    ) -> Result<(), CalibrationError> {
        if self.store {
            self.history.push(iteration, params, cost);
        }

        if self.print_progress {
            info!(iteration, cost, "best so far");
        } else {
            debug!(iteration, cost, "best so far");
        }
        Ok(())
    }
}
