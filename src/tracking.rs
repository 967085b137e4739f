//! Run tracking: an append-only log of training runs (params, metrics, tags,
//! model artifact) grouped by experiment.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

const RUN_FILE: &str = "run.json";
const MODEL_FILE: &str = "model.json";
const RUN_ID_HEX_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("tracking io error at {path}: {message}")]
    Io { path: PathBuf, message: String },
    #[error("tracking record is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("run {0} already exists")]
    RunExists(String),
    #[error("invalid experiment name {0:?}")]
    InvalidExperiment(String),
    #[error("run {run_id} has no model artifact")]
    ArtifactMissing { run_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRun {
    pub experiment: String,
    pub start_time_ms_utc: i64,
    pub params: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
    pub tags: BTreeMap<String, String>,
    pub model_json: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedRun {
    pub run_id: String,
    pub experiment: String,
    pub start_time_ms_utc: i64,
    pub params: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
    pub tags: BTreeMap<String, String>,
}

pub trait TrackingStore {
    /// The id [`TrackingStore::log_run`] will assign to `run`.
    fn run_id_for(&self, run: &NewRun) -> Result<String, TrackingError> {
        derive_run_id(run)
    }

    /// Records a new run. Existing runs are never overwritten.
    fn log_run(&self, run: &NewRun) -> Result<TrackedRun, TrackingError>;

    /// Runs of `experiment`, newest start time first.
    fn list_runs(&self, experiment: &str) -> Result<Vec<TrackedRun>, TrackingError>;

    fn load_model_json(&self, run: &TrackedRun) -> Result<String, TrackingError>;

    fn latest_run(&self, experiment: &str) -> Result<Option<TrackedRun>, TrackingError> {
        Ok(self.list_runs(experiment)?.into_iter().next())
    }
}

/// `<root>/<experiment>/<run_id>/{run.json,model.json}`
#[derive(Debug, Clone)]
pub struct FileTrackingStore {
    root: PathBuf,
}

impl FileTrackingStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn experiment_dir(&self, experiment: &str) -> Result<PathBuf, TrackingError> {
        let plain = !experiment.is_empty()
            && experiment != "."
            && experiment != ".."
            && !experiment.contains(['/', '\\']);
        if !plain {
            return Err(TrackingError::InvalidExperiment(experiment.to_string()));
        }
        Ok(self.root.join(experiment))
    }
}

impl TrackingStore for FileTrackingStore {
    fn log_run(&self, run: &NewRun) -> Result<TrackedRun, TrackingError> {
        let experiment_dir = self.experiment_dir(&run.experiment)?;
        fs::create_dir_all(&experiment_dir).map_err(|err| io_error(&experiment_dir, err))?;

        let run_id = self.run_id_for(run)?;
        let run_dir = experiment_dir.join(&run_id);
        match fs::create_dir(&run_dir) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(TrackingError::RunExists(run_id));
            }
            Err(err) => return Err(io_error(&run_dir, err)),
        }

        let tracked = TrackedRun {
            run_id,
            experiment: run.experiment.clone(),
            start_time_ms_utc: run.start_time_ms_utc,
            params: run.params.clone(),
            metrics: run.metrics.clone(),
            tags: run.tags.clone(),
        };

        // run.json is written last; a directory without it is an incomplete run.
        let model_path = run_dir.join(MODEL_FILE);
        fs::write(&model_path, &run.model_json).map_err(|err| io_error(&model_path, err))?;
        let run_path = run_dir.join(RUN_FILE);
        fs::write(&run_path, serde_json::to_string_pretty(&tracked)?)
            .map_err(|err| io_error(&run_path, err))?;

        info!(
            component = "tracking",
            event = "tracking.run.logged",
            experiment = %tracked.experiment,
            run_id = %tracked.run_id,
            start_time_ms_utc = tracked.start_time_ms_utc
        );
        Ok(tracked)
    }

    fn list_runs(&self, experiment: &str) -> Result<Vec<TrackedRun>, TrackingError> {
        let experiment_dir = self.experiment_dir(experiment)?;
        let entries = match fs::read_dir(&experiment_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_error(&experiment_dir, err)),
        };

        let mut runs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| io_error(&experiment_dir, err))?;
            let run_path = entry.path().join(RUN_FILE);
            let raw = match fs::read_to_string(&run_path) {
                Ok(raw) => raw,
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    warn!(
                        component = "tracking",
                        event = "tracking.run.incomplete",
                        path = %entry.path().display()
                    );
                    continue;
                }
                Err(err) => return Err(io_error(&run_path, err)),
            };
            runs.push(serde_json::from_str::<TrackedRun>(&raw)?);
        }

        runs.sort_by(|a, b| {
            b.start_time_ms_utc
                .cmp(&a.start_time_ms_utc)
                .then_with(|| b.run_id.cmp(&a.run_id))
        });
        debug!(
            component = "tracking",
            event = "tracking.runs.listed",
            experiment,
            runs = runs.len()
        );
        Ok(runs)
    }

    fn load_model_json(&self, run: &TrackedRun) -> Result<String, TrackingError> {
        let model_path = self
            .experiment_dir(&run.experiment)?
            .join(&run.run_id)
            .join(MODEL_FILE);
        match fs::read_to_string(&model_path) {
            Ok(raw) => Ok(raw),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(TrackingError::ArtifactMissing {
                run_id: run.run_id.clone(),
            }),
            Err(err) => Err(io_error(&model_path, err)),
        }
    }
}

fn derive_run_id(run: &NewRun) -> Result<String, TrackingError> {
    let mut hasher = Sha256::new();
    hasher.update(format!("experiment:{};", run.experiment));
    hasher.update(format!("start:{};", run.start_time_ms_utc));
    hasher.update(serde_json::to_vec(&run.params)?);
    hasher.update(serde_json::to_vec(&run.tags)?);
    hasher.update(run.model_json.as_bytes());
    let mut id = hex::encode(hasher.finalize());
    id.truncate(RUN_ID_HEX_LEN);
    Ok(id)
}

fn io_error(path: &Path, err: std::io::Error) -> TrackingError {
    TrackingError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
