//! Ordered daily pipeline: create tables, sync features, train.

use std::time::Instant;

use chrono::NaiveDate;
use thiserror::Error;
use tracing::error;

use crate::config::PipelineConfig;
use crate::ingest::{sync_features, IngestError, SyncReport};
use crate::observability::{log_step_finish, log_step_start};
use crate::source::SeriesSource;
use crate::tracking::TrackingStore;
use crate::training::{run_training_job_at, TrainingConfig, TrainingError, TrainingOutcome};
use crate::warehouse::{ensure_schema, WarehouseError};

pub const PIPELINE_NAME: &str = "fred_experiment_pipeline";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PipelineStep {
    EnsureSchema,
    SyncFeatures,
    Train,
}

pub const ALL_PIPELINE_STEPS: [PipelineStep; 3] = [
    PipelineStep::EnsureSchema,
    PipelineStep::SyncFeatures,
    PipelineStep::Train,
];

impl PipelineStep {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EnsureSchema => "create_tables",
            Self::SyncFeatures => "load_features",
            Self::Train => "train_model",
        }
    }

    /// Accepts the step name or its short CLI alias.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "schema" | "create_tables" => Some(Self::EnsureSchema),
            "sync" | "load_features" => Some(Self::SyncFeatures),
            "train" | "train_model" => Some(Self::Train),
            _ => None,
        }
    }
}

/// Resolves a CLI selector: `all` (or nothing) runs every step, otherwise the
/// named step runs on its own.
pub fn steps_for_selector(selector: Option<&str>) -> Option<Vec<PipelineStep>> {
    match selector.map(str::trim) {
        None | Some("") => Some(ALL_PIPELINE_STEPS.to_vec()),
        Some(raw) if raw.eq_ignore_ascii_case("all") => Some(ALL_PIPELINE_STEPS.to_vec()),
        Some(raw) => PipelineStep::parse(raw).map(|step| vec![step]),
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("step {step} failed: {source}")]
    Schema {
        step: &'static str,
        #[source]
        source: WarehouseError,
    },
    #[error("step {step} failed: {source}")]
    Ingest {
        step: &'static str,
        #[source]
        source: IngestError,
    },
    #[error("step {step} failed: {source}")]
    Training {
        step: &'static str,
        #[source]
        source: TrainingError,
    },
}

#[derive(Debug, Default)]
pub struct PipelineReport {
    pub completed: Vec<PipelineStep>,
    pub sync: Option<SyncReport>,
    pub training: Option<TrainingOutcome>,
}

/// Runs `steps` in order; the first failing step stops the run and later
/// steps are not attempted.
pub fn run_pipeline<S, T>(
    cfg: &PipelineConfig,
    source: &S,
    tracking: &T,
    steps: &[PipelineStep],
    today: NaiveDate,
    now_ms_utc: i64,
) -> Result<PipelineReport, PipelineError>
where
    S: SeriesSource + ?Sized,
    T: TrackingStore + ?Sized,
{
    let mut ordered = steps.to_vec();
    ordered.sort();
    ordered.dedup();

    let mut report = PipelineReport::default();
    for step in ordered {
        let name = step.as_str();
        log_step_start(name);
        let started = Instant::now();

        let result = match step {
            PipelineStep::EnsureSchema => ensure_schema(&cfg.warehouse)
                .map_err(|source| PipelineError::Schema { step: name, source }),
            PipelineStep::SyncFeatures => sync_features(
                &cfg.indicators,
                &cfg.warehouse,
                source,
                cfg.window_days,
                today,
            )
            .map(|sync| report.sync = Some(sync))
            .map_err(|source| PipelineError::Ingest { step: name, source }),
            PipelineStep::Train => {
                let training_cfg = TrainingConfig::for_experiment(&cfg.tracking.experiment);
                run_training_job_at(&cfg.warehouse, tracking, &training_cfg, now_ms_utc)
                    .map(|outcome| report.training = Some(outcome))
                    .map_err(|source| PipelineError::Training { step: name, source })
            }
        };

        if let Err(err) = result {
            error!(
                component = "pipeline",
                event = "pipeline.step.failed",
                pipeline = PIPELINE_NAME,
                step = name,
                error = %err
            );
            return Err(err);
        }

        log_step_finish(name, started.elapsed().as_millis());
        report.completed.push(step);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors_resolve_to_ordered_steps() {
        assert_eq!(steps_for_selector(None), Some(ALL_PIPELINE_STEPS.to_vec()));
        assert_eq!(steps_for_selector(Some("ALL")), Some(ALL_PIPELINE_STEPS.to_vec()));
        assert_eq!(
            steps_for_selector(Some("sync")),
            Some(vec![PipelineStep::SyncFeatures])
        );
        assert_eq!(
            steps_for_selector(Some("train_model")),
            Some(vec![PipelineStep::Train])
        );
        assert_eq!(steps_for_selector(Some("deploy")), None);
    }

    #[test]
    fn step_names_round_trip_through_parse() {
        for step in ALL_PIPELINE_STEPS {
            assert_eq!(PipelineStep::parse(step.as_str()), Some(step));
        }
    }
}
