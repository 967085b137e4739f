//! Training job: feature table → transform → ridge fit → tracked run.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::WarehouseConfig;
use crate::indicators::IndicatorColumn;
use crate::model::{fit_ridge, regression_metrics, FitConfig, ModelError, RegressionMetrics, MODEL_TYPE};
use crate::tracking::{NewRun, TrackedRun, TrackingError, TrackingStore};
use crate::transform::{
    build_transform_schema, frame_from_records, transform_for_training, Frame, TransformConfig,
    TransformError, TransformSchema, TARGET_COLUMN,
};
use crate::warehouse::{FeatureRecord, ModelResultRecord, Warehouse, WarehouseError};

pub const MODEL_VERSION: &str = "v1";

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Tracking(#[from] TrackingError),
    #[error(
        "insufficient history: {feature_rows} feature rows leave no rows once lags up to {max_lag} are applied"
    )]
    InsufficientHistory { feature_rows: usize, max_lag: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub experiment: String,
    pub target: IndicatorColumn,
    pub transform: TransformConfig,
    pub fit: FitConfig,
    pub model_version: String,
}

impl TrainingConfig {
    pub fn for_experiment(experiment: impl Into<String>) -> Self {
        Self {
            experiment: experiment.into(),
            target: IndicatorColumn::Cpi,
            transform: TransformConfig::default(),
            fit: FitConfig::default(),
            model_version: MODEL_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingOutcome {
    pub run: TrackedRun,
    pub metrics: RegressionMetrics,
    pub training_rows: usize,
    pub schema: TransformSchema,
}

/// Renames the target indicator and applies the training transform.
pub fn build_training_frame(
    records: &[FeatureRecord],
    target: IndicatorColumn,
    cfg: &TransformConfig,
) -> Result<(TransformSchema, Frame), TrainingError> {
    let raw = frame_from_records(records, target);
    let schema = build_transform_schema(&raw.columns, cfg)?;
    let frame = transform_for_training(&raw, cfg)?;
    Ok((schema, frame))
}

pub fn run_training_job<T>(
    warehouse_cfg: &WarehouseConfig,
    tracking: &T,
    cfg: &TrainingConfig,
) -> Result<TrainingOutcome, TrainingError>
where
    T: TrackingStore + ?Sized,
{
    run_training_job_at(warehouse_cfg, tracking, cfg, Utc::now().timestamp_millis())
}

/// Reads every feature row, fits the model, logs a tracked run and writes a
/// `MODEL_RESULTS` row stamped with `now_ms_utc`.
pub fn run_training_job_at<T>(
    warehouse_cfg: &WarehouseConfig,
    tracking: &T,
    cfg: &TrainingConfig,
    now_ms_utc: i64,
) -> Result<TrainingOutcome, TrainingError>
where
    T: TrackingStore + ?Sized,
{
    let warehouse = Warehouse::connect(warehouse_cfg)?;
    let records = warehouse.load_feature_rows()?;
    info!(
        component = "training",
        event = "training.start",
        experiment = %cfg.experiment,
        target = cfg.target.as_str(),
        feature_rows = records.len()
    );

    let (schema, frame) = build_training_frame(&records, cfg.target, &cfg.transform)?;
    if frame.is_empty() {
        warn!(
            component = "training",
            event = "training.insufficient_history",
            feature_rows = records.len(),
            max_lag = cfg.transform.max_lag()
        );
        return Err(TrainingError::InsufficientHistory {
            feature_rows: records.len(),
            max_lag: cfg.transform.max_lag(),
        });
    }

    let (feature_names, x, y) = frame.split_target(TARGET_COLUMN)?;
    let model = fit_ridge(
        &feature_names,
        &x,
        &y,
        &cfg.fit,
        schema.version,
        &schema.fingerprint,
    )?;
    let predictions = model.predict(&x)?;
    let metrics = regression_metrics(&y, &predictions)?;

    let params = run_params(cfg, &schema, frame.len(), feature_names.len());
    let mut run_metrics = BTreeMap::new();
    run_metrics.insert("rmse".to_string(), metrics.rmse);
    run_metrics.insert("mape".to_string(), metrics.mape);
    run_metrics.insert("accuracy".to_string(), metrics.accuracy);
    let mut tags = BTreeMap::new();
    tags.insert("version".to_string(), cfg.model_version.clone());

    let new_run = NewRun {
        experiment: cfg.experiment.clone(),
        start_time_ms_utc: now_ms_utc,
        params: params.clone(),
        metrics: run_metrics,
        tags,
        model_json: model.to_json()?,
    };

    // A tracked run must never exist without its results row.
    warehouse.insert_model_result(&ModelResultRecord {
        run_id: tracking.run_id_for(&new_run)?,
        model_version: cfg.model_version.clone(),
        metric_rmse: metrics.rmse,
        training_ts_ms_utc: now_ms_utc,
        parameters: serde_json::to_value(&params).map_err(ModelError::from)?,
    })?;
    let run = tracking.log_run(&new_run)?;

    info!(
        component = "training",
        event = "training.run.logged",
        run_id = %run.run_id,
        training_rows = frame.len(),
        rmse = metrics.rmse,
        mape = metrics.mape,
        accuracy = metrics.accuracy
    );

    Ok(TrainingOutcome {
        run,
        metrics,
        training_rows: frame.len(),
        schema,
    })
}

fn run_params(
    cfg: &TrainingConfig,
    schema: &TransformSchema,
    training_rows: usize,
    feature_count: usize,
) -> BTreeMap<String, String> {
    let lags = cfg
        .transform
        .lags
        .iter()
        .map(|lag| lag.to_string())
        .collect::<Vec<_>>()
        .join(",");

    let mut params = BTreeMap::new();
    params.insert("model_type".to_string(), MODEL_TYPE.to_string());
    params.insert("target_indicator".to_string(), cfg.target.as_str().to_string());
    params.insert("lags".to_string(), lags);
    params.insert(
        "base_columns".to_string(),
        cfg.transform.base_columns.join(","),
    );
    params.insert("l2".to_string(), cfg.fit.l2.to_string());
    params.insert("schema_version".to_string(), schema.version.to_string());
    params.insert("schema_fingerprint".to_string(), schema.fingerprint.clone());
    params.insert("training_rows".to_string(), training_rows.to_string());
    params.insert("feature_count".to_string(), feature_count.to_string());
    params
}
