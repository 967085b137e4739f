//! FRED macro-indicator pipeline.
//!
//! Current implemented scope:
//! - Step 1: indicator registry and environment configuration
//! - Step 2: FRED series fetch, date alignment and feature-table upsert
//! - Step 3: lag/calendar transform shared by training and serving
//! - Step 4: ridge regression training with tracked runs
//! - Step 5: forecast dashboard over the latest tracked model

mod config;
mod dashboard;
mod indicators;
mod ingest;
mod model;
mod observability;
mod pipeline;
mod source;
mod tracking;
mod training;
mod transform;
mod warehouse;

pub use config::{
    ConfigError, DashboardConfig, PipelineConfig, TrackingConfig, WarehouseConfig,
    DEFAULT_EXPERIMENT, DEFAULT_TRACKING_URI, DEFAULT_WAREHOUSE_ROOT, DEFAULT_WINDOW_DAYS,
    ENV_EXPERIMENT, ENV_FRED_API_KEY, ENV_TRACKING_URI, ENV_WAREHOUSE_ACCOUNT,
    ENV_WAREHOUSE_DATABASE, ENV_WAREHOUSE_NAME, ENV_WAREHOUSE_PASSWORD, ENV_WAREHOUSE_ROOT,
    ENV_WAREHOUSE_SCHEMA, ENV_WAREHOUSE_USER, ENV_WINDOW_DAYS,
};
pub use dashboard::{
    build_prediction_snapshot, dashboard_router, render_forecast_html, render_line_chart_svg,
    snapshot_to_csv, DashboardError, InMemorySnapshotSource, PredictionPoint, PredictionSnapshot,
    PredictionSnapshotSource, SnapshotStatus, FORECAST_HEADERS, RAW_TABLE_TAIL,
};
pub use indicators::{
    default_indicator_specs, validate_indicator_specs, IndicatorColumn, IndicatorError,
    IndicatorSpec, ValidatedIndicator, ALL_INDICATOR_COLUMNS, INDICATOR_COUNT,
};
pub use ingest::{
    align_series, feature_id, fetch_indicators, sync_features, sync_features_now, FetchedSeries,
    IngestError, SeriesFetchCount, SyncReport, FEATURE_ID_FORMAT,
};
pub use model::{
    fit_ridge, regression_metrics, FitConfig, LinearModel, ModelError, RegressionMetrics,
    MODEL_TYPE,
};
pub use observability::{
    init_logging, log_app_bind, log_app_start, log_step_finish, log_step_start,
    logging_config_from_env, logging_config_from_lookup, LogFormat, LoggingConfig,
    LoggingInitError,
};
pub use pipeline::{
    run_pipeline, steps_for_selector, PipelineError, PipelineReport, PipelineStep,
    ALL_PIPELINE_STEPS, PIPELINE_NAME,
};
pub use source::{
    parse_observations, FredClient, FredClientConfig, Observation, SeriesSource, SourceError,
    FRED_OBSERVATIONS_URL,
};
pub use tracking::{FileTrackingStore, NewRun, TrackedRun, TrackingError, TrackingStore};
pub use training::{
    build_training_frame, run_training_job, run_training_job_at, TrainingConfig, TrainingError,
    TrainingOutcome, MODEL_VERSION,
};
pub use transform::{
    assert_schema_compatible, build_transform_schema, column_diff, frame_from_records,
    lag_column_name, transform, transform_for_serving, transform_for_training, ColumnDiff, Frame,
    FrameRow, TransformConfig, TransformError, TransformSchema, MONTH_COLUMN, QUARTER_COLUMN,
    TARGET_COLUMN, TRANSFORM_SCHEMA_VERSION,
};
pub use warehouse::{
    ensure_schema, FeatureRecord, IndicatorValues, ModelResultRecord, UpsertOutcome,
    UpsertSummary, Warehouse, WarehouseError, FEATURE_TABLE, MODEL_RESULTS_TABLE,
};
