//! Forecast dashboard: actual-vs-predicted snapshot for the latest tracked
//! model, plus its HTML, JSON and CSV routes.

use std::sync::{Arc, RwLock};

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::WarehouseConfig;
use crate::model::LinearModel;
use crate::tracking::TrackingStore;
use crate::training::TrainingConfig;
use crate::transform::{
    assert_schema_compatible, build_transform_schema, column_diff, frame_from_records,
    transform_for_serving, TransformError, TARGET_COLUMN,
};
use crate::warehouse::{Warehouse, WarehouseError};

pub const FORECAST_HEADERS: [&str; 3] = ["Date", "Actual", "Predicted"];
pub const RAW_TABLE_TAIL: usize = 12;

const CHART_WIDTH: f64 = 960.0;
const CHART_HEIGHT: f64 = 320.0;
const CHART_PAD: f64 = 40.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionPoint {
    pub date: String,
    pub actual: f64,
    pub predicted: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SnapshotStatus {
    Loaded {
        run_id: String,
        model_version: Option<String>,
        rmse: Option<f64>,
    },
    ModelUnavailable {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionSnapshot {
    pub experiment: String,
    pub target: String,
    pub status: SnapshotStatus,
    pub points: Vec<PredictionPoint>,
}

impl PredictionSnapshot {
    pub fn model_unavailable(
        experiment: impl Into<String>,
        target: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            experiment: experiment.into(),
            target: target.into(),
            status: SnapshotStatus::ModelUnavailable {
                message: message.into(),
            },
            points: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error("csv export failed: {0}")]
    Csv(String),
}

pub trait PredictionSnapshotSource: Send + Sync + 'static {
    fn snapshot(&self) -> PredictionSnapshot;
}

#[derive(Clone)]
pub struct InMemorySnapshotSource {
    inner: Arc<RwLock<PredictionSnapshot>>,
}

impl InMemorySnapshotSource {
    pub fn new(snapshot: PredictionSnapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(snapshot)),
        }
    }

    pub fn replace_snapshot(&self, snapshot: PredictionSnapshot) {
        let mut guard = self
            .inner
            .write()
            .expect("in-memory snapshot lock should not be poisoned");
        *guard = snapshot;
    }
}

impl PredictionSnapshotSource for InMemorySnapshotSource {
    fn snapshot(&self) -> PredictionSnapshot {
        self.inner
            .read()
            .expect("in-memory snapshot lock should not be poisoned")
            .clone()
    }
}

/// Loads the latest run's model and scores the current feature rows with the
/// training transform. Failing to obtain a usable model is reported inside the
/// snapshot; warehouse failures are returned as errors.
pub fn build_prediction_snapshot<T>(
    warehouse_cfg: &WarehouseConfig,
    tracking: &T,
    cfg: &TrainingConfig,
) -> Result<PredictionSnapshot, DashboardError>
where
    T: TrackingStore + ?Sized,
{
    let target = cfg.target.as_str();
    let unavailable = |message: String| {
        warn!(
            component = "dashboard",
            event = "dashboard.model.unavailable",
            experiment = %cfg.experiment,
            message = %message
        );
        PredictionSnapshot::model_unavailable(&cfg.experiment, target, message)
    };

    let run = match tracking.latest_run(&cfg.experiment) {
        Ok(Some(run)) => run,
        Ok(None) => {
            return Ok(unavailable(format!(
                "no runs recorded for experiment {}",
                cfg.experiment
            )))
        }
        Err(err) => return Ok(unavailable(err.to_string())),
    };
    let model = match tracking
        .load_model_json(&run)
        .map_err(|err| err.to_string())
        .and_then(|raw| LinearModel::from_json(&raw).map_err(|err| err.to_string()))
    {
        Ok(model) => model,
        Err(message) => return Ok(unavailable(message)),
    };

    let input_columns = frame_from_records(&[], cfg.target).columns;
    let serving_schema = build_transform_schema(&input_columns, &cfg.transform)?;
    if let Err(err) = assert_schema_compatible(
        model.schema_version,
        &model.schema_fingerprint,
        &serving_schema,
    ) {
        let serving_features: Vec<String> = serving_schema
            .columns
            .iter()
            .filter(|column| column.as_str() != TARGET_COLUMN)
            .cloned()
            .collect();
        let diff = column_diff(&model.feature_names, &serving_features);
        return Ok(unavailable(format!(
            "{err}; model-only columns {:?}, serving-only columns {:?}",
            diff.only_left, diff.only_right
        )));
    }

    let records = Warehouse::connect(warehouse_cfg)?.load_feature_rows()?;
    let frame = transform_for_serving(&frame_from_records(&records, cfg.target), &cfg.transform)?;
    let (feature_names, x, actual) = frame.split_target(TARGET_COLUMN)?;
    if let Err(err) = model.check_features(&feature_names) {
        return Ok(unavailable(err.to_string()));
    }
    let predicted = match model.predict(&x) {
        Ok(predicted) => predicted,
        Err(err) => return Ok(unavailable(err.to_string())),
    };

    let points: Vec<PredictionPoint> = frame
        .rows
        .iter()
        .zip(actual.iter().zip(&predicted))
        .map(|(row, (actual, predicted))| PredictionPoint {
            date: row.date.format("%Y-%m-%d").to_string(),
            actual: *actual,
            predicted: *predicted,
        })
        .collect();

    info!(
        component = "dashboard",
        event = "dashboard.snapshot.built",
        run_id = %run.run_id,
        points = points.len()
    );

    Ok(PredictionSnapshot {
        experiment: cfg.experiment.clone(),
        target: target.to_string(),
        status: SnapshotStatus::Loaded {
            model_version: run.tags.get("version").cloned(),
            rmse: run.metrics.get("rmse").copied(),
            run_id: run.run_id,
        },
        points,
    })
}

pub fn dashboard_router(source: Arc<dyn PredictionSnapshotSource>) -> Router {
    Router::new()
        .route("/forecast", get(get_forecast_html))
        .route("/forecast/snapshot", get(get_forecast_snapshot))
        .route("/forecast/export.csv", get(get_forecast_csv))
        .with_state(DashboardAppState { source })
}

pub fn render_forecast_html(snapshot: &PredictionSnapshot) -> String {
    let now_utc = Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
    let target_label = snapshot.target.to_uppercase();

    let mut out = String::new();
    out.push_str("<!DOCTYPE html><html><head><meta charset=\"utf-8\">\n");
    out.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    out.push_str(&format!(
        "<title>{} Forecast Visualizer</title>\n",
        escape_html(&target_label)
    ));
    out.push_str("<style>:root{--bg:#f5f1e7;--card:#ffffff;--ink:#182026;--muted:#5f6a73;--line:#d7dce1;--head:#14343f;--actual:#0c5f78;--pred:#d9822b;--ok:#e6f4ea;--okink:#1e5631;--err:#fde8e8;--errink:#8a1c1c}*{box-sizing:border-box}body{margin:0;color:var(--ink);font-family:\"Space Grotesk\",\"Avenir Next\",\"Segoe UI\",sans-serif;background:var(--bg);min-height:100vh}.shell{max-width:1100px;margin:0 auto;padding:24px 18px 28px}.hero{background:linear-gradient(135deg,#102f3a 0%,#24576b 100%);color:#f7fbfc;border-radius:16px;padding:18px 20px}.hero h1{margin:0 0 8px;font-size:1.6rem}.hero-meta{display:flex;gap:16px;flex-wrap:wrap;font-size:.92rem;color:#dcebf0}.banner{margin-top:16px;padding:12px 16px;border-radius:12px;font-size:.9rem}.banner-ok{background:var(--ok);color:var(--okink)}.banner-error{background:var(--err);color:var(--errink)}.card{margin-top:16px;background:var(--card);border:1px solid #cbd4db;border-radius:16px;padding:14px;overflow:auto}.card h2{margin:0 0 10px;font-size:1.05rem}svg .actual{stroke:var(--actual)}svg .predicted{stroke:var(--pred)}svg text{font-size:11px;fill:var(--muted)}table{width:100%;border-collapse:collapse}thead th{background:var(--head);color:#f2f7f9;font-size:.8rem;text-transform:uppercase;padding:8px 10px;text-align:left}tbody td{font-size:.84rem;padding:7px 10px;border-bottom:1px solid var(--line)}</style>\n");
    out.push_str("</head><body><main class=\"shell\">\n");
    out.push_str(&format!(
        "<section class=\"hero\"><h1>{} Forecast Visualizer</h1>",
        escape_html(&target_label)
    ));
    out.push_str("<div class=\"hero-meta\">\n");
    out.push_str(&format!(
        "<span>Experiment: {}</span>",
        escape_html(&snapshot.experiment)
    ));
    out.push_str(&format!("<span>Points: {}</span>", snapshot.points.len()));
    out.push_str(&format!(
        "<span>Generated: {}</span>",
        escape_html(&now_utc)
    ));
    out.push_str("</div></section>\n");

    match &snapshot.status {
        SnapshotStatus::ModelUnavailable { message } => {
            out.push_str("<section class=\"banner banner-error\" id=\"model-error\">Failed to load model: ");
            out.push_str(&escape_html(message));
            out.push_str("</section>\n");
            out.push_str("</main></body></html>\n");
            return out;
        }
        SnapshotStatus::Loaded {
            run_id,
            model_version,
            rmse,
        } => {
            out.push_str("<section class=\"banner banner-ok\">Loaded model from run ID: ");
            out.push_str(&escape_html(run_id));
            if let Some(version) = model_version {
                out.push_str(&format!(" (version {})", escape_html(version)));
            }
            if let Some(rmse) = rmse {
                out.push_str(&format!(" · RMSE {rmse:.4}"));
            }
            out.push_str("</section>\n");
        }
    }

    out.push_str(&format!(
        "<section class=\"card\"><h2>Actual vs Predicted {}</h2>\n",
        escape_html(&target_label)
    ));
    out.push_str(&render_line_chart_svg(&snapshot.points));
    out.push_str("</section>\n");

    out.push_str("<section class=\"card\"><h2>Raw Forecast Data</h2><table id=\"forecast-table\">\n");
    out.push_str("<thead><tr>");
    for header in FORECAST_HEADERS {
        out.push_str("<th>");
        out.push_str(header);
        out.push_str("</th>");
    }
    out.push_str("</tr></thead><tbody>\n");
    let tail_start = snapshot.points.len().saturating_sub(RAW_TABLE_TAIL);
    for point in &snapshot.points[tail_start..] {
        out.push_str(&format!(
            "<tr><td>{}</td><td>{:.3}</td><td>{:.3}</td></tr>\n",
            escape_html(&point.date),
            point.actual,
            point.predicted
        ));
    }
    out.push_str("</tbody></table></section>");
    out.push_str("</main></body></html>\n");
    out
}

pub fn render_line_chart_svg(points: &[PredictionPoint]) -> String {
    if points.len() < 2 {
        return "<p class=\"chart-empty\">Not enough points to draw a chart.</p>".to_string();
    }

    let (lo, hi) = points
        .iter()
        .flat_map(|point| [point.actual, point.predicted])
        .fold((f64::MAX, f64::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));
    let span = if hi - lo > f64::EPSILON { hi - lo } else { 1.0 };
    let step = (CHART_WIDTH - 2.0 * CHART_PAD) / (points.len() - 1) as f64;
    let y_of = |v: f64| CHART_HEIGHT - CHART_PAD - (v - lo) / span * (CHART_HEIGHT - 2.0 * CHART_PAD);

    let polyline = |select: fn(&PredictionPoint) -> f64| -> String {
        points
            .iter()
            .enumerate()
            .map(|(idx, point)| {
                format!(
                    "{:.1},{:.1}",
                    CHART_PAD + idx as f64 * step,
                    y_of(select(point))
                )
            })
            .collect::<Vec<_>>()
            .join(" ")
    };

    let mut out = String::new();
    out.push_str(&format!(
        "<svg id=\"forecast-chart\" viewBox=\"0 0 {CHART_WIDTH} {CHART_HEIGHT}\" width=\"100%\" role=\"img\">"
    ));
    out.push_str(&format!(
        "<polyline class=\"actual\" fill=\"none\" stroke-width=\"2\" points=\"{}\"/>",
        polyline(|point| point.actual)
    ));
    out.push_str(&format!(
        "<polyline class=\"predicted\" fill=\"none\" stroke-width=\"2\" stroke-dasharray=\"6 4\" points=\"{}\"/>",
        polyline(|point| point.predicted)
    ));
    out.push_str(&format!(
        "<text x=\"{CHART_PAD}\" y=\"{}\">{}</text>",
        CHART_HEIGHT - 10.0,
        escape_html(&points[0].date)
    ));
    out.push_str(&format!(
        "<text x=\"{}\" y=\"{}\" text-anchor=\"end\">{}</text>",
        CHART_WIDTH - CHART_PAD,
        CHART_HEIGHT - 10.0,
        escape_html(&points[points.len() - 1].date)
    ));
    out.push_str(&format!(
        "<text x=\"4\" y=\"{}\">{hi:.2}</text><text x=\"4\" y=\"{}\">{lo:.2}</text>",
        CHART_PAD,
        CHART_HEIGHT - CHART_PAD
    ));
    out.push_str("<text x=\"860\" y=\"20\" class=\"legend\">actual ─ predicted ┄</text>");
    out.push_str("</svg>\n");
    out
}

pub fn snapshot_to_csv(snapshot: &PredictionSnapshot) -> Result<String, DashboardError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(["date", "actual", "predicted"])
        .map_err(|err| DashboardError::Csv(err.to_string()))?;
    for point in &snapshot.points {
        writer
            .write_record([
                point.date.clone(),
                point.actual.to_string(),
                point.predicted.to_string(),
            ])
            .map_err(|err| DashboardError::Csv(err.to_string()))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| DashboardError::Csv(err.to_string()))?;
    String::from_utf8(bytes).map_err(|err| DashboardError::Csv(err.to_string()))
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[derive(Clone)]
struct DashboardAppState {
    source: Arc<dyn PredictionSnapshotSource>,
}

async fn get_forecast_html(State(state): State<DashboardAppState>) -> impl IntoResponse {
    let snapshot = state.source.snapshot();
    info!(
        component = "dashboard",
        event = "http.forecast.request",
        points = snapshot.points.len()
    );
    Html(render_forecast_html(&snapshot))
}

async fn get_forecast_snapshot(State(state): State<DashboardAppState>) -> impl IntoResponse {
    let snapshot = state.source.snapshot();
    info!(
        component = "dashboard",
        event = "http.snapshot.request",
        points = snapshot.points.len()
    );
    Json(snapshot)
}

async fn get_forecast_csv(State(state): State<DashboardAppState>) -> Response {
    let snapshot = state.source.snapshot();
    match snapshot_to_csv(&snapshot) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => {
            warn!(
                component = "dashboard",
                event = "http.export.error",
                error = %err
            );
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}
