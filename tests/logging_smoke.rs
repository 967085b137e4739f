use std::io;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::{Arc, Mutex};

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::NaiveDate;
use fredpipe::{
    dashboard_router, default_indicator_specs, ensure_schema, log_app_bind, log_app_start,
    run_pipeline, sync_features, validate_indicator_specs, FileTrackingStore,
    InMemorySnapshotSource, IngestError, LoggingConfig, Observation, PipelineConfig,
    PipelineError, PipelineStep, PredictionSnapshot, SourceError, TrackingConfig,
    WarehouseConfig, ALL_PIPELINE_STEPS,
};
use tempfile::TempDir;
use tower::util::ServiceExt;
use tracing::dispatcher::with_default;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriter;

#[derive(Clone, Default)]
struct SharedWriter {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedWriter {
    fn output_string(&self) -> String {
        let bytes = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        String::from_utf8_lossy(&bytes).to_string()
    }
}

struct SharedWriterGuard {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        SharedWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for SharedWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut out = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        out.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn capture_logs(max_level: Level, f: impl FnOnce()) -> String {
    let writer = SharedWriter::default();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_ansi(false)
        .with_max_level(max_level)
        .with_writer(writer.clone())
        .finish();
    let dispatch = tracing::Dispatch::new(subscriber);

    with_default(&dispatch, f);
    writer.output_string()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn pipeline_cfg(root: &Path) -> PipelineConfig {
    PipelineConfig {
        fred_api_key: "test-key".to_string(),
        warehouse: WarehouseConfig {
            root: root.join("warehouse"),
            user: "etl".to_string(),
            password: "hunter2".to_string(),
            account: "acct".to_string(),
            warehouse: "compute_wh".to_string(),
            database: "fred".to_string(),
            schema: "public".to_string(),
        },
        tracking: TrackingConfig::with_root(root.join("tracking"), "FRED_ML_PROJECT"),
        indicators: validate_indicator_specs(&default_indicator_specs()).expect("indicators"),
        window_days: 365,
    }
}

#[test]
fn upstream_failure_logs_fetch_error() {
    let dir = TempDir::new().expect("tempdir");
    let cfg = pipeline_cfg(dir.path());
    ensure_schema(&cfg.warehouse).expect("schema");

    let logs = capture_logs(Level::INFO, || {
        let failing = |code: &str, _start: NaiveDate| -> Result<Vec<Observation>, SourceError> {
            Err(SourceError::Transport {
                source_code: code.to_string(),
                message: "simulated FRED outage".to_string(),
            })
        };
        let err = sync_features(&cfg.indicators, &cfg.warehouse, &failing, 365, date(2024, 6, 1))
            .expect_err("fetch error should bubble up");

        assert!(matches!(err, IngestError::Source(SourceError::Transport { .. })));
    });

    assert!(logs.contains("\"event\":\"ingest.sync.start\""));
    assert!(logs.contains("\"event\":\"ingest.fetch.error\""));
    assert!(!logs.contains("\"event\":\"ingest.sync.finish\""));
}

#[test]
fn pipeline_logs_each_step_and_stops_at_the_first_failure() {
    let dir = TempDir::new().expect("tempdir");
    let cfg = pipeline_cfg(dir.path());
    let tracking = FileTrackingStore::new(&cfg.tracking.root);

    let logs = capture_logs(Level::INFO, || {
        let empty = |_code: &str, _start: NaiveDate| -> Result<Vec<Observation>, SourceError> {
            Ok(Vec::new())
        };
        let err = run_pipeline(
            &cfg,
            &empty,
            &tracking,
            &ALL_PIPELINE_STEPS,
            date(2024, 6, 1),
            1_717_200_000_000,
        )
        .expect_err("nothing to align");

        assert!(matches!(
            err,
            PipelineError::Ingest {
                source: IngestError::EmptyAlignment { .. },
                ..
            }
        ));
    });

    assert!(logs.contains("\"event\":\"pipeline.step.start\""));
    assert!(logs.contains("\"event\":\"pipeline.step.finish\""));
    assert!(logs.contains("\"event\":\"warehouse.schema.ensured\""));
    assert!(logs.contains("\"event\":\"pipeline.step.failed\""));
    assert!(logs.contains(PipelineStep::SyncFeatures.as_str()));
    assert!(!logs.contains(PipelineStep::Train.as_str()));
}

#[test]
fn server_lifecycle_helpers_emit_baseline_events() {
    let logs = capture_logs(Level::INFO, || {
        let cfg = LoggingConfig::default();
        log_app_start("forecast_dashboard", &cfg);
        log_app_bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8501));
    });

    assert!(logs.contains("\"event\":\"app.start\""));
    assert!(logs.contains("\"event\":\"app.bind\""));
    assert!(logs.contains("\"route\":\"/forecast\""));
}

#[test]
fn snapshot_route_emits_http_snapshot_event() {
    let logs = capture_logs(Level::INFO, || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("single-thread runtime should build");

        rt.block_on(async {
            let source = Arc::new(InMemorySnapshotSource::new(
                PredictionSnapshot::model_unavailable("FRED_ML_PROJECT", "cpi", "no runs"),
            ));
            let app = dashboard_router(source);

            let response = app
                .oneshot(
                    Request::builder()
                        .uri("/forecast/snapshot")
                        .body(Body::empty())
                        .expect("request should build"),
                )
                .await
                .expect("snapshot request should succeed");

            assert_eq!(response.status(), StatusCode::OK);
        });
    });

    assert!(logs.contains("\"event\":\"http.snapshot.request\""));
}
