use std::{net::SocketAddr, sync::Arc};

use fredpipe::{
    build_prediction_snapshot, dashboard_router, init_logging, log_app_bind, log_app_start,
    logging_config_from_env, DashboardConfig, FileTrackingStore, InMemorySnapshotSource,
    PredictionSnapshotSource, TrainingConfig,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start("forecast_dashboard", &logging_cfg);

    let cfg = DashboardConfig::from_env()?;
    let addr: SocketAddr = std::env::var("FREDPIPE_DASHBOARD_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8501".to_string())
        .parse()?;

    let tracking = FileTrackingStore::new(&cfg.tracking.root);
    let training_cfg = TrainingConfig::for_experiment(&cfg.tracking.experiment);
    let snapshot = build_prediction_snapshot(&cfg.warehouse, &tracking, &training_cfg)?;

    let source: Arc<dyn PredictionSnapshotSource> = Arc::new(InMemorySnapshotSource::new(snapshot));
    let app = dashboard_router(source);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    log_app_bind(bound_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
