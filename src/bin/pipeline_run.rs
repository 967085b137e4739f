use chrono::Utc;
use fredpipe::{
    init_logging, log_app_start, logging_config_from_env, run_pipeline, steps_for_selector,
    FileTrackingStore, FredClient, FredClientConfig, PipelineConfig,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start("pipeline_run", &logging_cfg);

    // Fails on the first missing variable, before any network client exists.
    let cfg = PipelineConfig::from_env()?;

    let selector = std::env::args().nth(1);
    let steps = steps_for_selector(selector.as_deref()).ok_or_else(|| {
        format!(
            "unknown step {:?}; expected one of all, schema, sync, train",
            selector.as_deref().unwrap_or_default()
        )
    })?;

    let source = FredClient::new(cfg.fred_api_key.clone(), FredClientConfig::default())?;
    let tracking = FileTrackingStore::new(&cfg.tracking.root);

    let now = Utc::now();
    let report = run_pipeline(
        &cfg,
        &source,
        &tracking,
        &steps,
        now.date_naive(),
        now.timestamp_millis(),
    )?;

    if let Some(sync) = &report.sync {
        println!(
            "Synced {} aligned rows ({} inserted, {} updated) since {}.",
            sync.aligned_rows, sync.upserts.inserted, sync.upserts.updated, sync.observation_start
        );
    }
    if let Some(training) = &report.training {
        println!(
            "Logged run {} on {} rows: rmse={:.4} mape={:.4} accuracy={:.4}",
            training.run.run_id,
            training.training_rows,
            training.metrics.rmse,
            training.metrics.mape,
            training.metrics.accuracy
        );
    }
    println!(
        "Completed steps: {}",
        report
            .completed
            .iter()
            .map(|step| step.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    Ok(())
}
