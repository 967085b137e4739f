use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;

use chrono::NaiveDate;
use fredpipe::{
    align_series, default_indicator_specs, ensure_schema, sync_features,
    validate_indicator_specs, FetchedSeries, IndicatorColumn, IndicatorValues, IngestError,
    Observation, PipelineConfig, SeriesSource, SourceError, ValidatedIndicator, Warehouse,
    WarehouseConfig, WarehouseError, ENV_WAREHOUSE_PASSWORD,
};
use tempfile::TempDir;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn warehouse_cfg(root: &Path) -> WarehouseConfig {
    WarehouseConfig {
        root: root.to_path_buf(),
        user: "etl".to_string(),
        password: "hunter2".to_string(),
        account: "acct".to_string(),
        warehouse: "compute_wh".to_string(),
        database: "fred".to_string(),
        schema: "public".to_string(),
    }
}

fn indicators() -> Vec<ValidatedIndicator> {
    validate_indicator_specs(&default_indicator_specs()).expect("default indicators are valid")
}

/// Serves canned observations per FRED code and records every call.
struct CannedSource {
    series: HashMap<&'static str, Vec<Observation>>,
    failing: Option<&'static str>,
    calls: RefCell<Vec<(String, NaiveDate)>>,
}

impl CannedSource {
    fn new() -> Self {
        Self {
            series: HashMap::new(),
            failing: None,
            calls: RefCell::new(Vec::new()),
        }
    }

    fn with(mut self, code: &'static str, points: &[(NaiveDate, f64)]) -> Self {
        self.series.insert(
            code,
            points
                .iter()
                .map(|(date, value)| Observation {
                    date: *date,
                    value: *value,
                })
                .collect(),
        );
        self
    }

    fn failing_on(mut self, code: &'static str) -> Self {
        self.failing = Some(code);
        self
    }
}

impl SeriesSource for CannedSource {
    fn fetch_series(
        &self,
        source_code: &str,
        observation_start: NaiveDate,
    ) -> Result<Vec<Observation>, SourceError> {
        self.calls
            .borrow_mut()
            .push((source_code.to_string(), observation_start));
        if self.failing.is_some_and(|code| code == source_code) {
            return Err(SourceError::Status {
                source_code: source_code.to_string(),
                status: 500,
                message: "upstream unavailable".to_string(),
            });
        }
        Ok(self
            .series
            .get(source_code)
            .map(|points| {
                points
                    .iter()
                    .filter(|obs| obs.date >= observation_start)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn quarterly_source(cpi_offset: f64) -> CannedSource {
    let dates = [date(2024, 1, 1), date(2024, 4, 1), date(2024, 7, 1)];
    let points = |base: f64, step: f64| -> Vec<(NaiveDate, f64)> {
        dates
            .iter()
            .enumerate()
            .map(|(i, d)| (*d, base + step * i as f64))
            .collect()
    };
    CannedSource::new()
        .with("UNRATE", &points(3.5, 0.25))
        .with("CPIAUCSL", &points(308.0 + cpi_offset, 1.5))
        .with("FEDFUNDS", &points(5.33, 0.0))
        .with("GDPC1", &points(22_700.0, 50.0))
}

#[test]
fn dates_missing_from_any_indicator_are_dropped() {
    let series = |column: IndicatorColumn, days: &[u32]| FetchedSeries {
        column,
        source_code: column.as_str().to_string(),
        observations: days
            .iter()
            .map(|day| Observation {
                date: date(2024, 1, *day),
                value: f64::from(*day),
            })
            .collect(),
    };

    let rows = align_series(&[
        series(IndicatorColumn::UnemploymentRate, &[1, 2, 3]),
        series(IndicatorColumn::Cpi, &[2, 3, 4]),
        series(IndicatorColumn::InterestRate, &[1, 2, 3, 4]),
        series(IndicatorColumn::Gdp, &[2, 3]),
    ])
    .expect("align");

    let ids: Vec<&str> = rows.iter().map(|row| row.id.as_str()).collect();
    assert_eq!(ids, vec!["2024-01-02", "2024-01-03"]);
    assert_eq!(rows[0].values, IndicatorValues::new(2.0, 2.0, 2.0, 2.0));
}

#[test]
fn sync_writes_aligned_rows_with_the_requested_window() {
    let dir = TempDir::new().expect("tempdir");
    let cfg = warehouse_cfg(dir.path());
    ensure_schema(&cfg).expect("schema");

    let source = quarterly_source(0.0);
    let report = sync_features(&indicators(), &cfg, &source, 3650, date(2024, 10, 15))
        .expect("sync");

    assert_eq!(report.aligned_rows, 3);
    assert_eq!(report.upserts.inserted, 3);
    assert_eq!(report.upserts.updated, 0);
    assert_eq!(report.first_date, Some(date(2024, 1, 1)));
    assert_eq!(report.last_date, Some(date(2024, 7, 1)));

    let calls = source.calls.borrow();
    let codes: Vec<&str> = calls.iter().map(|(code, _)| code.as_str()).collect();
    assert_eq!(codes, vec!["UNRATE", "CPIAUCSL", "FEDFUNDS", "GDPC1"]);
    assert!(calls.iter().all(|(_, start)| *start == date(2014, 10, 18)));

    let warehouse = Warehouse::connect(&cfg).expect("connect");
    let row = warehouse
        .feature_row("2024-04-01")
        .expect("query")
        .expect("row present");
    assert_eq!(row.values, IndicatorValues::new(3.75, 309.5, 5.33, 22_750.0));
}

#[test]
fn repeated_sync_is_idempotent() {
    let dir = TempDir::new().expect("tempdir");
    let cfg = warehouse_cfg(dir.path());
    ensure_schema(&cfg).expect("schema");
    let today = date(2024, 10, 15);

    sync_features(&indicators(), &cfg, &quarterly_source(0.0), 365, today).expect("first");
    let first = Warehouse::connect(&cfg)
        .expect("connect")
        .load_feature_rows()
        .expect("load");

    let report =
        sync_features(&indicators(), &cfg, &quarterly_source(0.0), 365, today).expect("second");
    let second = Warehouse::connect(&cfg)
        .expect("connect")
        .load_feature_rows()
        .expect("load");

    assert_eq!(report.upserts.inserted, 0);
    assert_eq!(report.upserts.updated, 3);
    assert_eq!(first, second);
}

#[test]
fn revised_values_overwrite_existing_rows_and_new_dates_are_added() {
    let dir = TempDir::new().expect("tempdir");
    let cfg = warehouse_cfg(dir.path());
    ensure_schema(&cfg).expect("schema");

    sync_features(&indicators(), &cfg, &quarterly_source(0.0), 365, date(2024, 10, 15))
        .expect("initial");

    let revised = CannedSource::new()
        .with("UNRATE", &[(date(2024, 4, 1), 3.8), (date(2024, 7, 1), 3.9), (date(2024, 10, 1), 4.1)])
        .with("CPIAUCSL", &[(date(2024, 4, 1), 319.5), (date(2024, 7, 1), 321.0), (date(2024, 10, 1), 322.0)])
        .with("FEDFUNDS", &[(date(2024, 4, 1), 5.33), (date(2024, 7, 1), 5.33), (date(2024, 10, 1), 4.83)])
        .with("GDPC1", &[(date(2024, 4, 1), 22_750.0), (date(2024, 7, 1), 22_800.0), (date(2024, 10, 1), 22_900.0)]);
    let report = sync_features(&indicators(), &cfg, &revised, 365, date(2025, 1, 15))
        .expect("overlapping");

    assert_eq!(report.upserts.updated, 2);
    assert_eq!(report.upserts.inserted, 1);

    let warehouse = Warehouse::connect(&cfg).expect("connect");
    assert_eq!(warehouse.count_feature_rows().expect("count"), 4);
    let january = warehouse.feature_row("2024-01-01").expect("query").expect("kept");
    assert_eq!(january.values.get(IndicatorColumn::Cpi), 308.0);
    let april = warehouse.feature_row("2024-04-01").expect("query").expect("updated");
    assert_eq!(april.values.get(IndicatorColumn::Cpi), 319.5);
    let october = warehouse.feature_row("2024-10-01").expect("query").expect("inserted");
    assert_eq!(october.values.get(IndicatorColumn::InterestRate), 4.83);
}

#[test]
fn fetch_failure_aborts_without_touching_stored_rows() {
    let dir = TempDir::new().expect("tempdir");
    let cfg = warehouse_cfg(dir.path());
    ensure_schema(&cfg).expect("schema");
    let today = date(2024, 10, 15);

    sync_features(&indicators(), &cfg, &quarterly_source(0.0), 365, today).expect("first");

    let broken = quarterly_source(50.0).failing_on("FEDFUNDS");
    let err = sync_features(&indicators(), &cfg, &broken, 365, today).expect_err("fetch fails");
    assert!(matches!(err, IngestError::Source(SourceError::Status { status: 500, .. })));
    // GDPC1 comes after the failing code and is never requested.
    assert_eq!(broken.calls.borrow().len(), 3);

    let rows = Warehouse::connect(&cfg)
        .expect("connect")
        .load_feature_rows()
        .expect("load");
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].values.get(IndicatorColumn::Cpi), 308.0);
}

#[test]
fn disjoint_series_report_empty_alignment() {
    let dir = TempDir::new().expect("tempdir");
    let cfg = warehouse_cfg(dir.path());
    ensure_schema(&cfg).expect("schema");

    let source = quarterly_source(0.0).with("GDPC1", &[(date(2024, 2, 1), 22_700.0)]);
    let err = sync_features(&indicators(), &cfg, &source, 365, date(2024, 10, 15))
        .expect_err("no common dates");
    assert!(matches!(err, IngestError::EmptyAlignment { .. }));
    assert_eq!(
        Warehouse::connect(&cfg)
            .expect("connect")
            .count_feature_rows()
            .expect("count"),
        0
    );
}

#[test]
fn wrong_credentials_are_rejected_at_connect() {
    let dir = TempDir::new().expect("tempdir");
    let cfg = warehouse_cfg(dir.path());
    ensure_schema(&cfg).expect("enroll");

    let intruder = WarehouseConfig {
        password: "guess".to_string(),
        ..cfg.clone()
    };
    let err = sync_features(&indicators(), &intruder, &quarterly_source(0.0), 365, date(2024, 10, 15))
        .expect_err("auth fails");
    assert!(matches!(
        err,
        IngestError::Warehouse(WarehouseError::AuthFailed { .. })
    ));
}

#[test]
fn missing_configuration_is_reported_before_any_fetch() {
    let source = quarterly_source(0.0);
    let vars: HashMap<&str, &str> = [
        ("FRED_API_KEY", "key"),
        ("WAREHOUSE_USER", "etl"),
        ("WAREHOUSE_ACCOUNT", "acct"),
        ("WAREHOUSE_NAME", "compute_wh"),
        ("WAREHOUSE_DATABASE", "fred"),
        ("WAREHOUSE_SCHEMA", "public"),
    ]
    .into_iter()
    .collect();

    let err = PipelineConfig::from_lookup(|key| vars.get(key).map(|v| (*v).to_string()))
        .expect_err("password missing");
    assert!(err.to_string().contains(ENV_WAREHOUSE_PASSWORD));
    assert!(source.calls.borrow().is_empty());
}
