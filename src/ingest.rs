//! Feature ingestion: fetch every configured indicator, inner-join on date,
//! and merge the aligned rows into the feature table.

use std::collections::BTreeMap;

use chrono::{Days, NaiveDate, Utc};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{PipelineConfig, WarehouseConfig};
use crate::indicators::{IndicatorColumn, ValidatedIndicator, ALL_INDICATOR_COLUMNS};
use crate::source::{Observation, SeriesSource, SourceError};
use crate::warehouse::{FeatureRecord, IndicatorValues, UpsertSummary, Warehouse, WarehouseError};

/// Rendering of a date into its feature-row key. Re-ingestion matches rows by
/// this exact string, so it must never change.
pub const FEATURE_ID_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid sync window: {0} days")]
    InvalidWindow(u32),
    #[error("indicator set does not cover feature columns: {0:?}")]
    IncompleteIndicatorSet(Vec<String>),
    #[error("feature column {0} is fed by more than one series")]
    DuplicateSeries(String),
    #[error("no date since {observation_start} has an observation for every indicator")]
    EmptyAlignment { observation_start: NaiveDate },
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchedSeries {
    pub column: IndicatorColumn,
    pub source_code: String,
    pub observations: Vec<Observation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesFetchCount {
    pub source_code: String,
    pub observations: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub observation_start: NaiveDate,
    pub fetched: Vec<SeriesFetchCount>,
    pub aligned_rows: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub upserts: UpsertSummary,
}

pub fn feature_id(date: NaiveDate) -> String {
    date.format(FEATURE_ID_FORMAT).to_string()
}

/// Inner join on observation date: a date missing from any series yields no row.
pub fn align_series(series: &[FetchedSeries]) -> Result<Vec<FeatureRecord>, IngestError> {
    let uncovered: Vec<String> = ALL_INDICATOR_COLUMNS
        .iter()
        .filter(|column| !series.iter().any(|s| s.column == **column))
        .map(|column| column.as_str().to_string())
        .collect();
    if !uncovered.is_empty() {
        return Err(IngestError::IncompleteIndicatorSet(uncovered));
    }

    let mut seen = [false; ALL_INDICATOR_COLUMNS.len()];
    for s in series {
        let slot = &mut seen[s.column.index()];
        if *slot {
            return Err(IngestError::DuplicateSeries(s.column.as_str().to_string()));
        }
        *slot = true;
    }

    // One bit per feature column.
    let required_mask: u8 = (1u8 << ALL_INDICATOR_COLUMNS.len()) - 1;
    let mut by_date: BTreeMap<NaiveDate, (u8, IndicatorValues)> = BTreeMap::new();

    for s in series {
        for obs in &s.observations {
            let entry = by_date
                .entry(obs.date)
                .or_insert((0, IndicatorValues::default()));
            entry.0 |= 1 << s.column.index();
            entry.1.set(s.column, obs.value);
        }
    }

    Ok(by_date
        .into_iter()
        .filter(|(_, (mask, _))| *mask == required_mask)
        .map(|(date, (_, values))| FeatureRecord {
            id: feature_id(date),
            date,
            values,
        })
        .collect())
}

pub fn fetch_indicators<S>(
    indicators: &[ValidatedIndicator],
    source: &S,
    observation_start: NaiveDate,
) -> Result<Vec<FetchedSeries>, IngestError>
where
    S: SeriesSource + ?Sized,
{
    let mut out = Vec::with_capacity(indicators.len());
    for indicator in indicators {
        let observations = source
            .fetch_series(&indicator.spec.source_code, observation_start)
            .inspect_err(|err| {
                warn!(
                    component = "ingest",
                    event = "ingest.fetch.error",
                    source_code = %indicator.spec.source_code,
                    error = %err
                );
            })?;
        info!(
            component = "ingest",
            event = "ingest.fetch.series",
            source_code = %indicator.spec.source_code,
            column = indicator.column.as_str(),
            observations = observations.len()
        );
        out.push(FetchedSeries {
            column: indicator.column,
            source_code: indicator.spec.source_code.clone(),
            observations,
        });
    }
    Ok(out)
}

/// Fetches `window_days` of history ending at `today`, aligns it, and upserts
/// the aligned rows one by one under a single warehouse connection.
///
/// Any fetch failure aborts before the warehouse is touched. A warehouse
/// failure mid-way leaves earlier rows committed.
pub fn sync_features<S>(
    indicators: &[ValidatedIndicator],
    warehouse_cfg: &WarehouseConfig,
    source: &S,
    window_days: u32,
    today: NaiveDate,
) -> Result<SyncReport, IngestError>
where
    S: SeriesSource + ?Sized,
{
    if window_days == 0 {
        return Err(IngestError::InvalidWindow(window_days));
    }
    let observation_start = today
        .checked_sub_days(Days::new(u64::from(window_days)))
        .ok_or(IngestError::InvalidWindow(window_days))?;

    info!(
        component = "ingest",
        event = "ingest.sync.start",
        observation_start = %observation_start,
        today = %today,
        window_days,
        indicators = indicators.len()
    );

    let series = fetch_indicators(indicators, source, observation_start)?;
    let rows = align_series(&series)?;
    if rows.is_empty() {
        warn!(
            component = "ingest",
            event = "ingest.sync.empty_alignment",
            observation_start = %observation_start
        );
        return Err(IngestError::EmptyAlignment { observation_start });
    }

    let mut warehouse = Warehouse::connect(warehouse_cfg)?;
    let upserts = warehouse.upsert_feature_rows(&rows)?;
    drop(warehouse);

    let report = SyncReport {
        observation_start,
        fetched: series
            .iter()
            .map(|s| SeriesFetchCount {
                source_code: s.source_code.clone(),
                observations: s.observations.len(),
            })
            .collect(),
        aligned_rows: rows.len(),
        first_date: rows.first().map(|row| row.date),
        last_date: rows.last().map(|row| row.date),
        upserts,
    };

    info!(
        component = "ingest",
        event = "ingest.sync.finish",
        aligned_rows = report.aligned_rows,
        inserted = report.upserts.inserted,
        updated = report.upserts.updated,
        first_date = ?report.first_date,
        last_date = ?report.last_date
    );
    Ok(report)
}

/// [`sync_features`] over the configured indicators, window, and today's UTC date.
pub fn sync_features_now<S>(cfg: &PipelineConfig, source: &S) -> Result<SyncReport, IngestError>
where
    S: SeriesSource + ?Sized,
{
    sync_features(
        &cfg.indicators,
        &cfg.warehouse,
        source,
        cfg.window_days,
        Utc::now().date_naive(),
    )
}
