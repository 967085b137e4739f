//! Shared raw-frame to model-ready-frame transform.
//!
//! Training and the forecast dashboard both go through [`transform`], so a
//! model is always scored on columns built the same way it was fitted on.

use std::collections::HashSet;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::indicators::{IndicatorColumn, ALL_INDICATOR_COLUMNS};
use crate::warehouse::FeatureRecord;

pub const TRANSFORM_SCHEMA_VERSION: u32 = 1;
pub const TARGET_COLUMN: &str = "target";
pub const MONTH_COLUMN: &str = "month";
pub const QUARTER_COLUMN: &str = "quarter";

#[derive(Debug, Clone, PartialEq)]
pub struct FrameRow {
    pub date: NaiveDate,
    pub values: Vec<f64>,
}

/// Date-keyed rows of named numeric columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub columns: Vec<String>,
    pub rows: Vec<FrameRow>,
}

impl Frame {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, date: NaiveDate, values: Vec<f64>) -> Result<(), TransformError> {
        if values.len() != self.columns.len() {
            return Err(TransformError::RowWidth {
                date,
                expected: self.columns.len(),
                actual: values.len(),
            });
        }
        self.rows.push(FrameRow { date, values });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// `None` when the column is unknown or a row is too short to hold it.
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let idx = self.column_index(name)?;
        self.rows.iter().map(|row| row.values.get(idx).copied()).collect()
    }

    /// Fails on the first row whose width differs from `columns`.
    pub fn check_row_widths(&self) -> Result<(), TransformError> {
        let expected = self.columns.len();
        match self.rows.iter().find(|row| row.values.len() != expected) {
            Some(row) => Err(TransformError::RowWidth {
                date: row.date,
                expected,
                actual: row.values.len(),
            }),
            None => Ok(()),
        }
    }

    /// Splits into (feature names, feature rows, target values), dropping the
    /// target column from the features.
    pub fn split_target(
        &self,
        target: &str,
    ) -> Result<(Vec<String>, Vec<Vec<f64>>, Vec<f64>), TransformError> {
        let target_idx = self
            .column_index(target)
            .ok_or_else(|| TransformError::UnknownColumn(target.to_string()))?;
        self.check_row_widths()?;

        let names = self
            .columns
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != target_idx)
            .map(|(_, name)| name.clone())
            .collect();
        let mut features = Vec::with_capacity(self.rows.len());
        let mut targets = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            features.push(
                row.values
                    .iter()
                    .enumerate()
                    .filter(|(idx, _)| *idx != target_idx)
                    .map(|(_, value)| *value)
                    .collect(),
            );
            targets.push(row.values[target_idx]);
        }

        Ok((names, features, targets))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformConfig {
    pub base_columns: Vec<String>,
    pub lags: Vec<usize>,
    pub schema_version: u32,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            base_columns: vec![
                TARGET_COLUMN.to_string(),
                IndicatorColumn::InterestRate.as_str().to_string(),
                IndicatorColumn::UnemploymentRate.as_str().to_string(),
                IndicatorColumn::Gdp.as_str().to_string(),
            ],
            lags: vec![1, 3, 6],
            schema_version: TRANSFORM_SCHEMA_VERSION,
        }
    }
}

impl TransformConfig {
    pub fn max_lag(&self) -> usize {
        self.lags.iter().copied().max().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformSchema {
    pub version: u32,
    pub fingerprint: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ColumnDiff {
    pub only_left: Vec<String>,
    pub only_right: Vec<String>,
}

impl ColumnDiff {
    pub fn is_empty(&self) -> bool {
        self.only_left.is_empty() && self.only_right.is_empty()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransformError {
    #[error("invalid transform config: {0}")]
    InvalidConfig(String),
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("output column {0} collides with an existing column")]
    DuplicateOutputColumn(String),
    #[error("row at {date} has {actual} values, frame has {expected} columns")]
    RowWidth {
        date: NaiveDate,
        expected: usize,
        actual: usize,
    },
    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch { expected: u32, actual: u32 },
    #[error("schema fingerprint mismatch: expected {expected}, got {actual}")]
    SchemaFingerprintMismatch { expected: String, actual: String },
}

pub fn lag_column_name(column: &str, lag: usize) -> String {
    format!("{column}_lag_{lag}")
}

/// Builds a frame from feature rows with `target` renamed to [`TARGET_COLUMN`]
/// and placed first; the remaining indicators follow in table order.
pub fn frame_from_records(records: &[FeatureRecord], target: IndicatorColumn) -> Frame {
    let order: Vec<IndicatorColumn> = std::iter::once(target)
        .chain(
            ALL_INDICATOR_COLUMNS
                .into_iter()
                .filter(|column| *column != target),
        )
        .collect();

    let columns = order
        .iter()
        .map(|column| {
            if *column == target {
                TARGET_COLUMN.to_string()
            } else {
                column.as_str().to_string()
            }
        })
        .collect();

    Frame {
        columns,
        rows: records
            .iter()
            .map(|record| FrameRow {
                date: record.date,
                values: order
                    .iter()
                    .map(|column| record.values.get(*column))
                    .collect(),
            })
            .collect(),
    }
}

/// Output column layout for a given input layout: the input columns, then one
/// `{column}_lag_{lag}` per lag and base column (lag-major), then month and quarter.
pub fn build_transform_schema(
    input_columns: &[String],
    cfg: &TransformConfig,
) -> Result<TransformSchema, TransformError> {
    validate_config(cfg)?;

    for base in &cfg.base_columns {
        if !input_columns.contains(base) {
            return Err(TransformError::UnknownColumn(base.clone()));
        }
    }

    let mut columns: Vec<String> = input_columns.to_vec();
    for lag in &cfg.lags {
        for base in &cfg.base_columns {
            columns.push(lag_column_name(base, *lag));
        }
    }
    columns.push(MONTH_COLUMN.to_string());
    columns.push(QUARTER_COLUMN.to_string());

    let mut seen = HashSet::with_capacity(columns.len());
    for column in &columns {
        if !seen.insert(column.as_str()) {
            return Err(TransformError::DuplicateOutputColumn(column.clone()));
        }
    }

    let fingerprint = schema_fingerprint(cfg, &columns);
    Ok(TransformSchema {
        version: cfg.schema_version,
        fingerprint,
        columns,
    })
}

/// Adds lag and calendar columns and drops every row whose lag window reaches
/// before the first input row or that carries a non-finite value.
///
/// Input must already be sorted by date ascending. The input frame is never
/// modified; surviving rows keep their relative order.
pub fn transform(frame: &Frame, cfg: &TransformConfig) -> Result<Frame, TransformError> {
    let schema = build_transform_schema(&frame.columns, cfg)?;
    frame.check_row_widths()?;
    let base_indices: Vec<usize> = cfg
        .base_columns
        .iter()
        .map(|base| {
            frame
                .column_index(base)
                .ok_or_else(|| TransformError::UnknownColumn(base.clone()))
        })
        .collect::<Result<_, _>>()?;

    let max_lag = cfg.max_lag();
    let mut out = Frame::new(schema.columns);

    for (idx, row) in frame.rows.iter().enumerate() {
        if idx < max_lag {
            continue;
        }

        let mut values = Vec::with_capacity(out.columns.len());
        values.extend_from_slice(&row.values);
        for lag in &cfg.lags {
            let lagged = &frame.rows[idx - lag];
            for base_idx in &base_indices {
                values.push(lagged.values[*base_idx]);
            }
        }
        let (month, quarter) = calendar_fields(row.date);
        values.push(month);
        values.push(quarter);

        if values.iter().all(|value| value.is_finite()) {
            out.push(row.date, values)?;
        }
    }

    debug!(
        component = "transform",
        event = "transform.finish",
        input_rows = frame.len(),
        output_rows = out.len(),
        max_lag,
        fingerprint = %schema.fingerprint
    );
    Ok(out)
}

pub fn transform_for_training(
    frame: &Frame,
    cfg: &TransformConfig,
) -> Result<Frame, TransformError> {
    transform(frame, cfg)
}

pub fn transform_for_serving(
    frame: &Frame,
    cfg: &TransformConfig,
) -> Result<Frame, TransformError> {
    transform(frame, cfg)
}

pub fn assert_schema_compatible(
    expected_version: u32,
    expected_fingerprint: &str,
    actual: &TransformSchema,
) -> Result<(), TransformError> {
    if expected_version != actual.version {
        return Err(TransformError::SchemaVersionMismatch {
            expected: expected_version,
            actual: actual.version,
        });
    }

    if expected_fingerprint != actual.fingerprint {
        return Err(TransformError::SchemaFingerprintMismatch {
            expected: expected_fingerprint.to_string(),
            actual: actual.fingerprint.clone(),
        });
    }

    Ok(())
}

pub fn column_diff(left: &[String], right: &[String]) -> ColumnDiff {
    let left_set: HashSet<&str> = left.iter().map(String::as_str).collect();
    let right_set: HashSet<&str> = right.iter().map(String::as_str).collect();

    ColumnDiff {
        only_left: left
            .iter()
            .filter(|column| !right_set.contains(column.as_str()))
            .cloned()
            .collect(),
        only_right: right
            .iter()
            .filter(|column| !left_set.contains(column.as_str()))
            .cloned()
            .collect(),
    }
}

fn calendar_fields(date: NaiveDate) -> (f64, f64) {
    let month = date.month();
    let quarter = (month - 1) / 3 + 1;
    (f64::from(month), f64::from(quarter))
}

fn validate_config(cfg: &TransformConfig) -> Result<(), TransformError> {
    if cfg.schema_version != TRANSFORM_SCHEMA_VERSION {
        return Err(TransformError::InvalidConfig(format!(
            "schema_version must equal TRANSFORM_SCHEMA_VERSION ({TRANSFORM_SCHEMA_VERSION})"
        )));
    }

    if cfg.lags.is_empty() {
        return Err(TransformError::InvalidConfig(
            "lags must not be empty".to_string(),
        ));
    }
    let mut seen_lags = HashSet::new();
    for lag in &cfg.lags {
        if *lag == 0 {
            return Err(TransformError::InvalidConfig(
                "lags entries must be > 0".to_string(),
            ));
        }
        if !seen_lags.insert(*lag) {
            return Err(TransformError::InvalidConfig(
                "lags entries must be unique".to_string(),
            ));
        }
    }

    if cfg.base_columns.is_empty() {
        return Err(TransformError::InvalidConfig(
            "base_columns must not be empty".to_string(),
        ));
    }
    let mut seen_columns = HashSet::new();
    for column in &cfg.base_columns {
        if !seen_columns.insert(column.as_str()) {
            return Err(TransformError::InvalidConfig(format!(
                "base column {column} listed twice"
            )));
        }
    }

    Ok(())
}

fn schema_fingerprint(cfg: &TransformConfig, columns: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("version:{};", cfg.schema_version));
    hasher.update("lags:");
    for lag in &cfg.lags {
        hasher.update(format!("{lag},"));
    }
    hasher.update(";base:");
    for base in &cfg.base_columns {
        hasher.update(base.as_bytes());
        hasher.update(",");
    }
    hasher.update(";columns:");
    for column in columns {
        hasher.update(column.as_bytes());
        hasher.update(":f64;");
    }
    hex::encode(hasher.finalize())
}
