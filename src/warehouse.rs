//! Warehouse access: schema management, feature-row upserts and reads, and
//! model-result records, backed by a per-schema SQLite file.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::WarehouseConfig;
use crate::indicators::{IndicatorColumn, ALL_INDICATOR_COLUMNS, INDICATOR_COUNT};

pub const FEATURE_TABLE: &str = "FEATURE_STORE";
pub const MODEL_RESULTS_TABLE: &str = "MODEL_RESULTS";
const ACCESS_TABLE: &str = "WAREHOUSE_ACCESS";
const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("cannot reach warehouse at {path}: {message}")]
    Connect { path: PathBuf, message: String },
    #[error("warehouse rejected credentials for user {user}")]
    AuthFailed { user: String },
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt {column} value {value:?} in {table}")]
    CorruptValue {
        table: &'static str,
        column: &'static str,
        value: String,
    },
    #[error("parameters are not valid JSON: {0}")]
    Parameters(#[from] serde_json::Error),
}

/// Indicator values of one feature row, indexed by [`IndicatorColumn`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct IndicatorValues {
    values: [f64; INDICATOR_COUNT],
}

impl IndicatorValues {
    pub fn new(unemployment_rate: f64, cpi: f64, interest_rate: f64, gdp: f64) -> Self {
        Self {
            values: [unemployment_rate, cpi, interest_rate, gdp],
        }
    }

    pub fn get(&self, column: IndicatorColumn) -> f64 {
        self.values[column.index()]
    }

    pub fn set(&mut self, column: IndicatorColumn, value: f64) {
        self.values[column.index()] = value;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRecord {
    pub id: String,
    pub date: NaiveDate,
    pub values: IndicatorValues,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpsertSummary {
    pub inserted: u64,
    pub updated: u64,
}

impl UpsertSummary {
    pub fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Updated => self.updated += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.inserted + self.updated
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResultRecord {
    pub run_id: String,
    pub model_version: String,
    pub metric_rmse: f64,
    pub training_ts_ms_utc: i64,
    pub parameters: serde_json::Value,
}

/// An open warehouse connection. Dropping it closes the connection, so every
/// operation that acquires one releases it on all exit paths.
pub struct Warehouse {
    conn: Connection,
    path: PathBuf,
}

impl Warehouse {
    pub fn connect(cfg: &WarehouseConfig) -> Result<Self, WarehouseError> {
        let path = cfg.store_path();
        let connect_err = |message: String| WarehouseError::Connect {
            path: path.clone(),
            message,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| connect_err(err.to_string()))?;
        }
        let conn = Connection::open(&path).map_err(|err| connect_err(err.to_string()))?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            ",
        )?;

        let warehouse = Self { conn, path };
        warehouse.authenticate(&cfg.user, &cfg.password)?;

        debug!(
            component = "warehouse",
            event = "warehouse.connect",
            path = %warehouse.path.display(),
            user = %cfg.user
        );
        Ok(warehouse)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// First connect for a user enrolls the password digest; later connects must match it.
    fn authenticate(&self, user: &str, password: &str) -> Result<(), WarehouseError> {
        self.conn.execute_batch(&format!(
            "
            CREATE TABLE IF NOT EXISTS {ACCESS_TABLE} (
                user TEXT PRIMARY KEY,
                password_sha256 TEXT NOT NULL
            );
            "
        ))?;

        let digest = password_digest(user, password);
        let stored: Option<String> = self
            .conn
            .query_row(
                &format!("SELECT password_sha256 FROM {ACCESS_TABLE} WHERE user = ?1"),
                params![user],
                |row| row.get(0),
            )
            .optional()?;

        match stored {
            Some(expected) if expected == digest => Ok(()),
            Some(_) => {
                warn!(
                    component = "warehouse",
                    event = "warehouse.auth.rejected",
                    user
                );
                Err(WarehouseError::AuthFailed {
                    user: user.to_string(),
                })
            }
            None => {
                self.conn.execute(
                    &format!(
                        "INSERT INTO {ACCESS_TABLE} (user, password_sha256) VALUES (?1, ?2)"
                    ),
                    params![user, digest],
                )?;
                info!(
                    component = "warehouse",
                    event = "warehouse.auth.enrolled",
                    user
                );
                Ok(())
            }
        }
    }

    pub fn ensure_schema(&self) -> Result<(), WarehouseError> {
        let feature_existed = self.table_exists(FEATURE_TABLE)?;
        let results_existed = self.table_exists(MODEL_RESULTS_TABLE)?;

        self.conn.execute_batch(&format!(
            "
            CREATE TABLE IF NOT EXISTS {FEATURE_TABLE} (
                id TEXT PRIMARY KEY,
                date TEXT NOT NULL,
                unemployment_rate REAL,
                cpi REAL,
                interest_rate REAL,
                gdp REAL
            );
            CREATE TABLE IF NOT EXISTS {MODEL_RESULTS_TABLE} (
                run_id TEXT PRIMARY KEY,
                model_version TEXT NOT NULL,
                metric_rmse REAL NOT NULL,
                training_date TEXT NOT NULL,
                parameters TEXT NOT NULL
            );
            "
        ))?;

        info!(
            component = "warehouse",
            event = "warehouse.schema.ensured",
            feature_table_created = !feature_existed,
            model_results_table_created = !results_existed
        );
        Ok(())
    }

    pub fn table_exists(&self, table: &str) -> Result<bool, WarehouseError> {
        let exists = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1 LIMIT 1",
                params![table],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .is_some();
        Ok(exists)
    }

    /// Merge-by-key: an existing `id` gets its indicator fields overwritten,
    /// an unknown `id` is inserted. One transaction per row.
    pub fn upsert_feature_row(
        &mut self,
        row: &FeatureRecord,
    ) -> Result<UpsertOutcome, WarehouseError> {
        let tx = self.conn.transaction()?;
        let existed = tx
            .query_row(
                &format!("SELECT 1 FROM {FEATURE_TABLE} WHERE id = ?1"),
                params![row.id],
                |r| r.get::<_, i64>(0),
            )
            .optional()?
            .is_some();

        tx.execute(
            &format!(
                "
                INSERT INTO {FEATURE_TABLE} (
                    id,
                    date,
                    unemployment_rate,
                    cpi,
                    interest_rate,
                    gdp
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(id) DO UPDATE SET
                    unemployment_rate = excluded.unemployment_rate,
                    cpi = excluded.cpi,
                    interest_rate = excluded.interest_rate,
                    gdp = excluded.gdp
                "
            ),
            params![
                row.id,
                row.date.format(DATE_FORMAT).to_string(),
                row.values.get(IndicatorColumn::UnemploymentRate),
                row.values.get(IndicatorColumn::Cpi),
                row.values.get(IndicatorColumn::InterestRate),
                row.values.get(IndicatorColumn::Gdp),
            ],
        )?;
        tx.commit()?;

        let outcome = if existed {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        };
        debug!(
            component = "warehouse",
            event = "warehouse.upsert.row",
            id = %row.id,
            outcome = ?outcome
        );
        Ok(outcome)
    }

    /// Issues rows one at a time; rows committed before a failure stay committed.
    pub fn upsert_feature_rows(
        &mut self,
        rows: &[FeatureRecord],
    ) -> Result<UpsertSummary, WarehouseError> {
        let mut summary = UpsertSummary::default();
        for row in rows {
            summary.record(self.upsert_feature_row(row)?);
        }
        Ok(summary)
    }

    pub fn feature_row(&self, id: &str) -> Result<Option<FeatureRecord>, WarehouseError> {
        let raw = self
            .conn
            .query_row(
                &format!(
                    "SELECT id, date, unemployment_rate, cpi, interest_rate, gdp
                     FROM {FEATURE_TABLE} WHERE id = ?1"
                ),
                params![id],
                raw_feature_row,
            )
            .optional()?;
        match raw {
            Some(raw) => raw.into_record(),
            None => Ok(None),
        }
    }

    /// All complete feature rows in ascending date order. Rows with a NULL
    /// indicator are skipped.
    pub fn load_feature_rows(&self) -> Result<Vec<FeatureRecord>, WarehouseError> {
        let mut stmt = self.conn.prepare(&format!(
            "
            SELECT id, date, unemployment_rate, cpi, interest_rate, gdp
            FROM {FEATURE_TABLE}
            ORDER BY date ASC, id ASC
            "
        ))?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        let mut skipped: u64 = 0;

        while let Some(row) = rows.next()? {
            match raw_feature_row(row)?.into_record()? {
                Some(record) => out.push(record),
                None => skipped += 1,
            }
        }

        if skipped > 0 {
            warn!(
                component = "warehouse",
                event = "warehouse.features.incomplete_rows_skipped",
                skipped
            );
        }
        debug!(
            component = "warehouse",
            event = "warehouse.features.loaded",
            rows = out.len()
        );
        Ok(out)
    }

    pub fn count_feature_rows(&self) -> Result<u64, WarehouseError> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {FEATURE_TABLE}"),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn insert_model_result(&self, record: &ModelResultRecord) -> Result<(), WarehouseError> {
        let training_date = format_timestamp(record.training_ts_ms_utc)?;
        let parameters = serde_json::to_string(&record.parameters)?;
        self.conn.execute(
            &format!(
                "
                INSERT INTO {MODEL_RESULTS_TABLE} (
                    run_id,
                    model_version,
                    metric_rmse,
                    training_date,
                    parameters
                ) VALUES (?1, ?2, ?3, ?4, ?5)
                "
            ),
            params![
                record.run_id,
                record.model_version,
                record.metric_rmse,
                training_date,
                parameters
            ],
        )?;
        info!(
            component = "warehouse",
            event = "warehouse.model_result.inserted",
            run_id = %record.run_id,
            model_version = %record.model_version,
            metric_rmse = record.metric_rmse
        );
        Ok(())
    }

    pub fn model_results(&self) -> Result<Vec<ModelResultRecord>, WarehouseError> {
        let mut stmt = self.conn.prepare(&format!(
            "
            SELECT run_id, model_version, metric_rmse, training_date, parameters
            FROM {MODEL_RESULTS_TABLE}
            ORDER BY training_date ASC, run_id ASC
            "
        ))?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();

        while let Some(row) = rows.next()? {
            let training_date: String = row.get(3)?;
            let parameters: String = row.get(4)?;
            out.push(ModelResultRecord {
                run_id: row.get(0)?,
                model_version: row.get(1)?,
                metric_rmse: row.get(2)?,
                training_ts_ms_utc: parse_timestamp(&training_date)?,
                parameters: serde_json::from_str(&parameters)?,
            });
        }

        Ok(out)
    }
}

/// Opens a scoped connection, ensures both tables exist, and closes it.
pub fn ensure_schema(cfg: &WarehouseConfig) -> Result<(), WarehouseError> {
    let warehouse = Warehouse::connect(cfg)?;
    warehouse.ensure_schema()
}

struct RawFeatureRow {
    id: String,
    date: String,
    values: [Option<f64>; INDICATOR_COUNT],
}

impl RawFeatureRow {
    fn into_record(self) -> Result<Option<FeatureRecord>, WarehouseError> {
        let date = NaiveDate::parse_from_str(&self.date, DATE_FORMAT).map_err(|_| {
            WarehouseError::CorruptValue {
                table: FEATURE_TABLE,
                column: "date",
                value: self.date.clone(),
            }
        })?;

        let mut values = IndicatorValues::default();
        for column in ALL_INDICATOR_COLUMNS {
            match self.values[column.index()] {
                Some(value) => values.set(column, value),
                None => return Ok(None),
            }
        }

        Ok(Some(FeatureRecord {
            id: self.id,
            date,
            values,
        }))
    }
}

fn raw_feature_row(row: &Row<'_>) -> rusqlite::Result<RawFeatureRow> {
    Ok(RawFeatureRow {
        id: row.get(0)?,
        date: row.get(1)?,
        values: [row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?],
    })
}

fn password_digest(user: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn format_timestamp(ts_ms_utc: i64) -> Result<String, WarehouseError> {
    Utc.timestamp_millis_opt(ts_ms_utc)
        .single()
        .map(|dt| dt.format(TIMESTAMP_FORMAT).to_string())
        .ok_or_else(|| WarehouseError::CorruptValue {
            table: MODEL_RESULTS_TABLE,
            column: "training_date",
            value: ts_ms_utc.to_string(),
        })
}

fn parse_timestamp(raw: &str) -> Result<i64, WarehouseError> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map(|dt| dt.and_utc().timestamp_millis())
        .map_err(|_| WarehouseError::CorruptValue {
            table: MODEL_RESULTS_TABLE,
            column: "training_date",
            value: raw.to_string(),
        })
}
