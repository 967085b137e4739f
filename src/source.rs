//! External indicator source: the fetch seam and the FRED HTTP client.

use std::time::Duration;

use chrono::NaiveDate;
use reqwest::blocking::Client;
use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

pub const FRED_OBSERVATIONS_URL: &str = "https://api.stlouisfed.org/fred/series/observations";
const FRED_DATE_FORMAT: &str = "%Y-%m-%d";
const FRED_MISSING_VALUE: &str = ".";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub date: NaiveDate,
    pub value: f64,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("transport error fetching {source_code}: {message}")]
    Transport {
        source_code: String,
        message: String,
    },
    #[error("source rejected {source_code} with status {status}: {message}")]
    Status {
        source_code: String,
        status: u16,
        message: String,
    },
    #[error("unexpected payload for {source_code}: {message}")]
    Payload {
        source_code: String,
        message: String,
    },
}

/// Anything that can return a date-ordered series for an indicator code.
pub trait SeriesSource {
    fn fetch_series(
        &self,
        source_code: &str,
        observation_start: NaiveDate,
    ) -> Result<Vec<Observation>, SourceError>;
}

impl<F> SeriesSource for F
where
    F: Fn(&str, NaiveDate) -> Result<Vec<Observation>, SourceError>,
{
    fn fetch_series(
        &self,
        source_code: &str,
        observation_start: NaiveDate,
    ) -> Result<Vec<Observation>, SourceError> {
        self(source_code, observation_start)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FredClientConfig {
    pub base_url: String,
    pub timeout_ms: u64,
}

impl Default for FredClientConfig {
    fn default() -> Self {
        Self {
            base_url: FRED_OBSERVATIONS_URL.to_string(),
            timeout_ms: 15_000,
        }
    }
}

pub struct FredClient {
    http: Client,
    api_key: String,
    cfg: FredClientConfig,
}

impl FredClient {
    pub fn new(api_key: impl Into<String>, cfg: FredClientConfig) -> Result<Self, SourceError> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|err| SourceError::Transport {
                source_code: "-".to_string(),
                message: err.to_string(),
            })?;

        Ok(Self {
            http,
            api_key: api_key.into(),
            cfg,
        })
    }

    fn observations_url(
        &self,
        source_code: &str,
        observation_start: NaiveDate,
    ) -> Result<Url, SourceError> {
        let start = observation_start.format(FRED_DATE_FORMAT).to_string();
        Url::parse_with_params(
            &self.cfg.base_url,
            &[
                ("series_id", source_code),
                ("api_key", self.api_key.as_str()),
                ("file_type", "json"),
                ("observation_start", start.as_str()),
            ],
        )
        .map_err(|err| SourceError::Transport {
            source_code: source_code.to_string(),
            message: format!("invalid base url {}: {err}", self.cfg.base_url),
        })
    }
}

impl SeriesSource for FredClient {
    fn fetch_series(
        &self,
        source_code: &str,
        observation_start: NaiveDate,
    ) -> Result<Vec<Observation>, SourceError> {
        let url = self.observations_url(source_code, observation_start)?;
        debug!(
            component = "source",
            event = "source.fetch.request",
            source_code,
            observation_start = %observation_start
        );

        let transport = |err: reqwest::Error| SourceError::Transport {
            source_code: source_code.to_string(),
            message: err.to_string(),
        };
        let response = self.http.get(url).send().map_err(transport)?;
        let status = response.status();
        let body = response.text().map_err(transport)?;

        if !status.is_success() {
            return Err(SourceError::Status {
                source_code: source_code.to_string(),
                status: status.as_u16(),
                message: fred_error_message(&body),
            });
        }

        let observations = parse_observations(source_code, &body)?;
        info!(
            component = "source",
            event = "source.fetch.finish",
            source_code,
            observations = observations.len()
        );
        Ok(observations)
    }
}

#[derive(Debug, Deserialize)]
struct ObservationsPayload {
    observations: Vec<RawObservation>,
}

#[derive(Debug, Deserialize)]
struct RawObservation {
    date: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    error_message: String,
}

/// Parses a FRED observations body. `"."` marks a date without a value and is
/// dropped, so such a date never reaches the join.
pub fn parse_observations(source_code: &str, body: &str) -> Result<Vec<Observation>, SourceError> {
    let payload_err = |message: String| SourceError::Payload {
        source_code: source_code.to_string(),
        message,
    };

    let payload: ObservationsPayload =
        serde_json::from_str(body).map_err(|err| payload_err(err.to_string()))?;

    let mut out = Vec::with_capacity(payload.observations.len());
    for raw in payload.observations {
        let date = NaiveDate::parse_from_str(&raw.date, FRED_DATE_FORMAT)
            .map_err(|err| payload_err(format!("bad date {:?}: {err}", raw.date)))?;
        let trimmed = raw.value.trim();
        if trimmed == FRED_MISSING_VALUE || trimmed.is_empty() {
            continue;
        }
        let value: f64 = trimmed
            .parse()
            .map_err(|err| payload_err(format!("bad value {:?} at {date}: {err}", raw.value)))?;
        if !value.is_finite() {
            continue;
        }
        out.push(Observation { date, value });
    }

    out.sort_by_key(|obs| obs.date);
    Ok(out)
}

fn fred_error_message(body: &str) -> String {
    serde_json::from_str::<ErrorPayload>(body)
        .map(|payload| payload.error_message)
        .unwrap_or_else(|_| body.chars().take(200).collect())
}
