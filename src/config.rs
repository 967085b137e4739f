//! Process configuration, read once at entry and passed down by reference.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::indicators::{
    default_indicator_specs, validate_indicator_specs, IndicatorError, IndicatorSpec,
    ValidatedIndicator,
};

pub const ENV_FRED_API_KEY: &str = "FRED_API_KEY";
pub const ENV_WAREHOUSE_USER: &str = "WAREHOUSE_USER";
pub const ENV_WAREHOUSE_PASSWORD: &str = "WAREHOUSE_PASSWORD";
pub const ENV_WAREHOUSE_ACCOUNT: &str = "WAREHOUSE_ACCOUNT";
pub const ENV_WAREHOUSE_NAME: &str = "WAREHOUSE_NAME";
pub const ENV_WAREHOUSE_DATABASE: &str = "WAREHOUSE_DATABASE";
pub const ENV_WAREHOUSE_SCHEMA: &str = "WAREHOUSE_SCHEMA";
pub const ENV_WAREHOUSE_ROOT: &str = "WAREHOUSE_ROOT";
pub const ENV_TRACKING_URI: &str = "TRACKING_URI";
pub const ENV_EXPERIMENT: &str = "FREDPIPE_EXPERIMENT";
pub const ENV_WINDOW_DAYS: &str = "FREDPIPE_WINDOW_DAYS";

pub const DEFAULT_WAREHOUSE_ROOT: &str = "data/warehouse";
pub const DEFAULT_TRACKING_URI: &str = "file:data/tracking";
pub const DEFAULT_EXPERIMENT: &str = "FRED_ML_PROJECT";
pub const DEFAULT_WINDOW_DAYS: u32 = 365 * 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required configuration: {name}")]
    Missing { name: &'static str },
    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
    #[error("invalid indicator mapping: {0}")]
    Indicators(#[from] IndicatorError),
}

#[derive(Clone, PartialEq, Eq)]
pub struct WarehouseConfig {
    pub root: PathBuf,
    pub user: String,
    pub password: String,
    pub account: String,
    pub warehouse: String,
    pub database: String,
    pub schema: String,
}

impl fmt::Debug for WarehouseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarehouseConfig")
            .field("root", &self.root)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("account", &self.account)
            .field("warehouse", &self.warehouse)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .finish()
    }
}

impl WarehouseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let user = required(&lookup, ENV_WAREHOUSE_USER)?;
        let password = required(&lookup, ENV_WAREHOUSE_PASSWORD)?;
        let account = required(&lookup, ENV_WAREHOUSE_ACCOUNT)?;
        let warehouse = required(&lookup, ENV_WAREHOUSE_NAME)?;
        let database = required(&lookup, ENV_WAREHOUSE_DATABASE)?;
        let schema = required(&lookup, ENV_WAREHOUSE_SCHEMA)?;

        for (name, value) in [
            (ENV_WAREHOUSE_ACCOUNT, &account),
            (ENV_WAREHOUSE_NAME, &warehouse),
            (ENV_WAREHOUSE_DATABASE, &database),
            (ENV_WAREHOUSE_SCHEMA, &schema),
        ] {
            validate_path_segment(name, value)?;
        }

        let root = optional(&lookup, ENV_WAREHOUSE_ROOT)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_WAREHOUSE_ROOT));

        Ok(Self {
            root,
            user,
            password,
            account,
            warehouse,
            database,
            schema,
        })
    }

    /// `<root>/<account>/<warehouse>/<database>/<schema>.sqlite`
    pub fn store_path(&self) -> PathBuf {
        self.root
            .join(&self.account)
            .join(&self.warehouse)
            .join(&self.database)
            .join(format!("{}.sqlite", self.schema))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingConfig {
    pub uri: String,
    pub root: PathBuf,
    pub experiment: String,
}

impl TrackingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let uri = optional(&lookup, ENV_TRACKING_URI)
            .unwrap_or_else(|| DEFAULT_TRACKING_URI.to_string());
        let root = tracking_root_from_uri(&uri)?;
        let experiment =
            optional(&lookup, ENV_EXPERIMENT).unwrap_or_else(|| DEFAULT_EXPERIMENT.to_string());
        validate_path_segment(ENV_EXPERIMENT, &experiment)?;

        Ok(Self {
            uri,
            root,
            experiment,
        })
    }

    pub fn with_root(root: impl AsRef<Path>, experiment: impl Into<String>) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            uri: format!("file:{}", root.display()),
            root,
            experiment: experiment.into(),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub fred_api_key: String,
    pub warehouse: WarehouseConfig,
    pub tracking: TrackingConfig,
    pub indicators: Vec<ValidatedIndicator>,
    pub window_days: u32,
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("fred_api_key", &"<redacted>")
            .field("warehouse", &self.warehouse)
            .field("tracking", &self.tracking)
            .field("indicators", &self.indicators)
            .field("window_days", &self.window_days)
            .finish()
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Every required item is checked here, before any client is built.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::from_lookup_with_indicators(lookup, &default_indicator_specs())
    }

    pub fn from_lookup_with_indicators<F>(
        lookup: F,
        specs: &[IndicatorSpec],
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let fred_api_key = required(&lookup, ENV_FRED_API_KEY)?;
        let warehouse = WarehouseConfig::from_lookup(&lookup)?;
        let tracking = TrackingConfig::from_lookup(&lookup)?;
        let indicators = validate_indicator_specs(specs)?;

        let window_days = match optional(&lookup, ENV_WINDOW_DAYS) {
            Some(raw) => raw
                .parse::<u32>()
                .ok()
                .filter(|days| *days > 0)
                .ok_or_else(|| ConfigError::InvalidValue {
                    name: ENV_WINDOW_DAYS,
                    reason: format!("expected a positive day count, got {raw:?}"),
                })?,
            None => DEFAULT_WINDOW_DAYS,
        };

        Ok(Self {
            fred_api_key,
            warehouse,
            tracking,
            indicators,
            window_days,
        })
    }
}

/// What the forecast dashboard reads: the warehouse and the tracking store.
/// It never calls FRED, so no API key is required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardConfig {
    pub warehouse: WarehouseConfig,
    pub tracking: TrackingConfig,
}

impl DashboardConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            warehouse: WarehouseConfig::from_lookup(&lookup)?,
            tracking: TrackingConfig::from_lookup(&lookup)?,
        })
    }
}

fn required<F>(lookup: &F, name: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    optional(lookup, name).ok_or(ConfigError::Missing { name })
}

fn optional<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn validate_path_segment(name: &'static str, value: &str) -> Result<(), ConfigError> {
    let bad = value == "."
        || value == ".."
        || value
            .chars()
            .any(|c| matches!(c, '/' | '\\' | ':') || c.is_control());
    if bad {
        return Err(ConfigError::InvalidValue {
            name,
            reason: format!("{value:?} is not a plain identifier"),
        });
    }
    Ok(())
}

fn tracking_root_from_uri(uri: &str) -> Result<PathBuf, ConfigError> {
    if let Some(rest) = uri.strip_prefix("file://") {
        if rest.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: ENV_TRACKING_URI,
                reason: "file URI has no path".to_string(),
            });
        }
        return Ok(PathBuf::from(rest));
    }
    if let Some(rest) = uri.strip_prefix("file:") {
        if rest.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: ENV_TRACKING_URI,
                reason: "file URI has no path".to_string(),
            });
        }
        return Ok(PathBuf::from(rest));
    }
    if let Some((scheme, _)) = uri.split_once("://") {
        return Err(ConfigError::InvalidValue {
            name: ENV_TRACKING_URI,
            reason: format!("unsupported tracking scheme {scheme:?}; use a file: URI or path"),
        });
    }
    Ok(PathBuf::from(uri))
}
