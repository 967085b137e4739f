//! Indicator catalogue: the fixed feature-table columns and the explicit
//! source-code to column mapping that feeds them.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const INDICATOR_COUNT: usize = 4;

/// Numeric indicator columns of `FEATURE_STORE`, in table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IndicatorColumn {
    UnemploymentRate,
    Cpi,
    InterestRate,
    Gdp,
}

pub const ALL_INDICATOR_COLUMNS: [IndicatorColumn; INDICATOR_COUNT] = [
    IndicatorColumn::UnemploymentRate,
    IndicatorColumn::Cpi,
    IndicatorColumn::InterestRate,
    IndicatorColumn::Gdp,
];

impl IndicatorColumn {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnemploymentRate => "unemployment_rate",
            Self::Cpi => "cpi",
            Self::InterestRate => "interest_rate",
            Self::Gdp => "gdp",
        }
    }

    pub fn index(self) -> usize {
        match self {
            Self::UnemploymentRate => 0,
            Self::Cpi => 1,
            Self::InterestRate => 2,
            Self::Gdp => 3,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        ALL_INDICATOR_COLUMNS
            .into_iter()
            .find(|column| column.as_str() == raw)
    }
}

/// One configured series: the code the source knows it by and the column it lands in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorSpec {
    pub source_code: String,
    pub canonical_name: String,
    pub human_name: String,
}

impl IndicatorSpec {
    pub fn new(
        source_code: impl Into<String>,
        canonical_name: impl Into<String>,
        human_name: impl Into<String>,
    ) -> Self {
        Self {
            source_code: source_code.into(),
            canonical_name: canonical_name.into(),
            human_name: human_name.into(),
        }
    }
}

/// A spec list that passed [`validate_indicator_specs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedIndicator {
    pub spec: IndicatorSpec,
    pub column: IndicatorColumn,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndicatorError {
    #[error("indicator list is empty")]
    Empty,
    #[error("indicator {source_code} maps to unknown feature column {canonical_name}")]
    UnknownColumn {
        source_code: String,
        canonical_name: String,
    },
    #[error("feature column {0} is mapped more than once")]
    DuplicateColumn(String),
    #[error("source code {0} is listed more than once")]
    DuplicateSourceCode(String),
    #[error("feature columns without an indicator: {0:?}")]
    UncoveredColumns(Vec<String>),
}

pub fn default_indicator_specs() -> Vec<IndicatorSpec> {
    vec![
        IndicatorSpec::new("UNRATE", "unemployment_rate", "Unemployment Rate"),
        IndicatorSpec::new("CPIAUCSL", "cpi", "Consumer Price Index"),
        IndicatorSpec::new("FEDFUNDS", "interest_rate", "Federal Funds Rate"),
        IndicatorSpec::new("GDPC1", "gdp", "Real GDP (chained 2012 dollars)"),
    ]
}

/// Checks the mapping against the fixed `FEATURE_STORE` schema. Inner-joined
/// rows must populate every column, so each column needs exactly one indicator.
pub fn validate_indicator_specs(
    specs: &[IndicatorSpec],
) -> Result<Vec<ValidatedIndicator>, IndicatorError> {
    if specs.is_empty() {
        return Err(IndicatorError::Empty);
    }

    let mut seen_columns = HashSet::new();
    let mut seen_codes = HashSet::new();
    let mut validated = Vec::with_capacity(specs.len());

    for spec in specs {
        let column = IndicatorColumn::parse(&spec.canonical_name).ok_or_else(|| {
            IndicatorError::UnknownColumn {
                source_code: spec.source_code.clone(),
                canonical_name: spec.canonical_name.clone(),
            }
        })?;
        if !seen_columns.insert(column) {
            return Err(IndicatorError::DuplicateColumn(
                spec.canonical_name.clone(),
            ));
        }
        if !seen_codes.insert(spec.source_code.as_str()) {
            return Err(IndicatorError::DuplicateSourceCode(
                spec.source_code.clone(),
            ));
        }
        validated.push(ValidatedIndicator {
            spec: spec.clone(),
            column,
        });
    }

    let uncovered: Vec<String> = ALL_INDICATOR_COLUMNS
        .iter()
        .filter(|column| !seen_columns.contains(*column))
        .map(|column| column.as_str().to_string())
        .collect();
    if !uncovered.is_empty() {
        return Err(IndicatorError::UncoveredColumns(uncovered));
    }

    Ok(validated)
}
