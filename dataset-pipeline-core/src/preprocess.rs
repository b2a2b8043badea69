use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::table::Table;

/// Cleaning configuration: which columns are removed before the missing-row
/// pass and which categorical columns get integer codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanConfig {
    #[serde(default = "default_drop_columns")]
    pub drop_columns: Vec<String>,
    #[serde(default = "default_categorical_columns")]
    pub categorical_columns: Vec<String>,
}

fn default_drop_columns() -> Vec<String> {
    vec!["session_id".to_string()]
}

fn default_categorical_columns() -> Vec<String> {
    ["protocol_type", "encryption_used", "browser_type"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for CleanConfig {
    fn default() -> Self {
        Self {
            drop_columns: default_drop_columns(),
            categorical_columns: default_categorical_columns(),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CleanError {
    #[error("value '{value}' was not seen when the encoder was fitted")]
    UnseenLabel { value: String },
    #[error("code {0} is out of range for the fitted classes")]
    UnknownCode(usize),
}

/// Maps each distinct label to its index in the sorted set of labels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelEncoder {
    classes: Vec<String>,
}

impl LabelEncoder {
    pub fn fit<'a, I>(values: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let classes: BTreeSet<&str> = values.into_iter().collect();
        Self {
            classes: classes.into_iter().map(str::to_owned).collect(),
        }
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn transform(&self, value: &str) -> Result<usize, CleanError> {
        self.classes
            .binary_search_by(|c| c.as_str().cmp(value))
            .map_err(|_| CleanError::UnseenLabel {
                value: value.to_owned(),
            })
    }

    pub fn inverse_transform(&self, code: usize) -> Result<&str, CleanError> {
        self.classes
            .get(code)
            .map(String::as_str)
            .ok_or(CleanError::UnknownCode(code))
    }
}

#[derive(Debug, Clone, Default)]
pub struct CleanReport {
    pub rows_dropped: usize,
    pub columns_dropped: Vec<String>,
    pub encoders: BTreeMap<String, LabelEncoder>,
}

/// Removes every row holding at least one missing cell.
pub fn drop_missing(table: &mut Table) -> usize {
    let before = table.rows.len();
    table.rows.retain(|row| row.iter().all(Option::is_some));
    let dropped = before - table.rows.len();
    debug!(before, dropped, "Dropped rows with missing values");
    dropped
}

/// Drops configured columns, then incomplete rows, then label-encodes the
/// categorical columns in place.
pub fn clean(table: &mut Table, config: &CleanConfig) -> Result<CleanReport, CleanError> {
    info!(rows = table.len(), "Starting data cleaning");
    let mut report = CleanReport::default();

    for column in &config.drop_columns {
        if table.drop_column(column) {
            info!(column = %column, "Dropped column");
            report.columns_dropped.push(column.clone());
        } else {
            debug!(column = %column, "Column to drop not present, skipping");
        }
    }

    report.rows_dropped = drop_missing(table);
    info!(rows_dropped = report.rows_dropped, "Removed rows with missing values");

    for column in &config.categorical_columns {
        let Some(values) = table.column_values(column) else {
            warn!(column = %column, "Categorical column not present, skipping encoding");
            continue;
        };
        let encoder = LabelEncoder::fit(values.into_iter().flatten());
        table.map_column(column, |v| encoder.transform(v).map(|code| code.to_string()))?;
        info!(
            column = %column,
            classes = encoder.classes().len(),
            "Encoded categorical column"
        );
        report.encoders.insert(column.clone(), encoder);
    }

    info!(rows = table.len(), "Data cleaning completed");
    Ok(report)
}
