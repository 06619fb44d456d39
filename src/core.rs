use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{AsRefStr, EnumIter};
use thiserror::Error;

pub mod columns;
pub mod grouping;
pub mod minor;
pub mod poll;
pub mod projector;

pub static CHARGE_TYPE: &str = "ActualCost";
// Azure reports the converted cost in the billing account currency, always exposed as USD.
pub static CONVERTED_CURRENCY: &str = "USD";

pub static SUBSCRIPTION_LABEL: &str = "Subscription";

pub static COST_COLUMN: &str = "Cost";
pub static COST_USD_COLUMN: &str = "CostUSD";
pub static CURRENCY_COLUMN: &str = "Currency";
pub static USAGE_DATE_COLUMN: &str = "UsageDate";

/// Label name to label value, kept ordered so merged label-sets are stable.
pub type Labels = BTreeMap<String, String>;

/// Labels set by the exporter itself on every observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, EnumIter)]
pub enum FixedLabel {
    ChargeType,
    Currency,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type", default)]
    pub column_type: String,
}

/// Tabular answer of a cost query. Every row is positionally aligned with `columns`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|column| column.name.as_str())
    }
}

/// Constant labels identifying the monitored account.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetAccount {
    labels: Labels,
}

impl TargetAccount {
    pub fn new(labels: Labels) -> Self {
        TargetAccount { labels }
    }

    pub fn subscription(&self) -> &str {
        self.labels
            .get(SUBSCRIPTION_LABEL)
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub labels: Labels,
    pub value: f64,
}

/// Failures that abort the processing of a single row.
#[derive(Debug, Error, PartialEq)]
pub enum RowError {
    #[error("column {0} is missing from the query result")]
    MissingColumn(String),
    #[error("column {column} holds an unexpected value: {value}")]
    InvalidValue { column: String, value: Value },
}

/// Destination of the resolved observations.
///
/// `set` overwrites whatever value was previously recorded for the exact same
/// label-set. Implementations are shared with the scrape path and must accept
/// concurrent calls.
pub trait MetricsSink {
    fn set(&self, labels: &Labels, value: f64);
}

impl<S: MetricsSink + ?Sized> MetricsSink for &S {
    fn set(&self, labels: &Labels, value: f64) {
        (**self).set(labels, value)
    }
}
