use serde_json::Value;

use super::columns::ColumnIndex;
use super::grouping::GroupingPolicy;
use super::{
    FixedLabel, Labels, Observation, RowError, TargetAccount, CHARGE_TYPE, CONVERTED_CURRENCY,
    COST_COLUMN, COST_USD_COLUMN, CURRENCY_COLUMN,
};

/// Cost of a row left to the minor cost bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct MinorCost {
    pub converted: f64,
    pub local: f64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    /// Converted then local currency observation.
    Emit(Observation, Observation),
    Deferred(MinorCost),
}

pub fn project(
    row: &[Value],
    columns: &ColumnIndex,
    policy: &GroupingPolicy,
    target: &TargetAccount,
) -> Result<RowOutcome, RowError> {
    let converted = cost_value(columns, row, COST_USD_COLUMN)?;
    let local = cost_value(columns, row, COST_COLUMN)?;
    let currency = currency_value(columns, row)?;

    if !policy.enabled {
        let (converted, local) =
            observation_pair(target, &Labels::new(), converted, local, &currency);
        return Ok(RowOutcome::Emit(converted, local));
    }

    let group_labels: Labels = policy
        .groups()
        .iter()
        .filter(|group| columns.contains(&group.name))
        .map(|group| {
            let value = columns.cell(row, &group.name)?;
            Ok((group.label_name.clone(), label_value(value)))
        })
        .collect::<Result<_, RowError>>()?;

    // Only the converted cost decides whether a row is minor.
    if let Some(merge) = policy.merge() {
        if converted < merge.threshold {
            return Ok(RowOutcome::Deferred(MinorCost {
                converted,
                local,
                currency,
            }));
        }
    }

    let (converted, local) =
        observation_pair(target, &group_labels, converted, local, &currency);
    Ok(RowOutcome::Emit(converted, local))
}

/// Builds the converted and local currency observations sharing every label but `Currency`.
pub fn observation_pair(
    target: &TargetAccount,
    group_labels: &Labels,
    converted: f64,
    local: f64,
    local_currency: &str,
) -> (Observation, Observation) {
    let mut labels = target.labels().clone();
    labels.extend(group_labels.iter().map(|(k, v)| (k.clone(), v.clone())));
    labels.insert(
        FixedLabel::ChargeType.as_ref().to_string(),
        CHARGE_TYPE.to_string(),
    );

    let with_currency = |currency: &str, value: f64| {
        let mut labels = labels.clone();
        labels.insert(FixedLabel::Currency.as_ref().to_string(), currency.to_string());
        Observation { labels, value }
    };
    (
        with_currency(CONVERTED_CURRENCY, converted),
        with_currency(local_currency, local),
    )
}

fn cost_value(columns: &ColumnIndex, row: &[Value], name: &str) -> Result<f64, RowError> {
    let value = columns.cell(row, name)?;
    let cost = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    cost.filter(|cost| cost.is_finite())
        .ok_or_else(|| RowError::InvalidValue {
            column: name.to_string(),
            value: value.clone(),
        })
}

fn currency_value(columns: &ColumnIndex, row: &[Value]) -> Result<String, RowError> {
    match columns.cell(row, CURRENCY_COLUMN)? {
        Value::String(currency) => Ok(currency.clone()),
        other => Err(RowError::InvalidValue {
            column: CURRENCY_COLUMN.to_string(),
            value: other.clone(),
        }),
    }
}

fn label_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
