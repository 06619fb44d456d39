use std::time::Duration;

use chrono::NaiveDate;
use log::debug;
use reqwest::blocking::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::grouping::GroupingPolicy;
use crate::core::QueryResult;
use crate::VERSION;

static API_VERSION: &str = "2023-03-01";
static QUERY_TYPE: &str = "ActualCost";
static HTTP_TIMEOUT_SECS: u64 = 300;

pub static DEFAULT_ENDPOINT: &str = "https://management.azure.com";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("cost query request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("cost query answered with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("cannot decode cost query response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Source of daily cost rows for one subscription over `[start, end)`.
pub trait CostQuery {
    fn query(
        &self,
        subscription: &str,
        grouping: &GroupingPolicy,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<QueryResult, TransportError>;
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
struct QueryDefinition<'a> {
    #[serde(rename = "type")]
    query_type: &'a str,
    timeframe: &'a str,
    time_period: TimePeriod,
    dataset: Dataset<'a>,
}

#[derive(Serialize, Debug, PartialEq)]
struct TimePeriod {
    from: String,
    to: String,
}

#[derive(Serialize, Debug, PartialEq)]
struct Dataset<'a> {
    granularity: &'a str,
    aggregation: Aggregations<'a>,
    grouping: Vec<Grouping<'a>>,
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
struct Aggregations<'a> {
    total_cost: Aggregation<'a>,
    #[serde(rename = "totalCostUSD")]
    total_cost_usd: Aggregation<'a>,
}

#[derive(Serialize, Debug, PartialEq)]
struct Aggregation<'a> {
    name: &'a str,
    function: &'a str,
}

#[derive(Serialize, Debug, PartialEq)]
struct Grouping<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    name: &'a str,
}

#[derive(Deserialize, Debug, Default)]
struct QueryResponse {
    #[serde(default)]
    properties: Option<QueryResult>,
}

impl<'a> QueryDefinition<'a> {
    fn new(grouping: &'a GroupingPolicy, start: NaiveDate, end: NaiveDate) -> Self {
        QueryDefinition {
            query_type: QUERY_TYPE,
            timeframe: "Custom",
            time_period: TimePeriod {
                from: midnight_utc(start),
                to: midnight_utc(end),
            },
            dataset: Dataset {
                granularity: "Daily",
                aggregation: Aggregations {
                    total_cost: Aggregation {
                        name: "Cost",
                        function: "Sum",
                    },
                    total_cost_usd: Aggregation {
                        name: "CostUSD",
                        function: "Sum",
                    },
                },
                grouping: grouping
                    .groups()
                    .iter()
                    .map(|group| Grouping {
                        kind: &group.kind,
                        name: &group.name,
                    })
                    .collect(),
            },
        }
    }
}

fn midnight_utc(date: NaiveDate) -> String {
    date.format("%Y-%m-%dT00:00:00+00:00").to_string()
}

/// Cost Management query API client.
pub struct AzureCostClient {
    client: Client,
    endpoint: String,
    token: SecretString,
}

impl AzureCostClient {
    pub fn new(endpoint: &str, token: SecretString) -> Result<AzureCostClient, TransportError> {
        let client = Client::builder()
            .user_agent(format!("azure-cost-exporter/{VERSION}"))
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(AzureCostClient {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn query_url(&self, subscription: &str) -> String {
        format!(
            "{}/subscriptions/{subscription}/providers/Microsoft.CostManagement/query?api-version={API_VERSION}",
            self.endpoint
        )
    }
}

impl CostQuery for AzureCostClient {
    fn query(
        &self,
        subscription: &str,
        grouping: &GroupingPolicy,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<QueryResult, TransportError> {
        let definition = QueryDefinition::new(grouping, start, end);
        debug!("performing query {definition:?}");
        let response = self
            .client
            .post(self.query_url(subscription))
            .bearer_auth(self.token.expose_secret())
            .json(&definition)
            .send()?;
        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let result = decode_response(&body)?;
        debug!("got result {result:?}");
        Ok(result)
    }
}

fn decode_response(body: &str) -> Result<QueryResult, TransportError> {
    if body.trim().is_empty() {
        return Ok(QueryResult::default());
    }
    let response: QueryResponse = serde_json::from_str(body)?;
    Ok(response.properties.unwrap_or_default())
}
