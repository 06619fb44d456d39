use std::collections::HashMap;

use log::{error, warn};
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};

use crate::core::{Labels, MetricsSink};

pub static METRIC_NAME: &str = "azure_daily_cost";
pub static METRIC_HELP: &str = "Daily cost of an Azure account";
pub static CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Gauge vector behind the `/metrics` endpoint.
///
/// Cloning is cheap and every clone updates the same registry.
#[derive(Clone)]
pub struct PrometheusSink {
    registry: Registry,
    gauge: GaugeVec,
    schema: Vec<String>,
}

impl PrometheusSink {
    pub fn new(schema: Vec<String>) -> prometheus::Result<PrometheusSink> {
        let registry = Registry::new();
        let label_names: Vec<&str> = schema.iter().map(String::as_str).collect();
        let gauge = GaugeVec::new(Opts::new(METRIC_NAME, METRIC_HELP), &label_names)?;
        registry.register(Box::new(gauge.clone()))?;
        Ok(PrometheusSink {
            registry,
            gauge,
            schema,
        })
    }

    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::<u8>::new();
        let encoder = TextEncoder::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl MetricsSink for PrometheusSink {
    fn set(&self, labels: &Labels, value: f64) {
        if let Some(unknown) = labels.keys().find(|k| !self.schema.contains(k)) {
            warn!("dropping label {unknown} which is not part of the {METRIC_NAME} labels");
        }
        // Group dimensions absent from a result stay empty, which Prometheus reads as unset.
        let values: HashMap<&str, &str> = self
            .schema
            .iter()
            .map(|name| {
                let value = labels.get(name).map(String::as_str).unwrap_or_default();
                (name.as_str(), value)
            })
            .collect();
        match self.gauge.get_metric_with(&values) {
            Ok(gauge) => gauge.set(value),
            Err(e) => error!("cannot set {METRIC_NAME} for {labels:?}: {e}"),
        }
    }
}
