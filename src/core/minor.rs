use super::grouping::GroupingPolicy;
use super::projector::{observation_pair, MinorCost};
use super::{Labels, Observation, TargetAccount};

/// Sums the minor costs of one fetch cycle into a single bucket.
///
/// All minor rows of a cycle are assumed to share one local currency; the
/// bucket is tagged with the currency of the last row added.
#[derive(Debug, Default)]
pub struct MinorCostAggregator {
    converted: f64,
    local: f64,
    currency: Option<String>,
    rows: usize,
}

impl MinorCostAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, cost: MinorCost) {
        self.converted += cost.converted;
        self.local += cost.local;
        self.currency = Some(cost.currency);
        self.rows += 1;
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Consumes the bucket into the merged observation pair, if anything was merged.
    ///
    /// Every configured group label carries the merge tag value, including groups
    /// whose dimension was absent from the query result.
    pub fn finish(
        self,
        target: &TargetAccount,
        policy: &GroupingPolicy,
    ) -> Option<(Observation, Observation)> {
        if self.converted <= 0.0 {
            return None;
        }
        let currency = self.currency?;
        let rule = policy.merge()?;
        let group_labels: Labels = policy
            .label_names()
            .map(|label| (label.to_string(), rule.tag_value.to_string()))
            .collect();
        Some(observation_pair(
            target,
            &group_labels,
            self.converted,
            self.local,
            &currency,
        ))
    }
}
