use serde::{Deserialize, Serialize};

/// A query grouping dimension exposed as a metric label.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GroupSpec {
    /// Azure grouping type, usually `Dimension` or `TagKey`.
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub label_name: String,
}

/// Merge settings as configured. `threshold` and `tag_value` are only
/// mandatory once merging is enabled.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct MinorCostMerge {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub tag_value: Option<String>,
}

impl MinorCostMerge {
    pub fn new(threshold: f64, tag_value: &str) -> Self {
        MinorCostMerge {
            enabled: true,
            threshold: Some(threshold),
            tag_value: Some(tag_value.to_string()),
        }
    }
}

/// Effective merge rule: rows whose converted cost is below `threshold` are
/// merged under `tag_value`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeRule<'a> {
    pub threshold: f64,
    pub tag_value: &'a str,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct GroupingPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub groups: Vec<GroupSpec>,
    #[serde(default)]
    pub merge_minor_cost: MinorCostMerge,
}

impl GroupingPolicy {
    pub fn disabled() -> Self {
        GroupingPolicy::default()
    }

    /// Group specs in effect, empty when grouping is disabled.
    pub fn groups(&self) -> &[GroupSpec] {
        match self.enabled {
            true => &self.groups,
            false => &[],
        }
    }

    /// Merge rule in effect. Merge settings mean nothing without grouping.
    pub fn merge(&self) -> Option<MergeRule<'_>> {
        if !(self.enabled && self.merge_minor_cost.enabled) {
            return None;
        }
        Some(MergeRule {
            threshold: self.merge_minor_cost.threshold?,
            tag_value: self.merge_minor_cost.tag_value.as_deref()?,
        })
    }

    pub fn label_names(&self) -> impl Iterator<Item = &str> {
        self.groups().iter().map(|group| group.label_name.as_str())
    }
}
