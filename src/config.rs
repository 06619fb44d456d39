use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use secrecy::{Secret, SecretString};
use serde::Deserialize;
use strum::IntoEnumIterator;
use thiserror::Error;

use crate::azure::DEFAULT_ENDPOINT;
use crate::core::grouping::GroupingPolicy;
use crate::core::{FixedLabel, Labels, TargetAccount, SUBSCRIPTION_LABEL};

pub static ACCESS_TOKEN_VAR: &str = "AZURE_ACCESS_TOKEN";

lazy_static! {
    // ${NAME} or ${NAME:-default}
    static ref ENV_REFERENCE: Regex =
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").unwrap();
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {0} does not exist")]
    NotFound(PathBuf),
    #[error("config file {0} is not a file")]
    NotAFile(PathBuf),
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("environment variable {0} referenced in config is not defined")]
    UndefinedVariable(String),
    #[error("target_azure_account should be present in configuration file")]
    EmptyTarget,
    #[error("Subscription is mandatory key in target_azure_account configuration item")]
    MissingSubscription,
    #[error("label {0} is defined more than once")]
    DuplicateLabel(String),
    #[error("group_by is enabled but no groups are configured")]
    EmptyGroups,
    #[error("merge_minor_cost is enabled but {0} is not set")]
    IncompleteMerge(&'static str),
    #[error("polling_interval_seconds must be greater than zero")]
    ZeroInterval,
    #[error("environment variable {0} must hold an Azure access token")]
    MissingAccessToken(&'static str),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub exporter_port: u16,
    pub polling_interval_seconds: u64,
    pub target_azure_account: Labels,
    #[serde(default)]
    pub group_by: GroupingPolicy,
    #[serde(default = "default_endpoint")]
    pub azure_management_endpoint: String,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        if !path.is_file() {
            return Err(ConfigError::NotAFile(path.to_path_buf()));
        }
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Config::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Config, ConfigError> {
        let expanded = expand_env(raw, |name| env::var(name).ok())?;
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.target_azure_account.is_empty() {
            return Err(ConfigError::EmptyTarget);
        }
        if !self.target_azure_account.contains_key(SUBSCRIPTION_LABEL) {
            return Err(ConfigError::MissingSubscription);
        }
        if self.polling_interval_seconds == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if self.group_by.enabled {
            if self.group_by.groups.is_empty() {
                return Err(ConfigError::EmptyGroups);
            }
            let merge = &self.group_by.merge_minor_cost;
            if merge.enabled {
                if merge.threshold.is_none() {
                    return Err(ConfigError::IncompleteMerge("threshold"));
                }
                if merge.tag_value.as_deref().map_or(true, |tag| tag.trim().is_empty()) {
                    return Err(ConfigError::IncompleteMerge("tag_value"));
                }
            }
        }
        let mut seen = HashSet::new();
        for label in self.label_schema() {
            if !seen.insert(label.clone()) {
                return Err(ConfigError::DuplicateLabel(label));
            }
        }
        Ok(())
    }

    pub fn target(&self) -> TargetAccount {
        TargetAccount::new(self.target_azure_account.clone())
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_seconds)
    }

    /// Every label name the cost gauge may carry.
    pub fn label_schema(&self) -> Vec<String> {
        self.target_azure_account
            .keys()
            .cloned()
            .chain(self.group_by.label_names().map(str::to_string))
            .chain(FixedLabel::iter().map(|label| label.as_ref().to_string()))
            .collect()
    }

    pub fn access_token() -> Result<SecretString, ConfigError> {
        match env::var(ACCESS_TOKEN_VAR) {
            Ok(token) if !token.trim().is_empty() => Ok(Secret::new(token)),
            _ => Err(ConfigError::MissingAccessToken(ACCESS_TOKEN_VAR)),
        }
    }
}

fn expand_env<F>(raw: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut expanded = String::with_capacity(raw.len());
    let mut last = 0;
    for captures in ENV_REFERENCE.captures_iter(raw) {
        let (Some(reference), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        let value = match (lookup(name.as_str()), captures.get(2)) {
            (Some(value), _) => value,
            (None, Some(default)) => default.as_str().to_string(),
            (None, None) => return Err(ConfigError::UndefinedVariable(name.as_str().to_string())),
        };
        expanded.push_str(&raw[last..reference.start()]);
        expanded.push_str(&value);
        last = reference.end();
    }
    expanded.push_str(&raw[last..]);
    Ok(expanded)
}
