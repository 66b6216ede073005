use std::path::PathBuf;
use std::time::{Duration as StdDuration, Instant};

use clap::Args;
use humantime::Duration;
use serde::{Deserialize, Deserializer};

const DEFAULT_REFRESH_INTERVAL: StdDuration = StdDuration::from_secs(300);

#[derive(Debug, Clone, Args, Deserialize)]
#[group(skip)]
pub struct Config {
    /// Name of the event field to read and rewrite
    #[arg(env, long)]
    pub field: String,

    /// Dictionary file (`.yml`, `.yaml` or `.json`)
    #[arg(env, long)]
    pub dictionary_path: PathBuf,

    /// Minimum interval between dictionary reload attempts
    #[arg(env, long, default_value = "300s")]
    #[serde(
        default = "default_refresh_interval",
        deserialize_with = "deserialize_interval"
    )]
    pub refresh_interval: Duration,

    /// Tags added to the event when a substitution happens
    #[arg(env, long, value_delimiter = ',')]
    #[serde(default)]
    pub add_tag: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("`field` must not be empty")]
    EmptyField,

    #[error("`dictionary_path` must not be empty")]
    EmptyDictionaryPath,

    #[error("`refresh_interval` of {0} is too large")]
    RefreshIntervalOutOfRange(Duration),
}

impl Config {
    pub fn new(field: impl Into<String>, dictionary_path: impl Into<PathBuf>) -> Self {
        Self {
            field: field.into(),
            dictionary_path: dictionary_path.into(),
            refresh_interval: default_refresh_interval(),
            add_tag: Vec::new(),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.field.is_empty() {
            return Err(ConfigError::EmptyField);
        }
        if self.dictionary_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyDictionaryPath);
        }
        if Instant::now().checked_add(*self.refresh_interval).is_none() {
            return Err(ConfigError::RefreshIntervalOutOfRange(
                self.refresh_interval,
            ));
        }
        Ok(())
    }
}

fn default_refresh_interval() -> Duration {
    DEFAULT_REFRESH_INTERVAL.into()
}

/// Accepts either a number of seconds or a humantime string such as `5m`.
fn deserialize_interval<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Interval {
        Seconds(u64),
        Text(String),
    }

    match Interval::deserialize(deserializer)? {
        Interval::Seconds(secs) => Ok(StdDuration::from_secs(secs).into()),
        Interval::Text(text) => text.parse().map_err(serde::de::Error::custom),
    }
}
