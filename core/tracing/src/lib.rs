// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[derive(Error, Debug)]
pub enum TracingError {
    #[error("invalid filter directive '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },
    #[error("failed to install tracing subscriber: {0}")]
    Init(String),
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct TracingConfiguration {
    #[serde(default = "default_log_level")]
    log_level: String,

    #[serde(default = "default_display_thread_names")]
    display_thread_names: bool,

    #[serde(default = "default_display_thread_ids")]
    display_thread_ids: bool,

    /// env-filter directives, e.g. "busrpc=debug,info". Overrides log_level when set.
    #[serde(default = "default_filter")]
    filter: String,
}

// default implementation for TracingConfiguration
impl Default for TracingConfiguration {
    fn default() -> Self {
        TracingConfiguration {
            log_level: default_log_level(),
            display_thread_names: default_display_thread_names(),
            display_thread_ids: default_display_thread_ids(),
            filter: default_filter(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_display_thread_names() -> bool {
    true
}

fn default_display_thread_ids() -> bool {
    false
}

fn default_filter() -> String {
    String::new()
}

// function to convert string tracing level to tracing::Level
fn resolve_level(level: &str) -> tracing::Level {
    let level = level.to_lowercase();
    match level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO, // default level
    }
}

impl TracingConfiguration {
    pub fn with_log_level(self, log_level: String) -> Self {
        TracingConfiguration { log_level, ..self }
    }

    pub fn with_display_thread_names(self, display_thread_names: bool) -> Self {
        TracingConfiguration {
            display_thread_names,
            ..self
        }
    }

    pub fn with_display_thread_ids(self, display_thread_ids: bool) -> Self {
        TracingConfiguration {
            display_thread_ids,
            ..self
        }
    }

    pub fn with_filter(self, filter: String) -> Self {
        TracingConfiguration { filter, ..self }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn display_thread_names(&self) -> bool {
        self.display_thread_names
    }

    pub fn display_thread_ids(&self) -> bool {
        self.display_thread_ids
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    fn env_filter(&self) -> Result<Option<EnvFilter>, TracingError> {
        if self.filter.trim().is_empty() {
            return Ok(None);
        }

        EnvFilter::try_new(&self.filter)
            .map(Some)
            .map_err(|e| TracingError::InvalidFilter {
                filter: self.filter.clone(),
                reason: e.to_string(),
            })
    }

    /// Set up a subscriber that logs to stdout.
    ///
    /// Fails if the filter does not parse or a global subscriber is already set.
    pub fn setup_tracing_subscriber(&self) -> Result<(), TracingError> {
        let builder = tracing_subscriber::fmt::Subscriber::builder()
            .with_thread_names(self.display_thread_names)
            .with_thread_ids(self.display_thread_ids);

        let res = match self.env_filter()? {
            Some(filter) => builder.with_env_filter(filter).try_init(),
            None => builder
                .with_max_level(resolve_level(&self.log_level))
                .try_init(),
        };

        res.map_err(|e| TracingError::Init(e.to_string()))
    }
}

// tests
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tracing_configuration() {
        let config = TracingConfiguration::default();
        assert_eq!(config.log_level, default_log_level());
        assert_eq!(config.display_thread_names, default_display_thread_names());
        assert_eq!(config.display_thread_ids, default_display_thread_ids());
        assert_eq!(config.filter, default_filter());
    }

    #[test]
    fn test_resolve_level() {
        assert_eq!(resolve_level("trace"), Level::TRACE);
        assert_eq!(resolve_level("DEBUG"), Level::DEBUG);
        assert_eq!(resolve_level("info"), Level::INFO);
        assert_eq!(resolve_level("warn"), Level::WARN);
        assert_eq!(resolve_level("error"), Level::ERROR);
        assert_eq!(resolve_level("invalid"), Level::INFO);
    }

    #[test]
    fn test_builders() {
        let config = TracingConfiguration::default()
            .with_log_level("debug".to_string())
            .with_display_thread_ids(true)
            .with_filter("busrpc=trace".to_string());
        assert_eq!(config.log_level(), "debug");
        assert!(config.display_thread_ids());
        assert!(config.display_thread_names());
        assert_eq!(config.filter(), "busrpc=trace");
    }

    #[test]
    fn test_env_filter() {
        let config = TracingConfiguration::default();
        assert!(config.env_filter().unwrap().is_none());

        let config = config.with_filter("busrpc=debug,info".to_string());
        assert!(config.env_filter().unwrap().is_some());

        let config = config.with_filter("busrpc=notalevel".to_string());
        assert!(matches!(
            config.env_filter(),
            Err(TracingError::InvalidFilter { .. })
        ));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: TracingConfiguration = serde_yaml::from_str("log_level: warn").unwrap();
        assert_eq!(config.log_level(), "warn");
        assert_eq!(config.filter(), "");
    }
}
