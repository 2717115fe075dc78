// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0
//
// ConfigLoader parses the configuration file once and exposes cached
// accessors for the tracing, rpc and demo sections. A missing section
// yields its defaults; a malformed one falls back to defaults with a warning.

use busrpc::RpcConfiguration;
use busrpc_tracing::TracingConfiguration;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_yaml::{Value, from_str};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid configuration - impossible to parse yaml")]
    InvalidYaml,
    #[error("invalid configuration - key {0} not valid")]
    InvalidKey(String),
}

const CONFIG_KEYS: &[&str] = &["tracing", "rpc", "demo"];

/// Settings of the greeter walkthrough.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct DemoConfiguration {
    /// package instance the greeter is deployed as
    #[serde(default = "default_instance")]
    pub instance: String,

    /// service parameter identifying the calling client
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// name sent in the greeting requests
    #[serde(default = "default_name")]
    pub name: String,
}

impl Default for DemoConfiguration {
    fn default() -> Self {
        DemoConfiguration {
            instance: default_instance(),
            client_id: default_client_id(),
            name: default_name(),
        }
    }
}

fn default_instance() -> String {
    "default".to_string()
}

fn default_client_id() -> String {
    "me".to_string()
}

fn default_name() -> String {
    "world".to_string()
}

pub struct ConfigLoader {
    root: Value,
    tracing: Option<TracingConfiguration>,
    rpc: Option<RpcConfiguration>,
    demo: Option<DemoConfiguration>,
}

impl std::fmt::Debug for ConfigLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let root_keys = self
            .root
            .as_mapping()
            .map(|m| {
                m.keys()
                    .filter_map(|k| k.as_str())
                    .map(|s| s.to_string())
                    .collect::<Vec<String>>()
            })
            .unwrap_or_default();

        f.debug_struct("ConfigLoader")
            .field("root_keys", &root_keys)
            .field("tracing_loaded", &self.tracing.is_some())
            .field("rpc_loaded", &self.rpc.is_some())
            .field("demo_loaded", &self.demo.is_some())
            .finish()
    }
}

impl ConfigLoader {
    pub fn new(file_path: &str) -> Result<Self, ConfigError> {
        let config_str =
            std::fs::read_to_string(file_path).map_err(|e| ConfigError::NotFound(e.to_string()))?;
        Self::from_yaml(&config_str)
    }

    pub fn from_yaml(config_str: &str) -> Result<Self, ConfigError> {
        let root: Value = if config_str.trim().is_empty() {
            Value::Null
        } else {
            from_str(config_str).map_err(|_| ConfigError::InvalidYaml)?
        };

        // an empty document is a valid, all-defaults configuration
        if !root.is_null() {
            let mapping = root.as_mapping().ok_or(ConfigError::InvalidYaml)?;
            for key in mapping.keys() {
                let k = key.as_str().ok_or(ConfigError::InvalidYaml)?;
                if !CONFIG_KEYS.contains(&k) {
                    return Err(ConfigError::InvalidKey(k.to_string()));
                }
            }
        }

        Ok(Self {
            root,
            tracing: None,
            rpc: None,
            demo: None,
        })
    }

    fn section<T>(&self, key: &str) -> T
    where
        T: DeserializeOwned + Default + std::fmt::Debug,
    {
        let cfg = self
            .root
            .get(key)
            .cloned()
            .map(|v| {
                serde_yaml::from_value(v).unwrap_or_else(|e| {
                    warn!(error = ?e, section = key, "invalid config section, falling back to default");
                    T::default()
                })
            })
            .unwrap_or_default();
        debug!(?cfg, section = key, "configuration loaded");
        cfg
    }

    pub fn tracing(&mut self) -> &TracingConfiguration {
        if self.tracing.is_none() {
            self.tracing = Some(self.section("tracing"));
        }
        self.tracing.get_or_insert_with(TracingConfiguration::default)
    }

    pub fn rpc(&mut self) -> &RpcConfiguration {
        if self.rpc.is_none() {
            self.rpc = Some(self.section("rpc"));
        }
        self.rpc.get_or_insert_with(RpcConfiguration::default)
    }

    pub fn demo(&mut self) -> &DemoConfiguration {
        if self.demo.is_none() {
            self.demo = Some(self.section("demo"));
        }
        self.demo.get_or_insert_with(DemoConfiguration::default)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_full_configuration() {
        let yaml = r#"
tracing:
  log_level: debug
rpc:
  client:
    request_timeout: 2s
  server:
    queue_group: greeters
demo:
  instance: staging
  name: busrpc
"#;
        let mut loader = ConfigLoader::from_yaml(yaml).unwrap();
        assert_eq!(loader.tracing().log_level(), "debug");
        assert_eq!(
            loader.rpc().client.request_timeout(),
            Duration::from_secs(2)
        );
        assert_eq!(loader.rpc().server.queue_group(), Some("greeters"));

        let demo = loader.demo();
        assert_eq!(demo.instance, "staging");
        assert_eq!(demo.client_id, "me");
        assert_eq!(demo.name, "busrpc");
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = ConfigLoader::from_yaml("services: {}").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidKey(k) if k == "services"));
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(matches!(
            ConfigLoader::from_yaml("- a\n- b").unwrap_err(),
            ConfigError::InvalidYaml
        ));
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_malformed_section_falls_back() {
        let mut loader = ConfigLoader::from_yaml("rpc:\n  client:\n    request_timeout: never\n").unwrap();
        assert_eq!(loader.rpc(), &RpcConfiguration::default());
        assert!(logs_contain("falling back to default"));
    }

    #[test]
    fn test_empty_document() {
        let mut loader = ConfigLoader::from_yaml("").unwrap();
        assert_eq!(loader.demo(), &DemoConfiguration::default());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            ConfigLoader::new("/nonexistent/busrpc.yaml").unwrap_err(),
            ConfigError::NotFound(_)
        ));
    }
}
