// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::time;

use duration_str::deserialize_duration;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct RpcConfiguration {
    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ClientConfig {
    /// how long a request waits for its reply
    #[serde(
        default = "default_request_timeout",
        deserialize_with = "deserialize_duration"
    )]
    request_timeout: time::Duration,

    /// buffering of channel style notification subscriptions
    #[serde(default)]
    notifications: NotificationBuffer,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            request_timeout: default_request_timeout(),
            notifications: NotificationBuffer::default(),
        }
    }
}

fn default_request_timeout() -> time::Duration {
    time::Duration::from_secs(5)
}

impl ClientConfig {
    pub fn new() -> Self {
        ClientConfig::default()
    }

    pub fn with_request_timeout(self, request_timeout: time::Duration) -> Self {
        ClientConfig {
            request_timeout,
            ..self
        }
    }

    pub fn with_notifications(self, notifications: NotificationBuffer) -> Self {
        ClientConfig {
            notifications,
            ..self
        }
    }

    pub fn request_timeout(&self) -> time::Duration {
        self.request_timeout
    }

    pub fn notifications(&self) -> &NotificationBuffer {
        &self.notifications
    }
}

/// What a full bounded notification channel does with a new message
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// the delivery task waits for the consumer
    #[default]
    Block,
    /// the new message is discarded
    DropNewest,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct NotificationBuffer {
    /// None keeps the channel unbounded
    #[serde(default)]
    capacity: Option<usize>,

    #[serde(default)]
    overflow: OverflowPolicy,
}

impl NotificationBuffer {
    pub fn unbounded() -> Self {
        NotificationBuffer::default()
    }

    pub fn bounded(capacity: usize, overflow: OverflowPolicy) -> Self {
        NotificationBuffer {
            capacity: Some(capacity.max(1)),
            overflow,
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        // tokio rejects zero sized channels
        self.capacity.map(|c| c.max(1))
    }

    pub fn overflow(&self) -> OverflowPolicy {
        self.overflow
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ServerConfig {
    /// share requests among servers of the same group instead of copying them
    #[serde(default)]
    queue_group: Option<String>,

    /// the timeout for draining in-flight dispatches on shutdown
    #[serde(
        default = "default_drain_timeout",
        deserialize_with = "deserialize_duration"
    )]
    drain_timeout: time::Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            queue_group: None,
            drain_timeout: default_drain_timeout(),
        }
    }
}

fn default_drain_timeout() -> time::Duration {
    time::Duration::from_secs(10)
}

impl ServerConfig {
    pub fn new() -> Self {
        ServerConfig::default()
    }

    pub fn with_queue_group(self, queue_group: &str) -> Self {
        ServerConfig {
            queue_group: Some(queue_group.to_string()),
            ..self
        }
    }

    pub fn with_drain_timeout(self, drain_timeout: time::Duration) -> Self {
        ServerConfig {
            drain_timeout,
            ..self
        }
    }

    pub fn queue_group(&self) -> Option<&str> {
        self.queue_group.as_deref()
    }

    pub fn drain_timeout(&self) -> time::Duration {
        self.drain_timeout
    }
}
