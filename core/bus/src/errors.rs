// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use thiserror::Error;

/// Transport level failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    // Subject validation
    #[error("invalid subject '{subject}': {reason}")]
    InvalidSubject { subject: String, reason: String },
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    // Request/reply
    #[error("no responders available for {0}")]
    NoResponders(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    // Subscription lifecycle
    #[error("subscription {0} is closed")]
    SubscriptionClosed(String),
    #[error("transport is closed")]
    Closed,
}

impl BusError {
    /// True for failures meaning that nobody answered in time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BusError::Timeout(_))
    }
}
