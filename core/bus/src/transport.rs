// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::BusError;
use crate::message::Message;
use crate::subscription::Subscription;

/// The pub/sub primitive the RPC layer is built on.
///
/// Implementations own connection management and wildcard matching. A
/// message may be delivered to plain subscriptions concurrently, while a
/// queue group receives each message on exactly one member.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Fire a message with no reply subject.
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError>;

    /// Fire a message carrying a reply subject.
    async fn publish_request(
        &self,
        subject: &str,
        reply: &str,
        payload: Bytes,
    ) -> Result<(), BusError>;

    /// Bind a pattern; every matching message is delivered to this subscription.
    async fn subscribe(&self, pattern: &str) -> Result<Subscription, BusError>;

    /// Bind a pattern as a member of a competing-consumer group.
    async fn queue_subscribe(&self, pattern: &str, group: &str) -> Result<Subscription, BusError>;

    /// Publish and wait for the first reply.
    ///
    /// Correlation state is released when the call returns, whatever the outcome.
    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Message, BusError>;
}
