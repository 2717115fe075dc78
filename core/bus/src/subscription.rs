// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Live bindings between a subject pattern and a consumer.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::sync::mpsc;
use tracing::debug;

use crate::errors::BusError;
use crate::message::Message;

/// Implemented by transports to drop a subscription from their tables.
pub trait SubscriptionRegistry: Send + Sync {
    fn release(&self, id: u64);
}

struct HandleInner {
    id: u64,
    subject: String,
    active: AtomicBool,
    registry: Weak<dyn SubscriptionRegistry>,
}

/// Cloneable release handle for a subscription.
///
/// Releasing is idempotent: only the first call reaches the transport.
#[derive(Clone)]
pub struct SubscriptionHandle {
    inner: Arc<HandleInner>,
}

impl SubscriptionHandle {
    pub fn new(id: u64, subject: impl Into<String>, registry: Weak<dyn SubscriptionRegistry>) -> Self {
        SubscriptionHandle {
            inner: Arc::new(HandleInner {
                id,
                subject: subject.into(),
                active: AtomicBool::new(true),
                registry,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn subject(&self) -> &str {
        &self.inner.subject
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    pub fn unsubscribe(&self) {
        if !self.inner.active.swap(false, Ordering::AcqRel) {
            return;
        }

        debug!(id = self.inner.id, subject = %self.inner.subject, "unsubscribing");
        if let Some(registry) = self.inner.registry.upgrade() {
            registry.release(self.inner.id);
        }
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.inner.id)
            .field("subject", &self.inner.subject)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Receiving side of a subscription.
///
/// Messages already queued when the subscription is released can still be
/// read; after that the subscription yields `None`. Dropping it without
/// unsubscribing lets the transport prune the binding on its next publish.
#[derive(Debug)]
pub struct Subscription {
    handle: SubscriptionHandle,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Subscription {
    pub fn new(handle: SubscriptionHandle, rx: mpsc::UnboundedReceiver<Message>) -> Self {
        Subscription { handle, rx }
    }

    pub fn id(&self) -> u64 {
        self.handle.id()
    }

    pub fn subject(&self) -> &str {
        self.handle.subject()
    }

    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    pub fn unsubscribe(&self) {
        self.handle.unsubscribe();
    }

    /// Wait for the next message. Returns `None` once released and drained.
    pub async fn next(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Wait up to `timeout` for the next message.
    pub async fn next_msg(&mut self, timeout: Duration) -> Result<Message, BusError> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(msg)) => Ok(msg),
            Ok(None) => Err(BusError::SubscriptionClosed(self.subject().to_string())),
            Err(_) => Err(BusError::Timeout(timeout)),
        }
    }
}

impl Stream for Subscription {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
