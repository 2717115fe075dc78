// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! In-process implementation of the [`Transport`] contract.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::errors::BusError;
use crate::message::Message;
use crate::subject::{Pattern, validate_subject};
use crate::subscription::{Subscription, SubscriptionHandle, SubscriptionRegistry};
use crate::transport::Transport;

/// Prefix of the ephemeral subjects used to collect replies.
pub const INBOX_PREFIX: &str = "_INBOX";

#[derive(Debug)]
struct Entry {
    pattern: Pattern,
    group: Option<String>,
    tx: mpsc::UnboundedSender<Message>,
}

#[derive(Debug, Default)]
struct BusTable {
    // map from subscription id to its binding
    entries: RwLock<HashMap<u64, Entry>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl SubscriptionRegistry for BusTable {
    fn release(&self, id: u64) {
        if self.entries.write().remove(&id).is_none() {
            trace!(%id, "subscription already removed");
        }
    }
}

/// A message bus living in the current process.
///
/// Clones share the same subscription table, so each clone behaves like a
/// separate connection to one broker.
#[derive(Debug, Clone, Default)]
pub struct LocalBus {
    inner: Arc<BusTable>,
}

impl LocalBus {
    pub fn new() -> Self {
        LocalBus::default()
    }

    /// Open another connection to this bus.
    pub fn connect(&self) -> Arc<dyn Transport> {
        Arc::new(self.clone())
    }

    /// Number of live bindings, reply inboxes included.
    pub fn subscription_count(&self) -> usize {
        self.inner.entries.read().len()
    }

    /// Drop every binding and refuse further operations.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.entries.write().clear();
        debug!("local bus closed");
    }

    fn check_open(&self) -> Result<(), BusError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        Ok(())
    }

    fn bind(&self, pattern: &str, group: Option<&str>) -> Result<Subscription, BusError> {
        self.check_open()?;

        let parsed = Pattern::parse(pattern)?;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        self.inner.entries.write().insert(
            id,
            Entry {
                pattern: parsed,
                group: group.map(str::to_string),
                tx,
            },
        );
        debug!(%id, %pattern, ?group, "subscription added");

        let registry = Arc::downgrade(&self.inner) as Weak<dyn SubscriptionRegistry>;
        Ok(Subscription::new(
            SubscriptionHandle::new(id, pattern, registry),
            rx,
        ))
    }

    /// Deliver a message to every matching binding and return how many got it.
    fn route(&self, msg: Message) -> Result<usize, BusError> {
        self.check_open()?;
        validate_subject(&msg.subject)?;

        let mut delivered = 0;
        let mut stale = Vec::new();

        {
            let entries = self.inner.entries.read();
            let mut groups: HashMap<&str, Vec<(u64, &Entry)>> = HashMap::new();

            for (id, entry) in entries.iter() {
                if !entry.pattern.matches(&msg.subject) {
                    continue;
                }
                if entry.tx.is_closed() {
                    stale.push(*id);
                    continue;
                }
                match entry.group.as_deref() {
                    Some(group) => groups.entry(group).or_default().push((*id, entry)),
                    None => {
                        if entry.tx.send(msg.clone()).is_ok() {
                            delivered += 1;
                        } else {
                            stale.push(*id);
                        }
                    }
                }
            }

            // one member per queue group, starting from a random position
            for (group, members) in groups {
                let start = rand::rng().random_range(0..members.len());
                for k in 0..members.len() {
                    let (id, entry) = members[(start + k) % members.len()];
                    if entry.tx.send(msg.clone()).is_ok() {
                        trace!(%group, %id, subject = %msg.subject, "delivered to queue member");
                        delivered += 1;
                        break;
                    }
                    stale.push(id);
                }
            }
        }

        if !stale.is_empty() {
            let mut entries = self.inner.entries.write();
            for id in stale {
                debug!(%id, "pruning subscription with dropped receiver");
                entries.remove(&id);
            }
        }

        trace!(subject = %msg.subject, %delivered, "message routed");
        Ok(delivered)
    }
}

#[async_trait]
impl Transport for LocalBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError> {
        self.route(Message::new(subject, payload)).map(|_| ())
    }

    async fn publish_request(
        &self,
        subject: &str,
        reply: &str,
        payload: Bytes,
    ) -> Result<(), BusError> {
        validate_subject(reply)?;
        self.route(Message::new(subject, payload).with_reply(reply))
            .map(|_| ())
    }

    async fn subscribe(&self, pattern: &str) -> Result<Subscription, BusError> {
        self.bind(pattern, None)
    }

    async fn queue_subscribe(&self, pattern: &str, group: &str) -> Result<Subscription, BusError> {
        self.bind(pattern, Some(group))
    }

    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Message, BusError> {
        let inbox = format!("{}.{}", INBOX_PREFIX, Uuid::new_v4().simple());
        let mut sub = self.bind(&inbox, None)?;

        let msg = Message::new(subject, payload).with_reply(inbox.as_str());
        let result = match self.route(msg) {
            Ok(0) => Err(BusError::NoResponders(subject.to_string())),
            Ok(_) => sub.next_msg(timeout).await,
            Err(e) => Err(e),
        };

        sub.unsubscribe();
        result
    }
}
