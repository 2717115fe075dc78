// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Client side notification subscriptions
//!
//! A [`DecodedStream`] turns a transport subscription into a stream of typed
//! values. Three front ends sit on top of it:
//!
//! - [`SyncSubscription`]: the caller polls with [`SyncSubscription::next`].
//! - callback: a delivery task hands every value to a closure.
//! - channel: a delivery task pushes values onto a [`NotificationChannel`].
//!
//! Callbacks run on the delivery task of their subscription. A callback that
//! blocks stalls every later delivery of that subscription.

use std::marker::PhantomData;
use std::time::Duration;

use busrpc_bus::{Message, Subscription, SubscriptionHandle};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

use crate::codec::{Codec, CodecError};
use crate::config::{NotificationBuffer, OverflowPolicy};
use crate::error::Error;

/// Transport subscription decoding every payload into `T`.
pub(crate) struct DecodedStream<T, C> {
    subscription: Subscription,
    codec: C,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned, C: Codec> DecodedStream<T, C> {
    pub(crate) fn new(subscription: Subscription, codec: C) -> Self {
        DecodedStream {
            subscription,
            codec,
            _marker: PhantomData,
        }
    }

    pub(crate) fn handle(&self) -> SubscriptionHandle {
        self.subscription.handle()
    }

    fn decode(&self, msg: &Message) -> Result<T, CodecError> {
        self.codec.decode(&msg.payload)
    }

    /// Next delivery, `None` once the subscription is released and drained.
    pub(crate) async fn next(&mut self) -> Option<Result<T, CodecError>> {
        let msg = self.subscription.next().await?;
        trace!(subject = %msg.subject, "notification received");
        Some(self.decode(&msg))
    }

    pub(crate) async fn next_timeout(&mut self, timeout: Duration) -> Result<T, Error> {
        let msg = self.subscription.next_msg(timeout).await?;
        Ok(self.decode(&msg)?)
    }

    /// Deliver every decoded value to `deliver` until it returns false or the
    /// subscription ends. Values that fail to decode are logged and skipped.
    async fn drive<F>(mut self, mut deliver: F)
    where
        F: AsyncDeliver<T>,
    {
        let subject = self.subscription.subject().to_string();
        while let Some(next) = self.next().await {
            match next {
                Ok(value) => {
                    if !deliver.deliver(value).await {
                        debug!(%subject, "notification consumer gone");
                        self.subscription.unsubscribe();
                        break;
                    }
                }
                Err(e) => warn!(%subject, error = %e, "dropping undecodable notification"),
            }
        }
        trace!(%subject, "delivery task finished");
    }
}

/// Sink of a delivery task. Returns false when the consumer is gone.
trait AsyncDeliver<T>: Send {
    fn deliver(&mut self, value: T) -> impl Future<Output = bool> + Send;
}

struct CallbackSink<F>(F);

impl<T, F> AsyncDeliver<T> for CallbackSink<F>
where
    T: Send,
    F: FnMut(T) + Send,
{
    async fn deliver(&mut self, value: T) -> bool {
        (self.0)(value);
        true
    }
}

enum ChannelSink<T> {
    Unbounded(mpsc::UnboundedSender<T>),
    Bounded(mpsc::Sender<T>, OverflowPolicy),
}

impl<T: Send> AsyncDeliver<T> for ChannelSink<T> {
    async fn deliver(&mut self, value: T) -> bool {
        match self {
            ChannelSink::Unbounded(tx) => tx.send(value).is_ok(),
            ChannelSink::Bounded(tx, OverflowPolicy::Block) => tx.send(value).await.is_ok(),
            ChannelSink::Bounded(tx, OverflowPolicy::DropNewest) => match tx.try_send(value) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    debug!("notification channel full, dropping message");
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            },
        }
    }
}

/// Notification subscription polled by the caller.
pub struct SyncSubscription<T, C> {
    stream: DecodedStream<T, C>,
}

impl<T: DeserializeOwned, C: Codec> SyncSubscription<T, C> {
    pub(crate) fn new(stream: DecodedStream<T, C>) -> Self {
        SyncSubscription { stream }
    }

    /// Wait up to `timeout` for the next notification.
    ///
    /// Fails with [`Error::Timeout`] if nothing arrives, and with a transport
    /// error once the subscription has been released and drained.
    pub async fn next(&mut self, timeout: Duration) -> Result<T, Error> {
        self.stream.next_timeout(timeout).await
    }

    pub fn subject(&self) -> &str {
        self.stream.subscription.subject()
    }

    pub fn is_active(&self) -> bool {
        self.stream.handle().is_active()
    }

    /// Release the subscription. Calling it again has no effect.
    pub fn unsubscribe(&self) {
        self.stream.subscription.unsubscribe();
    }
}

/// Release handle of a callback or channel subscription.
///
/// Dropping it does not release the subscription.
#[derive(Debug, Clone)]
pub struct NotificationSubscription {
    handle: SubscriptionHandle,
    task: AbortHandle,
}

impl NotificationSubscription {
    pub fn subject(&self) -> &str {
        self.handle.subject()
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_active()
    }

    /// Release the subscription and stop its delivery task. Idempotent.
    pub fn unsubscribe(&self) {
        self.handle.unsubscribe();
        self.task.abort();
    }
}

/// Receiving end of a channel subscription.
#[derive(Debug)]
pub enum NotificationChannel<T> {
    Unbounded(mpsc::UnboundedReceiver<T>),
    Bounded(mpsc::Receiver<T>),
}

impl<T> NotificationChannel<T> {
    /// Next notification, `None` once the subscription is released and drained.
    pub async fn recv(&mut self) -> Option<T> {
        match self {
            NotificationChannel::Unbounded(rx) => rx.recv().await,
            NotificationChannel::Bounded(rx) => rx.recv().await,
        }
    }

    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        match self {
            NotificationChannel::Unbounded(rx) => rx.try_recv(),
            NotificationChannel::Bounded(rx) => rx.try_recv(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            NotificationChannel::Unbounded(rx) => rx.len(),
            NotificationChannel::Bounded(rx) => rx.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub(crate) fn spawn_callback<T, C, F>(
    stream: DecodedStream<T, C>,
    callback: F,
) -> NotificationSubscription
where
    T: DeserializeOwned + Send + 'static,
    C: Codec,
    F: FnMut(T) + Send + 'static,
{
    let handle = stream.handle();
    let task = tokio::spawn(stream.drive(CallbackSink(callback)));

    NotificationSubscription {
        handle,
        task: task.abort_handle(),
    }
}

pub(crate) fn spawn_channel<T, C>(
    stream: DecodedStream<T, C>,
    buffer: &NotificationBuffer,
) -> (NotificationChannel<T>, NotificationSubscription)
where
    T: DeserializeOwned + Send + 'static,
    C: Codec,
{
    let (sink, channel) = match buffer.capacity() {
        Some(capacity) => {
            let (tx, rx) = mpsc::channel(capacity);
            (
                ChannelSink::Bounded(tx, buffer.overflow()),
                NotificationChannel::Bounded(rx),
            )
        }
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (ChannelSink::Unbounded(tx), NotificationChannel::Unbounded(rx))
        }
    };

    let handle = stream.handle();
    let task = tokio::spawn(stream.drive(sink));

    (
        channel,
        NotificationSubscription {
            handle,
            task: task.abort_handle(),
        },
    )
}

