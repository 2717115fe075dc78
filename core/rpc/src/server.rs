// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Binding of message handlers to transport subscriptions
//!
//! Each served handler gets one subscription and one receive loop. Every
//! message is dispatched on its own task, so a slow method never holds up
//! the next delivery.

use std::sync::Arc;

use busrpc_bus::{SubscriptionHandle, Transport};
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::ServerConfig;
use crate::error::Error;
use crate::handler::MessageHandler;

struct Served {
    subject: String,
    subscription: SubscriptionHandle,
    task: JoinHandle<()>,
}

struct ServerInner {
    transport: Arc<dyn Transport>,
    config: ServerConfig,
    /// Served handlers
    served: RwLock<Vec<Served>>,
    /// Cancellation token for shutdown
    cancellation_token: CancellationToken,
    /// Drain signal for graceful shutdown
    drain_signal: RwLock<Option<drain::Signal>>,
    /// Drain watch held by every in-flight dispatch
    drain_watch: RwLock<Option<drain::Watch>>,
}

/// Serves message handlers over a transport.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    pub fn new(transport: Arc<dyn Transport>, config: ServerConfig) -> Self {
        let (drain_signal, drain_watch) = drain::channel();

        Server {
            inner: Arc::new(ServerInner {
                transport,
                config,
                served: RwLock::new(Vec::new()),
                cancellation_token: CancellationToken::new(),
                drain_signal: RwLock::new(Some(drain_signal)),
                drain_watch: RwLock::new(Some(drain_watch)),
            }),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Patterns currently served.
    pub fn subjects(&self) -> Vec<String> {
        self.inner
            .served
            .read()
            .iter()
            .map(|s| s.subject.clone())
            .collect()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.cancellation_token.is_cancelled()
    }

    /// Subscribe the handler's pattern and start dispatching its messages.
    ///
    /// Returns once the subscription is in place.
    pub async fn serve<H: MessageHandler>(&self, handler: H) -> Result<(), Error> {
        if self.is_shut_down() {
            return Err(Error::ShutDown);
        }

        let handler: Arc<dyn MessageHandler> = Arc::new(handler);
        let subject = handler.subject().to_string();

        let watch = self
            .inner
            .drain_watch
            .read()
            .clone()
            .ok_or(Error::ShutDown)?;

        let mut subscription = match self.inner.config.queue_group() {
            Some(group) => {
                self.inner
                    .transport
                    .queue_subscribe(&subject, group)
                    .await?
            }
            None => self.inner.transport.subscribe(&subject).await?,
        };
        let handle = subscription.handle();

        info!(
            %subject,
            queue_group = ?self.inner.config.queue_group(),
            "serving"
        );

        let token = self.inner.cancellation_token.clone();
        let loop_subject = subject.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!(subject = %loop_subject, "receive loop stopped");
                        break;
                    }
                    next = subscription.next() => {
                        let Some(msg) = next else {
                            debug!(subject = %loop_subject, "subscription closed");
                            break;
                        };

                        trace!(subject = %msg.subject, "message received");
                        let handler = handler.clone();
                        let cancel = token.child_token();
                        let watch = watch.clone();
                        tokio::spawn(async move {
                            handler.dispatch(msg, cancel).await;
                            drop(watch);
                        });
                    }
                }
            }
        });

        self.inner.served.write().push(Served {
            subject,
            subscription: handle,
            task,
        });

        Ok(())
    }

    /// Stop receiving, cancel in-flight calls and wait for them to finish.
    ///
    /// Dispatches still running after the drain timeout are left behind.
    pub async fn shutdown(&self) {
        info!("shutting down server");

        // Signal cancellation to the receive loops and call contexts
        self.inner.cancellation_token.cancel();

        let served: Vec<Served> = self.inner.served.write().drain(..).collect();
        for served in served {
            served.subscription.unsubscribe();
            if let Err(e) = served.task.await {
                warn!(subject = %served.subject, error = %e, "receive loop failed");
            }
        }

        // Take the drain signal and watch
        let drain_signal = self.inner.drain_signal.write().take();
        let drain_watch = self.inner.drain_watch.write().take();

        // Drop the watch to complete the drain
        drop(drain_watch);

        if let Some(signal) = drain_signal {
            debug!("draining in-flight dispatches");
            match tokio::time::timeout(self.inner.config.drain_timeout(), signal.drain()).await {
                Ok(()) => info!("all dispatches drained"),
                Err(_) => warn!(
                    timeout = ?self.inner.config.drain_timeout(),
                    "drain timed out"
                ),
            }
        }
    }
}
