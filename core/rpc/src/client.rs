// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Client side stub
//!
//! A [`Client`] is bound to one [`ServiceRoute`] and one [`Address`]. It
//! renders method subjects, performs request/reply calls with a timeout and
//! turns the framed reply back into either a typed value or an [`Error`].

use std::sync::Arc;
use std::time::Duration;

use busrpc_bus::Transport;
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::codec::{Codec, JsonCodec};
use crate::config::{ClientConfig, NotificationBuffer};
use crate::envelope::Reply;
use crate::error::Error;
use crate::router::{Address, ServiceRoute};
use crate::subscription::{
    DecodedStream, NotificationChannel, NotificationSubscription, SyncSubscription,
    spawn_callback, spawn_channel,
};

/// Typed access to the methods of one service instance.
pub struct Client<C: Codec = JsonCodec> {
    transport: Arc<dyn Transport>,
    route: ServiceRoute,
    address: Address,
    codec: C,
    timeout: Duration,
    notifications: NotificationBuffer,
}

impl<C: Codec> Clone for Client<C> {
    fn clone(&self) -> Self {
        Client {
            transport: self.transport.clone(),
            route: self.route.clone(),
            address: self.address.clone(),
            codec: self.codec.clone(),
            timeout: self.timeout,
            notifications: self.notifications.clone(),
        }
    }
}

impl<C: Codec> std::fmt::Debug for Client<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("route", &self.route.handler_pattern())
            .field("address", &self.address)
            .field("codec", &self.codec.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<C: Codec> Client<C> {
    /// Create a client with the default client configuration.
    ///
    /// # Arguments
    /// * `transport` - Connection used for every call and subscription
    /// * `route` - Addressing description of the remote service
    /// * `address` - Package instance and service parameters of the target
    /// * `codec` - Serializer shared with the server
    ///
    /// Fails if `address` does not supply exactly the parameters of `route`.
    pub fn new(
        transport: Arc<dyn Transport>,
        route: ServiceRoute,
        address: Address,
        codec: C,
    ) -> Result<Self, Error> {
        Self::from_config(transport, route, address, codec, &ClientConfig::default())
    }

    pub fn from_config(
        transport: Arc<dyn Transport>,
        route: ServiceRoute,
        address: Address,
        codec: C,
        config: &ClientConfig,
    ) -> Result<Self, Error> {
        route.check_address(&address)?;

        Ok(Client {
            transport,
            route,
            address,
            codec,
            timeout: config.request_timeout(),
            notifications: config.notifications().clone(),
        })
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        Client { timeout, ..self }
    }

    pub fn with_notification_buffer(self, notifications: NotificationBuffer) -> Self {
        Client {
            notifications,
            ..self
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn route(&self) -> &ServiceRoute {
        &self.route
    }

    /// Concrete subject of `method` for this client's address.
    pub fn subject<P: AsRef<str>>(&self, method: &str, params: &[P]) -> Result<String, Error> {
        Ok(self.route.subject(&self.address, method, params)?)
    }

    /// Call a request/reply method and decode its response.
    ///
    /// # Arguments
    /// * `method` - The method name
    /// * `params` - Method subject parameters, in declaration order
    /// * `req` - The request value
    ///
    /// # Returns
    /// The decoded response. [`Error::Rpc`] carries a remote rejection;
    /// [`Error::Timeout`] and [`Error::NoResponders`] mean nobody answered.
    pub async fn call<Req, Res, P>(&self, method: &str, params: &[P], req: &Req) -> Result<Res, Error>
    where
        Req: Serialize + Sync,
        Res: DeserializeOwned,
        P: AsRef<str> + Sync,
    {
        let body = self.request(method, params, req).await?;
        Ok(self.codec.decode(&body)?)
    }

    /// Call a method whose reply only tells success from failure.
    pub async fn call_void<Req, P>(&self, method: &str, params: &[P], req: &Req) -> Result<(), Error>
    where
        Req: Serialize + Sync,
        P: AsRef<str> + Sync,
    {
        let body = self.request(method, params, req).await?;
        if !body.is_empty() {
            trace!(%method, len = body.len(), "ignoring payload of void reply");
        }
        Ok(())
    }

    /// Trigger a fire-and-forget method.
    ///
    /// Only transport failures can be reported: no handler ever answers.
    pub async fn notify<Req, P>(&self, method: &str, params: &[P], req: &Req) -> Result<(), Error>
    where
        Req: Serialize + Sync,
        P: AsRef<str> + Sync,
    {
        let subject = self.subject(method, params)?;
        let payload = self.codec.encode(req)?;

        debug!(%subject, "publishing notification trigger");
        self.transport.publish(&subject, payload).await?;
        Ok(())
    }

    async fn request<Req, P>(&self, method: &str, params: &[P], req: &Req) -> Result<Bytes, Error>
    where
        Req: Serialize + Sync,
        P: AsRef<str> + Sync,
    {
        let subject = self.subject(method, params)?;
        let payload = self.codec.encode(req)?;

        debug!(%subject, timeout = ?self.timeout, "sending request");
        let msg = self
            .transport
            .request(&subject, payload, self.timeout)
            .await?;

        match Reply::decode(&msg.payload)? {
            Reply::Success(body) => Ok(body),
            Reply::Failure(err) => {
                debug!(%subject, error = %err, "remote returned error");
                Err(Error::Rpc(err))
            }
        }
    }

    async fn open<T, P>(&self, method: &str, params: &[P]) -> Result<DecodedStream<T, C>, Error>
    where
        T: DeserializeOwned,
        P: AsRef<str> + Sync,
    {
        let subject = self.subject(method, params)?;
        let subscription = self.transport.subscribe(&subject).await?;
        debug!(%subject, id = subscription.id(), "notification subscription opened");
        Ok(DecodedStream::new(subscription, self.codec.clone()))
    }

    /// Subscribe to a broadcast and poll it with [`SyncSubscription::next`].
    pub async fn subscribe_sync<T, P>(
        &self,
        method: &str,
        params: &[P],
    ) -> Result<SyncSubscription<T, C>, Error>
    where
        T: DeserializeOwned,
        P: AsRef<str> + Sync,
    {
        Ok(SyncSubscription::new(self.open(method, params).await?))
    }

    /// Subscribe to a broadcast, handing every notification to `callback`.
    ///
    /// The callback runs on the subscription's delivery task and must not
    /// block. Notifications that fail to decode are logged and dropped.
    pub async fn subscribe<T, P, F>(
        &self,
        method: &str,
        params: &[P],
        callback: F,
    ) -> Result<NotificationSubscription, Error>
    where
        T: DeserializeOwned + Send + 'static,
        P: AsRef<str> + Sync,
        F: FnMut(T) + Send + 'static,
    {
        let stream = self.open(method, params).await?;
        Ok(spawn_callback(stream, callback))
    }

    /// Subscribe to a broadcast, queueing notifications on a channel.
    ///
    /// The channel is buffered as configured by [`NotificationBuffer`].
    pub async fn subscribe_chan<T, P>(
        &self,
        method: &str,
        params: &[P],
    ) -> Result<(NotificationChannel<T>, NotificationSubscription), Error>
    where
        T: DeserializeOwned + Send + 'static,
        P: AsRef<str> + Sync,
    {
        let stream = self.open(method, params).await?;
        Ok(spawn_channel(stream, &self.notifications))
    }
}

#[cfg(test)]
mod tests {
    use busrpc_bus::{LocalBus, Message};
    use serde::Deserialize;

    use super::*;
    use crate::config::OverflowPolicy;
    use crate::envelope::{ErrorKind, RpcError};
    use crate::router::NO_PARAMS;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Tick {
        n: u32,
    }

    fn route() -> ServiceRoute {
        ServiceRoute::builder("clock.*").package_instance().build().unwrap()
    }

    fn client(bus: &LocalBus) -> Client {
        Client::new(bus.connect(), route(), Address::instance("a"), JsonCodec)
            .unwrap()
            .with_timeout(Duration::from_millis(200))
    }

    /// Answer the next request on `pattern` with a fixed reply.
    async fn reply_once(bus: &LocalBus, pattern: &str, reply: Reply) {
        let mut sub = bus.subscribe(pattern).await.unwrap();
        let bus = bus.clone();
        tokio::spawn(async move {
            let msg: Message = sub.next().await.unwrap();
            bus.publish(&msg.reply.unwrap(), reply.encode()).await.unwrap();
        });
    }

    #[test]
    fn test_new_checks_address() {
        let bus = LocalBus::new();
        let err = Client::new(bus.connect(), route(), Address::new(), JsonCodec).unwrap_err();
        assert!(matches!(err, Error::Route(_)));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_call_success_and_failure() {
        let bus = LocalBus::new();
        let client = client(&bus);

        reply_once(&bus, "clock.a.Now", Reply::Success(Bytes::from_static(br#"{"n":3}"#))).await;
        let tick: Tick = client.call("Now", NO_PARAMS, &()).await.unwrap();
        assert_eq!(tick, Tick { n: 3 });

        reply_once(&bus, "clock.a.Now", Reply::Failure(RpcError::client("no"))).await;
        let err = client.call::<_, Tick, _>("Now", NO_PARAMS, &()).await.unwrap_err();
        assert_eq!(err.rpc_error().unwrap().kind(), ErrorKind::Client);
        assert!(!err.is_transport());
    }

    #[tokio::test]
    async fn test_transport_errors_are_distinct() {
        let bus = LocalBus::new();
        let client = client(&bus);

        let err = client.call_void("Now", NO_PARAMS, &()).await.unwrap_err();
        assert!(matches!(err, Error::NoResponders(ref s) if s == "clock.a.Now"));

        let _silent = bus.subscribe("clock.a.Now").await.unwrap();
        let err = client.call_void("Now", NO_PARAMS, &()).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(err.rpc_error().is_none());
    }

    #[tokio::test]
    async fn test_malformed_reply() {
        let bus = LocalBus::new();
        let client = client(&bus);

        let mut sub = bus.subscribe("clock.a.Now").await.unwrap();
        let responder = bus.clone();
        tokio::spawn(async move {
            let msg = sub.next().await.unwrap();
            responder
                .publish(&msg.reply.unwrap(), Bytes::from_static(&[0x09]))
                .await
                .unwrap();
        });

        let err = client.call_void("Now", NO_PARAMS, &()).await.unwrap_err();
        assert!(matches!(err, Error::MalformedReply(_)));
    }

    #[tokio::test]
    async fn test_sync_subscription() {
        let bus = LocalBus::new();
        let client = client(&bus);

        let mut sub = client.subscribe_sync::<Tick, _>("Tick", NO_PARAMS).await.unwrap();
        assert_eq!(sub.subject(), "clock.a.Tick");

        bus.publish("clock.a.Tick", Bytes::from_static(br#"{"n":1}"#))
            .await
            .unwrap();
        bus.publish("clock.a.Tick", Bytes::from_static(b"broken"))
            .await
            .unwrap();

        let timeout = Duration::from_millis(50);
        assert_eq!(sub.next(timeout).await.unwrap(), Tick { n: 1 });
        assert!(matches!(sub.next(timeout).await.unwrap_err(), Error::Codec(_)));
        assert!(sub.next(timeout).await.unwrap_err().is_timeout());

        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
        assert!(sub.next(timeout).await.unwrap_err().is_transport());
    }

    #[tokio::test]
    async fn test_callback_skips_undecodable() {
        let bus = LocalBus::new();
        let client = client(&bus);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let sub = client
            .subscribe("Tick", NO_PARAMS, move |tick: Tick| {
                tx.send(tick).unwrap();
            })
            .await
            .unwrap();

        bus.publish("clock.a.Tick", Bytes::from_static(b"broken"))
            .await
            .unwrap();
        bus.publish("clock.a.Tick", Bytes::from_static(br#"{"n":2}"#))
            .await
            .unwrap();

        let tick = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tick, Tick { n: 2 });

        sub.unsubscribe();
        assert!(!sub.is_active());
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_bounded_channel_blocks_without_loss() {
        let bus = LocalBus::new();
        let client = client(&bus)
            .with_notification_buffer(NotificationBuffer::bounded(1, OverflowPolicy::Block));

        let (mut channel, sub) = client.subscribe_chan::<Tick, _>("Tick", NO_PARAMS).await.unwrap();

        for n in 0..3 {
            bus.publish("clock.a.Tick", Bytes::from(format!(r#"{{"n":{}}}"#, n)))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(channel.len(), 1);

        for n in 0..3 {
            let tick = tokio::time::timeout(Duration::from_millis(200), channel.recv())
                .await
                .unwrap();
            assert_eq!(tick, Some(Tick { n }));
        }
        assert!(channel.is_empty());

        // the delivery task is now parked on a full channel
        for n in 3..6 {
            bus.publish("clock.a.Tick", Bytes::from(format!(r#"{{"n":{}}}"#, n)))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        sub.unsubscribe();
        assert!(!sub.is_active());
        assert_eq!(bus.subscription_count(), 0);

        // only the buffered value is left, then the sender is gone
        assert_eq!(channel.recv().await, Some(Tick { n: 3 }));
        assert_eq!(
            tokio::time::timeout(Duration::from_millis(200), channel.recv())
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_bounded_channel_drops_newest() {
        let bus = LocalBus::new();
        let client = client(&bus)
            .with_notification_buffer(NotificationBuffer::bounded(1, OverflowPolicy::DropNewest));

        let (mut channel, sub) = client.subscribe_chan::<Tick, _>("Tick", NO_PARAMS).await.unwrap();

        for n in 0..3 {
            bus.publish("clock.a.Tick", Bytes::from(format!(r#"{{"n":{}}}"#, n)))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(channel.recv().await, Some(Tick { n: 0 }));
        assert!(channel.try_recv().is_err());

        sub.unsubscribe();
        assert_eq!(
            tokio::time::timeout(Duration::from_millis(200), channel.recv())
                .await
                .unwrap(),
            None
        );
    }
}
