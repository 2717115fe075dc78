// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Server side dispatch of inbound messages to method implementations
//!
//! A [`ServiceHandler`] owns one [`ServiceRoute`] and a table of methods.
//! It is bound once to the route's handler pattern; every inbound message is
//! parsed into package instance, method and method parameters, decoded and
//! handed to the matching implementation. Replies and errors are framed with
//! [`Reply`] and published to the reply subject carried by the request.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use busrpc_bus::subject::validate_token;
use busrpc_bus::{Message, Transport};
use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::codec::{Codec, JsonCodec};
use crate::context::CallContext;
use crate::envelope::{Reply, RpcError};
use crate::error::Error;
use crate::router::{Address, RouteError, ServiceRoute};

/// Type erased method implementation: decoded context and raw request in,
/// encoded response out.
type Invoke =
    Arc<dyn Fn(CallContext, Bytes) -> BoxFuture<'static, Result<Bytes, RpcError>> + Send + Sync>;

/// How a method answers its caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    /// Request with a typed response
    Unary,
    /// Request answered with an empty success marker or an error
    Void,
    /// Fire-and-forget trigger, never answered
    NoReply,
    /// Published by the server itself, ignored on dispatch
    Broadcast,
}

struct MethodEntry {
    kind: MethodKind,
    params: Vec<String>,
    invoke: Option<Invoke>,
}

/// A failure that could not be reported to any caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchFailure {
    pub subject: String,
    pub method: Option<String>,
    pub error: RpcError,
}

/// Something able to consume the messages of one subscription.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Pattern to subscribe with
    fn subject(&self) -> &str;

    /// Process one message. `cancel` is cancelled when dispatch returns.
    async fn dispatch(&self, msg: Message, cancel: CancellationToken);
}

struct HandlerInner<C> {
    transport: Arc<dyn Transport>,
    route: ServiceRoute,
    codec: C,
    methods: HashMap<String, MethodEntry>,
    failures: Option<mpsc::UnboundedSender<DispatchFailure>>,
}

/// Dispatches the messages of one service route.
pub struct ServiceHandler<C: Codec = JsonCodec> {
    inner: Arc<HandlerInner<C>>,
}

impl<C: Codec> Clone for ServiceHandler<C> {
    fn clone(&self) -> Self {
        ServiceHandler {
            inner: self.inner.clone(),
        }
    }
}

impl<C: Codec> std::fmt::Debug for ServiceHandler<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHandler")
            .field("subject", &self.subject())
            .field("codec", &self.inner.codec.name())
            .field("methods", &self.methods())
            .finish()
    }
}

impl<C: Codec> ServiceHandler<C> {
    pub fn builder(
        transport: Arc<dyn Transport>,
        route: ServiceRoute,
        codec: C,
    ) -> ServiceHandlerBuilder<C> {
        ServiceHandlerBuilder {
            transport,
            route,
            codec,
            methods: HashMap::new(),
            errors: Vec::new(),
            failures: None,
        }
    }

    /// The pattern this handler must be subscribed with.
    pub fn subject(&self) -> &str {
        self.inner.route.handler_pattern()
    }

    pub fn route(&self) -> &ServiceRoute {
        &self.inner.route
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.inner.methods.keys().cloned().collect();
        methods.sort();
        methods
    }

    /// Publisher for the broadcast notifications of this service.
    pub fn notifier(&self) -> Notifier<C> {
        Notifier {
            transport: self.inner.transport.clone(),
            route: self.inner.route.clone(),
            codec: self.inner.codec.clone(),
        }
    }

    /// Dispatch a single message with its own cancellation scope.
    pub async fn handle(&self, msg: Message) {
        self.dispatch_message(msg, CancellationToken::new()).await
    }

    async fn dispatch_message(&self, msg: Message, cancel: CancellationToken) {
        // the call context is cancelled whatever way this returns
        let _guard = cancel.clone().drop_guard();

        let parsed = match self.inner.route.parse(&msg.subject) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(subject = %msg.subject, error = %e, "cannot route message");
                return self.fail(&msg, None, RpcError::client(e.to_string())).await;
            }
        };

        let method = parsed.method().to_string();
        let Some(entry) = self.inner.methods.get(&method) else {
            let err = RpcError::client(RouteError::UnknownMethod(method.clone()).to_string());
            return self.fail(&msg, Some(method), err).await;
        };

        let Some(invoke) = entry.invoke.as_ref() else {
            trace!(subject = %msg.subject, %method, "ignoring broadcast traffic");
            return;
        };

        if parsed.method_params().len() != entry.params.len() {
            let err = RpcError::client(
                RouteError::ArityMismatch {
                    expected: entry.params.len(),
                    got: parsed.method_params().len(),
                }
                .to_string(),
            );
            return self.fail(&msg, Some(method), err).await;
        }

        debug!(subject = %msg.subject, %method, kind = ?entry.kind, "dispatching");

        let ctx = CallContext::new(
            msg.subject.as_str(),
            msg.reply.clone(),
            parsed,
            &entry.params,
            cancel,
        );
        let result = invoke(ctx, msg.payload.clone()).await;

        match entry.kind {
            MethodKind::NoReply => {
                if msg.expects_reply() {
                    trace!(subject = %msg.subject, %method, "fire-and-forget method, reply subject ignored");
                }
                if let Err(err) = result {
                    self.report(&msg, Some(method), err);
                }
            }
            MethodKind::Unary | MethodKind::Void => match (msg.reply.as_deref(), result) {
                (Some(reply), result) => self.respond(reply, &method, Reply::from(result)).await,
                (None, Ok(_)) => {
                    debug!(subject = %msg.subject, %method, "no reply subject, dropping response")
                }
                (None, Err(err)) => self.report(&msg, Some(method), err),
            },
            MethodKind::Broadcast => {}
        }
    }

    /// Answer with an error if the request carries a reply subject.
    async fn fail(&self, msg: &Message, method: Option<String>, err: RpcError) {
        match msg.reply.as_deref() {
            Some(reply) => {
                let method = method.unwrap_or_default();
                self.respond(reply, &method, Reply::Failure(err)).await
            }
            None => self.report(msg, method, err),
        }
    }

    async fn respond(&self, reply_subject: &str, method: &str, reply: Reply) {
        if let Reply::Failure(err) = &reply {
            debug!(%method, error = %err, "replying with error");
        }

        if let Err(e) = self
            .inner
            .transport
            .publish(reply_subject, reply.encode())
            .await
        {
            error!(%method, reply = %reply_subject, error = %e, "failed to publish reply");
        }
    }

    /// Record a failure nobody can be told about.
    fn report(&self, msg: &Message, method: Option<String>, error: RpcError) {
        warn!(subject = %msg.subject, ?method, %error, "dispatch failed without a reply path");

        if let Some(tx) = &self.inner.failures {
            let failure = DispatchFailure {
                subject: msg.subject.clone(),
                method,
                error,
            };
            if tx.send(failure).is_err() {
                trace!("failure sink closed");
            }
        }
    }
}

#[async_trait]
impl<C: Codec> MessageHandler for ServiceHandler<C> {
    fn subject(&self) -> &str {
        ServiceHandler::subject(self)
    }

    async fn dispatch(&self, msg: Message, cancel: CancellationToken) {
        self.dispatch_message(msg, cancel).await
    }
}

pub struct ServiceHandlerBuilder<C: Codec = JsonCodec> {
    transport: Arc<dyn Transport>,
    route: ServiceRoute,
    codec: C,
    methods: HashMap<String, MethodEntry>,
    errors: Vec<RouteError>,
    failures: Option<mpsc::UnboundedSender<DispatchFailure>>,
}

impl<C: Codec> ServiceHandlerBuilder<C> {
    /// Register a request/reply method with a typed response.
    pub fn unary<Req, Res, F, Fut>(self, method: &str, params: &[&str], f: F) -> Self
    where
        F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res, RpcError>> + Send + 'static,
        Req: DeserializeOwned + Send + 'static,
        Res: Serialize + Send + 'static,
    {
        let codec = self.codec.clone();
        let f = Arc::new(f);
        let invoke: Invoke = Arc::new(move |ctx: CallContext, payload: Bytes| -> BoxFuture<'static, Result<Bytes, RpcError>> {
            let f = f.clone();
            let codec = codec.clone();
            Box::pin(async move {
                let req: Req = decode_request(&codec, &payload)?;
                let res = guarded(async move { f(ctx, req).await }).await?;
                codec
                    .encode(&res)
                    .map_err(|e| RpcError::encoding(e.to_string()))
            })
        });

        self.register(method, params, MethodKind::Unary, Some(invoke))
    }

    /// Register a request/reply method that only reports success or failure.
    pub fn void<Req, F, Fut>(self, method: &str, params: &[&str], f: F) -> Self
    where
        F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RpcError>> + Send + 'static,
        Req: DeserializeOwned + Send + 'static,
    {
        let invoke = self.unit_invoke(f);
        self.register(method, params, MethodKind::Void, Some(invoke))
    }

    /// Register a fire-and-forget method. Errors go to the failure sink only.
    pub fn no_reply<Req, F, Fut>(self, method: &str, params: &[&str], f: F) -> Self
    where
        F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RpcError>> + Send + 'static,
        Req: DeserializeOwned + Send + 'static,
    {
        let invoke = self.unit_invoke(f);
        self.register(method, params, MethodKind::NoReply, Some(invoke))
    }

    /// Declare a method this service publishes through its [`Notifier`].
    ///
    /// Broadcasts travel under the handler pattern, so the handler needs to
    /// know to skip them.
    pub fn broadcast(self, method: &str) -> Self {
        self.register(method, &[], MethodKind::Broadcast, None)
    }

    /// Receive failures that had no reply subject to go to.
    pub fn failure_sink(mut self, tx: mpsc::UnboundedSender<DispatchFailure>) -> Self {
        self.failures = Some(tx);
        self
    }

    pub fn build(self) -> Result<ServiceHandler<C>, RouteError> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }

        debug!(
            subject = %self.route.handler_pattern(),
            methods = self.methods.len(),
            "service handler built"
        );

        Ok(ServiceHandler {
            inner: Arc::new(HandlerInner {
                transport: self.transport,
                route: self.route,
                codec: self.codec,
                methods: self.methods,
                failures: self.failures,
            }),
        })
    }

    fn unit_invoke<Req, F, Fut>(&self, f: F) -> Invoke
    where
        F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RpcError>> + Send + 'static,
        Req: DeserializeOwned + Send + 'static,
    {
        let codec = self.codec.clone();
        let f = Arc::new(f);
        Arc::new(move |ctx: CallContext, payload: Bytes| -> BoxFuture<'static, Result<Bytes, RpcError>> {
            let f = f.clone();
            let codec = codec.clone();
            Box::pin(async move {
                let req: Req = decode_request(&codec, &payload)?;
                guarded(async move { f(ctx, req).await }).await?;
                Ok(Bytes::new())
            })
        })
    }

    fn register(
        mut self,
        method: &str,
        params: &[&str],
        kind: MethodKind,
        invoke: Option<Invoke>,
    ) -> Self {
        if let Err(reason) = validate_token(method) {
            self.errors.push(RouteError::InvalidToken(reason));
            return self;
        }
        if self.methods.contains_key(method) {
            self.errors.push(RouteError::DuplicateMethod(method.to_string()));
            return self;
        }

        self.methods.insert(
            method.to_string(),
            MethodEntry {
                kind,
                params: params.iter().map(|p| p.to_string()).collect(),
                invoke,
            },
        );
        self
    }
}

/// Run an implementation, turning a panic into a SERVER error.
async fn guarded<T, Fut>(fut: Fut) -> Result<T, RpcError>
where
    Fut: Future<Output = Result<T, RpcError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(%message, "method implementation panicked");
            Err(RpcError::server(format!("method panicked: {}", message)))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn decode_request<C: Codec, T: DeserializeOwned>(codec: &C, payload: &Bytes) -> Result<T, RpcError> {
    codec
        .decode(payload)
        .map_err(|e| RpcError::encoding(e.to_string()))
}

/// Publishes broadcast notifications of one service.
pub struct Notifier<C: Codec = JsonCodec> {
    transport: Arc<dyn Transport>,
    route: ServiceRoute,
    codec: C,
}

impl<C: Codec> Clone for Notifier<C> {
    fn clone(&self) -> Self {
        Notifier {
            transport: self.transport.clone(),
            route: self.route.clone(),
            codec: self.codec.clone(),
        }
    }
}

impl<C: Codec> Notifier<C> {
    /// A notifier for `route` that does not need a built handler, e.g. to
    /// publish from inside one of its own methods.
    pub fn new(transport: Arc<dyn Transport>, route: ServiceRoute, codec: C) -> Self {
        Notifier {
            transport,
            route,
            codec,
        }
    }

    pub async fn publish<T: Serialize + Sync>(
        &self,
        address: &Address,
        method: &str,
        msg: &T,
    ) -> Result<(), Error> {
        self.publish_with_params(address, method, &[] as &[&str], msg)
            .await
    }

    pub async fn publish_with_params<P, T>(
        &self,
        address: &Address,
        method: &str,
        params: &[P],
        msg: &T,
    ) -> Result<(), Error>
    where
        P: AsRef<str> + Sync,
        T: Serialize + Sync,
    {
        let subject = self.route.subject(address, method, params)?;
        let payload = self.codec.encode(msg)?;

        debug!(%subject, %method, "publishing notification");
        self.transport.publish(&subject, payload).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use busrpc_bus::LocalBus;
    use serde::Deserialize;

    use super::*;
    use crate::envelope::ErrorKind;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct StringArg {
        arg1: String,
    }

    fn route() -> ServiceRoute {
        ServiceRoute::builder("root.*.custom_subject")
            .package_instance()
            .build()
            .unwrap()
    }

    fn handler(
        bus: &LocalBus,
    ) -> (
        ServiceHandler,
        mpsc::UnboundedReceiver<DispatchFailure>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = ServiceHandler::builder(bus.connect(), route(), JsonCodec)
            .unary("Echo", &[], |_ctx, req: StringArg| async move { Ok(req) })
            .void("Check", &["mode"], |ctx, _req: StringArg| async move {
                match ctx.method_param("mode") {
                    Some("ok") => Ok(()),
                    Some(other) => Err(RpcError::server(format!("bad mode {}", other))),
                    None => Err(RpcError::server("missing mode")),
                }
            })
            .no_reply("Fail", &[], |_ctx, _req: ()| async move {
                Err(RpcError::server("cannot report"))
            })
            .broadcast("Event")
            .failure_sink(tx)
            .build()
            .unwrap();
        (handler, rx)
    }

    async fn request(bus: &LocalBus, subject: &str, payload: &[u8]) -> Reply {
        let mut inbox = bus.subscribe("reply.inbox").await.unwrap();
        let msg = Message::new(subject, Bytes::copy_from_slice(payload)).with_reply("reply.inbox");
        let (svc, _failures) = handler(bus);
        svc.handle(msg).await;

        let reply = inbox.next_msg(Duration::from_millis(100)).await.unwrap();
        Reply::decode(&reply.payload).unwrap()
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_unary_reply() {
        let bus = LocalBus::new();
        let reply = request(&bus, "root.default.custom_subject.Echo", br#"{"arg1":"hi"}"#).await;
        assert_eq!(reply, Reply::Success(Bytes::from_static(br#"{"arg1":"hi"}"#)));
    }

    #[tokio::test]
    async fn test_void_reply() {
        let bus = LocalBus::new();
        let reply = request(&bus, "root.default.custom_subject.Check.ok", br#"{"arg1":""}"#).await;
        assert_eq!(reply, Reply::Success(Bytes::new()));

        let reply = request(&bus, "root.default.custom_subject.Check.no", br#"{"arg1":""}"#).await;
        assert_eq!(reply, Reply::Failure(RpcError::server("bad mode no")));
    }

    #[tokio::test]
    async fn test_decode_failure_is_encoding_error() {
        let bus = LocalBus::new();
        let reply = request(&bus, "root.default.custom_subject.Echo", b"garbage").await;
        let err = reply.into_result().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Encoding);
    }

    #[tokio::test]
    async fn test_routing_failures_are_client_errors() {
        let bus = LocalBus::new();

        let err = request(&bus, "root.default.custom_subject.Nope", b"{}")
            .await
            .into_result()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Client);
        assert!(err.message().contains("Nope"));

        // Check expects exactly one method parameter
        let err = request(&bus, "root.default.custom_subject.Check", br#"{"arg1":""}"#)
            .await
            .into_result()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Client);

        let err = request(&bus, "root.default.other.Echo", b"{}")
            .await
            .into_result()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Client);
    }

    #[tokio::test]
    async fn test_no_reply_failure_goes_to_sink() {
        let bus = LocalBus::new();
        let (handler, mut failures) = handler(&bus);

        handler
            .handle(Message::new("root.default.custom_subject.Fail", Bytes::from_static(b"null")))
            .await;

        let failure = failures.try_recv().unwrap();
        assert_eq!(failure.method.as_deref(), Some("Fail"));
        assert_eq!(failure.error, RpcError::server("cannot report"));
    }

    #[tokio::test]
    async fn test_broadcast_traffic_is_ignored() {
        let bus = LocalBus::new();
        let (handler, mut failures) = handler(&bus);

        let mut watcher = bus.subscribe("root.default.custom_subject.Event").await.unwrap();
        handler
            .notifier()
            .publish(&Address::instance("default"), "Event", &StringArg { arg1: "x".into() })
            .await
            .unwrap();

        let msg = watcher.next_msg(Duration::from_millis(100)).await.unwrap();
        handler.handle(msg).await;
        assert!(failures.try_recv().is_err());

        // unknown method without reply subject is reported
        handler
            .handle(Message::new("root.default.custom_subject.Other", Bytes::new()))
            .await;
        let failure = failures.try_recv().unwrap();
        assert_eq!(failure.error.kind(), ErrorKind::Client);
    }

    #[tokio::test]
    async fn test_context_cancelled_after_dispatch() {
        let bus = LocalBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler = ServiceHandler::builder(bus.connect(), route(), JsonCodec)
            .no_reply("Keep", &[], move |ctx, _req: ()| {
                let tx = tx.clone();
                async move {
                    assert!(!ctx.is_cancelled());
                    assert_eq!(ctx.package_instance(), Some("tenant"));
                    tx.send(ctx).unwrap();
                    Ok(())
                }
            })
            .build()
            .unwrap();

        handler
            .handle(Message::new("root.tenant.custom_subject.Keep", Bytes::from_static(b"null")))
            .await;

        let ctx = rx.try_recv().unwrap();
        assert!(ctx.is_cancelled());
    }

    async fn boom(_ctx: CallContext, _req: ()) -> Result<u32, RpcError> {
        panic!("kaboom")
    }

    async fn crash(ctx: CallContext, _req: ()) -> Result<(), RpcError> {
        panic!("{} lost", ctx.method())
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_panicking_method_is_server_error() {
        let bus = LocalBus::new();
        let (tx, mut failures) = mpsc::unbounded_channel();
        let svc = ServiceHandler::builder(bus.connect(), route(), JsonCodec)
            .unary("Boom", &[], boom)
            .no_reply("Crash", &[], crash)
            .failure_sink(tx)
            .build()
            .unwrap();

        let mut inbox = bus.subscribe("reply.boom").await.unwrap();
        svc.handle(
            Message::new("root.default.custom_subject.Boom", Bytes::from_static(b"null"))
                .with_reply("reply.boom"),
        )
        .await;

        let reply = inbox.next_msg(Duration::from_millis(100)).await.unwrap();
        let err = Reply::decode(&reply.payload).unwrap().into_result().unwrap_err();
        assert_eq!(err, RpcError::server("method panicked: kaboom"));
        assert!(logs_contain("method implementation panicked"));

        svc.handle(Message::new(
            "root.default.custom_subject.Crash",
            Bytes::from_static(b"null"),
        ))
        .await;
        let failure = failures.try_recv().unwrap();
        assert_eq!(failure.method.as_deref(), Some("Crash"));
        assert_eq!(failure.error, RpcError::server("method panicked: Crash lost"));
    }

    #[test]
    fn test_duplicate_method() {
        let bus = LocalBus::new();
        let err = ServiceHandler::builder(bus.connect(), route(), JsonCodec)
            .broadcast("Event")
            .broadcast("Event")
            .build()
            .unwrap_err();
        assert_eq!(err, RouteError::DuplicateMethod("Event".to_string()));
    }
}
