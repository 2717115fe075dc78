// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Greeter service and a walkthrough of every call style against it.

use std::sync::Arc;
use std::time::Duration;

use busrpc::{
    Address, CallContext, Client, ErrorKind, JsonCodec, NO_PARAMS, Notifier, RouteError,
    RpcConfiguration, RpcError, Server, ServiceHandler, ServiceRoute,
};
use busrpc_bus::{LocalBus, Transport};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::{ConfigError, DemoConfiguration};

/// Subject template: package instance, then the calling client's id.
pub const GREETER_TEMPLATE: &str = "demo.*.greeter.*";

const NOTIFICATION_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum DemoError {
    #[error("rpc error: {0}")]
    Rpc(#[from] busrpc::Error),
    #[error("route error: {0}")]
    Route(#[from] RouteError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("tracing error: {0}")]
    Tracing(#[from] busrpc_tracing::TracingError),
    #[error("unexpected outcome: {0}")]
    Unexpected(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloRequest {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloReply {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    pub text: String,
}

pub fn route() -> Result<ServiceRoute, RouteError> {
    ServiceRoute::builder(GREETER_TEMPLATE)
        .package_instance()
        .service_param("client")
        .build()
}

async fn say_hello(_ctx: CallContext, req: HelloRequest) -> Result<HelloReply, RpcError> {
    if req.name.is_empty() {
        return Err(RpcError::client("name must not be empty"));
    }
    Ok(HelloReply {
        message: format!("Hello, {}!", req.name),
    })
}

async fn greet(ctx: CallContext, req: HelloRequest) -> Result<HelloReply, RpcError> {
    let salutation = match ctx.method_param("lang") {
        Some("en") => "Hello",
        Some("fr") => "Bonjour",
        Some("es") => "Hola",
        other => {
            return Err(RpcError::client(format!(
                "unsupported language '{}'",
                other.unwrap_or_default()
            )));
        }
    };
    Ok(HelloReply {
        message: format!("{}, {}!", salutation, req.name),
    })
}

async fn ping(ctx: CallContext, req: HelloRequest) -> Result<(), RpcError> {
    debug!(instance = ?ctx.package_instance(), client = ?ctx.service_param("client"), "ping");
    if req.name == "fail" {
        return Err(RpcError::server("ping failed"));
    }
    Ok(())
}

/// Build the greeter handler. `Announce` broadcasts an `Announcement` to the
/// address it was called on.
pub fn handler(transport: Arc<dyn Transport>) -> Result<ServiceHandler, RouteError> {
    let route = route()?;
    let notifier = Notifier::new(transport.clone(), route.clone(), JsonCodec);

    ServiceHandler::builder(transport, route, JsonCodec)
        .unary("SayHello", &[], say_hello)
        .unary("Greet", &["lang"], greet)
        .void("Ping", &[], ping)
        .no_reply("Announce", &[], move |ctx: CallContext, req: HelloRequest| {
            let notifier = notifier.clone();
            async move {
                let announcement = Announcement {
                    text: format!("{} joined {}", req.name, ctx.package_instance().unwrap_or_default()),
                };
                notifier
                    .publish(&ctx.address(), "Announcement", &announcement)
                    .await
                    .map_err(|e| RpcError::server(e.to_string()))
            }
        })
        .broadcast("Announcement")
        .build()
}

/// What the walkthrough observed.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub greeting: String,
    pub localized: String,
    pub ping_error: RpcError,
    pub language_error: RpcError,
    /// One entry per subscription style: poll, callback, channel
    pub announcements: Vec<String>,
}

fn expect_rpc_error(result: Result<(), busrpc::Error>, what: &str) -> Result<RpcError, DemoError> {
    match result {
        Ok(()) => Err(DemoError::Unexpected(format!("{} succeeded", what))),
        Err(e) => e
            .rpc_error()
            .cloned()
            .ok_or_else(|| DemoError::Unexpected(format!("{} failed without a remote error: {}", what, e))),
    }
}

/// Serve the greeter on `bus` and exercise it through a client.
///
/// The returned server keeps serving until it is shut down.
pub async fn run(
    bus: &LocalBus,
    rpc: &RpcConfiguration,
    demo: &DemoConfiguration,
) -> Result<(Server, Summary), DemoError> {
    let server = Server::new(bus.connect(), rpc.server.clone());
    server.serve(handler(bus.connect())?).await?;

    let address = Address::instance(demo.instance.as_str()).with_service_param(demo.client_id.as_str());
    let client = Client::from_config(bus.connect(), route()?, address, JsonCodec, &rpc.client)?;
    let request = HelloRequest {
        name: demo.name.clone(),
    };

    let reply: HelloReply = client.call("SayHello", NO_PARAMS, &request).await?;
    info!(message = %reply.message, "SayHello");

    let localized: HelloReply = client.call("Greet", &["fr"], &request).await?;
    info!(message = %localized.message, "Greet");

    let language_error = expect_rpc_error(
        client
            .call::<_, HelloReply, _>("Greet", &["xx"], &request)
            .await
            .map(|_| ()),
        "Greet in an unknown language",
    )?;
    info!(error = %language_error, "Greet rejected");

    client.call_void("Ping", NO_PARAMS, &request).await?;
    let ping_error = expect_rpc_error(
        client
            .call_void("Ping", NO_PARAMS, &HelloRequest {
                name: "fail".to_string(),
            })
            .await,
        "failing Ping",
    )?;
    info!(error = %ping_error, "Ping rejected");

    let mut polled = client
        .subscribe_sync::<Announcement, _>("Announcement", NO_PARAMS)
        .await?;
    let (callback_tx, mut callback_rx) = mpsc::unbounded_channel();
    let callback = client
        .subscribe("Announcement", NO_PARAMS, move |a: Announcement| {
            let _ = callback_tx.send(a.text);
        })
        .await?;
    let (mut channel, channel_sub) = client
        .subscribe_chan::<Announcement, _>("Announcement", NO_PARAMS)
        .await?;

    client.notify("Announce", NO_PARAMS, &request).await?;

    let mut announcements = Vec::with_capacity(3);
    announcements.push(polled.next(NOTIFICATION_TIMEOUT).await?.text);
    announcements.push(
        tokio::time::timeout(NOTIFICATION_TIMEOUT, callback_rx.recv())
            .await
            .ok()
            .flatten()
            .ok_or_else(|| DemoError::Unexpected("no announcement on callback".to_string()))?,
    );
    announcements.push(
        tokio::time::timeout(NOTIFICATION_TIMEOUT, channel.recv())
            .await
            .ok()
            .flatten()
            .map(|a| a.text)
            .ok_or_else(|| DemoError::Unexpected("no announcement on channel".to_string()))?,
    );
    info!(?announcements, "announcements received");

    polled.unsubscribe();
    callback.unsubscribe();
    channel_sub.unsubscribe();

    if ping_error.kind() != ErrorKind::Server {
        return Err(DemoError::Unexpected(format!("ping error of kind {}", ping_error.kind())));
    }

    Ok((
        server,
        Summary {
            greeting: reply.message,
            localized: localized.message,
            ping_error,
            language_error,
            announcements,
        },
    ))
}
