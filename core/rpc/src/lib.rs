// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Request/reply and notification RPC over a publish/subscribe bus.
//!
//! Servers bind a [`ServiceHandler`] to the pattern of a [`ServiceRoute`];
//! clients use a [`Client`] to call its methods or subscribe to its
//! broadcasts. Remote failures come back as [`RpcError`]s, kept apart from
//! the transport's own timeout and connectivity errors.

pub mod client;
pub mod codec;
pub mod config;
pub mod context;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod router;
pub mod server;
pub mod subscription;

pub use client::Client;
pub use codec::{BincodeCodec, Codec, CodecError, JsonCodec};
pub use config::{ClientConfig, NotificationBuffer, OverflowPolicy, RpcConfiguration, ServerConfig};
pub use context::CallContext;
pub use envelope::{EnvelopeError, ErrorKind, Reply, RpcError};
pub use error::Error;
pub use handler::{
    DispatchFailure, MessageHandler, MethodKind, Notifier, ServiceHandler, ServiceHandlerBuilder,
};
pub use router::{Address, NO_PARAMS, RouteError, RouteMatch, ServiceRoute, SubjectPattern};
pub use server::Server;
pub use subscription::{NotificationChannel, NotificationSubscription, SyncSubscription};
