// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Publish/subscribe transport used by busrpc.
//!
//! [`Transport`] is the contract the RPC layer consumes. [`LocalBus`] is an
//! in-process implementation with wildcard subjects, queue groups and
//! request/reply over ephemeral inbox subjects.

pub mod errors;
pub mod local;
pub mod message;
pub mod subject;
pub mod subscription;
pub mod transport;

pub use errors::BusError;
pub use local::{INBOX_PREFIX, LocalBus};
pub use message::Message;
pub use subject::{Pattern, Token};
pub use subscription::{Subscription, SubscriptionHandle, SubscriptionRegistry};
pub use transport::Transport;
