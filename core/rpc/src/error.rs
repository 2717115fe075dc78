// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use busrpc_bus::BusError;
use thiserror::Error;

use crate::codec::CodecError;
use crate::envelope::{EnvelopeError, RpcError};
use crate::router::RouteError;

/// Error returned by client calls, servers and subscriptions.
///
/// [`Error::Rpc`] means a remote handler explicitly rejected the call. The
/// timeout, no-responder and transport variants mean no remote answered.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("no responders on subject {0}")]
    NoResponders(String),

    #[error("transport error: {0}")]
    Transport(#[source] BusError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("malformed reply: {0}")]
    MalformedReply(#[from] EnvelopeError),

    #[error("route error: {0}")]
    Route(#[from] RouteError),

    #[error("server is shut down")]
    ShutDown,
}

impl From<BusError> for Error {
    fn from(err: BusError) -> Self {
        match err {
            BusError::Timeout(d) => Error::Timeout(d),
            BusError::NoResponders(subject) => Error::NoResponders(subject),
            other => Error::Transport(other),
        }
    }
}

impl Error {
    /// The remote error, if the handler answered with one.
    pub fn rpc_error(&self) -> Option<&RpcError> {
        match self {
            Error::Rpc(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// True when the failure came from the bus rather than a remote handler.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::NoResponders(_) | Error::Transport(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::ErrorKind;

    #[test]
    fn test_bus_error_mapping() {
        let timeout = Duration::from_millis(10);
        assert!(Error::from(BusError::Timeout(timeout)).is_timeout());

        let err = Error::from(BusError::NoResponders("a.b".to_string()));
        assert!(matches!(err, Error::NoResponders(ref s) if s == "a.b"));
        assert!(err.is_transport());

        let err = Error::from(BusError::Closed);
        assert!(matches!(err, Error::Transport(BusError::Closed)));
        assert!(err.rpc_error().is_none());
    }

    #[test]
    fn test_rpc_error_is_not_transport() {
        let err = Error::from(RpcError::server("Error"));
        assert!(!err.is_transport());
        assert!(!err.is_timeout());
        assert_eq!(err.rpc_error().unwrap().kind(), ErrorKind::Server);
        assert_eq!(err.to_string(), "SERVER: Error");
    }
}
