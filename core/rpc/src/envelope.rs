// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Reply framing and the structured RPC error
//!
//! Every reply starts with a discriminator byte so the client knows which
//! decoder to apply:
//!
//! ```text
//! 0x00 | encoded response (empty for void methods)
//! 0x01 | kind (u8) | UTF-8 message
//! ```

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

const TAG_SUCCESS: u8 = 0x00;
const TAG_ERROR: u8 = 0x01;

/// Category of a remote failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorKind {
    /// Caller supplied arguments or addressing rejected by the server
    Client = 0,
    /// Server side implementation failure
    Server = 1,
    /// Payload could not be decoded or encoded
    Encoding = 2,
}

impl ErrorKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ErrorKind::Client),
            1 => Some(ErrorKind::Server),
            2 => Some(ErrorKind::Encoding),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Client => "CLIENT",
            ErrorKind::Server => "SERVER",
            ErrorKind::Encoding => "ENCODING",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned by a remote handler.
///
/// Method implementations build one with [`RpcError::client`] or
/// [`RpcError::server`]; the handler itself produces client and encoding
/// errors for routing and payload failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct RpcError {
    kind: ErrorKind,
    message: String,
}

impl RpcError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        RpcError {
            kind,
            message: message.into(),
        }
    }

    pub fn client(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Client, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Server, message)
    }

    pub fn encoding(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Encoding, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("empty reply payload")]
    Empty,
    #[error("unknown reply tag: {0:#04x}")]
    UnknownTag(u8),
    #[error("error reply without a kind")]
    MissingKind,
    #[error("unknown error kind: {0}")]
    UnknownKind(u8),
    #[error("error message is not valid UTF-8")]
    InvalidMessage,
}

/// A decoded reply: exactly one of payload or error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Success(Bytes),
    Failure(RpcError),
}

impl Reply {
    pub fn encode(&self) -> Bytes {
        match self {
            Reply::Success(body) => {
                let mut buf = BytesMut::with_capacity(1 + body.len());
                buf.put_u8(TAG_SUCCESS);
                buf.put_slice(body);
                buf.freeze()
            }
            Reply::Failure(err) => {
                let mut buf = BytesMut::with_capacity(2 + err.message.len());
                buf.put_u8(TAG_ERROR);
                buf.put_u8(err.kind.as_u8());
                buf.put_slice(err.message.as_bytes());
                buf.freeze()
            }
        }
    }

    pub fn decode(payload: &Bytes) -> Result<Reply, EnvelopeError> {
        let Some(&tag) = payload.first() else {
            return Err(EnvelopeError::Empty);
        };

        match tag {
            TAG_SUCCESS => Ok(Reply::Success(payload.slice(1..))),
            TAG_ERROR => {
                let raw_kind = *payload.get(1).ok_or(EnvelopeError::MissingKind)?;
                let kind = ErrorKind::from_u8(raw_kind).ok_or(EnvelopeError::UnknownKind(raw_kind))?;
                let message = std::str::from_utf8(&payload[2..])
                    .map_err(|_| EnvelopeError::InvalidMessage)?;
                Ok(Reply::Failure(RpcError::new(kind, message)))
            }
            other => Err(EnvelopeError::UnknownTag(other)),
        }
    }

    /// Payload on success, the remote error otherwise.
    pub fn into_result(self) -> Result<Bytes, RpcError> {
        match self {
            Reply::Success(body) => Ok(body),
            Reply::Failure(err) => Err(err),
        }
    }
}

impl From<Result<Bytes, RpcError>> for Reply {
    fn from(result: Result<Bytes, RpcError>) -> Self {
        match result {
            Ok(body) => Reply::Success(body),
            Err(err) => Reply::Failure(err),
        }
    }
}
