// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Serializer adapters for request, reply and notification payloads.
//!
//! The dispatch core only sees bytes. A [`Codec`] turns typed values into
//! those bytes and back; the same codec must be used on both ends of a route.

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("{codec} encode error: {reason}")]
    Encode { codec: &'static str, reason: String },
    #[error("{codec} decode error: {reason}")]
    Decode { codec: &'static str, reason: String },
}

/// Encode/decode contract between typed values and payload bytes.
pub trait Codec: Clone + Send + Sync + 'static {
    /// Short name used in logs and errors
    fn name(&self) -> &'static str;

    fn encode<T: Serialize>(&self, value: &T) -> Result<Bytes, CodecError>;

    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError>;
}

/// JSON payloads through `serde_json`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Bytes, CodecError> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| CodecError::Encode {
                codec: self.name(),
                reason: e.to_string(),
            })
    }

    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(buf).map_err(|e| CodecError::Decode {
            codec: self.name(),
            reason: e.to_string(),
        })
    }
}

/// Compact binary payloads through `bincode` with the standard configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn name(&self) -> &'static str {
        "bincode"
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Bytes, CodecError> {
        bincode::serde::encode_to_vec(value, bincode::config::standard())
            .map(Bytes::from)
            .map_err(|e| CodecError::Encode {
                codec: self.name(),
                reason: e.to_string(),
            })
    }

    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError> {
        let (value, read) =
            bincode::serde::decode_from_slice(buf, bincode::config::standard()).map_err(|e| {
                CodecError::Decode {
                    codec: self.name(),
                    reason: e.to_string(),
                }
            })?;

        if read != buf.len() {
            return Err(CodecError::Decode {
                codec: self.name(),
                reason: format!("{} trailing bytes", buf.len() - read),
            });
        }

        Ok(value)
    }
}
