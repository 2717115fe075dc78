// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;

/// A message as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Concrete subject the message was published to
    pub subject: String,
    /// Reply subject, set only when the publisher expects an answer
    pub reply: Option<String>,
    /// Opaque payload
    pub payload: Bytes,
}

impl Message {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Message {
            subject: subject.into(),
            reply: None,
            payload: payload.into(),
        }
    }

    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }

    pub fn expects_reply(&self) -> bool {
        self.reply.is_some()
    }
}
