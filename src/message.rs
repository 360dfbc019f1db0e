//! Inter-module message envelopes.
//!
//! Messages are delivered synchronously on the caller's stack. The reply is
//! an owned value: once the caller drops it, the payload is released, so no
//! separate "free" round trip is needed.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::types::SessionId;

/// The operation a message asks for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageOp {
    /// Return the module's current state
    Get,
    /// Apply new values carried in `data`
    Set,
    /// Return static information about the module
    Describe,
    /// Module-specific operation
    Custom(String),
}

impl MessageOp {
    /// Parses the textual form used on the control channel.
    pub fn parse(op: &str) -> Self {
        match op {
            "get" => MessageOp::Get,
            "set" => MessageOp::Set,
            "describe" => MessageOp::Describe,
            other => MessageOp::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for MessageOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageOp::Get => f.write_str("get"),
            MessageOp::Set => f.write_str("set"),
            MessageOp::Describe => f.write_str("describe"),
            MessageOp::Custom(name) => f.write_str(name),
        }
    }
}

/// A typed message addressed to one session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Requested operation
    pub op: MessageOp,
    /// Operation payload
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Message {
    /// Creates a message with an explicit payload.
    pub fn new(op: MessageOp, data: serde_json::Value) -> Self {
        Self { op, data }
    }

    /// Creates a `Get` message with no payload.
    pub fn get() -> Self {
        Self::new(MessageOp::Get, serde_json::Value::Null)
    }

    /// Creates a `Set` message.
    pub fn set(data: serde_json::Value) -> Self {
        Self::new(MessageOp::Set, data)
    }

    /// Creates a `Describe` message with no payload.
    pub fn describe() -> Self {
        Self::new(MessageOp::Describe, serde_json::Value::Null)
    }
}

/// The owned reply to a message.
pub type Reply = serde_json::Value;

/// Delivery and handling failures.
///
/// `NotFound` points at a configuration or usage bug; `Unsupported` is an
/// expected outcome for modules without the optional capability. Callers are
/// expected to branch on the difference.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("no session {0}")]
    NotFound(SessionId),

    #[error("operation not supported")]
    Unsupported,

    #[error("session {0} is busy handling the current callback")]
    Busy(SessionId),

    #[error("message failed: {0}")]
    Failed(String),
}

/// Result of a message delivery.
pub type MessageResult = Result<Reply, MessageError>;
