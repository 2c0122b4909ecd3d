//! Command types for the scrollwatch protocol

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use scrollwatch_util::ClientId;
use std::collections::BTreeMap;

use crate::{Rule, StorageData, SubscriberScope, API_VERSION};

/// Request wrapper with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for correlation
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// The command
    pub command: Command,
}

impl Request {
    pub fn new(request_id: u64, command: Command) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            command,
        }
    }
}

/// Response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Corresponding request ID
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// Response payload or error
    pub result: ResponseResult,
}

impl Response {
    pub fn success(request_id: u64, payload: ResponsePayload) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Ok(payload),
        }
    }

    pub fn error(request_id: u64, error: ErrorInfo) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Err(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseResult {
    Ok(ResponsePayload),
    Err(ErrorInfo),
}

/// Error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Error codes for the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    InvalidDomain,
    RuleNotFound,
    InternalError,
}

/// All possible commands from observers and management surfaces.
///
/// Domains arrive as raw strings (hostnames or full page URLs) and are
/// normalized by the service; malformed ones are dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Page was visible for roughly one tick interval (no response)
    Tick {
        domain: String,
        timestamp: DateTime<Local>,
    },

    /// Ask whether a domain is currently blocked
    CheckStatus { domain: String },

    /// Replace the watchlist with the given rules (no response)
    UpdateRules { watchlist: BTreeMap<String, Rule> },

    /// Receive pushed block/unblock events for the given scope
    Subscribe { scope: SubscriberScope },

    /// Stop receiving pushed events
    Unsubscribe,

    /// Get the full watchlist and stats
    GetState,

    /// Wipe all rules and stats
    ClearData,

    /// Ping for keepalive
    Ping,
}

impl Command {
    /// Fire-and-forget commands get no response line
    pub fn expects_response(&self) -> bool {
        !matches!(self, Command::Tick { .. } | Command::UpdateRules { .. })
    }
}

/// Response payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    Status { is_blocked: bool },
    State(StorageData),
    Subscribed { client_id: ClientId },
    Unsubscribed,
    Cleared,
    Pong,
}
