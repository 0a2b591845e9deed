//! The canonical message envelope exchanged on the RPC bus.
//!
//! Every request, response, notification and event on any transport is one
//! JSON envelope. Field order is insignificant and unknown fields are
//! preserved on forward, so a relay never strips what it does not understand.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// What kind of message an envelope carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Request,
    Response,
    Notification,
    Event,
}

/// Canonical error codes shared by all services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    MethodNotFound,
    InvalidParams,
    DuplicateName,
    NotFound,
    AlreadyRegistered,
    UnknownKey,
    QueueFull,
    ServiceUnavailable,
    TransportClosed,
    Timeout,
    HandlerError,
    Unauthorized,
    ValidationError,
    LowConfidence,
    ProcessingError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MethodNotFound => "method_not_found",
            ErrorCode::InvalidParams => "invalid_params",
            ErrorCode::DuplicateName => "duplicate_name",
            ErrorCode::NotFound => "not_found",
            ErrorCode::AlreadyRegistered => "already_registered",
            ErrorCode::UnknownKey => "unknown_key",
            ErrorCode::QueueFull => "queue_full",
            ErrorCode::ServiceUnavailable => "service_unavailable",
            ErrorCode::TransportClosed => "transport_closed",
            ErrorCode::Timeout => "timeout",
            ErrorCode::HandlerError => "handler_error",
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::ValidationError => "validation_error",
            ErrorCode::LowConfidence => "low_confidence",
            ErrorCode::ProcessingError => "processing_error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error payload of a response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// One message on the RPC bus.
///
/// Requests carry `id`, `method` and `params`; responses carry `id` and
/// exactly one of `result` or `error`. Notifications and events carry
/// `method` and `params` but no `id` and expect no reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    /// Unknown fields, kept so forwarding does not lose information.
    #[serde(flatten, default)]
    pub extra: Map<String, Value>,
}

impl Envelope {
    pub fn request(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self {
            kind: EnvelopeKind::Request,
            id: Some(id.into()),
            method: Some(method.into()),
            params: Some(params),
            result: None,
            error: None,
            extra: Map::new(),
        }
    }

    pub fn response(id: impl Into<String>, result: Value) -> Self {
        Self {
            kind: EnvelopeKind::Response,
            id: Some(id.into()),
            method: None,
            params: None,
            result: Some(result),
            error: None,
            extra: Map::new(),
        }
    }

    pub fn error_response(id: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            kind: EnvelopeKind::Response,
            id: Some(id.into()),
            method: None,
            params: None,
            result: None,
            error: Some(ErrorBody::new(code, message)),
            extra: Map::new(),
        }
    }

    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            kind: EnvelopeKind::Notification,
            id: None,
            method: Some(method.into()),
            params: Some(params),
            result: None,
            error: None,
            extra: Map::new(),
        }
    }

    pub fn event(method: impl Into<String>, params: Value) -> Self {
        Self {
            kind: EnvelopeKind::Event,
            ..Self::notification(method, params)
        }
    }

    pub fn is_request(&self) -> bool {
        self.kind == EnvelopeKind::Request
    }
}

/// Serialize an envelope to its wire form.
pub fn encode(env: &Envelope) -> Result<String, serde_json::Error> {
    serde_json::to_string(env)
}

/// Parse an envelope from its wire form.
pub fn decode(raw: &str) -> Result<Envelope, serde_json::Error> {
    serde_json::from_str(raw)
}
