//! Error types for the RPC runtime.

use thiserror::Error;

use crate::envelope::ErrorCode;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("request timeout")]
    Timeout,
    #[error("transport closed")]
    TransportClosed,
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("http: {0}")]
    Http(String),
    #[error("websocket: {0}")]
    WebSocket(String),
    #[error("{code}: {message}")]
    Remote { code: ErrorCode, message: String },
}

impl RpcError {
    pub fn remote(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Remote {
            code,
            message: message.into(),
        }
    }

    /// Canonical wire code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            RpcError::Timeout => ErrorCode::Timeout,
            RpcError::TransportClosed | RpcError::Connect(_) => ErrorCode::TransportClosed,
            RpcError::Remote { code, .. } => *code,
            _ => ErrorCode::ProcessingError,
        }
    }
}

impl From<reqwest::Error> for RpcError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RpcError::Timeout
        } else if err.is_connect() {
            RpcError::Connect(err.to_string())
        } else {
            RpcError::Http(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_lowercase_and_terse() {
        assert_eq!(RpcError::Timeout.to_string(), "request timeout");
        assert_eq!(RpcError::TransportClosed.to_string(), "transport closed");
        let remote = RpcError::remote(ErrorCode::NotFound, "service audio not found");
        assert_eq!(remote.to_string(), "not_found: service audio not found");
    }

    #[test]
    fn code_mapping() {
        assert_eq!(RpcError::Timeout.code(), ErrorCode::Timeout);
        assert_eq!(RpcError::TransportClosed.code(), ErrorCode::TransportClosed);
        assert_eq!(
            RpcError::remote(ErrorCode::QueueFull, "full").code(),
            ErrorCode::QueueFull
        );
    }
}
