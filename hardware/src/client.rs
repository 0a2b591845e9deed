//! GPIO daemon client.
//!
//! Wire format: one JSON object per newline-terminated line. Commands are
//! `configure {pin, direction}`, `set {pin, value}`, `get {pin}` and
//! `status {}`; responses carry `status: "success" | "error"` plus `value`
//! or `pins` payloads. Each request opens a fresh connection, matching how
//! the daemon recycles its peers.

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::debug;

#[derive(Debug, Error)]
pub enum GpioError {
    #[error("daemon connect failed: {0}")]
    Connect(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("daemon closed the connection")]
    Closed,
    #[error("daemon error: {0}")]
    Daemon(String),
    #[error("invalid gpio value {0}, expected 0 or 1")]
    InvalidValue(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinDirection {
    Input,
    Output,
}

#[derive(Debug, Serialize)]
#[serde(tag = "command", rename_all = "lowercase")]
enum GpioCommand {
    Configure { pin: u8, direction: PinDirection },
    Set { pin: u8, value: i64 },
    Get { pin: u8 },
    Status {},
}

#[derive(Debug, Clone, Deserialize)]
pub struct PinStatus {
    pub pin: u8,
    pub direction: String,
    #[serde(default)]
    pub value: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct GpioResponse {
    pub status: String,
    #[serde(default)]
    pub value: Option<i64>,
    #[serde(default)]
    pub pins: Option<Vec<PinStatus>>,
    #[serde(default)]
    pub message: Option<String>,
}

impl GpioResponse {
    fn ok(self) -> Result<Self, GpioError> {
        if self.status == "success" {
            Ok(self)
        } else {
            Err(GpioError::Daemon(
                self.message.unwrap_or_else(|| "unspecified failure".to_string()),
            ))
        }
    }
}

#[derive(Debug, Clone)]
pub struct GpioClient {
    addr: String,
}

impl GpioClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    async fn request(&self, command: &GpioCommand) -> Result<GpioResponse, GpioError> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|err| GpioError::Connect(format!("{}: {err}", self.addr)))?;
        let mut framed = Framed::new(stream, LinesCodec::new());
        let line = serde_json::to_string(command)?;
        debug!(%line, "gpio command");
        framed
            .send(line)
            .await
            .map_err(|err| GpioError::Io(std::io::Error::other(err)))?;
        let reply = framed
            .next()
            .await
            .ok_or(GpioError::Closed)?
            .map_err(|err| GpioError::Io(std::io::Error::other(err)))?;
        let response: GpioResponse = serde_json::from_str(&reply)?;
        response.ok()
    }

    pub async fn configure(&self, pin: u8, direction: PinDirection) -> Result<(), GpioError> {
        self.request(&GpioCommand::Configure { pin, direction })
            .await
            .map(|_| ())
    }

    pub async fn set(&self, pin: u8, value: i64) -> Result<(), GpioError> {
        if value != 0 && value != 1 {
            return Err(GpioError::InvalidValue(value));
        }
        self.request(&GpioCommand::Set { pin, value }).await.map(|_| ())
    }

    pub async fn get(&self, pin: u8) -> Result<i64, GpioError> {
        let response = self.request(&GpioCommand::Get { pin }).await?;
        response
            .value
            .ok_or_else(|| GpioError::Daemon("response carries no value".to_string()))
    }

    /// Read-then-write inversion; returns the new value.
    pub async fn toggle(&self, pin: u8) -> Result<i64, GpioError> {
        let current = self.get(pin).await?;
        let next = 1 - current.clamp(0, 1);
        self.set(pin, next).await?;
        Ok(next)
    }

    /// Every configured pin as the daemon reports it.
    pub async fn status(&self) -> Result<Vec<PinStatus>, GpioError> {
        let response = self.request(&GpioCommand::Status {}).await?;
        Ok(response.pins.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_serialize_to_the_daemon_wire_format() {
        let configure = GpioCommand::Configure {
            pin: 13,
            direction: PinDirection::Output,
        };
        assert_eq!(
            serde_json::to_string(&configure).unwrap(),
            r#"{"command":"configure","pin":13,"direction":"output"}"#
        );
        let set = GpioCommand::Set { pin: 13, value: 1 };
        assert_eq!(
            serde_json::to_string(&set).unwrap(),
            r#"{"command":"set","pin":13,"value":1}"#
        );
        let status = GpioCommand::Status {};
        assert_eq!(serde_json::to_string(&status).unwrap(), r#"{"command":"status"}"#);
    }

    #[test]
    fn error_responses_surface_the_daemon_message() {
        let response: GpioResponse =
            serde_json::from_str(r#"{"status":"error","message":"pin not configured"}"#).unwrap();
        let err = response.ok().unwrap_err();
        assert!(matches!(err, GpioError::Daemon(msg) if msg == "pin not configured"));
    }

    #[test]
    fn set_rejects_non_binary_values() {
        let client = GpioClient::new("127.0.0.1:1");
        let err = futures::executor::block_on(client.set(4, 7)).unwrap_err();
        assert!(matches!(err, GpioError::InvalidValue(7)));
    }
}
