//! RPC framework shared by every servis service.
//!
//! The crate provides the wire envelope, the tool registry with
//! JSON-schema-described parameters, the server and client runtimes, and the
//! three transports (WebSocket, HTTP, line-delimited JSON) that carry the
//! same envelope.

pub mod client;
pub mod envelope;
pub mod error;
pub mod schema;
pub mod server;
pub mod tool;
pub mod transport;

pub use client::{HttpRpcClient, RpcClient, ServiceCaller};
pub use envelope::{Envelope, EnvelopeKind, ErrorBody, ErrorCode};
pub use error::RpcError;
pub use server::ToolServer;
pub use tool::{input_schema_for, Tool, ToolError, ToolRegistry};

/// Default timeout applied to client calls that do not override it.
pub const DEFAULT_CALL_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Default cap on concurrently running tool handlers in a server.
pub const DEFAULT_HANDLER_CONCURRENCY: usize = 64;
