//! Transport carriers for the envelope.
//!
//! All three carry the same JSON envelope: one per WebSocket text frame, one
//! per HTTP request/response body, one per newline-terminated line.

pub mod http;
pub mod line;
pub mod ws;
