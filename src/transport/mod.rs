//! Transport layer: HTTP server, HTTP client and the binary wire codec.
//!
//! Bodies on the wire are bincode; error bodies are JSON `{ "detail": ... }`.

pub mod client;
pub mod codec;
pub mod server;

pub use client::RemoteServer;
pub use codec::WireError;
pub use server::{router, ErrorResponse, HealthResponse, ServerState};
