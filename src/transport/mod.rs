//! Transport Layer
//!
//! Design Decision: One decoupled send/receive trait over three framings
//!
//! Rationale: MCP runs over newline-delimited stdio, WebSocket text frames,
//! and HTTP+SSE. The protocol is bidirectional (either side may emit a
//! notification at any time, responses may arrive out of order), so the
//! transport contract is a pair of independent operations rather than a
//! coupled request/response call. Sessions stay transport-agnostic.
//!
//! Trade-offs:
//! - Abstraction vs Simplicity: the trait adds indirection but lets one
//!   session implementation serve all three framings
//! - Async Trait: `async_trait` for async methods behind generics or dyn
//!
//! Failure semantics shared by all implementations:
//! - connect/handshake failure → [`TransportError::ConnectionFailed`]
//! - peer-initiated close → `Ok(None)` from `receive`, sticky thereafter
//! - malformed frame → [`TransportError::ProtocolViolation`], after which
//!   the session must be treated as closed
//! - a well-framed payload that fails envelope decoding →
//!   [`TransportError::Decode`], which a server answers with -32700/-32600
//!   and a client treats as fatal

pub mod sse;
pub mod stdio;
pub mod websocket;

use async_trait::async_trait;
use thiserror::Error;

use crate::wire::{DecodeError, Envelope};

pub use sse::HttpSseTransport;
pub use stdio::StdioTransport;
pub use websocket::WebSocketTransport;

/// Transport-level failure.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connect or handshake failed; no session was established.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The peer violated the framing protocol; the stream is unusable.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// A complete frame arrived but its payload is not a valid envelope.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The underlying stream failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Envelope serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Operation on a transport that already reached end-of-stream.
    #[error("Transport closed")]
    Closed,
}

/// A bidirectional, message-oriented channel carrying envelopes.
///
/// A transport is owned exclusively by one session. `send` emits one
/// complete envelope atomically; a failure mid-send leaves the stream in an
/// indeterminate state and the session must transition to closed. `receive`
/// suspends until one complete envelope is available and returns `Ok(None)`
/// exactly at end-of-stream (and on every call after it).
#[async_trait]
pub trait Transport: Send {
    /// Serialize and emit one envelope.
    async fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError>;

    /// Receive the next envelope, or `None` at end-of-stream.
    async fn receive(&mut self) -> Result<Option<Envelope>, TransportError>;
}
