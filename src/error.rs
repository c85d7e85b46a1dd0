// Centralized error handling using thiserror for type-safe error management
//
// Design Decision: One crate-level error umbrella over per-subsystem enums
//
// Rationale: The wire codec, transports, schema validator, and guard each
// have their own typed failures with their own recovery rules; McpError
// gathers them behind #[from] conversions so session-level code can use `?`
// while hosts can still match on the originating subsystem.
//
// Propagation policy: peer-induced conditions never panic; they map to one
// of these variants and become either an emitted error response (server) or
// a returned failure (client).

use thiserror::Error;

use crate::guard::GuardError;
use crate::schema::ValidationError;
use crate::transport::TransportError;
use crate::wire::DecodeError;

/// Crate-level error for session and registry operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// The transport failed or the peer violated the framing protocol.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A payload could not be decoded into an envelope.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The peer violated the protocol above the framing layer.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// `initialize` called on a session past the new state.
    #[error("Session already initialized")]
    AlreadyInitialized,

    /// Operation requires a completed handshake.
    #[error("Session not initialized")]
    NotInitialized,

    /// Operation on a session that reached the closed state.
    #[error("Session closed")]
    SessionClosed,

    /// The server answered a call with its error slot populated.
    #[error("Tool call failed: {message} (code {code})")]
    ToolCallFailed {
        /// JSON-RPC error code from the response
        code: i32,
        /// Error message from the response
        message: String,
    },

    /// Registration under a name that is already taken.
    #[error("Tool already registered: {0}")]
    AlreadyRegistered(String),

    /// Registration under an unusable name.
    #[error("Invalid tool name: {0:?}")]
    InvalidToolName(String),

    /// A host-imposed deadline expired; the pending call was cancelled.
    #[error("Request timed out")]
    Timeout,

    /// The security guard refused or could not resolve a permission.
    #[error(transparent)]
    Guard(#[from] GuardError),

    /// Arguments failed schema validation.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for Result with McpError.
pub type Result<T> = std::result::Result<T, McpError>;
