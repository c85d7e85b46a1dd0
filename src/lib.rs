// Library interface for toolbridge
// A bidirectional Model Context Protocol runtime: JSON-RPC 2.0 engine,
// three interchangeable transports (stdio, WebSocket, HTTP+SSE), server and
// client session roles, a tool registry, a consent-mediated security guard,
// and a structural schema validator.
//
// Concrete tools, CLI surfaces, and logging setup belong to the host; this
// crate only defines how a tool is registered, guarded, and invoked.

pub mod error;
pub mod guard;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod session;
pub mod transport;
pub mod wire;

// Re-export commonly used types for convenience
pub use error::{McpError, Result};
pub use guard::{
    AuditEntry, ConsentHandler, Decision, GuardError, PermissionKind, PermissionRequest, Policy,
    SecurityGuard,
};
pub use protocol::{
    ClientCapabilities, ClientInfo, ContentItem, InitializeParams, InitializeResult,
    ServerCapabilities, ServerInfo, ToolCallParams, ToolCapability, ToolDescriptor,
    ToolListResult, ToolResult, PROTOCOL_VERSION,
};
pub use registry::{RegisteredTool, ToolContext, ToolError, ToolHandler, ToolRegistry};
pub use schema::{validate, ValidationError};
pub use session::{ClientSession, ServerSession, SessionState};
pub use transport::{
    HttpSseTransport, StdioTransport, Transport, TransportError, WebSocketTransport,
};
pub use wire::{
    codes, DecodeError, Envelope, ErrorObject, Notification, Request, RequestId, Response,
};
