//! Tool Registry
//!
//! Design Decision: Handlers as first-class async function values stored
//! alongside their descriptors
//!
//! Rationale: A tool is a name, a schema, and a callable. Storing the
//! callable as `Arc<dyn Fn(...) -> BoxFuture<...>>` keeps the registry
//! transport- and dispatch-agnostic: the server session looks a handler up,
//! builds a per-invocation context, and awaits the returned future. The
//! registry never runs anything itself.
//!
//! Trade-offs:
//! - Insertion order: descriptors live in a Vec (listing order is a protocol
//!   guarantee) with a name index beside it for O(1) lookup
//! - Sharing: the registry is `Send + Sync` behind an interior RwLock so
//!   several sessions can serve one registry; lookups never block on I/O

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;

use crate::error::{McpError, Result};
use crate::guard::{GuardError, PermissionRequest, SecurityGuard};
use crate::protocol::{ToolDescriptor, ToolResult};
use crate::wire::RequestId;

/// Failure produced by a tool handler.
///
/// The server surfaces these as JSON-RPC error responses with code `-32001`;
/// the message is this error's `Display` output, which names the failure
/// kind (and, for guard errors, the denied permission).
#[derive(Debug, Error)]
pub enum ToolError {
    /// The security guard refused an operation.
    #[error(transparent)]
    Guard(#[from] GuardError),

    /// Handler rejected the (schema-valid) arguments.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Handler failed while doing its work.
    #[error("Tool failed: {0}")]
    Failed(String),

    /// IO failure inside the handler.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON failure inside the handler.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Per-invocation context handed to a tool handler.
///
/// A fresh context is built for every `tools/call`; it owns nothing shared
/// mutable and is dropped when the handler returns, on every exit path.
#[derive(Debug, Clone)]
pub struct ToolContext {
    request_id: RequestId,
    guard: Arc<SecurityGuard>,
    root: PathBuf,
}

impl ToolContext {
    /// Build a context for one invocation.
    pub fn new(request_id: RequestId, guard: Arc<SecurityGuard>, root: PathBuf) -> Self {
        Self {
            request_id,
            guard,
            root,
        }
    }

    /// Id of the request this invocation answers.
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// The security guard mediating this invocation's side effects.
    pub fn guard(&self) -> &SecurityGuard {
        &self.guard
    }

    /// The host's filesystem root for this invocation.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ask the guard for a permission; shorthand for handlers.
    pub fn require(&self, request: &PermissionRequest) -> std::result::Result<(), ToolError> {
        self.guard.require(request).map_err(ToolError::from)
    }
}

/// The callable stored for each registered tool.
pub type ToolHandler = Arc<
    dyn Fn(ToolContext, Value) -> BoxFuture<'static, std::result::Result<ToolResult, ToolError>>
        + Send
        + Sync,
>;

/// A descriptor together with its handler, as returned by lookup.
#[derive(Clone)]
pub struct RegisteredTool {
    /// Advertised metadata
    pub descriptor: ToolDescriptor,
    /// The callable
    pub handler: ToolHandler,
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct RegistryInner {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
    revision: u64,
}

/// Maps tool names to handlers and metadata.
///
/// Registration order is preserved and is the order `tools/list` advertises.
/// The revision counter increments on every successful registration; server
/// sessions use it to emit `notifications/tools/list_changed`.
#[derive(Default)]
pub struct ToolRegistry {
    inner: RwLock<RegistryInner>,
}

impl ToolRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool with no description.
    pub fn register<F, Fut>(&self, name: &str, input_schema: Value, handler: F) -> Result<()>
    where
        F: Fn(ToolContext, Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = std::result::Result<ToolResult, ToolError>>
            + Send
            + 'static,
    {
        self.insert(
            ToolDescriptor {
                name: name.to_string(),
                description: None,
                input_schema,
            },
            Arc::new(move |ctx, args| Box::pin(handler(ctx, args))),
        )
    }

    /// Register a tool with a human-readable description.
    pub fn register_with_description<F, Fut>(
        &self,
        name: &str,
        description: &str,
        input_schema: Value,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(ToolContext, Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = std::result::Result<ToolResult, ToolError>>
            + Send
            + 'static,
    {
        self.insert(
            ToolDescriptor {
                name: name.to_string(),
                description: Some(description.to_string()),
                input_schema,
            },
            Arc::new(move |ctx, args| Box::pin(handler(ctx, args))),
        )
    }

    fn insert(&self, descriptor: ToolDescriptor, handler: ToolHandler) -> Result<()> {
        if descriptor.name.is_empty() {
            return Err(McpError::InvalidToolName(descriptor.name));
        }

        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.index.contains_key(&descriptor.name) {
            return Err(McpError::AlreadyRegistered(descriptor.name));
        }

        tracing::debug!(tool = %descriptor.name, "registered tool");
        let slot = inner.tools.len();
        inner.index.insert(descriptor.name.clone(), slot);
        inner.tools.push(RegisteredTool {
            descriptor,
            handler,
        });
        inner.revision += 1;
        Ok(())
    }

    /// Find a tool by name.
    pub fn lookup(&self, name: &str) -> Option<RegisteredTool> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.index.get(name).map(|&slot| inner.tools[slot].clone())
    }

    /// All descriptors, in registration order.
    pub fn list(&self) -> Vec<ToolDescriptor> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.tools.iter().map(|t| t.descriptor.clone()).collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).tools.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Monotone counter incremented by every registration.
    pub fn revision(&self) -> u64 {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).revision
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("len", &self.len())
            .field("revision", &self.revision())
            .finish()
    }
}
