//! Server Role
//!
//! Design Decision: Single-threaded cooperative dispatch per session
//!
//! Rationale: The event loop receives one envelope, dispatches it to
//! completion, and only then reads the next. That makes envelope writes
//! trivially atomic, keeps response ordering per request id correct by
//! construction, and needs no locking around the transport. Hosts that want
//! concurrency run many sessions side by side; the registry and guard are
//! shared safely across them.
//!
//! Error routing: peer-induced conditions never escape as panics or session
//! failures. Undecodable payloads are answered with -32700/-32600 and a null
//! id; state violations with -32600; unknown methods with -32601; bad
//! params with -32602; unknown tools with -32000; handler failures with
//! -32001. Only transport-level faults end the loop.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{McpError, Result};
use crate::guard::SecurityGuard;
use crate::protocol::{
    methods, InitializeParams, InitializeResult, ServerCapabilities, ServerInfo, ToolCallParams,
    ToolListResult, PROTOCOL_VERSION,
};
use crate::registry::{ToolContext, ToolRegistry};
use crate::schema;
use crate::session::SessionState;
use crate::transport::{Transport, TransportError};
use crate::wire::{codes, Envelope, ErrorObject, Notification, Request, RequestId, Response};

/// Answers MCP method calls over one transport.
pub struct ServerSession<T: Transport> {
    transport: T,
    registry: Arc<ToolRegistry>,
    guard: Arc<SecurityGuard>,
    info: ServerInfo,
    root: PathBuf,
    state: SessionState,
    client_info: Option<InitializeParams>,
    advertised_revision: u64,
}

impl<T: Transport> ServerSession<T> {
    /// Build a server session over an established transport.
    pub fn new(
        transport: T,
        registry: Arc<ToolRegistry>,
        guard: Arc<SecurityGuard>,
        info: ServerInfo,
    ) -> Self {
        Self {
            transport,
            registry,
            guard,
            info,
            root: PathBuf::from("."),
            state: SessionState::New,
            client_info: None,
            advertised_revision: 0,
        }
    }

    /// Set the filesystem root handed to tool contexts.
    pub fn with_root(mut self, root: PathBuf) -> Self {
        self.root = root;
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The peer's initialize parameters, once the handshake happened.
    pub fn client_info(&self) -> Option<&InitializeParams> {
        self.client_info.as_ref()
    }

    /// Run the event loop until the peer closes the connection.
    ///
    /// Returns `Ok(())` on a clean end-of-stream; transport faults are
    /// returned after the session transitions to closed.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            match self.transport.receive().await {
                Ok(Some(envelope)) => self.dispatch(envelope).await?,
                Ok(None) => {
                    tracing::debug!("peer closed the connection");
                    self.state = SessionState::Closed;
                    return Ok(());
                }
                Err(TransportError::Decode(decode_error)) => {
                    // The framing survived; answer and keep the session.
                    tracing::debug!(error = %decode_error, "undecodable payload");
                    let response = Response::error(
                        RequestId::Null,
                        ErrorObject::new(decode_error.code(), decode_error.wire_message()),
                    );
                    self.send(response.into()).await?;
                }
                Err(fatal) => {
                    tracing::warn!(error = %fatal, "transport failed; closing session");
                    self.state = SessionState::Closed;
                    return Err(fatal.into());
                }
            }

            self.maybe_notify_tools_changed().await?;
        }
    }

    async fn dispatch(&mut self, envelope: Envelope) -> Result<()> {
        match envelope {
            Envelope::Request(request) => self.handle_request(request).await,
            Envelope::Notification(notification) => {
                // Unknown notifications are a no-op, not an error.
                tracing::debug!(method = %notification.method, "notification received");
                Ok(())
            }
            Envelope::Response(response) => {
                tracing::warn!(id = %response.id, "dropping unexpected response");
                Ok(())
            }
        }
    }

    async fn handle_request(&mut self, request: Request) -> Result<()> {
        tracing::debug!(method = %request.method, id = %request.id, state = %self.state, "request");

        if request.method == methods::INITIALIZE {
            return self.handle_initialize(request).await;
        }

        if self.state != SessionState::Ready {
            return self
                .reply_error(
                    request.id,
                    ErrorObject::new(codes::INVALID_REQUEST, "Invalid request"),
                )
                .await;
        }

        match request.method.as_str() {
            methods::TOOLS_LIST => self.handle_tools_list(request).await,
            methods::TOOLS_CALL => self.handle_tools_call(request).await,
            _ => {
                self.reply_error(
                    request.id,
                    ErrorObject::new(codes::METHOD_NOT_FOUND, "Method not found"),
                )
                .await
            }
        }
    }

    async fn handle_initialize(&mut self, request: Request) -> Result<()> {
        if self.state != SessionState::New {
            return self
                .reply_error(
                    request.id,
                    ErrorObject::new(codes::INVALID_REQUEST, "Invalid request"),
                )
                .await;
        }
        self.state = SessionState::Initializing;

        let params = match request.params {
            Some(params) => match serde_json::from_value::<InitializeParams>(params) {
                Ok(params) => Some(params),
                Err(e) => {
                    self.state = SessionState::New;
                    return self
                        .reply_error(
                            request.id,
                            ErrorObject::new(
                                codes::INVALID_PARAMS,
                                format!("Invalid params: {}", e),
                            ),
                        )
                        .await;
                }
            },
            None => None,
        };

        if let Some(params) = &params {
            tracing::debug!(
                client = %params.client_info.name,
                version = %params.client_info.version,
                protocol = %params.protocol_version,
                "initialize"
            );
        }
        self.client_info = params;

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities::tools_only(),
            server_info: self.info.clone(),
        };
        let payload = serde_json::to_value(result)?;
        self.send(Response::success(request.id, payload).into())
            .await?;

        self.state = SessionState::Ready;
        self.advertised_revision = self.registry.revision();
        Ok(())
    }

    async fn handle_tools_list(&mut self, request: Request) -> Result<()> {
        let result = ToolListResult {
            tools: self.registry.list(),
        };
        let payload = serde_json::to_value(result)?;
        self.send(Response::success(request.id, payload).into())
            .await
    }

    async fn handle_tools_call(&mut self, request: Request) -> Result<()> {
        let params = match request
            .params
            .map(serde_json::from_value::<ToolCallParams>)
            .transpose()
        {
            Ok(Some(params)) => params,
            Ok(None) => {
                return self
                    .reply_error(
                        request.id,
                        ErrorObject::new(codes::INVALID_PARAMS, "Invalid params: missing params"),
                    )
                    .await
            }
            Err(e) => {
                return self
                    .reply_error(
                        request.id,
                        ErrorObject::new(codes::INVALID_PARAMS, format!("Invalid params: {}", e)),
                    )
                    .await
            }
        };

        let tool = match self.registry.lookup(&params.name) {
            Some(tool) => tool,
            None => {
                return self
                    .reply_error(
                        request.id,
                        ErrorObject::new(codes::INVALID_TOOL, "Tool not found"),
                    )
                    .await
            }
        };

        let arguments = params
            .arguments
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));

        if !tool.descriptor.input_schema.is_null() {
            if let Err(violation) = schema::validate(&tool.descriptor.input_schema, &arguments) {
                return self
                    .reply_error(
                        request.id,
                        ErrorObject::new(
                            codes::INVALID_PARAMS,
                            format!("Invalid params: {}", violation),
                        ),
                    )
                    .await;
            }
        }

        let context = ToolContext::new(
            request.id.clone(),
            Arc::clone(&self.guard),
            self.root.clone(),
        );

        match (tool.handler)(context, arguments).await {
            Ok(result) => {
                let payload = serde_json::to_value(result)?;
                self.send(Response::success(request.id, payload).into())
                    .await
            }
            Err(failure) => {
                tracing::debug!(tool = %params.name, error = %failure, "tool handler failed");
                self.reply_error(
                    request.id,
                    ErrorObject::new(codes::TOOL_EXECUTION_ERROR, failure.to_string()),
                )
                .await
            }
        }
    }

    async fn maybe_notify_tools_changed(&mut self) -> Result<()> {
        if self.state != SessionState::Ready {
            return Ok(());
        }
        let revision = self.registry.revision();
        if revision != self.advertised_revision {
            self.advertised_revision = revision;
            tracing::debug!(revision, "advertising tool list change");
            self.send(Notification::new(methods::NOTIFICATION_TOOLS_LIST_CHANGED, None).into())
                .await?;
        }
        Ok(())
    }

    async fn reply_error(&mut self, id: RequestId, error: ErrorObject) -> Result<()> {
        self.send(Response::error(id, error).into()).await
    }

    /// Emit one envelope; a send failure is fatal to the session.
    async fn send(&mut self, envelope: Envelope) -> Result<()> {
        if let Err(e) = self.transport.send(&envelope).await {
            tracing::warn!(error = %e, "send failed; closing session");
            self.state = SessionState::Closed;
            return Err(McpError::Transport(e));
        }
        Ok(())
    }
}
