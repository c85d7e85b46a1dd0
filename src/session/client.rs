//! Client Role
//!
//! Design Decision: Correlate responses through a pending-outbound table of
//! one-shot channels
//!
//! Rationale: Requests register their id and a `oneshot::Sender` before the
//! envelope is emitted; the receive side routes every inbound response to
//! the sender whose id matches. Out-of-order responses therefore complete
//! the right waiter, a cancelled or timed-out id simply vanishes from the
//! table, and late responses for unknown ids are dropped with a warning
//! instead of confusing anyone.
//!
//! Wire discipline: ids come from a per-session counter starting at 1 and
//! are never reused. Undecodable inbound traffic is fatal on the client
//! side (unlike the server, which answers -32700 and carries on): a peer
//! that emits garbage cannot be trusted to stay correlated.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{McpError, Result};
use crate::protocol::{
    methods, ClientCapabilities, ClientInfo, InitializeParams, InitializeResult, ServerCapabilities,
    ServerInfo, ToolCallParams, ToolDescriptor, ToolListResult, ToolResult, PROTOCOL_VERSION,
};
use crate::session::SessionState;
use crate::transport::Transport;
use crate::wire::{Envelope, Notification, Request, RequestId, Response};

/// Issues MCP method calls over one transport.
pub struct ClientSession<T: Transport> {
    transport: T,
    state: SessionState,
    next_id: i64,
    pending: HashMap<RequestId, oneshot::Sender<Response>>,
    server_capabilities: Option<ServerCapabilities>,
    server_info: Option<ServerInfo>,
    tools_changed: bool,
}

impl<T: Transport> ClientSession<T> {
    /// Build a client session over an established transport.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            state: SessionState::New,
            next_id: 1,
            pending: HashMap::new(),
            server_capabilities: None,
            server_info: None,
            tools_changed: false,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Server capabilities, available once initialized.
    pub fn server_capabilities(&self) -> Option<&ServerCapabilities> {
        self.server_capabilities.as_ref()
    }

    /// Server identity, available once initialized.
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    /// True when the server has signalled a tool-list change since the last
    /// [`ClientSession::clear_tools_changed`].
    pub fn tools_changed(&self) -> bool {
        self.tools_changed
    }

    /// Acknowledge a tool-list change signal.
    pub fn clear_tools_changed(&mut self) {
        self.tools_changed = false;
    }

    /// Perform the initialize handshake.
    ///
    /// Valid only in the new state; an error response from the server is
    /// fatal and closes the session.
    pub async fn initialize(&mut self, client_info: ClientInfo) -> Result<InitializeResult> {
        match self.state {
            SessionState::New => {}
            SessionState::Closed => return Err(McpError::SessionClosed),
            _ => return Err(McpError::AlreadyInitialized),
        }
        self.state = SessionState::Initializing;

        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info,
        };
        let response = self
            .call(methods::INITIALIZE, Some(serde_json::to_value(params)?))
            .await?;

        if let Some(error) = response.error {
            self.state = SessionState::Closed;
            return Err(McpError::Protocol(format!(
                "initialize failed: {} (code {})",
                error.message, error.code
            )));
        }

        let result: InitializeResult = serde_json::from_value(
            response
                .result
                .ok_or_else(|| McpError::Protocol("no result in initialize response".into()))?,
        )?;

        if result.protocol_version != PROTOCOL_VERSION {
            tracing::warn!(
                ours = PROTOCOL_VERSION,
                theirs = %result.protocol_version,
                "protocol version mismatch"
            );
        }

        self.server_capabilities = Some(result.capabilities.clone());
        self.server_info = Some(result.server_info.clone());
        self.state = SessionState::Ready;

        self.send(Notification::new(methods::NOTIFICATION_INITIALIZED, None).into())
            .await?;

        Ok(result)
    }

    /// Fetch the server's tool descriptors.
    pub async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>> {
        self.ensure_ready()?;
        let response = self.call(methods::TOOLS_LIST, None).await?;

        if let Some(error) = response.error {
            return Err(McpError::Protocol(format!(
                "tools/list failed: {} (code {})",
                error.message, error.code
            )));
        }

        let result: ToolListResult = serde_json::from_value(
            response
                .result
                .ok_or_else(|| McpError::Protocol("no result in tools/list response".into()))?,
        )?;
        Ok(result.tools)
    }

    /// Invoke a tool and await its result.
    ///
    /// An error-slot response surfaces as [`McpError::ToolCallFailed`]; a
    /// tool-reported failure arrives as an `Ok` result with `is_error` set.
    pub async fn invoke(&mut self, call: ToolCallParams) -> Result<ToolResult> {
        self.ensure_ready()?;
        let (id, receiver) = self
            .send_request(methods::TOOLS_CALL, Some(serde_json::to_value(call)?))
            .await?;
        let response = self.drive(&id, receiver).await?;
        Self::decode_tool_result(response)
    }

    /// Invoke a tool, giving up after `timeout`.
    ///
    /// On expiry the pending entry is cancelled and [`McpError::Timeout`]
    /// returned; a late response for that id will be dropped. The session
    /// stays usable.
    pub async fn invoke_with_timeout(
        &mut self,
        call: ToolCallParams,
        timeout: Duration,
    ) -> Result<ToolResult> {
        self.ensure_ready()?;
        let (id, receiver) = self
            .send_request(methods::TOOLS_CALL, Some(serde_json::to_value(call)?))
            .await?;

        match tokio::time::timeout(timeout, self.drive(&id, receiver)).await {
            Ok(response) => Self::decode_tool_result(response?),
            Err(_) => {
                self.cancel(&id);
                Err(McpError::Timeout)
            }
        }
    }

    /// Drop a pending request; a later response for it will be discarded.
    pub fn cancel(&mut self, id: &RequestId) {
        if self.pending.remove(id).is_some() {
            tracing::debug!(%id, "cancelled pending request");
        }
    }

    fn decode_tool_result(response: Response) -> Result<ToolResult> {
        if let Some(error) = response.error {
            return Err(McpError::ToolCallFailed {
                code: error.code,
                message: error.message,
            });
        }
        let result: ToolResult = serde_json::from_value(
            response
                .result
                .ok_or_else(|| McpError::Protocol("no result in tools/call response".into()))?,
        )?;
        Ok(result)
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state {
            SessionState::Ready => Ok(()),
            SessionState::Closed => Err(McpError::SessionClosed),
            SessionState::New | SessionState::Initializing => Err(McpError::NotInitialized),
        }
    }

    fn next_request_id(&mut self) -> RequestId {
        let id = RequestId::Num(self.next_id);
        self.next_id += 1;
        id
    }

    /// Register the id in the pending table, then emit the request.
    async fn send_request(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(RequestId, oneshot::Receiver<Response>)> {
        let id = self.next_request_id();
        let (sender, receiver) = oneshot::channel();
        self.pending.insert(id.clone(), sender);

        let request = Request::new(id.clone(), method, params);
        if let Err(e) = self.transport.send(&request.into()).await {
            self.pending.remove(&id);
            self.state = SessionState::Closed;
            return Err(e.into());
        }
        Ok((id, receiver))
    }

    /// Emit one envelope; a send failure is fatal to the session.
    async fn send(&mut self, envelope: Envelope) -> Result<()> {
        if let Err(e) = self.transport.send(&envelope).await {
            tracing::warn!(error = %e, "send failed; closing session");
            self.state = SessionState::Closed;
            return Err(e.into());
        }
        Ok(())
    }

    async fn call(&mut self, method: &str, params: Option<Value>) -> Result<Response> {
        let (id, receiver) = self.send_request(method, params).await?;
        self.drive(&id, receiver).await
    }

    /// Pump the transport until the response for `id` arrives. Responses
    /// for other ids complete their own waiters along the way.
    async fn drive(
        &mut self,
        id: &RequestId,
        mut receiver: oneshot::Receiver<Response>,
    ) -> Result<Response> {
        loop {
            if let Ok(response) = receiver.try_recv() {
                return Ok(response);
            }

            match self.transport.receive().await {
                Ok(Some(envelope)) => self.route(envelope),
                Ok(None) => {
                    tracing::debug!("peer closed the connection");
                    self.state = SessionState::Closed;
                    self.pending.clear();
                    return Err(McpError::SessionClosed);
                }
                Err(fatal) => {
                    // Wire and framing errors are fatal on the client side.
                    tracing::warn!(error = %fatal, waiting_for = %id, "transport failed");
                    self.state = SessionState::Closed;
                    self.pending.clear();
                    return Err(fatal.into());
                }
            }
        }
    }

    fn route(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::Response(response) => match self.pending.remove(&response.id) {
                Some(waiter) => {
                    // The receiver may be gone if the call was cancelled
                    // between registration and arrival.
                    let _ = waiter.send(response);
                }
                None => {
                    tracing::warn!(id = %response.id, "dropping response with unknown id");
                }
            },
            Envelope::Notification(notification) => {
                if notification.method == methods::NOTIFICATION_TOOLS_LIST_CHANGED {
                    tracing::debug!("server tool list changed");
                    self.tools_changed = true;
                } else {
                    tracing::debug!(method = %notification.method, "ignoring notification");
                }
            }
            Envelope::Request(request) => {
                tracing::warn!(method = %request.method, "dropping unexpected request from peer");
            }
        }
    }
}
