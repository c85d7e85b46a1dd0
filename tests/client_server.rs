//! Both session roles wired together over in-memory pipes, plus raw-peer
//! tests for client correlation edge cases (out-of-order responses, unknown
//! ids, timeouts).

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};

use toolbridge::registry::ToolError;
use toolbridge::transport::StdioTransport;
use toolbridge::{
    ClientInfo, ClientSession, ContentItem, McpError, PermissionKind, PermissionRequest, Policy,
    SecurityGuard, ServerInfo, ServerSession, SessionState, ToolCallParams, ToolRegistry,
    ToolResult,
};

type PipeTransport = StdioTransport<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

fn wired_pair(
    registry: Arc<ToolRegistry>,
    guard: Arc<SecurityGuard>,
) -> (
    ClientSession<PipeTransport>,
    tokio::task::JoinHandle<toolbridge::Result<()>>,
) {
    let (server_io, client_io) = tokio::io::duplex(1 << 16);

    let (server_read, server_write) = tokio::io::split(server_io);
    let mut server = ServerSession::new(
        StdioTransport::new(server_read, server_write),
        registry,
        guard,
        ServerInfo::new("paired", "0.2.0"),
    );
    let server = tokio::spawn(async move { server.run().await });

    let (client_read, client_write) = tokio::io::split(client_io);
    let client = ClientSession::new(StdioTransport::new(client_read, client_write));
    (client, server)
}

fn echo_registry() -> Arc<ToolRegistry> {
    let registry = Arc::new(ToolRegistry::new());
    registry
        .register_with_description(
            "echo",
            "Echo a message back",
            json!({
                "type": "object",
                "required": ["msg"],
                "properties": {"msg": {"type": "string"}}
            }),
            |_ctx, args| async move {
                let msg = args
                    .get("msg")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ToolError::InvalidArguments("msg is required".into()))?;
                Ok(ToolResult::text(msg.to_string()))
            },
        )
        .unwrap();
    registry
}

fn client_info() -> ClientInfo {
    ClientInfo {
        name: "test-client".to_string(),
        version: "1".to_string(),
    }
}

#[tokio::test]
async fn full_session_handshake_list_and_invoke() {
    let registry = echo_registry();
    let guard = Arc::new(SecurityGuard::new(Policy::permissive()));
    let (mut client, server) = wired_pair(registry, guard);

    assert_eq!(client.state(), SessionState::New);
    let init = client.initialize(client_info()).await.unwrap();
    assert_eq!(init.server_info.name, "paired");
    assert_eq!(init.protocol_version, "2024-11-05");
    assert_eq!(client.state(), SessionState::Ready);
    assert!(client
        .server_capabilities()
        .unwrap()
        .tools
        .as_ref()
        .unwrap()
        .list_changed
        .unwrap());

    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "echo");
    assert_eq!(tools[0].description.as_deref(), Some("Echo a message back"));

    let result = client
        .invoke(ToolCallParams::new("echo").with_arguments(json!({"msg": "hi"})))
        .await
        .unwrap();
    assert_eq!(result.content, vec![ContentItem::text("hi")]);
    assert_eq!(result.is_error, None);

    drop(client);
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn operations_before_initialize_are_rejected() {
    let (mut client, server) = wired_pair(
        Arc::new(ToolRegistry::new()),
        Arc::new(SecurityGuard::new(Policy::permissive())),
    );

    let outcome = client.list_tools().await;
    assert!(matches!(outcome, Err(McpError::NotInitialized)));

    let outcome = client.invoke(ToolCallParams::new("echo")).await;
    assert!(matches!(outcome, Err(McpError::NotInitialized)));

    drop(client);
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn second_initialize_fails_locally() {
    let (mut client, server) = wired_pair(
        Arc::new(ToolRegistry::new()),
        Arc::new(SecurityGuard::new(Policy::permissive())),
    );

    client.initialize(client_info()).await.unwrap();
    let outcome = client.initialize(client_info()).await;
    assert!(matches!(outcome, Err(McpError::AlreadyInitialized)));
    assert_eq!(client.state(), SessionState::Ready);

    drop(client);
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn unknown_tool_surfaces_invalid_tool_code() {
    let (mut client, server) = wired_pair(
        Arc::new(ToolRegistry::new()),
        Arc::new(SecurityGuard::new(Policy::permissive())),
    );
    client.initialize(client_info()).await.unwrap();

    let outcome = client.invoke(ToolCallParams::new("nope")).await;
    match outcome {
        Err(McpError::ToolCallFailed { code, message }) => {
            assert_eq!(code, -32000);
            assert_eq!(message, "Tool not found");
        }
        other => panic!("expected ToolCallFailed, got {:?}", other),
    }

    drop(client);
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn schema_violation_surfaces_invalid_params_code() {
    let (mut client, server) = wired_pair(
        echo_registry(),
        Arc::new(SecurityGuard::new(Policy::permissive())),
    );
    client.initialize(client_info()).await.unwrap();

    let outcome = client
        .invoke(ToolCallParams::new("echo").with_arguments(json!({"msg": 42})))
        .await;
    match outcome {
        Err(McpError::ToolCallFailed { code, .. }) => assert_eq!(code, -32602),
        other => panic!("expected ToolCallFailed, got {:?}", other),
    }

    drop(client);
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn denied_permission_surfaces_tool_error_and_audit_entry() {
    let registry = Arc::new(ToolRegistry::new());
    registry
        .register("spawn", json!(null), |ctx, _args| async move {
            ctx.require(
                &PermissionRequest::new(PermissionKind::ProcessSpawn)
                    .with_resource("/bin/sh")
                    .with_tool("spawn"),
            )?;
            Ok(ToolResult::text("spawned"))
        })
        .unwrap();
    let guard = Arc::new(SecurityGuard::new(Policy::safe_defaults()));
    let (mut client, server) = wired_pair(registry, Arc::clone(&guard));
    client.initialize(client_info()).await.unwrap();

    let outcome = client.invoke(ToolCallParams::new("spawn")).await;
    match outcome {
        Err(McpError::ToolCallFailed { code, message }) => {
            assert_eq!(code, -32001);
            assert!(message.contains("process_spawn"));
        }
        other => panic!("expected ToolCallFailed, got {:?}", other),
    }

    let log = guard.audit_log();
    assert_eq!(log.len(), 1);
    assert!(!log[0].granted);

    drop(client);
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn request_ids_are_unique_and_monotonic() {
    let registry = Arc::new(ToolRegistry::new());
    registry
        .register("whoami", json!(null), |ctx, _args| async move {
            Ok(ToolResult::text(ctx.request_id().to_string()))
        })
        .unwrap();
    let (mut client, server) = wired_pair(
        registry,
        Arc::new(SecurityGuard::new(Policy::permissive())),
    );
    client.initialize(client_info()).await.unwrap();

    let mut seen = Vec::new();
    for _ in 0..3 {
        let result = client.invoke(ToolCallParams::new("whoami")).await.unwrap();
        match &result.content[0] {
            ContentItem::Text { text } => seen.push(text.clone()),
            other => panic!("expected text, got {:?}", other),
        }
    }

    // Id 1 went to initialize; the three calls used 2, 3, 4.
    assert_eq!(seen, vec!["2", "3", "4"]);

    drop(client);
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn list_changed_sets_client_flag() {
    let registry = Arc::new(ToolRegistry::new());
    let (mut client, server) = wired_pair(
        Arc::clone(&registry),
        Arc::new(SecurityGuard::new(Policy::permissive())),
    );
    client.initialize(client_info()).await.unwrap();
    assert!(!client.tools_changed());

    registry
        .register("late", json!(null), |_ctx, _args| async {
            Ok(ToolResult::text("late"))
        })
        .unwrap();

    // The notification is emitted after the server handles the next
    // envelope, so it is routed while the following call drives the
    // transport.
    client.list_tools().await.unwrap();
    client.list_tools().await.unwrap();
    assert!(client.tools_changed());

    client.clear_tools_changed();
    assert!(!client.tools_changed());

    drop(client);
    server.await.unwrap().unwrap();
}

// ---------------------------------------------------------------------------
// Raw-peer tests: the "server" is the test itself speaking JSON lines, which
// lets it misbehave in ways a real ServerSession never would.
// ---------------------------------------------------------------------------

struct RawPeer {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl RawPeer {
    async fn read_json(&mut self) -> Value {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap();
        serde_json::from_str(line.trim()).unwrap()
    }

    async fn send_json(&mut self, value: &Value) {
        self.writer
            .write_all(value.to_string().as_bytes())
            .await
            .unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    /// Answer one initialize request the way a well-behaved server would.
    async fn answer_initialize(&mut self) {
        let request = self.read_json().await;
        assert_eq!(request["method"], json!("initialize"));
        self.send_json(&json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "result": {
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {"listChanged": true}, "resources": null},
                "serverInfo": {"name": "raw", "version": "0"}
            }
        }))
        .await;
        let initialized = self.read_json().await;
        assert_eq!(initialized["method"], json!("notifications/initialized"));
    }
}

fn raw_pair() -> (ClientSession<PipeTransport>, RawPeer) {
    let (client_io, peer_io) = tokio::io::duplex(1 << 16);
    let (client_read, client_write) = tokio::io::split(client_io);
    let client = ClientSession::new(StdioTransport::new(client_read, client_write));
    let (peer_read, peer_write) = tokio::io::split(peer_io);
    (
        client,
        RawPeer {
            reader: BufReader::new(peer_read),
            writer: peer_write,
        },
    )
}

#[tokio::test]
async fn unknown_id_responses_are_dropped() {
    let (mut client, mut peer) = raw_pair();

    let driver = tokio::spawn(async move {
        peer.answer_initialize().await;

        let request = peer.read_json().await;
        assert_eq!(request["method"], json!("tools/list"));

        // A response nobody asked for, then the real one.
        peer.send_json(&json!({
            "jsonrpc": "2.0",
            "id": 999,
            "result": {"tools": [{"name": "ghost", "inputSchema": null}]}
        }))
        .await;
        peer.send_json(&json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "result": {"tools": []}
        }))
        .await;
        peer
    });

    client.initialize(client_info()).await.unwrap();
    let tools = client.list_tools().await.unwrap();
    assert!(tools.is_empty());

    driver.await.unwrap();
}

#[tokio::test]
async fn timeout_cancels_pending_and_late_response_is_dropped() {
    let (mut client, mut peer) = raw_pair();

    let driver = tokio::spawn(async move {
        peer.answer_initialize().await;

        // First call: never answered in time.
        let slow = peer.read_json().await;
        assert_eq!(slow["method"], json!("tools/call"));

        // Second call: deliver the stale response first, then the real one.
        let retry = peer.read_json().await;
        peer.send_json(&json!({
            "jsonrpc": "2.0",
            "id": slow["id"],
            "result": {"content": [{"type": "text", "text": "stale"}]}
        }))
        .await;
        peer.send_json(&json!({
            "jsonrpc": "2.0",
            "id": retry["id"],
            "result": {"content": [{"type": "text", "text": "fresh"}]}
        }))
        .await;
        peer
    });

    client.initialize(client_info()).await.unwrap();

    let outcome = client
        .invoke_with_timeout(
            ToolCallParams::new("slow"),
            Duration::from_millis(50),
        )
        .await;
    assert!(matches!(outcome, Err(McpError::Timeout)));
    assert_eq!(client.state(), SessionState::Ready);

    let result = client.invoke(ToolCallParams::new("slow")).await.unwrap();
    assert_eq!(result.content, vec![ContentItem::text("fresh")]);

    driver.await.unwrap();
}

#[tokio::test]
async fn initialize_error_response_closes_the_session() {
    let (mut client, mut peer) = raw_pair();

    let driver = tokio::spawn(async move {
        let request = peer.read_json().await;
        peer.send_json(&json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "error": {"code": -32603, "message": "server on fire"}
        }))
        .await;
        peer
    });

    let outcome = client.initialize(client_info()).await;
    assert!(matches!(outcome, Err(McpError::Protocol(_))));
    assert_eq!(client.state(), SessionState::Closed);

    let outcome = client.list_tools().await;
    assert!(matches!(outcome, Err(McpError::SessionClosed)));

    driver.await.unwrap();
}

#[tokio::test]
async fn undecodable_inbound_traffic_is_fatal_for_the_client() {
    let (mut client, mut peer) = raw_pair();

    let driver = tokio::spawn(async move {
        peer.answer_initialize().await;
        let _request = peer.read_json().await;
        peer.writer.write_all(b"garbage\n").await.unwrap();
        peer
    });

    client.initialize(client_info()).await.unwrap();
    let outcome = client.list_tools().await;
    assert!(matches!(outcome, Err(McpError::Transport(_))));
    assert_eq!(client.state(), SessionState::Closed);

    driver.await.unwrap();
}

#[tokio::test]
async fn peer_close_mid_call_closes_the_session() {
    let (mut client, mut peer) = raw_pair();

    let driver = tokio::spawn(async move {
        peer.answer_initialize().await;
        let _request = peer.read_json().await;
        // Drop both halves so the client sees end-of-stream.
        drop(peer);
    });

    client.initialize(client_info()).await.unwrap();
    let outcome = client.list_tools().await;
    assert!(matches!(outcome, Err(McpError::SessionClosed)));
    assert_eq!(client.state(), SessionState::Closed);

    driver.await.unwrap();
}
