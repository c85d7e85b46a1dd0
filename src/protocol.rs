//! MCP Protocol Types
//!
//! Design Decision: Type-safe MCP message structures for the method surface
//!
//! Rationale: MCP defines specific shapes for initialization, tool discovery,
//! and tool execution. Typed structures give compile-time correctness for
//! both roles of the session; `serde_json::Value` appears only where the
//! protocol is genuinely open-ended (tool arguments, input schemas,
//! experimental capabilities).
//!
//! Trade-offs:
//! - Versioning: one protocol version (2024-11-05) rather than several
//! - Completeness: the tools surface is implemented; resources and prompts
//!   are advertised as absent
//!
//! MCP Protocol Reference:
//! - Specification: https://spec.modelcontextprotocol.io/specification/2024-11-05/

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// MCP protocol version implemented by this crate.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Method names of the MCP surface.
pub mod methods {
    /// Handshake request; the required first traffic on a session.
    pub const INITIALIZE: &str = "initialize";
    /// Tool discovery request.
    pub const TOOLS_LIST: &str = "tools/list";
    /// Tool invocation request.
    pub const TOOLS_CALL: &str = "tools/call";
    /// Client → server notification confirming the handshake.
    pub const NOTIFICATION_INITIALIZED: &str = "notifications/initialized";
    /// Server → client notification that the tool registry mutated.
    pub const NOTIFICATION_TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
}

/// `initialize` request parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializeParams {
    /// Protocol version the client implements
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,

    /// Client capability declaration
    #[serde(default)]
    pub capabilities: ClientCapabilities,

    /// Information about the client application
    #[serde(rename = "clientInfo")]
    pub client_info: ClientInfo,
}

/// What optional MCP features the client supports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientCapabilities {
    /// Server-initiated LLM sampling support
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<Value>,

    /// Experimental feature declarations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<Value>,
}

/// Client application information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Client application name
    pub name: String,
    /// Client application version
    pub version: String,
}

/// `initialize` response result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializeResult {
    /// Protocol version the server implements
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,

    /// Server capability declaration
    pub capabilities: ServerCapabilities,

    /// Information about the server
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

/// Which MCP features the server implements.
///
/// `resources` is always serialized, as `null` when absent: the handshake
/// advertises `{tools: {listChanged: true}, resources: null}` so clients see
/// an explicit "no resources" rather than a missing member.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Tool support (tools/list, tools/call)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolCapability>,

    /// Resource support; this crate advertises none
    #[serde(default)]
    pub resources: Option<Value>,
}

impl ServerCapabilities {
    /// The capability set this crate's server role advertises.
    pub fn tools_only() -> Self {
        Self {
            tools: Some(ToolCapability {
                list_changed: Some(true),
            }),
            resources: None,
        }
    }
}

/// Tool capability details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCapability {
    /// Whether the server emits notifications/tools/list_changed
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Server application information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server application name
    pub name: String,
    /// Server application version
    pub version: String,
}

impl ServerInfo {
    /// Build server info.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// One tool as advertised by `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool identifier, unique within the registry (conventionally
    /// `snake.case`)
    pub name: String,

    /// Human-readable tool description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON Schema for the tool's arguments (the validator's accepted
    /// subset); `null` means unconstrained
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// `tools/list` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolListResult {
    /// Advertised tools, in registration order
    pub tools: Vec<ToolDescriptor>,
}

/// `tools/call` parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallParams {
    /// Tool name to invoke (from tools/list)
    pub name: String,

    /// Tool arguments; validated against the tool's input schema
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

impl ToolCallParams {
    /// Call a tool with no arguments.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: None,
        }
    }

    /// Attach arguments to the call.
    pub fn with_arguments(mut self, arguments: Value) -> Self {
        self.arguments = Some(arguments);
        self
    }
}

/// `tools/call` result: ordered content items plus an optional tool-reported
/// failure flag.
///
/// `is_error: Some(true)` marks a *tool-reported* failure - a well-formed
/// error document inside a successful RPC. An RPC-level failure travels in
/// the response's error slot instead and never reaches this type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Ordered output content
    pub content: Vec<ContentItem>,

    /// Tool-reported failure flag
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ToolResult {
    /// A result with one text item.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::text(text)],
            is_error: None,
        }
    }

    /// A tool-reported failure with one text item.
    pub fn error_text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::text(text)],
            is_error: Some(true),
        }
    }
}

/// One item of tool output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentItem {
    /// Plain text
    Text {
        /// The text payload
        text: String,
    },

    /// An image, base64-encoded
    Image {
        /// Base64-encoded image bytes
        data: String,
        /// MIME type of the encoded image
        #[serde(rename = "mimeType")]
        mime_type: String,
    },

    /// A reference to a resource by URI
    Resource {
        /// Resource URI
        uri: String,
        /// Optional display name
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Optional description
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        /// Optional MIME type
        #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
}

impl ContentItem {
    /// A text content item.
    pub fn text(text: impl Into<String>) -> Self {
        ContentItem::Text { text: text.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_initialize_params_serialization() {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: "t".to_string(),
                version: "1".to_string(),
            },
        };

        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(
            value,
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {"name": "t", "version": "1"}
            })
        );
    }

    #[test]
    fn test_server_capabilities_advertise_null_resources() {
        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities::tools_only(),
            server_info: ServerInfo::new("s", "0.1"),
        };

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {"listChanged": true}, "resources": null},
                "serverInfo": {"name": "s", "version": "0.1"}
            })
        );
    }

    #[test]
    fn test_tool_descriptor_round_trip() {
        let raw = r#"{
            "name": "read_file",
            "description": "Read a file",
            "inputSchema": {
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"]
            }
        }"#;

        let tool: ToolDescriptor = serde_json::from_str(raw).unwrap();
        assert_eq!(tool.name, "read_file");
        assert_eq!(tool.description.as_deref(), Some("Read a file"));
        assert!(tool.input_schema.is_object());
    }

    #[test]
    fn test_content_items_are_tagged_by_type() {
        let result = ToolResult::text("hi");
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value, json!({"content": [{"type": "text", "text": "hi"}]}));

        let image = ContentItem::Image {
            data: "aGk=".to_string(),
            mime_type: "image/png".to_string(),
        };
        let value = serde_json::to_value(&image).unwrap();
        assert_eq!(
            value,
            json!({"type": "image", "data": "aGk=", "mimeType": "image/png"})
        );

        let resource = ContentItem::Resource {
            uri: "file:///tmp/a.txt".to_string(),
            name: None,
            description: None,
            mime_type: Some("text/plain".to_string()),
        };
        let value = serde_json::to_value(&resource).unwrap();
        assert_eq!(
            value,
            json!({"type": "resource", "uri": "file:///tmp/a.txt", "mimeType": "text/plain"})
        );
    }

    #[test]
    fn test_tool_error_result() {
        let raw = r#"{"content": [{"type": "text", "text": "boom"}], "isError": true}"#;
        let result: ToolResult = serde_json::from_str(raw).unwrap();
        assert_eq!(result.is_error, Some(true));
    }

    #[test]
    fn test_tool_call_params_skip_absent_arguments() {
        let call = ToolCallParams::new("nope");
        let value = serde_json::to_value(&call).unwrap();
        assert_eq!(value, json!({"name": "nope"}));

        let call = ToolCallParams::new("echo").with_arguments(json!({"msg": "hi"}));
        let value = serde_json::to_value(&call).unwrap();
        assert_eq!(value, json!({"name": "echo", "arguments": {"msg": "hi"}}));
    }
}
