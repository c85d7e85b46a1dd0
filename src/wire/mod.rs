//! JSON-RPC 2.0 Wire Layer
//!
//! Design Decision: A three-variant envelope sum instead of one catch-all
//! message struct
//!
//! Rationale: JSON-RPC messages come in exactly three shapes (request,
//! response, notification) with different lifecycle rules. Making them
//! separate types means dispatch code pattern-matches once and can never
//! confuse a notification with a request that lost its id.
//!
//! Trade-offs:
//! - Type Safety vs Flexibility: Separate variants prevent invalid states but
//!   require an explicit decode/classify step
//! - Validation: The codec rejects malformed envelopes at the boundary, so
//!   the rest of the crate never sees a half-formed message
//!
//! Alternatives Considered:
//! 1. One struct with all-optional fields: Rejected - pushes lifecycle checks
//!    into every dispatch site
//! 2. serde(untagged) enum: Rejected - cannot express the classification
//!    rules (rule ordering, float-id coercion, null-id scoping)

pub mod codec;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use serde_json::Value;

pub use codec::{
    decode, encode_envelope, encode_notification, encode_request, encode_response, DecodeError,
};

/// Reserved JSON-RPC 2.0 and MCP overlay error codes.
pub mod codes {
    /// Malformed JSON on the wire.
    pub const PARSE_ERROR: i32 = -32700;
    /// Not a valid envelope, or a request in the wrong session state.
    pub const INVALID_REQUEST: i32 = -32600;
    /// Unknown method name.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Parameter shape wrong or schema validation failed.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Unexpected session or dispatch failure.
    pub const INTERNAL_ERROR: i32 = -32603;
    /// `tools/call` for an unregistered tool.
    pub const INVALID_TOOL: i32 = -32000;
    /// A registered tool handler failed.
    pub const TOOL_EXECUTION_ERROR: i32 = -32001;
}

/// JSON-RPC 2.0 request/response identifier
///
/// Ids are compared by value and never coerced between the integer and
/// string representations: `Num(1)` and `Str("1")` are distinct ids.
/// `Null` is only valid on responses, for errors answering input that never
/// yielded a usable id (parse errors and unclassifiable envelopes).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequestId {
    /// Numeric id (the session counter assigns these, starting at 1)
    Num(i64),
    /// String id (peers may use these for correlation/tracing)
    Str(String),
    /// Absent id; responses to unparseable input only
    Null,
}

impl Serialize for RequestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RequestId::Num(n) => serializer.serialize_i64(*n),
            RequestId::Str(s) => serializer.serialize_str(s),
            RequestId::Null => serializer.serialize_none(),
        }
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Num(n) => write!(f, "{}", n),
            RequestId::Str(s) => write!(f, "\"{}\"", s),
            RequestId::Null => write!(f, "null"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Num(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::Str(s.to_string())
    }
}

/// JSON-RPC 2.0 error object
///
/// Standard codes live in [`codes`]; anything in `-32000..=-32099` is
/// server-defined, of which this crate uses `-32000` (invalid tool) and
/// `-32001` (tool execution error).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorObject {
    /// Error code (see [`codes`])
    pub code: i32,
    /// Human-readable error message
    pub message: String,
    /// Optional structured error data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    /// Build an error object with no structured data.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured data to the error.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// A method call expecting a response.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Unique id within the session; the response echoes it back
    pub id: RequestId,
    /// Method name (e.g. "initialize", "tools/call")
    pub method: String,
    /// Optional method parameters
    pub params: Option<Value>,
}

impl Request {
    /// Build a request.
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }
}

/// The answer to a request: exactly one of `result` or `error`.
///
/// The constructors are the only way this crate builds responses, so the
/// exactly-one invariant holds everywhere; [`decode`] enforces it for
/// envelopes arriving off the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Id of the request being answered; `Null` only for parse-level errors
    pub id: RequestId,
    /// Success payload (mutually exclusive with `error`)
    pub result: Option<Value>,
    /// Failure payload (mutually exclusive with `result`)
    pub error: Option<ErrorObject>,
}

impl Response {
    /// A successful response carrying `result`.
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// A failed response carrying `error`.
    pub fn error(id: RequestId, error: ErrorObject) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }

    /// True when the error slot is populated.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// A method call expecting no response.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Method name (e.g. "notifications/tools/list_changed")
    pub method: String,
    /// Optional parameters
    pub params: Option<Value>,
}

impl Notification {
    /// Build a notification.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// One JSON-RPC message on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Id present, method present
    Request(Request),
    /// Id present (possibly null), exactly one of result/error
    Response(Response),
    /// Method present, no id
    Notification(Notification),
}

impl Envelope {
    /// The envelope's id, when it has one.
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Envelope::Request(r) => Some(&r.id),
            Envelope::Response(r) => Some(&r.id),
            Envelope::Notification(_) => None,
        }
    }

    /// The envelope's method, when it has one.
    pub fn method(&self) -> Option<&str> {
        match self {
            Envelope::Request(r) => Some(&r.method),
            Envelope::Notification(n) => Some(&n.method),
            Envelope::Response(_) => None,
        }
    }
}

impl From<Request> for Envelope {
    fn from(r: Request) -> Self {
        Envelope::Request(r)
    }
}

impl From<Response> for Envelope {
    fn from(r: Response) -> Self {
        Envelope::Response(r)
    }
}

impl From<Notification> for Envelope {
    fn from(n: Notification) -> Self {
        Envelope::Notification(n)
    }
}

// Wire-facing serialization. Member order is fixed (jsonrpc, id, method,
// params, result, error) so snapshots and golden tests stay stable; serde
// serializes struct fields in declaration order, and these impls declare
// members in exactly that order.

impl Serialize for Request {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = 3 + usize::from(self.params.is_some());
        let mut s = serializer.serialize_struct("Request", len)?;
        s.serialize_field("jsonrpc", "2.0")?;
        s.serialize_field("id", &self.id)?;
        s.serialize_field("method", &self.method)?;
        if let Some(params) = &self.params {
            s.serialize_field("params", params)?;
        }
        s.end()
    }
}

impl Serialize for Response {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Response", 3)?;
        s.serialize_field("jsonrpc", "2.0")?;
        s.serialize_field("id", &self.id)?;
        if let Some(error) = &self.error {
            s.serialize_field("error", error)?;
        } else {
            // Success with a JSON null result is legal, so the result member
            // is emitted whenever the error slot is empty.
            s.serialize_field("result", self.result.as_ref().unwrap_or(&Value::Null))?;
        }
        s.end()
    }
}

impl Serialize for Notification {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = 2 + usize::from(self.params.is_some());
        let mut s = serializer.serialize_struct("Notification", len)?;
        s.serialize_field("jsonrpc", "2.0")?;
        s.serialize_field("method", &self.method)?;
        if let Some(params) = &self.params {
            s.serialize_field("params", params)?;
        }
        s.end()
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Envelope::Request(r) => r.serialize(serializer),
            Envelope::Response(r) => r.serialize(serializer),
            Envelope::Notification(n) => n.serialize(serializer),
        }
    }
}
