//! Envelope Encoding and Classification
//!
//! Design Decision: Hand-rolled classification on a parsed `serde_json::Value`
//! instead of a serde(untagged) deserialize
//!
//! Rationale: The classification rules are ordered (parse failure, then
//! version gate, then member-presence tests) and carry semantics serde cannot
//! express: float ids coerce only when exactly representable, a null id is
//! valid on responses but not requests, and `result`/`error` are mutually
//! exclusive. Classifying an already-parsed Value keeps each rule one
//! readable match arm.
//!
//! Trade-offs:
//! - Two passes (parse, classify) vs one: the Value pass is what lets the
//!   codec distinguish -32700 (not JSON) from -32600 (JSON, wrong shape)
//! - Unknown top-level members are ignored, matching the JSON-RPC spec

use serde_json::{Map, Value};
use thiserror::Error;

use super::{Envelope, ErrorObject, Notification, Request, RequestId, Response};

/// A wire payload that could not be turned into an envelope.
///
/// `Parse` maps to code -32700, `InvalidRequest` to -32600. The caller
/// (session) decides whether to answer with an error response or drop the
/// payload; on the server side both are answered with a null-id response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Not valid JSON
    #[error("Parse error: {0}")]
    Parse(String),

    /// Valid JSON, but not a valid JSON-RPC 2.0 envelope
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl DecodeError {
    /// JSON-RPC error code for this failure.
    pub fn code(&self) -> i32 {
        match self {
            DecodeError::Parse(_) => super::codes::PARSE_ERROR,
            DecodeError::InvalidRequest(_) => super::codes::INVALID_REQUEST,
        }
    }

    /// Canonical wire message for this failure.
    pub fn wire_message(&self) -> &'static str {
        match self {
            DecodeError::Parse(_) => "Parse error",
            DecodeError::InvalidRequest(_) => "Invalid request",
        }
    }
}

/// Encode a request as a single UTF-8 JSON object.
pub fn encode_request(request: &Request) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(request)
}

/// Encode a response as a single UTF-8 JSON object.
pub fn encode_response(response: &Response) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(response)
}

/// Encode a notification as a single UTF-8 JSON object.
pub fn encode_notification(notification: &Notification) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(notification)
}

/// Encode any envelope as a single UTF-8 JSON object.
pub fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(envelope)
}

/// Decode one envelope from bytes.
///
/// Classification rules, applied in order:
/// 1. Not valid JSON → [`DecodeError::Parse`]
/// 2. Not an object, or `jsonrpc != "2.0"` → [`DecodeError::InvalidRequest`]
/// 3. `method` + `id` → Request; `method` alone → Notification;
///    `result` XOR `error` with an `id` member → Response;
///    anything else → [`DecodeError::InvalidRequest`]
pub fn decode(bytes: &[u8]) -> Result<Envelope, DecodeError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| DecodeError::Parse(e.to_string()))?;

    let object = match value {
        Value::Object(map) => map,
        other => {
            return Err(DecodeError::InvalidRequest(format!(
                "envelope must be an object, found {}",
                json_type_name(&other)
            )))
        }
    };

    match object.get("jsonrpc") {
        Some(Value::String(v)) if v == "2.0" => {}
        Some(other) => {
            return Err(DecodeError::InvalidRequest(format!(
                "jsonrpc must be the literal \"2.0\", found {}",
                other
            )))
        }
        None => {
            return Err(DecodeError::InvalidRequest(
                "missing jsonrpc member".to_string(),
            ))
        }
    }

    let has_method = object.contains_key("method");
    let has_id = object.contains_key("id");

    if has_method {
        let method = match object.get("method") {
            Some(Value::String(m)) => m.clone(),
            _ => {
                return Err(DecodeError::InvalidRequest(
                    "method must be a string".to_string(),
                ))
            }
        };
        let params = object.get("params").cloned();

        if has_id {
            let id = decode_id(&object, false)?;
            return Ok(Envelope::Request(Request { id, method, params }));
        }
        return Ok(Envelope::Notification(Notification { method, params }));
    }

    let has_result = object.contains_key("result");
    let has_error = object.contains_key("error");
    if has_id && (has_result ^ has_error) {
        let id = decode_id(&object, true)?;
        if has_result {
            let result = object.get("result").cloned();
            return Ok(Envelope::Response(Response {
                id,
                result,
                error: None,
            }));
        }
        let error = decode_error_object(&object)?;
        return Ok(Envelope::Response(Response {
            id,
            result: None,
            error: Some(error),
        }));
    }

    Err(DecodeError::InvalidRequest(
        "envelope matches no JSON-RPC message shape".to_string(),
    ))
}

/// Extract and validate the `id` member.
///
/// Null ids are accepted only on responses. Float ids are truncated to the
/// integer representation only when exactly representable (`3.0` is id 3,
/// `3.5` and `1e20` are invalid).
fn decode_id(object: &Map<String, Value>, allow_null: bool) -> Result<RequestId, DecodeError> {
    match object.get("id") {
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                return Ok(RequestId::Num(i));
            }
            if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                    let truncated = f as i64;
                    if truncated as f64 == f {
                        return Ok(RequestId::Num(truncated));
                    }
                }
            }
            Err(DecodeError::InvalidRequest(format!(
                "id {} is not exactly representable as an integer",
                n
            )))
        }
        Some(Value::String(s)) => Ok(RequestId::Str(s.clone())),
        Some(Value::Null) if allow_null => Ok(RequestId::Null),
        Some(Value::Null) => Err(DecodeError::InvalidRequest(
            "null id is only valid on responses".to_string(),
        )),
        Some(other) => Err(DecodeError::InvalidRequest(format!(
            "id must be an integer, string, or null, found {}",
            json_type_name(other)
        ))),
        None => Err(DecodeError::InvalidRequest("missing id member".to_string())),
    }
}

fn decode_error_object(object: &Map<String, Value>) -> Result<ErrorObject, DecodeError> {
    let error = match object.get("error") {
        Some(Value::Object(e)) => e,
        _ => {
            return Err(DecodeError::InvalidRequest(
                "error member must be an object".to_string(),
            ))
        }
    };

    let code = error
        .get("code")
        .and_then(Value::as_i64)
        .and_then(|c| i32::try_from(c).ok())
        .ok_or_else(|| {
            DecodeError::InvalidRequest("error.code must be a 32-bit integer".to_string())
        })?;

    let message = match error.get("message") {
        Some(Value::String(m)) => m.clone(),
        _ => {
            return Err(DecodeError::InvalidRequest(
                "error.message must be a string".to_string(),
            ))
        }
    };

    Ok(ErrorObject {
        code,
        message,
        data: error.get("data").cloned(),
    })
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
