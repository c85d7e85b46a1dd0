//! HTTP + Server-Sent Events Transport
//!
//! Design Decision: Two HTTP channels sharing one base URL
//!
//! Rationale: Plain HTTP cannot push, so the peer-to-us direction is a
//! long-lived `GET {base}/events` SSE stream while our outbound envelopes
//! travel as individual `POST {base}/rpc` requests. Responses to the POST
//! itself are discarded; everything the peer says arrives on the event
//! stream. This keeps the transport usable through proxies that break
//! WebSockets.
//!
//! SSE handling: bytes are buffered until a blank line terminates an event;
//! `data:` lines are concatenated with `\n` per the SSE spec; `event:`,
//! `id:`, `retry:`, and comment lines are ignored.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use url::Url;

use crate::transport::{Transport, TransportError};
use crate::wire::{codec, Envelope};

/// Envelope transport over `POST {base}/rpc` and `GET {base}/events`.
pub struct HttpSseTransport {
    client: reqwest::Client,
    rpc_url: Url,
    events: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    buffer: String,
    eof: bool,
}

impl HttpSseTransport {
    /// Connect to a peer at `base_url`, opening the event stream.
    pub async fn connect(base_url: &str) -> Result<Self, TransportError> {
        Self::with_client(reqwest::Client::new(), base_url).await
    }

    /// Connect with a caller-configured HTTP client (timeouts, proxies,
    /// default headers).
    pub async fn with_client(
        client: reqwest::Client,
        base_url: &str,
    ) -> Result<Self, TransportError> {
        let base = base_url.trim_end_matches('/');
        let rpc_url = Url::parse(&format!("{}/rpc", base)).map_err(|e| {
            TransportError::ConnectionFailed(format!("invalid base url {}: {}", base_url, e))
        })?;
        let events_url = Url::parse(&format!("{}/events", base)).map_err(|e| {
            TransportError::ConnectionFailed(format!("invalid base url {}: {}", base_url, e))
        })?;

        let response = client
            .get(events_url.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| {
                TransportError::ConnectionFailed(format!("GET {}: {}", events_url, e))
            })?;
        if !response.status().is_success() {
            return Err(TransportError::ConnectionFailed(format!(
                "GET {} returned {}",
                events_url,
                response.status()
            )));
        }

        tracing::debug!(%events_url, "sse event stream open");
        let events = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed();

        Ok(Self {
            client,
            rpc_url,
            events,
            buffer: String::new(),
            eof: false,
        })
    }
}

#[async_trait]
impl Transport for HttpSseTransport {
    async fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        let bytes = codec::encode_envelope(envelope)?;
        let response = self
            .client
            .post(self.rpc_url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(bytes)
            .send()
            .await
            .map_err(|e| {
                TransportError::ConnectionFailed(format!("POST {}: {}", self.rpc_url, e))
            })?;

        // The POST body is the envelope; the peer's envelopes come back on
        // the event stream, so the response body is discarded.
        if !response.status().is_success() {
            return Err(TransportError::ConnectionFailed(format!(
                "POST {} returned {}",
                self.rpc_url,
                response.status()
            )));
        }
        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<Envelope>, TransportError> {
        if self.eof {
            return Ok(None);
        }

        loop {
            while let Some(data) = next_event_data(&mut self.buffer) {
                return Ok(Some(codec::decode(data.as_bytes())?));
            }

            match self.events.next().await {
                Some(Ok(chunk)) => {
                    let text = String::from_utf8_lossy(&chunk).replace("\r\n", "\n");
                    self.buffer.push_str(&text);
                }
                Some(Err(e)) => {
                    self.eof = true;
                    return Err(TransportError::ConnectionFailed(format!(
                        "event stream failed: {}",
                        e
                    )));
                }
                None => {
                    tracing::debug!("sse event stream ended");
                    self.eof = true;
                    return Ok(None);
                }
            }
        }
    }
}

/// Pop the next complete event's concatenated `data:` payload off the
/// buffer. Returns `None` when no complete event is buffered or the next
/// complete event carries no data lines (which the loop then discards).
fn next_event_data(buffer: &mut String) -> Option<String> {
    while let Some(boundary) = buffer.find("\n\n") {
        let event: String = buffer[..boundary].to_string();
        buffer.drain(..boundary + 2);

        if let Some(data) = event_data(&event) {
            return Some(data);
        }
    }
    None
}

/// Concatenate the `data:` lines of one event, per the SSE spec.
fn event_data(event: &str) -> Option<String> {
    let mut data_lines = Vec::new();
    for line in event.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
        // event:, id:, retry:, and ":" comment lines carry no envelope.
    }
    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}
