//! WebSocket Transport (RFC 6455 client)
//!
//! Design Decision: Implement the framing layer directly over a
//! caller-supplied byte stream
//!
//! Rationale: The envelope-per-text-frame mapping needs only the client
//! subset of RFC 6455: the opening handshake, masked data frames with the
//! three payload-length encodings, fragment reassembly, and the
//! ping/pong/close control frames. Building that on `AsyncRead + AsyncWrite`
//! keeps the transport generic: `connect` dials plain `ws://` over TCP, and
//! `handshake` layers over any stream the host supplies (a TLS stream for
//! `wss://`).
//!
//! Handshake strictness: the `Sec-WebSocket-Accept` header is verified
//! against SHA-1 of key + GUID; a missing or wrong value fails the connect.
//!
//! Frame rules implemented:
//! - outbound frames are masked with a fresh random 4-byte key per frame
//! - inbound frames may be masked or not (servers normally do not mask)
//! - `ping` is answered with a `pong` carrying the identical payload
//! - `pong` and complete `binary` messages are ignored
//! - `close` is answered with a close frame, then end-of-stream
//! - fragmented messages (FIN=0) are reassembled before envelope decoding

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use url::Url;

use crate::transport::{Transport, TransportError};
use crate::wire::{codec, Envelope};

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const OPCODE_CONTINUATION: u8 = 0x0;
const OPCODE_TEXT: u8 = 0x1;
const OPCODE_BINARY: u8 = 0x2;
const OPCODE_CLOSE: u8 = 0x8;
const OPCODE_PING: u8 = 0x9;
const OPCODE_PONG: u8 = 0xA;

/// Upper bound on one reassembled message; anything larger is treated as a
/// protocol violation rather than an allocation request.
const MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// Upper bound on the handshake response headers.
const MAX_HANDSHAKE_BYTES: usize = 16 * 1024;

/// One envelope per text frame over an RFC 6455 client connection.
pub struct WebSocketTransport<S> {
    stream: BufStream<S>,
    fragment: Option<(u8, Vec<u8>)>,
    closed: bool,
}

impl WebSocketTransport<TcpStream> {
    /// Dial a `ws://` URL and perform the opening handshake.
    ///
    /// `wss://` is not dialed here: perform the TLS connection yourself and
    /// hand the stream to [`WebSocketTransport::handshake`].
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let parsed = Url::parse(url)
            .map_err(|e| TransportError::ConnectionFailed(format!("invalid url {}: {}", url, e)))?;

        match parsed.scheme() {
            "ws" => {}
            "wss" => {
                return Err(TransportError::ConnectionFailed(
                    "wss:// requires a TLS stream; use WebSocketTransport::handshake over one"
                        .to_string(),
                ))
            }
            other => {
                return Err(TransportError::ConnectionFailed(format!(
                    "unsupported scheme {}://",
                    other
                )))
            }
        }

        let host = parsed.host_str().ok_or_else(|| {
            TransportError::ConnectionFailed(format!("url {} has no host", url))
        })?;
        let port = parsed.port_or_known_default().unwrap_or(80);

        let stream = TcpStream::connect((host, port)).await.map_err(|e| {
            TransportError::ConnectionFailed(format!("connect {}:{}: {}", host, port, e))
        })?;

        let host_header = if port == 80 {
            host.to_string()
        } else {
            format!("{}:{}", host, port)
        };
        let resource = match parsed.query() {
            Some(query) => format!("{}?{}", parsed.path(), query),
            None => parsed.path().to_string(),
        };

        Self::handshake(stream, &host_header, &resource).await
    }
}

impl<S> WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Perform the client opening handshake over an established stream.
    pub async fn handshake(stream: S, host: &str, resource: &str) -> Result<Self, TransportError> {
        let mut stream = BufStream::new(stream);

        let key_bytes: [u8; 16] = rand::random();
        let key = BASE64.encode(key_bytes);
        let resource = if resource.is_empty() { "/" } else { resource };

        let request = format!(
            "GET {} HTTP/1.1\r\n\
             Host: {}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {}\r\n\
             Sec-WebSocket-Version: 13\r\n\
             \r\n",
            resource, host, key
        );
        stream.write_all(request.as_bytes()).await?;
        stream.flush().await?;

        let response = read_handshake_response(&mut stream).await?;
        let mut lines = response.split("\r\n");
        let status_line = lines.next().unwrap_or("");
        let status = status_line.split(' ').nth(1).unwrap_or("");
        if status != "101" {
            return Err(TransportError::ConnectionFailed(format!(
                "handshake rejected: {}",
                status_line
            )));
        }

        let accept = lines
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("sec-websocket-accept"))
            .map(|(_, value)| value.trim().to_string());

        match accept {
            Some(value) if value == expected_accept(&key) => {}
            Some(value) => {
                return Err(TransportError::ConnectionFailed(format!(
                    "Sec-WebSocket-Accept mismatch: {}",
                    value
                )))
            }
            None => {
                return Err(TransportError::ConnectionFailed(
                    "handshake response missing Sec-WebSocket-Accept".to_string(),
                ))
            }
        }

        tracing::debug!(host, resource, "websocket handshake complete");
        Ok(Self {
            stream,
            fragment: None,
            closed: false,
        })
    }

    /// Send a close frame and stop accepting traffic.
    pub async fn close(&mut self) -> Result<(), TransportError> {
        if !self.closed {
            self.closed = true;
            self.write_frame(OPCODE_CLOSE, &[]).await?;
        }
        Ok(())
    }

    async fn write_frame(&mut self, opcode: u8, payload: &[u8]) -> Result<(), TransportError> {
        let mask: [u8; 4] = rand::random();
        let frame = encode_frame(opcode, payload, Some(mask));
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<Option<RawFrame>, TransportError> {
        // EOF at a frame boundary is the peer dropping the connection.
        let first = match self.stream.read_u8().await {
            Ok(byte) => byte,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if first & 0x70 != 0 {
            return Err(TransportError::ProtocolViolation(
                "reserved frame bits set".to_string(),
            ));
        }
        let fin = first & 0x80 != 0;
        let opcode = first & 0x0F;

        let second = self.read_mid_frame_u8().await?;
        let masked = second & 0x80 != 0;
        let length = match second & 0x7F {
            126 => {
                let mut bytes = [0u8; 2];
                self.read_mid_frame(&mut bytes).await?;
                u64::from(u16::from_be_bytes(bytes))
            }
            127 => {
                let mut bytes = [0u8; 8];
                self.read_mid_frame(&mut bytes).await?;
                u64::from_be_bytes(bytes)
            }
            short => u64::from(short),
        };

        if length > MAX_MESSAGE_BYTES as u64 {
            return Err(TransportError::ProtocolViolation(format!(
                "frame of {} bytes exceeds the {} byte limit",
                length, MAX_MESSAGE_BYTES
            )));
        }

        let mask = if masked {
            let mut key = [0u8; 4];
            self.read_mid_frame(&mut key).await?;
            Some(key)
        } else {
            None
        };

        let mut payload = vec![0u8; length as usize];
        self.read_mid_frame(&mut payload).await?;
        if let Some(key) = mask {
            apply_mask(&mut payload, key);
        }

        Ok(Some(RawFrame {
            fin,
            opcode,
            payload,
        }))
    }

    async fn read_mid_frame_u8(&mut self) -> Result<u8, TransportError> {
        let mut byte = [0u8; 1];
        self.read_mid_frame(&mut byte).await?;
        Ok(byte[0])
    }

    async fn read_mid_frame(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        self.stream.read_exact(buf).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                TransportError::ProtocolViolation("stream ended mid-frame".to_string())
            } else {
                TransportError::Io(e)
            }
        })?;
        Ok(())
    }

    /// Collect frames into one complete message, handling control frames
    /// along the way. Returns the data opcode and reassembled payload, or
    /// `None` at connection close.
    async fn read_message(&mut self) -> Result<Option<(u8, Vec<u8>)>, TransportError> {
        loop {
            let frame = match self.read_frame().await? {
                Some(frame) => frame,
                None => {
                    self.closed = true;
                    return Ok(None);
                }
            };

            if frame.opcode & 0x8 != 0 {
                // Control frames must not be fragmented or oversized.
                if !frame.fin || frame.payload.len() > 125 {
                    return Err(TransportError::ProtocolViolation(
                        "malformed control frame".to_string(),
                    ));
                }
                match frame.opcode {
                    OPCODE_CLOSE => {
                        tracing::debug!("peer sent close frame");
                        // Echo the status code (if any) in the close reply.
                        let status = frame.payload.get(..2).map(<[u8]>::to_vec).unwrap_or_default();
                        self.write_frame(OPCODE_CLOSE, &status).await?;
                        self.closed = true;
                        return Ok(None);
                    }
                    OPCODE_PING => {
                        self.write_frame(OPCODE_PONG, &frame.payload).await?;
                        continue;
                    }
                    OPCODE_PONG => continue,
                    other => {
                        return Err(TransportError::ProtocolViolation(format!(
                            "unknown control opcode 0x{:X}",
                            other
                        )))
                    }
                }
            }

            match frame.opcode {
                OPCODE_CONTINUATION => match self.fragment.take() {
                    Some((opcode, mut buffer)) => {
                        if buffer.len() + frame.payload.len() > MAX_MESSAGE_BYTES {
                            return Err(TransportError::ProtocolViolation(
                                "fragmented message exceeds size limit".to_string(),
                            ));
                        }
                        buffer.extend_from_slice(&frame.payload);
                        if frame.fin {
                            return Ok(Some((opcode, buffer)));
                        }
                        self.fragment = Some((opcode, buffer));
                    }
                    None => {
                        return Err(TransportError::ProtocolViolation(
                            "continuation frame without a message in progress".to_string(),
                        ))
                    }
                },
                OPCODE_TEXT | OPCODE_BINARY => {
                    if self.fragment.is_some() {
                        return Err(TransportError::ProtocolViolation(
                            "data frame interleaved with a fragmented message".to_string(),
                        ));
                    }
                    if frame.fin {
                        return Ok(Some((frame.opcode, frame.payload)));
                    }
                    self.fragment = Some((frame.opcode, frame.payload));
                }
                other => {
                    return Err(TransportError::ProtocolViolation(format!(
                        "unknown data opcode 0x{:X}",
                        other
                    )))
                }
            }
        }
    }
}

#[async_trait]
impl<S> Transport for WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let bytes = codec::encode_envelope(envelope)?;
        self.write_frame(OPCODE_TEXT, &bytes).await
    }

    async fn receive(&mut self) -> Result<Option<Envelope>, TransportError> {
        if self.closed {
            return Ok(None);
        }

        loop {
            let (opcode, payload) = match self.read_message().await? {
                Some(message) => message,
                None => return Ok(None),
            };

            match opcode {
                OPCODE_TEXT => {
                    if std::str::from_utf8(&payload).is_err() {
                        return Err(TransportError::ProtocolViolation(
                            "text frame payload is not UTF-8".to_string(),
                        ));
                    }
                    return Ok(Some(codec::decode(&payload)?));
                }
                // Tools do not use binary frames; drop them.
                _ => continue,
            }
        }
    }
}

struct RawFrame {
    fin: bool,
    opcode: u8,
    payload: Vec<u8>,
}

/// Compute the expected `Sec-WebSocket-Accept` value for a handshake key.
pub(crate) fn expected_accept(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// XOR a payload with the 4-byte mask key; applying twice is the identity.
pub(crate) fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (index, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[index % 4];
    }
}

/// Build one complete frame (FIN set) with the given opcode and payload.
pub(crate) fn encode_frame(opcode: u8, payload: &[u8], mask: Option<[u8; 4]>) -> Vec<u8> {
    let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
    let mut frame = Vec::with_capacity(payload.len() + 14);
    frame.push(0x80 | opcode);

    let length = payload.len();
    if length < 126 {
        frame.push(mask_bit | length as u8);
    } else if length <= u16::MAX as usize {
        frame.push(mask_bit | 126);
        frame.extend_from_slice(&(length as u16).to_be_bytes());
    } else {
        frame.push(mask_bit | 127);
        frame.extend_from_slice(&(length as u64).to_be_bytes());
    }

    match mask {
        Some(key) => {
            frame.extend_from_slice(&key);
            let mut masked = payload.to_vec();
            apply_mask(&mut masked, key);
            frame.extend_from_slice(&masked);
        }
        None => frame.extend_from_slice(payload),
    }
    frame
}

async fn read_handshake_response<S>(stream: &mut BufStream<S>) -> Result<String, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut response = Vec::new();
    loop {
        let byte = stream.read_u8().await.map_err(|e| {
            TransportError::ConnectionFailed(format!("handshake read failed: {}", e))
        })?;
        response.push(byte);
        if response.ends_with(b"\r\n\r\n") {
            break;
        }
        if response.len() > MAX_HANDSHAKE_BYTES {
            return Err(TransportError::ConnectionFailed(
                "handshake response exceeds header size limit".to_string(),
            ));
        }
    }
    String::from_utf8(response).map_err(|_| {
        TransportError::ConnectionFailed("handshake response is not UTF-8".to_string())
    })
}
