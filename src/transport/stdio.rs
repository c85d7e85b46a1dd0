//! stdio Transport
//!
//! Design Decision: Newline-delimited JSON over caller-supplied streams
//!
//! Rationale: The de-facto MCP stdio convention frames one envelope per
//! `\n`-terminated line, which any line-buffered process can speak without a
//! secondary framing layer. JSON strings escape embedded newlines, so the
//! line boundary is unambiguous. The transport is generic over reader and
//! writer: a server wires it to the process's own stdin/stdout, a client to
//! a child's pipes, and tests to in-memory duplex streams - process
//! management itself stays with the host.
//!
//! Buffering: one line buffer per transport, reused across reads; sends
//! build one contiguous byte run (envelope + `\n`) and flush, so an
//! envelope hits the wire atomically or not at all.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout};

use crate::transport::{Transport, TransportError};
use crate::wire::{codec, Envelope};

/// Newline-delimited JSON transport over an arbitrary reader/writer pair.
pub struct StdioTransport<R, W> {
    reader: BufReader<R>,
    writer: W,
    line: String,
    eof: bool,
}

impl StdioTransport<Stdin, Stdout> {
    /// A transport over this process's own stdin and stdout, for hosts
    /// serving MCP as a child process.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl<R, W> StdioTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// A transport over the given streams (child-process pipes, sockets,
    /// in-memory duplex pairs).
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
            line: String::new(),
            eof: false,
        }
    }
}

#[async_trait]
impl<R, W> Transport for StdioTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        let mut bytes = codec::encode_envelope(envelope)?;
        bytes.push(b'\n');
        self.writer.write_all(&bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<Envelope>, TransportError> {
        if self.eof {
            return Ok(None);
        }

        loop {
            self.line.clear();
            let read = self.reader.read_line(&mut self.line).await?;
            if read == 0 {
                tracing::debug!("stdio transport reached end-of-stream");
                self.eof = true;
                return Ok(None);
            }

            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }

            return Ok(Some(codec::decode(trimmed.as_bytes())?));
        }
    }
}
