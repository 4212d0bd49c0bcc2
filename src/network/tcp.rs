//! TCP transport
//!
//! OP_MSG over a tokio `TcpStream`, one request in flight per connection.

use std::time::Duration;

use async_trait::async_trait;
use bson::Document;
use tokio::io::{BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use super::channel::{CommandChannel, Connector};
use crate::error::{DocwireError, Result};
use crate::protocol::{read_message, write_message, Message};

/// A client connection to one server
pub struct TcpChannel {
    /// Read half (buffered for efficiency)
    reader: BufReader<OwnedReadHalf>,

    /// Write half (buffered for efficiency)
    writer: BufWriter<OwnedWriteHalf>,

    /// Peer address for logging
    peer_addr: String,

    /// Next request id
    next_request_id: i32,
}

impl TcpChannel {
    /// Wrap a connected stream
    pub fn new(stream: TcpStream) -> Result<Self> {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        let (read, write) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read),
            writer: BufWriter::new(write),
            peer_addr,
            next_request_id: 1,
        })
    }

    /// Connect to `addr`, bounded by `timeout_ms` (0 = no bound)
    pub async fn connect(addr: &str, timeout_ms: u64) -> Result<Self> {
        let connecting = TcpStream::connect(addr);
        let connected = if timeout_ms > 0 {
            tokio::time::timeout(Duration::from_millis(timeout_ms), connecting)
                .await
                .map_err(|_| DocwireError::Timeout(timeout_ms))?
        } else {
            connecting.await
        };
        let stream = connected
            .map_err(|e| DocwireError::Connection(format!("Failed to connect to {}: {}", addr, e)))?;

        tracing::debug!("Connected to {}", addr);
        Self::new(stream)
    }
}

#[async_trait]
impl CommandChannel for TcpChannel {
    async fn round_trip(&mut self, command: Document) -> Result<Document> {
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1).max(1);

        write_message(&mut self.writer, &Message::request(request_id, command))
            .await
            .map_err(stream_broken)?;

        // Any read failure leaves the stream mid-frame; the channel cannot be reused
        let reply = read_message(&mut self.reader).await.map_err(stream_broken)?;

        if reply.response_to != request_id {
            return Err(DocwireError::Connection(format!(
                "Reply from {} answers request {} but {} was sent",
                self.peer_addr, reply.response_to, request_id
            )));
        }

        Ok(reply.body)
    }

    async fn shutdown(&mut self) -> Result<()> {
        use tokio::io::AsyncWriteExt;

        tracing::debug!("Closing connection to {}", self.peer_addr);
        self.writer.shutdown().await?;
        Ok(())
    }

    fn peer(&self) -> &str {
        &self.peer_addr
    }
}

/// Map a framing or socket failure to a connection error
///
/// After a failed read or write the byte stream is out of step with message
/// boundaries, so every failure here retires the channel.
fn stream_broken(error: DocwireError) -> DocwireError {
    match error {
        DocwireError::Connection(_) | DocwireError::Timeout(_) => error,
        DocwireError::Io(ref e)
            if matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ) =>
        {
            DocwireError::Connection(format!("socket closed: {}", e))
        }
        other => DocwireError::Connection(format!("stream out of sync: {}", other)),
    }
}

/// Connects to endpoints over TCP
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    /// Connect timeout in milliseconds (0 = none)
    pub connect_timeout_ms: u64,
}

impl TcpConnector {
    pub fn new(connect_timeout_ms: u64) -> Self {
        Self { connect_timeout_ms }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn CommandChannel>> {
        let channel = TcpChannel::connect(endpoint, self.connect_timeout_ms).await?;
        Ok(Box::new(channel))
    }
}
