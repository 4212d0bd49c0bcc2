//! Connection Handler
//!
//! Serves one client connection of the reference server.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::engine::Engine;
use crate::error::{DocwireError, Result};
use crate::protocol::{read_message, write_message, Message};

/// Handles a single client connection
pub struct Connection {
    /// TCP stream reader (buffered for efficiency)
    reader: BufReader<OwnedReadHalf>,

    /// TCP stream writer (buffered for efficiency)
    writer: BufWriter<OwnedWriteHalf>,

    /// Reference to the document engine
    engine: Arc<Engine>,

    /// Peer address for logging
    peer_addr: String,

    /// Idle read timeout (None = wait forever)
    read_timeout: Option<Duration>,

    /// Next reply id
    next_reply_id: i32,
}

impl Connection {
    /// Create a new connection handler
    pub fn new(stream: TcpStream, engine: Arc<Engine>) -> Result<Self> {
        // Get peer address for logging before we split the stream
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
            engine,
            peer_addr,
            read_timeout: None,
            next_reply_id: 1,
        })
    }

    /// Configure the idle read timeout
    pub fn set_read_timeout(&mut self, read_ms: u64) {
        self.read_timeout = (read_ms > 0).then(|| Duration::from_millis(read_ms));
    }

    /// Handle the connection until the client goes away
    ///
    /// Reads requests in a loop and sends one reply per request.
    pub async fn handle(&mut self) -> Result<()> {
        tracing::debug!("Connection established from {}", self.peer_addr);

        loop {
            // Read next request
            let request = match self.read_request().await {
                Ok(Some(message)) => message,
                Ok(None) => return Ok(()),
                Err(e) => {
                    tracing::warn!("Error reading from {}: {}", self.peer_addr, e);
                    return Err(e);
                }
            };

            tracing::trace!("Received request {} from {}", request.request_id, self.peer_addr);

            // Execute command
            let body = self.engine.execute(&request.body);
            let reply = Message::reply(self.next_reply_id, request.request_id, body);
            self.next_reply_id = self.next_reply_id.wrapping_add(1).max(1);

            // Send reply
            if let Err(e) = write_message(&mut self.writer, &reply).await {
                if let DocwireError::Io(ref io_err) = e {
                    match io_err.kind() {
                        std::io::ErrorKind::ConnectionAborted
                        | std::io::ErrorKind::ConnectionReset
                        | std::io::ErrorKind::BrokenPipe => {
                            tracing::debug!(
                                "Client {} disconnected before reply could be sent: {}",
                                self.peer_addr, e
                            );
                            return Ok(());
                        }
                        _ => {}
                    }
                }
                tracing::warn!("Error writing to {}: {}", self.peer_addr, e);
                return Err(e);
            }
        }
    }

    /// Read one request; `None` when the client is gone or idle too long
    async fn read_request(&mut self) -> Result<Option<Message>> {
        let reading = read_message(&mut self.reader);
        let result = match self.read_timeout {
            Some(limit) => match tokio::time::timeout(limit, reading).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::debug!("Read timeout for client {}", self.peer_addr);
                    return Ok(None);
                }
            },
            None => reading.await,
        };

        match result {
            Ok(message) => Ok(Some(message)),
            Err(DocwireError::Io(ref e))
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::UnexpectedEof
                        | std::io::ErrorKind::ConnectionReset
                        | std::io::ErrorKind::ConnectionAborted
                ) =>
            {
                tracing::debug!("Client {} disconnected", self.peer_addr);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
