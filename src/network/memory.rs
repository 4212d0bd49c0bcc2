//! In-process transport
//!
//! Channels that hand commands straight to a shared [`Engine`]. Every round
//! trip still goes through the OP_MSG codec so the bytes match what a socket
//! would carry. The connector can sever live channels and refuse new ones,
//! which is how connection loss is simulated.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bson::Document;

use super::channel::{CommandChannel, Connector};
use crate::engine::Engine;
use crate::error::{DocwireError, Result};
use crate::protocol::{decode_message, encode_message, Message};

/// Link state shared by a connector and the channels it built
#[derive(Debug, Default)]
struct Link {
    /// Bumped by `sever`; channels from an older generation are dead
    generation: AtomicU64,

    /// When set, `connect` fails as if the endpoint were unreachable
    refusing: AtomicBool,

    /// Successful connects so far
    connects: AtomicUsize,
}

/// Builds [`MemoryChannel`]s over one engine
#[derive(Clone)]
pub struct MemoryConnector {
    engine: Arc<Engine>,
    link: Arc<Link>,
}

impl MemoryConnector {
    /// Connector over `engine`
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            link: Arc::new(Link::default()),
        }
    }

    /// The engine behind this connector
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Drop every live channel; their next round trip fails with a connection error
    pub fn sever(&self) {
        self.link.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Make `connect` fail (true) or succeed (false)
    pub fn refuse_connections(&self, refuse: bool) {
        self.link.refusing.store(refuse, Ordering::SeqCst);
    }

    /// Number of successful connects
    pub fn connect_count(&self) -> usize {
        self.link.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn CommandChannel>> {
        if self.link.refusing.load(Ordering::SeqCst) {
            return Err(DocwireError::Connection(format!(
                "Failed to connect to {}: connection refused",
                endpoint
            )));
        }

        self.link.connects.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("In-process connection to {}", endpoint);

        Ok(Box::new(MemoryChannel {
            engine: Arc::clone(&self.engine),
            link: Arc::clone(&self.link),
            generation: self.link.generation.load(Ordering::SeqCst),
            peer: format!("memory://{}", endpoint),
            next_request_id: 1,
            open: true,
        }))
    }
}

/// A channel into an in-process engine
pub struct MemoryChannel {
    engine: Arc<Engine>,
    link: Arc<Link>,
    generation: u64,
    peer: String,
    next_request_id: i32,
    open: bool,
}

impl MemoryChannel {
    fn is_live(&self) -> bool {
        self.open && self.link.generation.load(Ordering::SeqCst) == self.generation
    }
}

#[async_trait]
impl CommandChannel for MemoryChannel {
    async fn round_trip(&mut self, command: Document) -> Result<Document> {
        if !self.is_live() {
            return Err(DocwireError::Connection(format!(
                "socket closed: {}",
                self.peer
            )));
        }

        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1).max(1);

        // Same bytes a socket would carry, both directions
        let request = decode_message(&encode_message(&Message::request(request_id, command))?)?;
        let reply_body = self.engine.execute(&request.body);
        let reply = decode_message(&encode_message(&Message::reply(
            request_id,
            request.request_id,
            reply_body,
        ))?)?;

        Ok(reply.body)
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }

    fn peer(&self) -> &str {
        &self.peer
    }
}
