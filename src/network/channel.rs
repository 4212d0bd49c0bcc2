//! Command Channel
//!
//! The transport seam every other component talks through: one command
//! document in, exactly one reply document out.

use async_trait::async_trait;
use bson::Document;

use crate::error::Result;

/// An established connection able to run one command at a time
///
/// Implementations must deliver replies in submission order and report a
/// lost connection as a transport error (`DocwireError::is_transport`).
#[async_trait]
pub trait CommandChannel: Send {
    /// Send a fully formed command document and wait for its reply
    async fn round_trip(&mut self, command: Document) -> Result<Document>;

    /// Close the underlying connection
    async fn shutdown(&mut self) -> Result<()>;

    /// Peer description for logging
    fn peer(&self) -> &str;
}

/// Builds channels to endpoints
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `endpoint` (host:port, or any name the connector understands)
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn CommandChannel>>;
}
