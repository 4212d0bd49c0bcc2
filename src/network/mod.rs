//! Network Module
//!
//! Transports between the driver and a server, plus the reference server.
//!
//! ## Architecture
//! - `CommandChannel` / `Connector`: the seam the session talks through
//! - `TcpChannel`: OP_MSG over TCP
//! - `MemoryChannel`: OP_MSG straight into an in-process engine
//! - `Server`: tokio accept loop, one task per connection

mod channel;
mod connection;
mod memory;
mod server;
mod tcp;

pub use channel::{CommandChannel, Connector};
pub use connection::Connection;
pub use memory::{MemoryChannel, MemoryConnector};
pub use server::{Server, ShutdownHandle};
pub use tcp::{TcpChannel, TcpConnector};
