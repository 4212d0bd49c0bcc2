//! # docwire
//!
//! An async driver for document databases speaking OP_MSG, with:
//! - Sessions that reconnect after transport loss and keep an error history
//! - Lazy, single-consumption cursors for queries and aggregation pipelines
//! - Bulk writes split into size-bounded batches with merged, globally
//!   indexed results
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Database / Collection                        │
//! └──────────┬──────────────────┬───────────────────────────────┘
//!            │                  │
//!            ▼                  ▼
//!   ┌─────────────────┐  ┌─────────────────┐
//!   │  Cursor Engine  │  │  Bulk Batcher   │
//!   │ (find/aggregate)│  │ (ordered/unord.)│
//!   └────────┬────────┘  └────────┬────────┘
//!            └─────────┬──────────┘
//!                      ▼
//!            ┌───────────────────┐
//!            │      Session      │
//!            │ (reconnect, errs) │
//!            └─────────┬─────────┘
//!                      ▼
//!            ┌───────────────────┐       ┌──────────────┐
//!            │  CommandChannel   │──────►│   OP_MSG     │
//!            │  (TCP / memory)   │       │   codec      │
//!            └───────────────────┘       └──────────────┘
//! ```
//!
//! The bundled [`engine::Engine`] executes the same commands in memory; it
//! backs `docwire-server`, the in-process transport, and the tests.

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod protocol;
pub mod network;
pub mod session;
pub mod cursor;
pub mod bulk;
pub mod database;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{CommandFailure, DocwireError, Result};
pub use config::{ClientConfig, ServerConfig};
pub use database::{Collection, Database};
pub use session::{LastError, LastStatus, Session, SessionState};
pub use cursor::{AggregationCursor, CursorState, FindOptions, QueryCursor, SortDirection, SortSpec};
pub use bulk::{BulkOperation, BulkOptions, BulkWriteError, BulkWriteResult};
pub use engine::Engine;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of docwire
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
