//! Cursor Module
//!
//! Lazy, single-consumption document sequences over query and pipeline
//! results.
//!
//! ## Responsibilities
//! - Open the server cursor on first read and page through it with `getMore`
//! - Never yield more than the configured limit
//! - Refuse every read once closed (`DocwireError::CursorClosed`)
//! - Kill a still-open server cursor when dropped (queued on the runtime;
//!   `close()` kills it before returning)
//!
//! Both flavors share `Cursor<S>`; the spec type `S` decides which commands
//! open, count and explain it.

mod find;
mod pipeline;
mod sort;

pub use find::{FindOptions, FindSpec};
pub use pipeline::{AggregateOptions, Pipeline, ReadPreference};
pub use sort::{SortDirection, SortSpec};

use std::collections::VecDeque;
use std::sync::Arc;

use bson::Document;
use futures::stream::{self, Stream};

use crate::error::{DocwireError, Result};
use crate::protocol::{Command, CursorReply};
use crate::session::Session;

/// Query cursor over one collection
pub type QueryCursor = Cursor<FindSpec>;

/// Aggregation pipeline cursor
pub type AggregationCursor = Cursor<Pipeline>;

/// What a cursor runs
pub trait CursorSpec: Send + Sync {
    /// Command that opens the server cursor
    fn open_command(&self, collection: &str, batch_size: u32) -> Command;

    /// Command that returns the execution plan instead of documents
    fn explain_command(&self, collection: &str) -> Command;

    /// Most documents the cursor may yield (0 = unlimited)
    fn limit(&self) -> u64 {
        0
    }
}

/// Where a cursor is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Nothing sent yet
    Pending,

    /// Server cursor `id` has more pages
    Open { id: i64 },

    /// Server has nothing more; the buffer may still hold documents
    Exhausted,

    /// Consumed or closed; every read fails
    Closed,
}

/// A lazily evaluated result sequence
pub struct Cursor<S: CursorSpec> {
    session: Arc<Session>,
    collection: String,
    spec: S,
    state: CursorState,

    /// Fetched but not yet delivered
    buffer: VecDeque<Document>,

    /// Documents delivered so far
    returned: u64,

    /// Page size per round trip (0 = server default)
    batch_size: u32,
}

impl<S: CursorSpec> Cursor<S> {
    pub(crate) fn new(session: Arc<Session>, collection: impl Into<String>, spec: S) -> Self {
        let batch_size = session.config().cursor_batch_size;
        Self {
            session,
            collection: collection.into(),
            spec,
            state: CursorState::Pending,
            buffer: VecDeque::new(),
            returned: 0,
            batch_size,
        }
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == CursorState::Closed
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn spec(&self) -> &S {
        &self.spec
    }

    pub(crate) fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Page size requested per round trip
    pub fn batch_size(&mut self, size: u32) -> &mut Self {
        self.batch_size = size;
        self
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// Next document, fetching a page only when the buffer is empty
    ///
    /// Returns `Ok(None)` once on exhaustion, which also closes the cursor.
    pub async fn next(&mut self) -> Result<Option<Document>> {
        self.ensure_open()?;

        loop {
            if let Some(document) = self.buffer.pop_front() {
                self.returned += 1;
                let limit = self.spec.limit();
                if limit > 0 && self.returned >= limit {
                    self.release().await;
                }
                return Ok(Some(document));
            }

            match self.state {
                CursorState::Pending => {
                    let command = self.spec.open_command(&self.collection, self.page_size());
                    self.fetch(command).await?;
                }
                CursorState::Open { id } => {
                    let command = Command::GetMore {
                        collection: self.collection.clone(),
                        cursor_id: id,
                        batch_size: self.page_size(),
                    };
                    self.fetch(command).await?;
                }
                CursorState::Exhausted => {
                    self.state = CursorState::Closed;
                    return Ok(None);
                }
                CursorState::Closed => return Err(DocwireError::CursorClosed),
            }
        }
    }

    /// Every remaining document, in server order; closes the cursor
    pub async fn to_array(&mut self) -> Result<Vec<Document>> {
        self.ensure_open()?;

        let mut documents = Vec::new();
        while let Some(document) = self.next().await? {
            documents.push(document);
        }
        Ok(documents)
    }

    /// Call `visit(Some(doc))` per document, then `visit(None)` once
    pub async fn each<F>(&mut self, mut visit: F) -> Result<()>
    where
        F: FnMut(Option<Document>),
    {
        self.ensure_open()?;

        while let Some(document) = self.next().await? {
            visit(Some(document));
        }
        visit(None);
        Ok(())
    }

    /// Execution plan; does not consume the cursor
    pub async fn explain(&self) -> Result<Document> {
        self.ensure_open()?;
        self.session
            .submit(self.spec.explain_command(&self.collection))
            .await
    }

    /// Stop reading and release the server cursor; idempotent
    pub async fn close(&mut self) {
        if self.state == CursorState::Closed {
            return;
        }
        self.release().await;
        self.state = CursorState::Closed;
    }

    /// The remaining documents as a stream
    ///
    /// A failed read is yielded once and ends the stream.
    pub fn into_stream(self) -> impl Stream<Item = Result<Document>> {
        stream::unfold(Some(self), |cursor| async move {
            let mut cursor = cursor?;
            match cursor.next().await {
                Ok(Some(document)) => Some((Ok(document), Some(cursor))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.state == CursorState::Closed {
            return Err(DocwireError::CursorClosed);
        }
        Ok(())
    }

    /// Requested page size, never above what the limit still allows
    fn page_size(&self) -> u32 {
        let limit = self.spec.limit();
        if limit == 0 {
            return self.batch_size;
        }
        let left = limit.saturating_sub(self.returned).min(u32::MAX as u64) as u32;
        match self.batch_size {
            0 => left,
            size => size.min(left),
        }
    }

    /// Run a cursor-bearing command and buffer its page
    async fn fetch(&mut self, command: Command) -> Result<()> {
        let reply = match self.session.submit(command).await {
            Ok(reply) => reply,
            Err(e) => {
                self.state = CursorState::Closed;
                self.buffer.clear();
                return Err(e);
            }
        };

        let page = CursorReply::from_reply(reply)?;
        tracing::trace!(
            "Cursor on {} received {} document(s), id {}",
            self.collection,
            page.batch.len(),
            page.id
        );

        self.buffer.extend(page.batch);
        self.state = if page.id == 0 {
            CursorState::Exhausted
        } else {
            CursorState::Open { id: page.id }
        };
        Ok(())
    }

    /// Kill the server cursor if one is open and drop buffered documents
    async fn release(&mut self) {
        if let CursorState::Open { id } = self.state {
            let kill = Command::KillCursors {
                collection: self.collection.clone(),
                cursor_ids: vec![id],
            };
            if let Err(e) = self.session.submit(kill).await {
                tracing::warn!("Failed to kill cursor {} on {}: {}", id, self.collection, e);
            }
        }
        self.buffer.clear();
        if self.state != CursorState::Closed {
            self.state = CursorState::Exhausted;
        }
    }
}

impl<S: CursorSpec> Drop for Cursor<S> {
    fn drop(&mut self) {
        let CursorState::Open { id } = self.state else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(
                "Cursor {} on {} dropped outside a runtime; left for the server to reap",
                id,
                self.collection
            );
            return;
        };

        let session = Arc::clone(&self.session);
        let collection = self.collection.clone();
        runtime.spawn(async move {
            let kill = Command::KillCursors {
                collection: collection.clone(),
                cursor_ids: vec![id],
            };
            if let Err(e) = session.submit(kill).await {
                tracing::debug!("Failed to kill dropped cursor {} on {}: {}", id, collection, e);
            }
        });
    }
}
