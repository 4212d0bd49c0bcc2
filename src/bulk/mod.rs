//! Bulk Write Module
//!
//! Interleaved inserts, updates and removes sent as the fewest write
//! commands the batch caps allow.
//!
//! ## Responsibilities
//! - Record operations in caller order (the index space for all reporting)
//! - Seal batches on kind change and on count/byte caps
//! - Execute batches strictly in order, stopping early when ordered
//! - Merge batch replies into one `BulkWriteResult` with global indices
//!
//! ## Outcome
//! - `Ok(result)`: every operation succeeded
//! - `Err(DocwireError::BulkWrite(result))`: some operation failed; `result`
//!   keeps the counts and upserts of everything that ran
//! - `Err(DocwireError::BulkAborted { partial, source })`: the session
//!   failed mid-way

mod batcher;
mod executor;
mod operation;
mod result;

pub use batcher::{Batch, BatchLimits, Batcher, DEFAULT_MAX_BATCH_BYTES, DEFAULT_MAX_BATCH_DOCUMENTS};
pub use operation::BatchOperation;
pub use result::{BulkWriteError, BulkWriteResult, UpsertedId, WriteConcernError};

use std::sync::Arc;

use bson::Document;

use crate::error::{DocwireError, Result};
use crate::protocol::bson_as_i64;
use crate::session::Session;
use executor::Executor;

/// Options accepted when starting a bulk operation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkOptions {
    /// Server-side time budget per batch command
    pub max_time_ms: Option<u64>,

    /// Overrides the collection's write concern
    pub write_concern: Option<Document>,
}

impl BulkOptions {
    /// Parse `{maxTimeMS, writeConcern}`
    pub fn from_document(options: &Document) -> Result<Self> {
        let max_time_ms = match options.get("maxTimeMS") {
            None => None,
            Some(value) => match bson_as_i64(value) {
                Some(ms) if ms >= 0 => Some(ms as u64),
                _ => {
                    return Err(DocwireError::Validation(format!(
                        "maxTimeMS must be a non-negative integer, got {}",
                        value
                    )))
                }
            },
        };

        let write_concern = match options.get("writeConcern") {
            None => None,
            Some(bson::Bson::Document(concern)) => Some(concern.clone()),
            Some(other) => {
                return Err(DocwireError::Validation(format!(
                    "writeConcern must be a document, got {}",
                    other
                )))
            }
        };

        Ok(Self {
            max_time_ms,
            write_concern,
        })
    }
}

/// A bulk write being assembled
pub struct BulkOperation {
    session: Arc<Session>,
    collection: String,
    ordered: bool,
    batcher: Batcher,

    /// Resolved once: explicit option, else the collection default
    write_concern: Option<Document>,
    max_time_ms: Option<u64>,
}

impl BulkOperation {
    pub(crate) fn new(
        session: Arc<Session>,
        collection: impl Into<String>,
        ordered: bool,
        options: BulkOptions,
        default_write_concern: Option<Document>,
        limits: BatchLimits,
    ) -> Self {
        Self {
            session,
            collection: collection.into(),
            ordered,
            batcher: Batcher::new(limits),
            write_concern: options.write_concern.or(default_write_concern),
            max_time_ms: options.max_time_ms,
        }
    }

    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    /// Operations recorded so far
    pub fn len(&self) -> usize {
        self.batcher.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batcher.is_empty()
    }

    /// Batches the recorded operations currently form
    pub fn batch_count(&self) -> usize {
        self.batcher.batch_count()
    }

    pub fn write_concern(&self) -> Option<&Document> {
        self.write_concern.as_ref()
    }

    /// Record any operation
    pub fn push(&mut self, operation: BatchOperation) -> &mut Self {
        self.batcher.push(operation);
        self
    }

    pub fn insert(&mut self, document: Document) -> &mut Self {
        self.push(BatchOperation::Insert(document))
    }

    /// Scope the next update or remove to `selector`
    pub fn find(&mut self, selector: Document) -> FindOperations<'_> {
        FindOperations {
            bulk: self,
            selector,
            upsert: false,
        }
    }

    /// Run every batch and merge the replies
    pub async fn execute(self) -> Result<BulkWriteResult> {
        if self.batcher.is_empty() {
            return Err(DocwireError::Validation("no operations".to_string()));
        }

        let operation_count = self.batcher.len();
        let batches = self.batcher.finish();
        tracing::debug!(
            "Executing {} bulk write on {}: {} operation(s) in {} batch(es)",
            if self.ordered { "ordered" } else { "unordered" },
            self.collection,
            operation_count,
            batches.len()
        );

        let executor = Executor {
            session: &self.session,
            collection: &self.collection,
            ordered: self.ordered,
            write_concern: self.write_concern,
            max_time_ms: self.max_time_ms,
        };
        executor.run(batches).await
    }
}

/// Selector-scoped operations returned by [`BulkOperation::find`]
pub struct FindOperations<'a> {
    bulk: &'a mut BulkOperation,
    selector: Document,
    upsert: bool,
}

impl<'a> FindOperations<'a> {
    /// Insert when nothing matches
    pub fn upsert(mut self) -> Self {
        self.upsert = true;
        self
    }

    /// Update every matching document
    pub fn update(self, modifier: Document) -> &'a mut BulkOperation {
        self.bulk.push(BatchOperation::UpdateMany {
            selector: self.selector,
            modifier,
            upsert: self.upsert,
        })
    }

    /// Update the first matching document
    pub fn update_one(self, modifier: Document) -> &'a mut BulkOperation {
        self.bulk.push(BatchOperation::UpdateOne {
            selector: self.selector,
            modifier,
            upsert: self.upsert,
        })
    }

    /// Replace the first matching document
    pub fn replace_one(self, replacement: Document) -> &'a mut BulkOperation {
        self.update_one(replacement)
    }

    /// Remove every matching document
    pub fn remove(self) -> &'a mut BulkOperation {
        self.bulk.push(BatchOperation::RemoveMany {
            selector: self.selector,
        })
    }

    /// Remove the first matching document
    pub fn remove_one(self) -> &'a mut BulkOperation {
        self.bulk.push(BatchOperation::RemoveOne {
            selector: self.selector,
        })
    }
}
