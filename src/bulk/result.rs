//! Bulk write results
//!
//! Per-batch replies merged into one report addressed by global operation
//! index.

use crate::error::CommandFailure;
use crate::protocol::{WriteKind, WriteReply};

pub use crate::protocol::{UpsertedId, WriteErrorDetail as BulkWriteError};

/// Write concern failure reported by one batch
#[derive(Debug, Clone, PartialEq)]
pub struct WriteConcernError {
    pub code: i32,
    pub message: String,
}

/// Aggregate outcome of a bulk operation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkWriteResult {
    /// Documents affected across all executed batches
    pub n: i64,

    pub n_inserted: i64,
    pub n_matched: i64,
    pub n_modified: i64,
    pub n_removed: i64,
    pub n_upserted: i64,

    /// Upserted ids by global operation index
    pub upserted: Vec<UpsertedId>,

    /// Failed operations by global operation index
    pub write_errors: Vec<BulkWriteError>,

    pub write_concern_errors: Vec<WriteConcernError>,
}

impl BulkWriteResult {
    /// True when no operation failed and write concern was satisfied
    pub fn is_ok(&self) -> bool {
        self.write_errors.is_empty() && self.write_concern_errors.is_empty()
    }

    /// Write errors plus write concern errors recorded so far
    pub fn error_count(&self) -> usize {
        self.write_errors.len() + self.write_concern_errors.len()
    }

    /// Fold one batch's reply in, shifting its indices by `start_index`
    pub fn merge(&mut self, kind: WriteKind, start_index: usize, reply: WriteReply) {
        self.n += reply.n;

        match kind {
            WriteKind::Insert => self.n_inserted += reply.n,
            WriteKind::Update => {
                let upserts = reply.upserted.len() as i64;
                self.n_upserted += upserts;
                self.n_matched += reply.n - upserts;
                self.n_modified += reply.n_modified;
            }
            WriteKind::Delete => self.n_removed += reply.n,
        }

        self.upserted
            .extend(reply.upserted.into_iter().map(|upsert| UpsertedId {
                index: start_index + upsert.index,
                id: upsert.id,
            }));

        self.write_errors
            .extend(reply.write_errors.into_iter().map(|error| BulkWriteError {
                index: start_index + error.index,
                ..error
            }));

        if let Some(concern) = reply.write_concern_error {
            self.write_concern_errors.push(WriteConcernError {
                code: concern.code,
                message: concern.message,
            });
        }
    }

    /// Record a whole-command rejection as one error at the batch's first index
    pub fn record_command_failure(&mut self, start_index: usize, failure: &CommandFailure) {
        self.write_errors.push(BulkWriteError {
            index: start_index,
            code: failure.code,
            message: failure.message.clone(),
        });
    }
}
