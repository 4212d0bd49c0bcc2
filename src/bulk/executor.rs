//! Batch execution
//!
//! Runs sealed batches one at a time and merges each reply before the next
//! batch is sent.

use bson::Document;

use super::batcher::Batch;
use super::result::BulkWriteResult;
use crate::error::{DocwireError, Result};
use crate::protocol::{Command, WriteReply};
use crate::session::Session;

/// Everything attached identically to each batch command
pub(crate) struct Executor<'a> {
    pub session: &'a Session,
    pub collection: &'a str,
    pub ordered: bool,
    pub write_concern: Option<Document>,
    pub max_time_ms: Option<u64>,
}

impl Executor<'_> {
    /// Run `batches` in order
    ///
    /// Ordered execution stops after the first batch that reports an error,
    /// write concern failures included.
    pub async fn run(&self, batches: Vec<Batch>) -> Result<BulkWriteResult> {
        let total = batches.len();
        let mut result = BulkWriteResult::default();

        for (position, batch) in batches.into_iter().enumerate() {
            let Batch {
                kind,
                start_index,
                operations,
                ..
            } = batch;
            let errors_before = result.error_count();

            tracing::trace!(
                "Executing batch {}/{}: {} x{} at index {}",
                position + 1,
                total,
                kind.command_name(),
                operations.len(),
                start_index
            );

            let command = Command::Write {
                kind,
                collection: self.collection.to_string(),
                payload: operations,
                ordered: self.ordered,
                write_concern: self.write_concern.clone(),
                max_time_ms: self.max_time_ms,
            };

            match self.session.submit(command).await {
                Ok(reply) => match WriteReply::from_reply(&reply) {
                    Ok(parsed) => result.merge(kind, start_index, parsed),
                    Err(e) => return Err(aborted(result, e)),
                },
                Err(DocwireError::Command(failure)) => {
                    result.record_command_failure(start_index, &failure)
                }
                Err(e) => return Err(aborted(result, e)),
            }

            if self.ordered && result.error_count() > errors_before {
                let skipped = total - position - 1;
                if skipped > 0 {
                    tracing::debug!("Ordered bulk write stopped; {} batch(es) not sent", skipped);
                }
                break;
            }
        }

        if result.is_ok() {
            Ok(result)
        } else {
            Err(DocwireError::BulkWrite(Box::new(result)))
        }
    }
}

fn aborted(partial: BulkWriteResult, source: DocwireError) -> DocwireError {
    tracing::warn!("Bulk write aborted: {}", source);
    DocwireError::BulkAborted {
        partial: Box::new(partial),
        source: Box::new(source),
    }
}
