//! Batcher
//!
//! Groups operations into write-command batches.
//!
//! ## Rules
//! - A batch holds one kind of operation
//! - A change of kind seals the open batch
//! - So does an operation that would push the batch past the document or
//!   byte cap; an operation larger than the byte cap gets a batch of its own
//! - Every batch remembers the global index of its first operation

use bson::Document;

use super::operation::BatchOperation;
use crate::protocol::{size_of, WriteKind};

/// Default cap on operations per batch
pub const DEFAULT_MAX_BATCH_DOCUMENTS: usize = 1000;

/// Default cap on payload bytes per batch (16 MiB)
pub const DEFAULT_MAX_BATCH_BYTES: usize = 16 * 1024 * 1024;

/// Caps that seal a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_documents: usize,
    pub max_bytes: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_documents: DEFAULT_MAX_BATCH_DOCUMENTS,
            max_bytes: DEFAULT_MAX_BATCH_BYTES,
        }
    }
}

/// A run of same-kind operations sent as one command
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub kind: WriteKind,

    /// Global index of `operations[0]`
    pub start_index: usize,

    /// Payload documents, in caller order
    pub operations: Vec<Document>,

    /// Sum of the payloads' encoded sizes
    pub byte_size: usize,
}

impl Batch {
    fn new(kind: WriteKind, start_index: usize) -> Self {
        Self {
            kind,
            start_index,
            operations: Vec::new(),
            byte_size: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Accumulates operations into sealed batches
#[derive(Debug)]
pub struct Batcher {
    limits: BatchLimits,
    sealed: Vec<Batch>,
    open: Option<Batch>,

    /// Global index the next operation receives
    next_index: usize,
}

impl Batcher {
    pub fn new(limits: BatchLimits) -> Self {
        Self {
            limits,
            sealed: Vec::new(),
            open: None,
            next_index: 0,
        }
    }

    pub fn limits(&self) -> BatchLimits {
        self.limits
    }

    /// Append an operation, sealing the open batch first when needed
    pub fn push(&mut self, operation: BatchOperation) {
        let kind = operation.kind();
        let payload = operation.into_payload();

        // Step 1: size the payload
        let size = size_of(&payload);

        // Step 2/3: seal on kind change or when a cap would be exceeded
        let must_seal = match &self.open {
            Some(open) => {
                open.kind != kind
                    || open.len() + 1 > self.limits.max_documents
                    || open.byte_size + size > self.limits.max_bytes
            }
            None => false,
        };
        if must_seal {
            self.seal();
        }

        // Step 4: append
        let next_index = self.next_index;
        let open = self.open.get_or_insert_with(|| Batch::new(kind, next_index));
        open.operations.push(payload);
        open.byte_size += size;
        self.next_index += 1;
    }

    fn seal(&mut self) {
        if let Some(batch) = self.open.take() {
            tracing::trace!(
                "Sealed {} batch at index {} ({} ops, {} bytes)",
                batch.kind.command_name(),
                batch.start_index,
                batch.len(),
                batch.byte_size
            );
            self.sealed.push(batch);
        }
    }

    /// Operations recorded so far
    pub fn len(&self) -> usize {
        self.next_index
    }

    pub fn is_empty(&self) -> bool {
        self.next_index == 0
    }

    /// Batches the operations would execute as, counting the open one
    pub fn batch_count(&self) -> usize {
        self.sealed.len() + usize::from(self.open.is_some())
    }

    /// Seal the open batch and hand over every batch in order
    pub fn finish(mut self) -> Vec<Batch> {
        self.seal();
        self.sealed
    }
}

impl Default for Batcher {
    fn default() -> Self {
        Self::new(BatchLimits::default())
    }
}
