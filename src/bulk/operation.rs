//! Bulk operations
//!
//! One caller-declared write and the payload document it contributes to a
//! batched write command.

use bson::{doc, Document};

use crate::protocol::WriteKind;

/// A single write recorded in a bulk operation
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOperation {
    Insert(Document),
    UpdateOne {
        selector: Document,
        modifier: Document,
        upsert: bool,
    },
    UpdateMany {
        selector: Document,
        modifier: Document,
        upsert: bool,
    },
    RemoveOne {
        selector: Document,
    },
    RemoveMany {
        selector: Document,
    },
}

impl BatchOperation {
    /// Write command this operation belongs to
    pub fn kind(&self) -> WriteKind {
        match self {
            BatchOperation::Insert(_) => WriteKind::Insert,
            BatchOperation::UpdateOne { .. } | BatchOperation::UpdateMany { .. } => WriteKind::Update,
            BatchOperation::RemoveOne { .. } | BatchOperation::RemoveMany { .. } => WriteKind::Delete,
        }
    }

    /// Entry for the command's `documents`/`updates`/`deletes` array
    pub fn into_payload(self) -> Document {
        match self {
            BatchOperation::Insert(document) => document,
            BatchOperation::UpdateOne {
                selector,
                modifier,
                upsert,
            } => doc! { "q": selector, "u": modifier, "multi": false, "upsert": upsert },
            BatchOperation::UpdateMany {
                selector,
                modifier,
                upsert,
            } => doc! { "q": selector, "u": modifier, "multi": true, "upsert": upsert },
            BatchOperation::RemoveOne { selector } => doc! { "q": selector, "limit": 1 },
            BatchOperation::RemoveMany { selector } => doc! { "q": selector, "limit": 0 },
        }
    }
}
