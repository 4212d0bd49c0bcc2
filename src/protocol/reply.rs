//! Reply definitions
//!
//! Interprets server reply documents: the `ok` flag, cursor pages, and
//! write-command outcomes.

use bson::{Bson, Document};
use serde::Deserialize;

use crate::error::{CommandFailure, DocwireError, Result};

/// Read any BSON number as i64
pub fn bson_as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(v) => Some(*v as i64),
        Bson::Int64(v) => Some(*v),
        Bson::Double(v) if v.fract() == 0.0 => Some(*v as i64),
        Bson::Boolean(v) => Some(*v as i64),
        _ => None,
    }
}

/// Convert an unsigned count to a BSON int64, saturating at `i64::MAX`
pub fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Read any BSON number as f64
pub fn bson_as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(*v as f64),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

/// Split a reply into success or failure on its `ok` field
pub fn check_reply(reply: Document) -> std::result::Result<Document, CommandFailure> {
    let ok = reply.get("ok").and_then(bson_as_f64).unwrap_or(0.0);
    if ok == 1.0 {
        Ok(reply)
    } else {
        Err(CommandFailure::from_reply(&reply))
    }
}

// =============================================================================
// Cursor Replies
// =============================================================================

/// `cursor` sub-document of a `find`/`aggregate`/`getMore` reply
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CursorBody {
    id: i64,
    #[serde(default)]
    ns: String,
    #[serde(default)]
    first_batch: Option<Vec<Document>>,
    #[serde(default)]
    next_batch: Option<Vec<Document>>,
}

#[derive(Debug, Deserialize)]
struct CursorEnvelope {
    cursor: CursorBody,
}

/// One page of cursor results
#[derive(Debug, Clone)]
pub struct CursorReply {
    /// Server cursor id; 0 means the cursor is exhausted server-side
    pub id: i64,

    /// Namespace the cursor reads from
    pub ns: String,

    /// Documents in this page
    pub batch: Vec<Document>,
}

impl CursorReply {
    /// Parse a successful cursor-bearing reply
    pub fn from_reply(reply: Document) -> Result<Self> {
        let envelope: CursorEnvelope = bson::from_document(reply)?;
        let body = envelope.cursor;
        let batch = body.first_batch.or(body.next_batch).unwrap_or_default();

        Ok(Self {
            id: body.id,
            ns: body.ns,
            batch,
        })
    }
}

// =============================================================================
// Write Replies
// =============================================================================

/// A generated id reported for an upserted document
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertedId {
    /// Index of the operation that upserted
    pub index: usize,

    /// The `_id` of the new document
    pub id: Bson,
}

/// One failed operation inside a write command
#[derive(Debug, Clone, PartialEq)]
pub struct WriteErrorDetail {
    /// Index of the failing operation
    pub index: usize,

    /// Server error code
    pub code: i32,

    /// Server error message
    pub message: String,
}

/// Parsed outcome of an `insert`/`update`/`delete` command
#[derive(Debug, Clone, Default)]
pub struct WriteReply {
    /// Documents affected (matched + upserted for updates)
    pub n: i64,

    /// Documents actually changed by an update
    pub n_modified: i64,

    /// Upserts, indexed within the command
    pub upserted: Vec<UpsertedId>,

    /// Per-operation failures, indexed within the command
    pub write_errors: Vec<WriteErrorDetail>,

    /// Write concern failure, if any
    pub write_concern_error: Option<WriteErrorDetail>,
}

impl WriteReply {
    /// Parse a write command reply
    ///
    /// `upserted` may be a single document or an array; both normalize to a list.
    pub fn from_reply(reply: &Document) -> Result<Self> {
        let n = reply.get("n").and_then(bson_as_i64).unwrap_or(0);
        let n_modified = reply.get("nModified").and_then(bson_as_i64).unwrap_or(0);

        let upserted = match reply.get("upserted") {
            Some(Bson::Array(items)) => items
                .iter()
                .map(parse_upserted)
                .collect::<Result<Vec<_>>>()?,
            Some(single @ Bson::Document(_)) => vec![parse_upserted(single)?],
            Some(other) => {
                return Err(DocwireError::Protocol(format!(
                    "unexpected upserted value: {}",
                    other
                )))
            }
            None => Vec::new(),
        };

        let write_errors = match reply.get("writeErrors") {
            Some(Bson::Array(items)) => items
                .iter()
                .map(parse_write_error)
                .collect::<Result<Vec<_>>>()?,
            _ => Vec::new(),
        };

        let write_concern_error = match reply.get("writeConcernError") {
            Some(value @ Bson::Document(_)) => Some(parse_write_error(value)?),
            _ => None,
        };

        Ok(Self {
            n,
            n_modified,
            upserted,
            write_errors,
            write_concern_error,
        })
    }
}

fn parse_upserted(value: &Bson) -> Result<UpsertedId> {
    let document = value
        .as_document()
        .ok_or_else(|| DocwireError::Protocol("upserted entry is not a document".to_string()))?;
    let index = document.get("index").and_then(bson_as_i64).unwrap_or(0);
    let id = document.get("_id").cloned().unwrap_or(Bson::Null);

    Ok(UpsertedId {
        index: index.max(0) as usize,
        id,
    })
}

fn parse_write_error(value: &Bson) -> Result<WriteErrorDetail> {
    let document = value
        .as_document()
        .ok_or_else(|| DocwireError::Protocol("write error entry is not a document".to_string()))?;
    let index = document.get("index").and_then(bson_as_i64).unwrap_or(0);
    let code = document.get("code").and_then(bson_as_i64).unwrap_or(0);
    let message = document
        .get_str("errmsg")
        .unwrap_or("unknown write error")
        .to_string();

    Ok(WriteErrorDetail {
        index: index.max(0) as usize,
        code: code as i32,
        message,
    })
}
