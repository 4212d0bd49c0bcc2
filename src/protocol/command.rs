//! Command definitions
//!
//! Typed commands the driver sends. Each one renders to the BSON command
//! document that travels in the OP_MSG body.

use bson::{doc, Bson, Document};

use super::reply::saturating_i64;

/// Kinds of write command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteKind {
    Insert,
    Update,
    Delete,
}

impl WriteKind {
    /// Command name on the wire
    pub fn command_name(self) -> &'static str {
        match self {
            WriteKind::Insert => "insert",
            WriteKind::Update => "update",
            WriteKind::Delete => "delete",
        }
    }

    /// Field holding the operation payloads
    pub fn payload_field(self) -> &'static str {
        match self {
            WriteKind::Insert => "documents",
            WriteKind::Update => "updates",
            WriteKind::Delete => "deletes",
        }
    }
}

/// A command to send to the server
#[derive(Debug, Clone)]
pub enum Command {
    /// Open a query cursor
    Find {
        collection: String,
        filter: Document,
        projection: Option<Document>,
        sort: Option<Document>,
        skip: u64,
        limit: u64,
        batch_size: u32,
    },

    /// Fetch the next page of an open cursor
    GetMore {
        collection: String,
        cursor_id: i64,
        batch_size: u32,
    },

    /// Release server-side cursors
    KillCursors {
        collection: String,
        cursor_ids: Vec<i64>,
    },

    /// Run an aggregation pipeline
    Aggregate {
        collection: String,
        pipeline: Vec<Document>,
        batch_size: u32,
        explain: bool,
        read_preference: Option<Document>,
    },

    /// Count documents matching a filter
    Count { collection: String, query: Document },

    /// Batched insert/update/delete
    Write {
        kind: WriteKind,
        collection: String,
        payload: Vec<Document>,
        ordered: bool,
        write_concern: Option<Document>,
        max_time_ms: Option<u64>,
    },

    /// Explain another command instead of running it
    Explain { command: Box<Command> },

    /// Health check
    Ping,

    /// Any other command, sent as-is
    Raw(Document),
}

impl Command {
    /// Command name (the first key of the rendered document)
    pub fn name(&self) -> &str {
        match self {
            Command::Find { .. } => "find",
            Command::GetMore { .. } => "getMore",
            Command::KillCursors { .. } => "killCursors",
            Command::Aggregate { .. } => "aggregate",
            Command::Count { .. } => "count",
            Command::Write { kind, .. } => kind.command_name(),
            Command::Explain { .. } => "explain",
            Command::Ping => "ping",
            Command::Raw(document) => document.keys().next().map(String::as_str).unwrap_or(""),
        }
    }

    /// Whether this command modifies data
    pub fn is_write(&self) -> bool {
        matches!(self, Command::Write { .. })
    }

    /// Render the command body, without `$db`
    pub fn to_body(&self) -> Document {
        match self {
            Command::Find {
                collection,
                filter,
                projection,
                sort,
                skip,
                limit,
                batch_size,
            } => {
                let mut body = doc! { "find": collection.as_str(), "filter": filter.clone() };
                if let Some(sort) = sort {
                    body.insert("sort", sort.clone());
                }
                if let Some(projection) = projection {
                    body.insert("projection", projection.clone());
                }
                if *skip > 0 {
                    body.insert("skip", saturating_i64(*skip));
                }
                if *limit > 0 {
                    body.insert("limit", saturating_i64(*limit));
                }
                if *batch_size > 0 {
                    body.insert("batchSize", *batch_size as i64);
                }
                body
            }
            Command::GetMore {
                collection,
                cursor_id,
                batch_size,
            } => {
                let mut body = doc! { "getMore": *cursor_id, "collection": collection.as_str() };
                if *batch_size > 0 {
                    body.insert("batchSize", *batch_size as i64);
                }
                body
            }
            Command::KillCursors {
                collection,
                cursor_ids,
            } => doc! {
                "killCursors": collection.as_str(),
                "cursors": cursor_ids.iter().map(|id| Bson::Int64(*id)).collect::<Vec<_>>(),
            },
            Command::Aggregate {
                collection,
                pipeline,
                batch_size,
                explain,
                read_preference,
            } => {
                let mut body = doc! {
                    "aggregate": collection.as_str(),
                    "pipeline": pipeline.iter().cloned().map(Bson::Document).collect::<Vec<_>>(),
                };
                if *explain {
                    body.insert("explain", true);
                } else {
                    let mut cursor = Document::new();
                    if *batch_size > 0 {
                        cursor.insert("batchSize", *batch_size as i64);
                    }
                    body.insert("cursor", cursor);
                }
                if let Some(read_preference) = read_preference {
                    body.insert("$readPreference", read_preference.clone());
                }
                body
            }
            Command::Count { collection, query } => {
                doc! { "count": collection.as_str(), "query": query.clone() }
            }
            Command::Write {
                kind,
                collection,
                payload,
                ordered,
                write_concern,
                max_time_ms,
            } => {
                let mut body = Document::new();
                body.insert(kind.command_name(), collection.as_str());
                body.insert(
                    kind.payload_field(),
                    payload.iter().cloned().map(Bson::Document).collect::<Vec<_>>(),
                );
                body.insert("ordered", *ordered);
                if let Some(write_concern) = write_concern {
                    body.insert("writeConcern", write_concern.clone());
                }
                if let Some(max_time_ms) = max_time_ms {
                    body.insert("maxTimeMS", saturating_i64(*max_time_ms));
                }
                body
            }
            Command::Explain { command } => {
                doc! { "explain": command.to_body(), "verbosity": "queryPlanner" }
            }
            Command::Ping => doc! { "ping": 1 },
            Command::Raw(document) => document.clone(),
        }
    }

    /// Render the full command document addressed to `database`
    pub fn to_document(&self, database: &str) -> Document {
        let mut body = self.to_body();
        body.insert("$db", database);
        body
    }
}
