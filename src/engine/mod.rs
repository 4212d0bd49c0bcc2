//! Engine Module
//!
//! In-memory document engine that executes driver commands and produces
//! server-shaped replies. It backs the in-process transport, the bundled
//! `docwire-server`, and the integration tests.
//!
//! ## Responsibilities
//! - Store documents per namespace in natural (insertion) order
//! - Execute `insert`/`update`/`delete` with ordered/unordered semantics
//! - Serve `find`/`aggregate` through server-side cursors paged by `getMore`
//! - Report failures as `{ok: 0, code, errmsg}` replies, never as panics
//!
//! ## Concurrency Model
//! - `collections`: RwLock (many concurrent readers, exclusive writer)
//! - `cursors`: Mutex (page hand-out is short and exclusive)
//! - All methods take `&self`; share the engine through `Arc<Engine>`

mod aggregate;
mod compare;
mod matcher;
mod update;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};

use bson::oid::ObjectId;
use bson::{doc, Bson, Document};
use parking_lot::{Mutex, RwLock};

use crate::error::CommandFailure;
use crate::protocol::{bson_as_i64, MAX_MESSAGE_SIZE};

pub use aggregate::{project, run_pipeline};
pub use compare::{compare_values, get_path, sort_documents};
pub use matcher::matches;
pub use update::{apply_update, is_modifier, upsert_seed};

/// Default first-page size when a command gives none
const DEFAULT_BATCH_SIZE: usize = 101;

// -----------------------------------------------------------------------------
// Error codes
// -----------------------------------------------------------------------------
const BAD_VALUE: i32 = 2;
const FAILED_TO_PARSE: i32 = 9;
const NAMESPACE_NOT_FOUND: i32 = 26;
const CURSOR_NOT_FOUND: i32 = 43;
const COMMAND_NOT_FOUND: i32 = 59;
const DUPLICATE_KEY: i32 = 11000;
const FORCED_ERROR: i32 = 10038;

type CommandResult = std::result::Result<Document, CommandFailure>;

/// A server-side cursor awaiting `getMore`
struct OpenCursor {
    ns: String,
    remaining: VecDeque<Document>,
}

/// The in-memory document engine
pub struct Engine {
    /// Documents per namespace ("db.collection"), in insertion order
    collections: RwLock<BTreeMap<String, Vec<Document>>>,

    /// Open cursors by id
    cursors: Mutex<HashMap<i64, OpenCursor>>,

    /// Next cursor id to hand out (never 0)
    next_cursor_id: AtomicI64,
}

impl Engine {
    /// Create an empty engine
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(BTreeMap::new()),
            cursors: Mutex::new(HashMap::new()),
            next_cursor_id: AtomicI64::new(1),
        }
    }

    /// Execute a command document and return the reply document
    ///
    /// Failures come back as `{ok: 0, code, codeName?, errmsg}`.
    pub fn execute(&self, command: &Document) -> Document {
        let name = command.keys().next().cloned().unwrap_or_default();
        let database = command.get_str("$db").unwrap_or("test").to_string();

        tracing::trace!("Engine executing '{}' on {}", name, database);

        match self.dispatch(&database, &name, command) {
            Ok(mut reply) => {
                reply.insert("ok", 1.0);
                reply
            }
            Err(failure) => {
                tracing::debug!("Command '{}' failed: {}", name, failure);
                let mut reply = doc! {
                    "ok": 0.0,
                    "errmsg": failure.message.clone(),
                    "code": failure.code,
                };
                if let Some(code_name) = failure.code_name {
                    reply.insert("codeName", code_name);
                }
                reply
            }
        }
    }

    /// Route a command to its handler
    fn dispatch(&self, database: &str, name: &str, command: &Document) -> CommandResult {
        match name {
            "ping" => Ok(Document::new()),
            "hello" | "isMaster" | "ismaster" => Ok(doc! {
                "isWritablePrimary": true,
                "maxBsonObjectSize": 16 * 1024 * 1024,
                "maxMessageSizeBytes": MAX_MESSAGE_SIZE as i64,
                "maxWriteBatchSize": 100_000,
            }),
            "insert" => self.insert(database, command),
            "update" => self.update(database, command),
            "delete" => self.delete(database, command),
            "find" => self.find(database, command),
            "getMore" => self.get_more(command),
            "killCursors" => self.kill_cursors(command),
            "aggregate" => self.aggregate(database, command),
            "count" => self.count(database, command),
            "explain" => self.explain(database, command),
            "drop" => self.drop_collection(database, command),
            "forceerror" => Err(CommandFailure {
                code: FORCED_ERROR,
                code_name: Some("ForcedError".to_string()),
                message: "forced error".to_string(),
            }),
            other => Err(CommandFailure {
                code: COMMAND_NOT_FOUND,
                code_name: Some("CommandNotFound".to_string()),
                message: format!("no such command: '{}'", other),
            }),
        }
    }

    // =========================================================================
    // Write Commands
    // =========================================================================

    fn insert(&self, database: &str, command: &Document) -> CommandResult {
        let ns = namespace(database, command, "insert")?;
        let documents = document_list(command, "documents")?;
        let ordered = command.get_bool("ordered").unwrap_or(true);

        let mut collections = self.collections.write();
        let collection = collections.entry(ns).or_default();

        let mut n = 0i32;
        let mut write_errors = Vec::new();

        for (index, document) in documents.into_iter().enumerate() {
            let document = with_id(document);
            let id = document.get("_id").cloned().unwrap_or(Bson::Null);

            if collection.iter().any(|existing| existing.get("_id") == Some(&id)) {
                write_errors.push(write_error(
                    index,
                    DUPLICATE_KEY,
                    format!("E11000 duplicate key error dup key: {{ _id: {} }}", id),
                ));
                if ordered {
                    break;
                }
                continue;
            }

            collection.push(document);
            n += 1;
        }

        let mut reply = doc! { "n": n };
        if !write_errors.is_empty() {
            reply.insert("writeErrors", write_errors);
        }
        Ok(reply)
    }

    fn update(&self, database: &str, command: &Document) -> CommandResult {
        let ns = namespace(database, command, "update")?;
        let updates = document_list(command, "updates")?;
        let ordered = command.get_bool("ordered").unwrap_or(true);

        let mut collections = self.collections.write();
        let collection = collections.entry(ns).or_default();

        let mut n = 0i64;
        let mut n_modified = 0i64;
        let mut upserted = Vec::new();
        let mut write_errors = Vec::new();

        for (index, statement) in updates.iter().enumerate() {
            match apply_update_statement(collection, statement) {
                Ok(outcome) => {
                    n += outcome.matched;
                    n_modified += outcome.modified;
                    if let Some(id) = outcome.upserted {
                        n += 1;
                        upserted.push(doc! { "index": index as i32, "_id": id });
                    }
                }
                Err(failure) => {
                    write_errors.push(write_error(index, failure.code, failure.message));
                    if ordered {
                        break;
                    }
                }
            }
        }

        let mut reply = doc! { "n": n, "nModified": n_modified };
        if !upserted.is_empty() {
            reply.insert("upserted", upserted);
        }
        if !write_errors.is_empty() {
            reply.insert("writeErrors", write_errors);
        }
        Ok(reply)
    }

    fn delete(&self, database: &str, command: &Document) -> CommandResult {
        let ns = namespace(database, command, "delete")?;
        let deletes = document_list(command, "deletes")?;
        let ordered = command.get_bool("ordered").unwrap_or(true);

        let mut collections = self.collections.write();
        let collection = collections.entry(ns).or_default();

        let mut n = 0i64;
        let mut write_errors = Vec::new();

        for (index, statement) in deletes.iter().enumerate() {
            let filter = statement.get_document("q").cloned().unwrap_or_default();
            let limit = statement.get("limit").and_then(bson_as_i64).unwrap_or(0);

            match remove_matching(collection, &filter, limit == 1) {
                Ok(removed) => n += removed,
                Err(failure) => {
                    write_errors.push(write_error(index, failure.code, failure.message));
                    if ordered {
                        break;
                    }
                }
            }
        }

        let mut reply = doc! { "n": n };
        if !write_errors.is_empty() {
            reply.insert("writeErrors", write_errors);
        }
        Ok(reply)
    }

    // =========================================================================
    // Read Commands
    // =========================================================================

    fn find(&self, database: &str, command: &Document) -> CommandResult {
        let ns = namespace(database, command, "find")?;
        let results = self.query(&ns, command)?;
        let batch_size = batch_size(command.get("batchSize"))?;
        Ok(self.open_cursor(ns, results, batch_size))
    }

    /// Filter, sort, skip, limit and project a find command's results
    fn query(&self, ns: &str, command: &Document) -> std::result::Result<Vec<Document>, CommandFailure> {
        let filter = optional_document(command, "filter")?;
        let sort = optional_document(command, "sort")?;
        let projection = optional_document(command, "projection")?;
        let skip = non_negative(command, "skip")?;
        let limit = non_negative(command, "limit")?;

        let mut results = self.matching(ns, &filter)?;
        if !sort.is_empty() {
            sort_documents(&mut results, &sort);
        }

        let mut results: Vec<Document> = results.into_iter().skip(skip).collect();
        if limit > 0 {
            results.truncate(limit);
        }

        results
            .iter()
            .map(|document| project(document, &projection))
            .collect()
    }

    fn aggregate(&self, database: &str, command: &Document) -> CommandResult {
        let ns = namespace(database, command, "aggregate")?;
        let pipeline = document_list(command, "pipeline")?;

        if command.get_bool("explain").unwrap_or(false) {
            return Ok(doc! {
                "stages": pipeline.iter().cloned().map(Bson::Document).collect::<Vec<_>>(),
                "queryPlanner": { "namespace": ns.as_str(), "winningPlan": { "stage": "COLLSCAN" } },
            });
        }

        let cursor_options = optional_document(command, "cursor")?;
        let batch_size = batch_size(cursor_options.get("batchSize"))?;

        let documents = self.matching(&ns, &Document::new())?;
        let results = run_pipeline(documents, &pipeline)?;
        Ok(self.open_cursor(ns, results, batch_size))
    }

    fn count(&self, database: &str, command: &Document) -> CommandResult {
        let ns = namespace(database, command, "count")?;
        let query = optional_document(command, "query")?;
        let n = self.matching(&ns, &query)?.len();
        Ok(doc! { "n": n as i64 })
    }

    fn explain(&self, database: &str, command: &Document) -> CommandResult {
        let inner = command
            .get_document("explain")
            .map_err(|_| failure(FAILED_TO_PARSE, "explain needs a command document"))?;
        let inner_name = inner.keys().next().cloned().unwrap_or_default();
        let ns = namespace(database, inner, &inner_name)?;

        let filter = match inner_name.as_str() {
            "find" => optional_document(inner, "filter")?,
            "count" => optional_document(inner, "query")?,
            other => {
                return Err(failure(
                    BAD_VALUE,
                    format!("Explain is not supported for command '{}'", other),
                ))
            }
        };
        let sort = optional_document(inner, "sort")?;

        let scan = doc! { "stage": "COLLSCAN", "filter": filter.clone() };
        let winning_plan = if sort.is_empty() {
            scan
        } else {
            doc! { "stage": "SORT", "sortPattern": sort, "inputStage": scan }
        };
        let examined = self.matching(&ns, &Document::new())?.len() as i64;

        Ok(doc! {
            "queryPlanner": {
                "namespace": ns.as_str(),
                "parsedQuery": filter,
                "winningPlan": winning_plan,
            },
            "executionStats": { "totalDocsExamined": examined },
        })
    }

    fn get_more(&self, command: &Document) -> CommandResult {
        let cursor_id = command
            .get("getMore")
            .and_then(bson_as_i64)
            .ok_or_else(|| failure(FAILED_TO_PARSE, "getMore needs a cursor id"))?;
        let batch_size = batch_size(command.get("batchSize"))?;

        let mut cursors = self.cursors.lock();
        let cursor = cursors.get_mut(&cursor_id).ok_or_else(|| {
            failure(CURSOR_NOT_FOUND, format!("cursor id {} not found", cursor_id))
        })?;

        let take = batch_size.unwrap_or(cursor.remaining.len());
        let take = take.min(cursor.remaining.len());
        let batch: Vec<Bson> = cursor.remaining.drain(..take).map(Bson::Document).collect();
        let ns = cursor.ns.clone();

        let id = if cursor.remaining.is_empty() {
            cursors.remove(&cursor_id);
            0
        } else {
            cursor_id
        };

        Ok(doc! { "cursor": { "id": id, "ns": ns, "nextBatch": batch } })
    }

    fn kill_cursors(&self, command: &Document) -> CommandResult {
        let ids = command
            .get_array("cursors")
            .map_err(|_| failure(FAILED_TO_PARSE, "killCursors needs a cursors array"))?;

        let mut cursors = self.cursors.lock();
        let mut killed = Vec::new();
        let mut not_found = Vec::new();
        for id in ids.iter().filter_map(bson_as_i64) {
            if cursors.remove(&id).is_some() {
                killed.push(id);
            } else {
                not_found.push(id);
            }
        }

        Ok(doc! { "cursorsKilled": killed, "cursorsNotFound": not_found })
    }

    fn drop_collection(&self, database: &str, command: &Document) -> CommandResult {
        let ns = namespace(database, command, "drop")?;
        match self.collections.write().remove(&ns) {
            Some(_) => Ok(doc! { "ns": ns }),
            None => Err(CommandFailure {
                code: NAMESPACE_NOT_FOUND,
                code_name: Some("NamespaceNotFound".to_string()),
                message: "ns not found".to_string(),
            }),
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Clone every document in `ns` matching `filter`, in natural order
    fn matching(&self, ns: &str, filter: &Document) -> std::result::Result<Vec<Document>, CommandFailure> {
        let collections = self.collections.read();
        let mut out = Vec::new();
        if let Some(collection) = collections.get(ns) {
            for document in collection {
                if matches(document, filter)? {
                    out.push(document.clone());
                }
            }
        }
        Ok(out)
    }

    /// Hand out the first page and park the rest behind a cursor id
    fn open_cursor(&self, ns: String, results: Vec<Document>, batch_size: Option<usize>) -> Document {
        let first = batch_size.unwrap_or(DEFAULT_BATCH_SIZE).min(results.len());
        let mut remaining: VecDeque<Document> = results.into();
        let first_batch: Vec<Bson> = remaining.drain(..first).map(Bson::Document).collect();

        let id = if remaining.is_empty() {
            0
        } else {
            let id = self.next_cursor_id.fetch_add(1, Ordering::Relaxed);
            self.cursors.lock().insert(
                id,
                OpenCursor {
                    ns: ns.clone(),
                    remaining,
                },
            );
            id
        };

        doc! { "cursor": { "id": id, "ns": ns, "firstBatch": first_batch } }
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Number of documents stored in `database.collection`
    pub fn document_count(&self, database: &str, collection: &str) -> usize {
        self.collections
            .read()
            .get(&format!("{}.{}", database, collection))
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Number of server-side cursors still open
    pub fn open_cursor_count(&self) -> usize {
        self.cursors.lock().len()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Statement helpers
// =============================================================================

struct UpdateOutcome {
    matched: i64,
    modified: i64,
    upserted: Option<Bson>,
}

fn apply_update_statement(
    collection: &mut Vec<Document>,
    statement: &Document,
) -> std::result::Result<UpdateOutcome, CommandFailure> {
    let selector = statement.get_document("q").cloned().unwrap_or_default();
    let update = statement
        .get_document("u")
        .map_err(|_| failure(FAILED_TO_PARSE, "update statement needs a 'u' document"))?;
    let multi = statement.get_bool("multi").unwrap_or(false);
    let upsert = statement.get_bool("upsert").unwrap_or(false);

    if multi && !is_modifier(update) {
        return Err(failure(BAD_VALUE, "multi update only works with $ operators"));
    }

    let mut matched = 0;
    let mut modified = 0;
    for document in collection.iter_mut() {
        if !matches(document, &selector)? {
            continue;
        }
        let updated = apply_update(document, update)?;
        matched += 1;
        if updated != *document {
            *document = updated;
            modified += 1;
        }
        if !multi {
            break;
        }
    }

    if matched > 0 || !upsert {
        return Ok(UpdateOutcome {
            matched,
            modified,
            upserted: None,
        });
    }

    let seed = upsert_seed(&selector);
    let created = if is_modifier(update) {
        apply_update(&seed, update)?
    } else {
        let mut replacement = update.clone();
        if let (Some(id), false) = (seed.get("_id"), replacement.contains_key("_id")) {
            replacement.insert("_id", id.clone());
        }
        replacement
    };
    let created = with_id(created);
    let id = created.get("_id").cloned().unwrap_or(Bson::Null);

    if collection.iter().any(|existing| existing.get("_id") == Some(&id)) {
        return Err(failure(
            DUPLICATE_KEY,
            format!("E11000 duplicate key error dup key: {{ _id: {} }}", id),
        ));
    }
    collection.push(created);

    Ok(UpdateOutcome {
        matched: 0,
        modified: 0,
        upserted: Some(id),
    })
}

fn remove_matching(
    collection: &mut Vec<Document>,
    filter: &Document,
    just_one: bool,
) -> std::result::Result<i64, CommandFailure> {
    let mut removed = 0;
    let mut index = 0;
    while index < collection.len() {
        if matches(&collection[index], filter)? {
            collection.remove(index);
            removed += 1;
            if just_one {
                break;
            }
        } else {
            index += 1;
        }
    }
    Ok(removed)
}

/// Ensure a document has an `_id`, generating an ObjectId first in field order
fn with_id(document: Document) -> Document {
    if document.contains_key("_id") {
        return document;
    }
    let mut out = doc! { "_id": ObjectId::new() };
    for (key, value) in document {
        out.insert(key, value);
    }
    out
}

fn write_error(index: usize, code: i32, message: String) -> Document {
    doc! { "index": index as i32, "code": code, "errmsg": message }
}

fn failure(code: i32, message: impl Into<String>) -> CommandFailure {
    CommandFailure::new(code, message)
}

// =============================================================================
// Argument parsing
// =============================================================================

fn namespace(database: &str, command: &Document, name: &str) -> std::result::Result<String, CommandFailure> {
    let collection = command
        .get_str(name)
        .map_err(|_| failure(FAILED_TO_PARSE, format!("'{}' needs a collection name", name)))?;
    if collection.is_empty() {
        return Err(failure(BAD_VALUE, "collection name cannot be empty"));
    }
    Ok(format!("{}.{}", database, collection))
}

fn document_list(command: &Document, field: &str) -> std::result::Result<Vec<Document>, CommandFailure> {
    let items = command
        .get_array(field)
        .map_err(|_| failure(FAILED_TO_PARSE, format!("'{}' must be an array", field)))?;
    items
        .iter()
        .map(|item| {
            item.as_document()
                .cloned()
                .ok_or_else(|| failure(FAILED_TO_PARSE, format!("'{}' entries must be documents", field)))
        })
        .collect()
}

fn optional_document(command: &Document, field: &str) -> std::result::Result<Document, CommandFailure> {
    match command.get(field) {
        None | Some(Bson::Null) => Ok(Document::new()),
        Some(Bson::Document(document)) => Ok(document.clone()),
        Some(_) => Err(failure(FAILED_TO_PARSE, format!("'{}' must be a document", field))),
    }
}

fn non_negative(command: &Document, field: &str) -> std::result::Result<usize, CommandFailure> {
    match command.get(field) {
        None => Ok(0),
        Some(value) => match bson_as_i64(value) {
            Some(n) if n >= 0 => Ok(n as usize),
            _ => Err(failure(BAD_VALUE, format!("'{}' must be a non-negative integer", field))),
        },
    }
}

fn batch_size(value: Option<&Bson>) -> std::result::Result<Option<usize>, CommandFailure> {
    match value {
        None => Ok(None),
        Some(value) => match bson_as_i64(value) {
            Some(0) => Ok(None),
            Some(n) if n > 0 => Ok(Some(n as usize)),
            _ => Err(failure(BAD_VALUE, "batchSize must be a non-negative integer")),
        },
    }
}
