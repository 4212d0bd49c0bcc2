//! Query cursors
//!
//! `find` against one collection: filter, projection, sort, skip, limit.

use bson::{Bson, Document};

use super::{Cursor, CursorSpec, SortSpec};
use crate::error::{DocwireError, Result};
use crate::protocol::{bson_as_i64, Command};

/// Pending specification of a query cursor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindSpec {
    pub filter: Document,
    pub projection: Option<Document>,
    pub sort: SortSpec,
    pub skip: u64,

    /// 0 = unlimited
    pub limit: u64,
}

impl FindSpec {
    /// Specification for `filter` shaped by `options`
    pub fn new(filter: Document, options: FindOptions) -> Self {
        Self {
            filter,
            projection: options.projection,
            sort: options.sort.unwrap_or_default(),
            skip: options.skip.unwrap_or(0),
            limit: options.limit.unwrap_or(0),
        }
    }

    fn find_command(&self, collection: &str, batch_size: u32) -> Command {
        Command::Find {
            collection: collection.to_string(),
            filter: self.filter.clone(),
            projection: self.projection.clone(),
            sort: (!self.sort.is_empty()).then(|| self.sort.to_document()),
            skip: self.skip,
            limit: self.limit,
            batch_size,
        }
    }
}

impl CursorSpec for FindSpec {
    fn open_command(&self, collection: &str, batch_size: u32) -> Command {
        self.find_command(collection, batch_size)
    }

    fn explain_command(&self, collection: &str) -> Command {
        Command::Explain {
            command: Box::new(self.find_command(collection, 0)),
        }
    }

    fn limit(&self) -> u64 {
        self.limit
    }
}

/// Options recognized by `Collection::find`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub sort: Option<SortSpec>,
    pub limit: Option<u64>,
    pub skip: Option<u64>,
    pub projection: Option<Document>,
    pub batch_size: Option<u32>,
}

impl FindOptions {
    /// Parse `{sort, limit, skip, fields | projection, batchSize}`
    ///
    /// Unknown keys are ignored. Negative counts and unordered sort mappings
    /// are validation errors.
    pub fn from_document(options: &Document) -> Result<Self> {
        let mut parsed = Self::default();

        if let Some(sort) = options.get("sort") {
            parsed.sort = Some(SortSpec::from_bson(sort)?);
        }
        if let Some(limit) = options.get("limit") {
            parsed.limit = Some(count_option("limit", limit)?);
        }
        if let Some(skip) = options.get("skip") {
            parsed.skip = Some(count_option("skip", skip)?);
        }
        if let Some(size) = options.get("batchSize") {
            let size = count_option("batchSize", size)?;
            parsed.batch_size = Some(u32::try_from(size).map_err(|_| {
                DocwireError::Validation("batchSize is too large".to_string())
            })?);
        }

        let fields = options.get("projection").or_else(|| options.get("fields"));
        if let Some(fields) = fields {
            parsed.projection = Some(projection_option(fields)?);
        }

        Ok(parsed)
    }
}

fn count_option(name: &str, value: &Bson) -> Result<u64> {
    match bson_as_i64(value) {
        Some(n) if n >= 0 => Ok(n as u64),
        Some(n) => Err(DocwireError::Validation(format!(
            "{} must be non-negative, got {}",
            name, n
        ))),
        None => Err(DocwireError::Validation(format!(
            "{} must be an integer, got {}",
            name, value
        ))),
    }
}

/// A projection document, or a list of field names to include
fn projection_option(value: &Bson) -> Result<Document> {
    match value {
        Bson::Document(document) => Ok(document.clone()),
        Bson::Array(fields) => {
            let mut projection = Document::new();
            for field in fields {
                let name = field.as_str().ok_or_else(|| {
                    DocwireError::Validation("projection field names must be strings".to_string())
                })?;
                projection.insert(name, 1);
            }
            Ok(projection)
        }
        other => Err(DocwireError::Validation(format!(
            "projection must be a document or a list of fields, got {}",
            other
        ))),
    }
}

// =============================================================================
// Query Cursor Builders
// =============================================================================

impl Cursor<FindSpec> {
    /// Replace the filter
    pub fn filter(&mut self, filter: Document) -> &mut Self {
        self.spec.filter = filter;
        self
    }

    /// Replace the projection
    pub fn project(&mut self, projection: Document) -> &mut Self {
        self.spec.projection = Some(projection);
        self
    }

    /// Sort by any accepted BSON form; unordered mappings are refused
    pub fn sort(&mut self, sort: impl Into<Bson>) -> Result<&mut Self> {
        self.spec.sort = SortSpec::from_bson(&sort.into())?;
        Ok(self)
    }

    /// Sort by an already normalized specification
    pub fn sort_by(&mut self, sort: SortSpec) -> &mut Self {
        self.spec.sort = sort;
        self
    }

    /// Cap on yielded documents (0 = unlimited)
    pub fn limit(&mut self, limit: u64) -> &mut Self {
        self.spec.limit = limit;
        self
    }

    pub fn skip(&mut self, skip: u64) -> &mut Self {
        self.spec.skip = skip;
        self
    }

    /// Number of documents matching the filter, ignoring limit and skip
    pub async fn count(&self) -> Result<u64> {
        self.ensure_open()?;

        let reply = self
            .session()
            .submit(Command::Count {
                collection: self.collection().to_string(),
                query: self.spec.filter.clone(),
            })
            .await?;

        let n = reply.get("n").and_then(bson_as_i64).unwrap_or(0);
        Ok(n.max(0) as u64)
    }
}
