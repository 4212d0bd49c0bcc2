//! Database and collection handles
//!
//! Entry points for application code. Every handle shares one session.

use std::sync::Arc;

use bson::{doc, Document};

use crate::bulk::{BatchLimits, BulkOperation, BulkOptions};
use crate::config::ClientConfig;
use crate::cursor::{
    AggregateOptions, AggregationCursor, Cursor, FindOptions, FindSpec, Pipeline, QueryCursor,
};
use crate::error::{CommandFailure, DocwireError, Result};
use crate::network::{Connector, TcpConnector};
use crate::protocol::{bson_as_i64, Command, WriteKind, WriteReply};
use crate::session::Session;

/// A connected database
#[derive(Clone)]
pub struct Database {
    session: Arc<Session>,
}

impl Database {
    /// Connect over TCP to the configured endpoints
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let connector = TcpConnector::new(config.connect_timeout_ms);
        Self::with_connector(config, connector).await
    }

    /// Connect through any connector
    pub async fn with_connector<C>(config: ClientConfig, connector: C) -> Result<Self>
    where
        C: Connector + 'static,
    {
        if config.endpoints.is_empty() {
            return Err(DocwireError::Config("no endpoints configured".to_string()));
        }

        let session = Arc::new(Session::new(config, Arc::new(connector)));
        session.open().await?;
        Ok(Self { session })
    }

    pub fn name(&self) -> &str {
        self.session.database_name()
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn collection(&self, name: impl Into<String>) -> Collection {
        Collection {
            session: Arc::clone(&self.session),
            name: name.into(),
            write_concern: self.session.config().write_concern.clone(),
        }
    }

    /// Run an arbitrary command document against this database
    pub async fn run_command(&self, command: Document) -> Result<Document> {
        let mut command = command;
        if !command.contains_key("$db") {
            command.insert("$db", self.name());
        }
        self.session.submit_document(command).await
    }

    /// Round-trip a `ping`
    pub async fn ping(&self) -> Result<()> {
        self.session.submit(Command::Ping).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.session.close().await;
    }
}

/// A collection handle
#[derive(Clone)]
pub struct Collection {
    session: Arc<Session>,
    name: String,

    /// Default for bulk and single writes
    write_concern: Option<Document>,
}

impl Collection {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn write_concern(&self) -> Option<&Document> {
        self.write_concern.as_ref()
    }

    /// Same collection with a different default write concern
    pub fn with_write_concern(&self, write_concern: Document) -> Self {
        Self {
            write_concern: Some(write_concern),
            ..self.clone()
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Query cursor over documents matching `filter`
    pub fn find(&self, filter: Document, options: FindOptions) -> QueryCursor {
        let batch_size = options.batch_size;
        let mut cursor = Cursor::new(
            Arc::clone(&self.session),
            self.name.clone(),
            FindSpec::new(filter, options),
        );
        if let Some(size) = batch_size {
            cursor.batch_size(size);
        }
        cursor
    }

    /// Like [`find`](Self::find) with options given as a document
    pub fn find_with(&self, filter: Document, options: &Document) -> Result<QueryCursor> {
        Ok(self.find(filter, FindOptions::from_document(options)?))
    }

    /// First document matching `filter`
    pub async fn find_one(&self, filter: Document) -> Result<Option<Document>> {
        let mut cursor = self.find(
            filter,
            FindOptions {
                limit: Some(1),
                ..FindOptions::default()
            },
        );
        let first = cursor.next().await?;
        cursor.close().await;
        Ok(first)
    }

    /// Aggregation cursor over `stages`; more stages can be chained on it
    pub fn aggregate(&self, stages: Vec<Document>, options: AggregateOptions) -> AggregationCursor {
        let mut cursor = Cursor::new(Arc::clone(&self.session), self.name.clone(), Pipeline::new(stages));
        if let Some(size) = options.batch_size {
            cursor.batch_size(size);
        }
        if let Some(read_preference) = options.read_preference {
            cursor.with_read_preference(read_preference);
        }
        cursor
    }

    /// Documents matching `filter`
    pub async fn count(&self, filter: Document) -> Result<u64> {
        let reply = self
            .session
            .submit(Command::Count {
                collection: self.name.clone(),
                query: filter,
            })
            .await?;
        Ok(reply.get("n").and_then(bson_as_i64).unwrap_or(0).max(0) as u64)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    pub async fn insert_one(&self, document: Document) -> Result<WriteReply> {
        self.insert_many(vec![document]).await
    }

    pub async fn insert_many(&self, documents: Vec<Document>) -> Result<WriteReply> {
        if documents.is_empty() {
            return Err(DocwireError::Validation("no documents to insert".to_string()));
        }
        self.write(WriteKind::Insert, documents).await
    }

    /// Update the first match, or every match when `multi`
    pub async fn update(
        &self,
        selector: Document,
        modifier: Document,
        multi: bool,
        upsert: bool,
    ) -> Result<WriteReply> {
        let statement = doc! { "q": selector, "u": modifier, "multi": multi, "upsert": upsert };
        self.write(WriteKind::Update, vec![statement]).await
    }

    /// Remove the first match when `just_one`, else every match
    pub async fn remove(&self, selector: Document, just_one: bool) -> Result<WriteReply> {
        let limit = if just_one { 1 } else { 0 };
        let statement = doc! { "q": selector, "limit": limit };
        self.write(WriteKind::Delete, vec![statement]).await
    }

    /// One write command; the first write error is returned as a failure
    async fn write(&self, kind: WriteKind, payload: Vec<Document>) -> Result<WriteReply> {
        let reply = self
            .session
            .submit(Command::Write {
                kind,
                collection: self.name.clone(),
                payload,
                ordered: true,
                write_concern: self.write_concern.clone(),
                max_time_ms: None,
            })
            .await?;

        let outcome = WriteReply::from_reply(&reply)?;
        if let Some(error) = outcome.write_errors.first() {
            return Err(DocwireError::Command(CommandFailure::new(
                error.code,
                error.message.clone(),
            )));
        }
        Ok(outcome)
    }

    // =========================================================================
    // Bulk
    // =========================================================================

    pub fn initialize_ordered_bulk_op(&self, options: BulkOptions) -> BulkOperation {
        self.bulk_op(true, options)
    }

    pub fn initialize_unordered_bulk_op(&self, options: BulkOptions) -> BulkOperation {
        self.bulk_op(false, options)
    }

    fn bulk_op(&self, ordered: bool, options: BulkOptions) -> BulkOperation {
        let config = self.session.config();
        let limits = BatchLimits {
            max_documents: config.max_batch_documents.max(1),
            max_bytes: config.max_batch_bytes.max(1),
        };
        BulkOperation::new(
            Arc::clone(&self.session),
            self.name.clone(),
            ordered,
            options,
            self.write_concern.clone(),
            limits,
        )
    }
}
