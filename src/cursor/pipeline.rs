//! Aggregation cursors
//!
//! Stages are appended fluently and sent as one `aggregate` command on the
//! first read.

use bson::{doc, Document};

use super::{Cursor, CursorSpec, CursorState, SortSpec};
use crate::error::Result;
use crate::protocol::{bson_as_i64, saturating_i64, Command, CursorReply};

/// Read preference attached to an aggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadPreference {
    #[default]
    Primary,
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

impl ReadPreference {
    pub fn as_str(self) -> &'static str {
        match self {
            ReadPreference::Primary => "primary",
            ReadPreference::PrimaryPreferred => "primaryPreferred",
            ReadPreference::Secondary => "secondary",
            ReadPreference::SecondaryPreferred => "secondaryPreferred",
            ReadPreference::Nearest => "nearest",
        }
    }

    fn to_document(self) -> Document {
        doc! { "mode": self.as_str() }
    }
}

/// Options recognized by `Collection::aggregate`
#[derive(Debug, Clone, Default)]
pub struct AggregateOptions {
    pub batch_size: Option<u32>,
    pub read_preference: Option<ReadPreference>,
}

/// Pending stage list of an aggregation cursor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    stages: Vec<Document>,
    read_preference: Option<ReadPreference>,
}

impl Pipeline {
    pub fn new(stages: Vec<Document>) -> Self {
        Self {
            stages,
            read_preference: None,
        }
    }

    pub fn stages(&self) -> &[Document] {
        &self.stages
    }

    pub fn read_preference(&self) -> Option<ReadPreference> {
        self.read_preference
    }

    fn aggregate_command(&self, collection: &str, stages: Vec<Document>, batch_size: u32, explain: bool) -> Command {
        Command::Aggregate {
            collection: collection.to_string(),
            pipeline: stages,
            batch_size,
            explain,
            read_preference: self.read_preference.map(ReadPreference::to_document),
        }
    }

    /// Stages with trailing `$skip`/`$limit` removed, then `$count`
    fn counting_stages(&self) -> Vec<Document> {
        let mut stages = self.stages.clone();
        while stages
            .last()
            .map(|stage| stage.contains_key("$skip") || stage.contains_key("$limit"))
            .unwrap_or(false)
        {
            stages.pop();
        }
        stages.push(doc! { "$count": "n" });
        stages
    }
}

impl CursorSpec for Pipeline {
    fn open_command(&self, collection: &str, batch_size: u32) -> Command {
        self.aggregate_command(collection, self.stages.clone(), batch_size, false)
    }

    fn explain_command(&self, collection: &str) -> Command {
        self.aggregate_command(collection, self.stages.clone(), 0, true)
    }
}

// =============================================================================
// Pipeline Cursor Builders
// =============================================================================

impl Cursor<Pipeline> {
    /// Append any stage document
    pub fn stage(&mut self, stage: Document) -> &mut Self {
        self.spec.stages.push(stage);
        self
    }

    /// `$match`
    pub fn find(&mut self, filter: Document) -> &mut Self {
        self.stage(doc! { "$match": filter })
    }

    /// Alias of [`find`](Self::find)
    pub fn match_stage(&mut self, filter: Document) -> &mut Self {
        self.find(filter)
    }

    /// `$unwind` on `field`; the `$` prefix is optional
    pub fn unwind(&mut self, field: &str) -> &mut Self {
        let path = if field.starts_with('$') {
            field.to_string()
        } else {
            format!("${}", field)
        };
        self.stage(doc! { "$unwind": path })
    }

    pub fn group(&mut self, group: Document) -> &mut Self {
        self.stage(doc! { "$group": group })
    }

    pub fn project(&mut self, projection: Document) -> &mut Self {
        self.stage(doc! { "$project": projection })
    }

    pub fn sort(&mut self, sort: impl Into<SortSpec>) -> &mut Self {
        let sort = sort.into();
        self.stage(doc! { "$sort": sort.to_document() })
    }

    pub fn skip(&mut self, skip: u64) -> &mut Self {
        self.stage(doc! { "$skip": saturating_i64(skip) })
    }

    pub fn limit(&mut self, limit: u64) -> &mut Self {
        self.stage(doc! { "$limit": saturating_i64(limit) })
    }

    pub fn geo_near(&mut self, options: Document) -> &mut Self {
        self.stage(doc! { "$geoNear": options })
    }

    pub fn with_read_preference(&mut self, read_preference: ReadPreference) -> &mut Self {
        self.spec.read_preference = Some(read_preference);
        self
    }

    /// First remaining result of the pipeline; consumes the cursor
    ///
    /// Before the first read this also narrows the pipeline to one document.
    pub async fn get_one(&mut self) -> Result<Option<Document>> {
        self.ensure_open()?;
        if self.state() == CursorState::Pending {
            self.limit(1);
        }
        let first = self.next().await?;
        self.close().await;
        Ok(first)
    }

    /// Number of documents the pipeline produces, ignoring trailing skip/limit
    pub async fn count(&self) -> Result<u64> {
        self.ensure_open()?;

        let command = self
            .spec
            .aggregate_command(self.collection(), self.spec.counting_stages(), 0, false);
        let reply = self.session().submit(command).await?;
        let page = CursorReply::from_reply(reply)?;

        let n = page
            .batch
            .first()
            .and_then(|document| document.get("n"))
            .and_then(bson_as_i64)
            .unwrap_or(0);
        Ok(n.max(0) as u64)
    }
}
