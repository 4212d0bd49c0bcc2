//! Sort normalization
//!
//! Every accepted sort form becomes an ordered list of `(field, direction)`
//! pairs. Unordered mappings are rejected: they cannot say which key wins.

use std::collections::HashMap;

use bson::{Bson, Document};

use crate::error::{DocwireError, Result};
use crate::protocol::bson_as_i64;

/// Direction of one sort key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    /// Parse `1`, `-1`, `"asc"`, `"ascending"`, `"desc"` or `"descending"`
    pub fn from_bson(value: &Bson) -> Result<Self> {
        if let Bson::String(name) = value {
            return match name.to_ascii_lowercase().as_str() {
                "asc" | "ascending" => Ok(SortDirection::Ascending),
                "desc" | "descending" => Ok(SortDirection::Descending),
                other => Err(DocwireError::Validation(format!(
                    "Illegal sort direction '{}'",
                    other
                ))),
            };
        }

        match bson_as_i64(value) {
            Some(1) => Ok(SortDirection::Ascending),
            Some(-1) => Ok(SortDirection::Descending),
            _ => Err(DocwireError::Validation(format!(
                "Illegal sort direction {}",
                value
            ))),
        }
    }

    /// Wire value: 1 or -1
    pub fn as_i32(self) -> i32 {
        match self {
            SortDirection::Ascending => 1,
            SortDirection::Descending => -1,
        }
    }
}

/// Normalized sort specification
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortSpec {
    keys: Vec<(String, SortDirection)>,
}

impl SortSpec {
    /// Empty specification (server order)
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a key; earlier keys take priority
    pub fn then(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.keys.push((field.into(), direction));
        self
    }

    /// Ascending on every field, left-to-right priority
    pub fn from_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: fields
                .into_iter()
                .map(|field| (field.into(), SortDirection::Ascending))
                .collect(),
        }
    }

    /// Normalize a BSON sort value
    ///
    /// Accepts a field name, a list of field names, a list of
    /// `[field, direction]` pairs, or an empty list. A sub-document is
    /// refused as an unordered mapping.
    pub fn from_bson(value: &Bson) -> Result<Self> {
        match value {
            Bson::String(field) => {
                let mut spec = Self::new();
                spec.push_field(field, SortDirection::Ascending)?;
                Ok(spec)
            }
            Bson::Array(items) => {
                let mut spec = Self::new();
                for item in items {
                    match item {
                        Bson::String(field) => spec.push_field(field, SortDirection::Ascending)?,
                        Bson::Array(pair) => {
                            let (field, direction) = parse_pair(pair)?;
                            spec.push_field(field, direction)?;
                        }
                        other => {
                            return Err(DocwireError::Validation(format!(
                                "Illegal sort clause entry {}",
                                other
                            )))
                        }
                    }
                }
                Ok(spec)
            }
            Bson::Document(_) => Err(DocwireError::Validation(
                "Invalid sort specification: an unordered mapping cannot fix key priority; \
                 use a list of [field, direction] pairs"
                    .to_string(),
            )),
            other => Err(DocwireError::Validation(format!(
                "Illegal sort clause {}",
                other
            ))),
        }
    }

    fn push_field(&mut self, field: &str, direction: SortDirection) -> Result<()> {
        if field.is_empty() {
            return Err(DocwireError::Validation(
                "sort field name cannot be empty".to_string(),
            ));
        }
        self.keys.push((field.to_string(), direction));
        Ok(())
    }

    pub fn keys(&self) -> &[(String, SortDirection)] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Ordered `{field: 1|-1}` document for the wire
    pub fn to_document(&self) -> Document {
        let mut document = Document::new();
        for (field, direction) in &self.keys {
            document.insert(field.clone(), direction.as_i32());
        }
        document
    }
}

fn parse_pair(pair: &[Bson]) -> Result<(&str, SortDirection)> {
    match pair {
        [Bson::String(field), direction] => Ok((field.as_str(), SortDirection::from_bson(direction)?)),
        _ => Err(DocwireError::Validation(
            "sort pairs must be [field, direction]".to_string(),
        )),
    }
}

impl From<&str> for SortSpec {
    fn from(field: &str) -> Self {
        Self::from_fields([field])
    }
}

impl From<Vec<&str>> for SortSpec {
    fn from(fields: Vec<&str>) -> Self {
        Self::from_fields(fields)
    }
}

impl From<Vec<(&str, SortDirection)>> for SortSpec {
    fn from(pairs: Vec<(&str, SortDirection)>) -> Self {
        Self {
            keys: pairs
                .into_iter()
                .map(|(field, direction)| (field.to_string(), direction))
                .collect(),
        }
    }
}

impl<V> TryFrom<HashMap<String, V>> for SortSpec {
    type Error = DocwireError;

    /// Always refused, whatever the contents
    fn try_from(_: HashMap<String, V>) -> Result<Self> {
        Err(DocwireError::Validation(
            "Invalid sort specification: a hash map has no key order".to_string(),
        ))
    }
}
