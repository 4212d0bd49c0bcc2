//! Aggregation pipeline and projection
//!
//! Stages: `$match`, `$project`, `$sort`, `$skip`, `$limit`, `$unwind`,
//! `$group`, `$count`. Everything runs over an in-memory document list.

use std::collections::HashMap;

use bson::{Bson, Document};

use super::compare::{compare_values, get_path, sort_documents};
use super::matcher::matches;
use crate::error::CommandFailure;
use crate::protocol::bson_as_i64;

/// BadValue
const BAD_VALUE: i32 = 2;
/// Location code for an unrecognized pipeline stage
const UNKNOWN_STAGE: i32 = 40324;
/// Location code for `$geoNear` without a geo index
const NO_GEO_INDEX: i32 = 291;

type StageResult<T> = std::result::Result<T, CommandFailure>;

/// Run a pipeline over `documents`
pub fn run_pipeline(mut documents: Vec<Document>, pipeline: &[Document]) -> StageResult<Vec<Document>> {
    for stage in pipeline {
        let (name, spec) = stage
            .iter()
            .next()
            .ok_or_else(|| CommandFailure::new(BAD_VALUE, "empty pipeline stage"))?;
        if stage.len() != 1 {
            return Err(CommandFailure::new(
                BAD_VALUE,
                "a pipeline stage specification object must contain exactly one field",
            ));
        }

        documents = match name.as_str() {
            "$match" => {
                let filter = expect_document(name, spec)?;
                let mut kept = Vec::with_capacity(documents.len());
                for document in documents {
                    if matches(&document, filter)? {
                        kept.push(document);
                    }
                }
                kept
            }
            "$project" => {
                let projection = expect_document(name, spec)?;
                documents
                    .iter()
                    .map(|document| project(document, projection))
                    .collect::<StageResult<Vec<_>>>()?
            }
            "$sort" => {
                let sort = expect_document(name, spec)?;
                sort_documents(&mut documents, sort);
                documents
            }
            "$skip" => {
                let skip = expect_count(name, spec)?;
                documents.into_iter().skip(skip).collect()
            }
            "$limit" => {
                let limit = expect_count(name, spec)?;
                if limit == 0 {
                    return Err(CommandFailure::new(BAD_VALUE, "the limit must be positive"));
                }
                documents.truncate(limit);
                documents
            }
            "$unwind" => unwind(documents, spec)?,
            "$group" => group(documents, expect_document(name, spec)?)?,
            "$count" => {
                let field = spec
                    .as_str()
                    .filter(|f| !f.is_empty() && !f.starts_with('$'))
                    .ok_or_else(|| CommandFailure::new(BAD_VALUE, "$count needs a field name"))?;
                if documents.is_empty() {
                    Vec::new()
                } else {
                    let mut counted = Document::new();
                    counted.insert(field, documents.len() as i32);
                    vec![counted]
                }
            }
            "$geoNear" => {
                return Err(CommandFailure::new(
                    NO_GEO_INDEX,
                    "$geoNear requires a 2d or 2dsphere index",
                ))
            }
            other => {
                return Err(CommandFailure::new(
                    UNKNOWN_STAGE,
                    format!("Unrecognized pipeline stage name: '{}'", other),
                ))
            }
        };
    }

    Ok(documents)
}

fn expect_document<'a>(stage: &str, spec: &'a Bson) -> StageResult<&'a Document> {
    spec.as_document()
        .ok_or_else(|| CommandFailure::new(BAD_VALUE, format!("{} needs an object", stage)))
}

fn expect_count(stage: &str, spec: &Bson) -> StageResult<usize> {
    match bson_as_i64(spec) {
        Some(n) if n >= 0 => Ok(n as usize),
        _ => Err(CommandFailure::new(
            BAD_VALUE,
            format!("{} needs a non-negative integer", stage),
        )),
    }
}

/// Evaluate an expression: `"$path"` reads a field, anything else is a literal
fn evaluate(document: &Document, expression: &Bson) -> Bson {
    match expression {
        Bson::String(s) if s.starts_with('$') => get_path(document, &s[1..]).cloned().unwrap_or(Bson::Null),
        Bson::Document(fields) if !fields.keys().any(|k| k.starts_with('$')) => {
            let mut out = Document::new();
            for (key, value) in fields {
                out.insert(key.clone(), evaluate(document, value));
            }
            Bson::Document(out)
        }
        other => other.clone(),
    }
}

// =============================================================================
// Projection
// =============================================================================

/// Apply an inclusion or exclusion projection
pub fn project(document: &Document, projection: &Document) -> StageResult<Document> {
    if projection.is_empty() {
        return Ok(document.clone());
    }

    let flag = |value: &Bson| match value {
        Bson::Boolean(b) => Some(*b),
        other => bson_as_i64(other).map(|n| n != 0),
    };

    let mut includes = false;
    let mut excludes = false;
    for (key, value) in projection {
        match flag(value) {
            Some(true) => includes = true,
            Some(false) if key != "_id" => excludes = true,
            Some(false) => {}
            None => includes = true,
        }
    }
    if includes && excludes {
        return Err(CommandFailure::new(
            BAD_VALUE,
            "Cannot do exclusion and inclusion in the same projection",
        ));
    }

    let keep_id = projection.get("_id").and_then(flag).unwrap_or(true);

    if includes {
        let mut out = Document::new();
        if keep_id {
            if let Some(id) = document.get("_id") {
                out.insert("_id", id.clone());
            }
        }
        for (key, value) in projection {
            if key == "_id" {
                continue;
            }
            match flag(value) {
                Some(true) => {
                    if let Some(found) = get_path(document, key) {
                        out.insert(key.clone(), found.clone());
                    }
                }
                Some(false) => {}
                None => {
                    out.insert(key.clone(), evaluate(document, value));
                }
            }
        }
        Ok(out)
    } else {
        let mut out = document.clone();
        for (key, _) in projection {
            if key != "_id" || !keep_id {
                out.remove(key);
            }
        }
        Ok(out)
    }
}

// =============================================================================
// $unwind
// =============================================================================

fn unwind(documents: Vec<Document>, spec: &Bson) -> StageResult<Vec<Document>> {
    let (path, preserve) = match spec {
        Bson::String(path) => (path.clone(), false),
        Bson::Document(options) => {
            let path = options
                .get_str("path")
                .map_err(|_| CommandFailure::new(BAD_VALUE, "$unwind needs a path"))?
                .to_string();
            let preserve = options
                .get_bool("preserveNullAndEmptyArrays")
                .unwrap_or(false);
            (path, preserve)
        }
        _ => return Err(CommandFailure::new(BAD_VALUE, "$unwind needs a path")),
    };

    let field = path
        .strip_prefix('$')
        .ok_or_else(|| CommandFailure::new(BAD_VALUE, "$unwind path must start with '$'"))?
        .to_string();

    let mut out = Vec::new();
    for document in documents {
        let items = match document.get(&field) {
            Some(Bson::Array(items)) if !items.is_empty() => Some(items.clone()),
            Some(Bson::Array(_)) | Some(Bson::Null) | None => None,
            Some(_) => {
                out.push(document);
                continue;
            }
        };

        match items {
            Some(items) => {
                for item in items {
                    let mut copy = document.clone();
                    copy.insert(field.clone(), item);
                    out.push(copy);
                }
            }
            None if preserve => out.push(document),
            None => {}
        }
    }

    Ok(out)
}

// =============================================================================
// $group
// =============================================================================

enum Accumulator {
    Sum(f64, bool),
    Avg(f64, usize),
    Min(Option<Bson>),
    Max(Option<Bson>),
    First(Option<Bson>),
    Last(Option<Bson>),
    Push(Vec<Bson>),
}

impl Accumulator {
    fn new(op: &str) -> StageResult<Self> {
        Ok(match op {
            "$sum" => Accumulator::Sum(0.0, true),
            "$avg" => Accumulator::Avg(0.0, 0),
            "$min" => Accumulator::Min(None),
            "$max" => Accumulator::Max(None),
            "$first" => Accumulator::First(None),
            "$last" => Accumulator::Last(None),
            "$push" => Accumulator::Push(Vec::new()),
            other => {
                return Err(CommandFailure::new(
                    BAD_VALUE,
                    format!("unknown group operator '{}'", other),
                ))
            }
        })
    }

    fn feed(&mut self, value: Bson) {
        match self {
            Accumulator::Sum(total, integral) => {
                if let Some(n) = crate::protocol::bson_as_f64(&value) {
                    *total += n;
                    *integral &= !matches!(value, Bson::Double(_));
                }
            }
            Accumulator::Avg(total, count) => {
                if let Some(n) = crate::protocol::bson_as_f64(&value) {
                    *total += n;
                    *count += 1;
                }
            }
            Accumulator::Min(current) => {
                if !matches!(value, Bson::Null)
                    && current.as_ref().map(|c| compare_values(&value, c).is_lt()).unwrap_or(true)
                {
                    *current = Some(value);
                }
            }
            Accumulator::Max(current) => {
                if !matches!(value, Bson::Null)
                    && current.as_ref().map(|c| compare_values(&value, c).is_gt()).unwrap_or(true)
                {
                    *current = Some(value);
                }
            }
            Accumulator::First(current) => {
                if current.is_none() {
                    *current = Some(value);
                }
            }
            Accumulator::Last(current) => *current = Some(value),
            Accumulator::Push(items) => items.push(value),
        }
    }

    fn finish(self) -> Bson {
        match self {
            Accumulator::Sum(total, true) if total.abs() < i32::MAX as f64 => Bson::Int32(total as i32),
            Accumulator::Sum(total, true) => Bson::Int64(total as i64),
            Accumulator::Sum(total, false) => Bson::Double(total),
            Accumulator::Avg(_, 0) => Bson::Null,
            Accumulator::Avg(total, count) => Bson::Double(total / count as f64),
            Accumulator::Min(v) | Accumulator::Max(v) | Accumulator::First(v) | Accumulator::Last(v) => {
                v.unwrap_or(Bson::Null)
            }
            Accumulator::Push(items) => Bson::Array(items),
        }
    }
}

fn group(documents: Vec<Document>, spec: &Document) -> StageResult<Vec<Document>> {
    let key_expression = spec
        .get("_id")
        .ok_or_else(|| CommandFailure::new(BAD_VALUE, "a group specification must include an _id"))?;

    let mut fields: Vec<(String, String, Bson)> = Vec::new();
    for (name, accumulator) in spec {
        if name == "_id" {
            continue;
        }
        let accumulator = accumulator.as_document().filter(|a| a.len() == 1).ok_or_else(|| {
            CommandFailure::new(BAD_VALUE, format!("the group field '{}' must be an accumulator object", name))
        })?;
        if let Some((op, argument)) = accumulator.iter().next() {
            Accumulator::new(op)?;
            fields.push((name.clone(), op.clone(), argument.clone()));
        }
    }

    // groups keep first-seen order
    let mut order: Vec<Bson> = Vec::new();
    let mut groups: HashMap<String, Vec<Accumulator>> = HashMap::new();

    for document in &documents {
        let key = evaluate(document, key_expression);
        let fingerprint = format!("{:?}", key);
        if !groups.contains_key(&fingerprint) {
            let accumulators = fields
                .iter()
                .map(|(_, op, _)| Accumulator::new(op))
                .collect::<StageResult<Vec<_>>>()?;
            groups.insert(fingerprint.clone(), accumulators);
            order.push(key.clone());
        }
        if let Some(accumulators) = groups.get_mut(&fingerprint) {
            for (accumulator, (_, _, argument)) in accumulators.iter_mut().zip(&fields) {
                accumulator.feed(evaluate(document, argument));
            }
        }
    }

    let mut out = Vec::with_capacity(order.len());
    for key in order {
        let fingerprint = format!("{:?}", key);
        let mut result = Document::new();
        result.insert("_id", key);
        if let Some(accumulators) = groups.remove(&fingerprint) {
            for (accumulator, (name, _, _)) in accumulators.into_iter().zip(&fields) {
                result.insert(name.clone(), accumulator.finish());
            }
        }
        out.push(result);
    }

    Ok(out)
}
