//! Query filter evaluation
//!
//! Supports equality on dotted paths (with array-contains semantics),
//! `$eq $ne $gt $gte $lt $lte $in $nin $exists`, and `$and $or $nor`.

use std::cmp::Ordering;

use bson::{Bson, Document};

use super::compare::{compare_values, get_path, same_class, values_equal};
use crate::error::CommandFailure;

/// BadValue
const BAD_VALUE: i32 = 2;

type MatchResult = std::result::Result<bool, CommandFailure>;

/// Whether `document` satisfies `filter`
pub fn matches(document: &Document, filter: &Document) -> MatchResult {
    for (key, condition) in filter {
        let matched = match key.as_str() {
            "$and" => all_of(document, condition)?,
            "$or" => any_of(document, condition)?,
            "$nor" => !any_of(document, condition)?,
            op if op.starts_with('$') => {
                return Err(CommandFailure::new(
                    BAD_VALUE,
                    format!("unknown top level operator: {}", op),
                ))
            }
            path => field_matches(get_path(document, path), condition)?,
        };

        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

fn sub_filters(condition: &Bson) -> std::result::Result<Vec<&Document>, CommandFailure> {
    let items = condition
        .as_array()
        .ok_or_else(|| CommandFailure::new(BAD_VALUE, "$and/$or/$nor must be an array"))?;
    items
        .iter()
        .map(|item| {
            item.as_document()
                .ok_or_else(|| CommandFailure::new(BAD_VALUE, "$and/$or/$nor entries must be objects"))
        })
        .collect()
}

fn all_of(document: &Document, condition: &Bson) -> MatchResult {
    for filter in sub_filters(condition)? {
        if !matches(document, filter)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn any_of(document: &Document, condition: &Bson) -> MatchResult {
    for filter in sub_filters(condition)? {
        if matches(document, filter)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn is_operator_document(condition: &Bson) -> bool {
    match condition {
        Bson::Document(inner) => inner.keys().next().map(|k| k.starts_with('$')).unwrap_or(false),
        _ => false,
    }
}

fn field_matches(value: Option<&Bson>, condition: &Bson) -> MatchResult {
    if let (true, Bson::Document(operators)) = (is_operator_document(condition), condition) {
        for (op, operand) in operators {
            if !operator_matches(value, op, operand)? {
                return Ok(false);
            }
        }
        return Ok(true);
    }

    Ok(equals(value, condition))
}

/// Equality, where an array field matches if it or any element equals
fn equals(value: Option<&Bson>, expected: &Bson) -> bool {
    match value {
        None => matches!(expected, Bson::Null),
        Some(actual) => {
            if values_equal(actual, expected) {
                return true;
            }
            match actual {
                Bson::Array(items) => items.iter().any(|item| values_equal(item, expected)),
                _ => false,
            }
        }
    }
}

/// Ordered comparison, only between values of the same type class
fn compares(value: Option<&Bson>, operand: &Bson, accept: fn(Ordering) -> bool) -> bool {
    let check = |candidate: &Bson| same_class(candidate, operand) && accept(compare_values(candidate, operand));
    match value {
        None => false,
        Some(Bson::Array(items)) if !matches!(operand, Bson::Array(_)) => items.iter().any(check),
        Some(actual) => check(actual),
    }
}

fn operator_matches(value: Option<&Bson>, op: &str, operand: &Bson) -> MatchResult {
    let matched = match op {
        "$eq" => equals(value, operand),
        "$ne" => !equals(value, operand),
        "$gt" => compares(value, operand, |o| o == Ordering::Greater),
        "$gte" => compares(value, operand, |o| o != Ordering::Less),
        "$lt" => compares(value, operand, |o| o == Ordering::Less),
        "$lte" => compares(value, operand, |o| o != Ordering::Greater),
        "$in" => {
            let candidates = operand
                .as_array()
                .ok_or_else(|| CommandFailure::new(BAD_VALUE, "$in needs an array"))?;
            candidates.iter().any(|candidate| equals(value, candidate))
        }
        "$nin" => {
            let candidates = operand
                .as_array()
                .ok_or_else(|| CommandFailure::new(BAD_VALUE, "$nin needs an array"))?;
            !candidates.iter().any(|candidate| equals(value, candidate))
        }
        "$exists" => {
            let wanted = crate::protocol::bson_as_i64(operand).map(|v| v != 0).unwrap_or(true);
            value.is_some() == wanted
        }
        other => {
            return Err(CommandFailure::new(
                BAD_VALUE,
                format!("unknown operator: {}", other),
            ))
        }
    };

    Ok(matched)
}
