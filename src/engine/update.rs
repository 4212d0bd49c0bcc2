//! Update application
//!
//! Replacement documents and the `$set`, `$unset`, `$inc`, `$push`
//! modifiers, plus seeding of upserted documents from a selector.

use bson::{Bson, Document};

use crate::error::CommandFailure;

/// BadValue
const BAD_VALUE: i32 = 2;
/// ImmutableField
const IMMUTABLE_FIELD: i32 = 66;

type UpdateResult<T> = std::result::Result<T, CommandFailure>;

/// Whether the update document uses modifiers rather than replacing
pub fn is_modifier(update: &Document) -> bool {
    update.keys().next().map(|k| k.starts_with('$')).unwrap_or(false)
}

/// Apply `update` to `document`, returning the new version
pub fn apply_update(document: &Document, update: &Document) -> UpdateResult<Document> {
    if !is_modifier(update) {
        return replace(document, update);
    }

    let mut result = document.clone();
    for (op, fields) in update {
        let fields = fields.as_document().ok_or_else(|| {
            CommandFailure::new(BAD_VALUE, format!("{} needs an object argument", op))
        })?;

        for (path, value) in fields {
            if path == "_id" && op != "$inc" && document.contains_key("_id") {
                let current = document.get("_id");
                if current != Some(value) {
                    return Err(CommandFailure::new(
                        IMMUTABLE_FIELD,
                        "Performing an update on the path '_id' would modify the immutable field '_id'",
                    ));
                }
            }

            match op.as_str() {
                "$set" => set_path(&mut result, path, value.clone())?,
                "$unset" => unset_path(&mut result, path),
                "$inc" => increment(&mut result, path, value)?,
                "$push" => push(&mut result, path, value.clone())?,
                other => {
                    return Err(CommandFailure::new(
                        BAD_VALUE,
                        format!("Unknown modifier: {}", other),
                    ))
                }
            }
        }
    }

    Ok(result)
}

fn replace(document: &Document, replacement: &Document) -> UpdateResult<Document> {
    if replacement.keys().any(|k| k.starts_with('$')) {
        return Err(CommandFailure::new(
            BAD_VALUE,
            "replacement document cannot contain $ operators",
        ));
    }

    let mut result = Document::new();
    if let Some(id) = document.get("_id") {
        if let Some(new_id) = replacement.get("_id") {
            if new_id != id {
                return Err(CommandFailure::new(
                    IMMUTABLE_FIELD,
                    "the (immutable) field '_id' was found to have been altered",
                ));
            }
        }
        result.insert("_id", id.clone());
    }
    for (key, value) in replacement {
        if key != "_id" || !result.contains_key("_id") {
            result.insert(key.clone(), value.clone());
        }
    }

    Ok(result)
}

/// Build the document an upsert starts from: the selector's plain equality fields
pub fn upsert_seed(selector: &Document) -> Document {
    let mut seed = Document::new();
    for (key, value) in selector {
        if key.starts_with('$') {
            continue;
        }
        let is_operator = matches!(value, Bson::Document(inner)
            if inner.keys().next().map(|k| k.starts_with('$')).unwrap_or(false));
        if !is_operator {
            // dotted paths are expanded; failures leave the field out
            let _ = set_path(&mut seed, key, value.clone());
        }
    }
    seed
}

fn set_path(document: &mut Document, path: &str, value: Bson) -> UpdateResult<()> {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
            Ok(())
        }
        Some((head, tail)) => {
            if !document.contains_key(head) {
                document.insert(head, Document::new());
            }
            match document.get_mut(head) {
                Some(Bson::Document(inner)) => set_path(inner, tail, value),
                _ => Err(CommandFailure::new(
                    BAD_VALUE,
                    format!("Cannot create field '{}' in a non-object element", tail),
                )),
            }
        }
    }
}

fn unset_path(document: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            document.remove(path);
        }
        Some((head, tail)) => {
            if let Some(Bson::Document(inner)) = document.get_mut(head) {
                unset_path(inner, tail);
            }
        }
    }
}

fn get_path_mut<'a>(document: &'a mut Document, path: &str) -> Option<&'a mut Bson> {
    match path.split_once('.') {
        None => document.get_mut(path),
        Some((head, tail)) => match document.get_mut(head) {
            Some(Bson::Document(inner)) => get_path_mut(inner, tail),
            _ => None,
        },
    }
}

fn increment(document: &mut Document, path: &str, amount: &Bson) -> UpdateResult<()> {
    let new_value = match (get_path_mut(document, path).map(|v| v.clone()), amount) {
        (None, amount) => amount.clone(),
        (Some(Bson::Int32(a)), Bson::Int32(b)) => a
            .checked_add(*b)
            .map(Bson::Int32)
            .unwrap_or(Bson::Int64(a as i64 + *b as i64)),
        (Some(Bson::Int32(a)), Bson::Int64(b)) => Bson::Int64(a as i64 + b),
        (Some(Bson::Int64(a)), Bson::Int32(b)) => Bson::Int64(a + *b as i64),
        (Some(Bson::Int64(a)), Bson::Int64(b)) => Bson::Int64(a + b),
        (Some(current), amount) => {
            match (crate::protocol::bson_as_f64(&current), crate::protocol::bson_as_f64(amount)) {
                (Some(a), Some(b)) => Bson::Double(a + b),
                _ => {
                    return Err(CommandFailure::new(
                        BAD_VALUE,
                        format!("Cannot apply $inc to a value of non-numeric type at '{}'", path),
                    ))
                }
            }
        }
    };

    if crate::protocol::bson_as_f64(&new_value).is_none() {
        return Err(CommandFailure::new(
            BAD_VALUE,
            "Cannot increment with non-numeric argument",
        ));
    }

    set_path(document, path, new_value)
}

fn push(document: &mut Document, path: &str, value: Bson) -> UpdateResult<()> {
    match get_path_mut(document, path) {
        Some(Bson::Array(items)) => {
            items.push(value);
            Ok(())
        }
        Some(_) => Err(CommandFailure::new(
            BAD_VALUE,
            format!("The field '{}' must be an array", path),
        )),
        None => set_path(document, path, Bson::Array(vec![value])),
    }
}
