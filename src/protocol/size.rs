//! Encoded-size accounting
//!
//! Computes the number of bytes a document occupies on the wire without
//! serializing it. Used by the bulk batcher to cap command sizes.

use bson::spec::BinarySubtype;
use bson::{Bson, Document};

/// Encoded BSON size of a document
pub fn size_of(document: &Document) -> usize {
    // length prefix + elements + trailing NUL
    4 + document
        .iter()
        .map(|(key, value)| element_size(key.len(), value))
        .sum::<usize>()
        + 1
}

fn element_size(key_len: usize, value: &Bson) -> usize {
    // type byte + cstring key + value
    1 + key_len + 1 + value_size(value)
}

fn string_size(s: &str) -> usize {
    4 + s.len() + 1
}

fn array_size(items: &[Bson]) -> usize {
    4 + items
        .iter()
        .enumerate()
        .map(|(i, value)| element_size(decimal_len(i), value))
        .sum::<usize>()
        + 1
}

fn decimal_len(mut n: usize) -> usize {
    let mut len = 1;
    while n >= 10 {
        n /= 10;
        len += 1;
    }
    len
}

fn value_size(value: &Bson) -> usize {
    match value {
        Bson::Double(_) => 8,
        Bson::String(s) => string_size(s),
        Bson::Array(items) => array_size(items),
        Bson::Document(document) => size_of(document),
        Bson::Boolean(_) => 1,
        Bson::Null | Bson::Undefined | Bson::MaxKey | Bson::MinKey => 0,
        Bson::RegularExpression(regex) => regex.pattern.len() + 1 + regex.options.len() + 1,
        Bson::JavaScriptCode(code) => string_size(code),
        Bson::JavaScriptCodeWithScope(code) => 4 + string_size(&code.code) + size_of(&code.scope),
        Bson::Int32(_) => 4,
        Bson::Int64(_) => 8,
        Bson::Timestamp(_) => 8,
        Bson::Binary(binary) => {
            let old_prefix = if binary.subtype == BinarySubtype::BinaryOld { 4 } else { 0 };
            4 + 1 + old_prefix + binary.bytes.len()
        }
        Bson::ObjectId(_) => 12,
        Bson::DateTime(_) => 8,
        Bson::Symbol(s) => string_size(s),
        Bson::Decimal128(_) => 16,
        other => encoded_value_size(other),
    }
}

/// Fallback for types whose fields are opaque (e.g. DBPointer)
fn encoded_value_size(value: &Bson) -> usize {
    let mut wrapper = Document::new();
    wrapper.insert("", value.clone());
    let mut bytes = Vec::new();
    match wrapper.to_writer(&mut bytes) {
        // wrapper overhead: length (4) + type (1) + empty key NUL (1) + trailing NUL (1)
        Ok(()) => bytes.len().saturating_sub(7),
        Err(_) => 0,
    }
}
