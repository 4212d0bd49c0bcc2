//! Codec Tests
//!
//! Tests for OP_MSG framing, command rendering and reply parsing.

use std::io::Cursor;

use bson::{bson, doc, Bson, Document};
use docwire::protocol::{
    check_reply, decode_message, encode_message, read_message, write_message, Command,
    CursorReply, Message, WriteKind, WriteReply, HEADER_SIZE, MAX_MESSAGE_SIZE, OP_MSG,
};
use docwire::DocwireError;

// =============================================================================
// Helper Functions
// =============================================================================

/// Hand-build a frame: flags, then raw section bytes, then optional trailer
fn frame(flags: u32, sections: &[u8], trailer: &[u8]) -> Vec<u8> {
    let length = HEADER_SIZE + 4 + sections.len() + trailer.len();
    let mut bytes = Vec::with_capacity(length);
    bytes.extend_from_slice(&(length as i32).to_le_bytes());
    bytes.extend_from_slice(&7i32.to_le_bytes());
    bytes.extend_from_slice(&0i32.to_le_bytes());
    bytes.extend_from_slice(&OP_MSG.to_le_bytes());
    bytes.extend_from_slice(&flags.to_le_bytes());
    bytes.extend_from_slice(sections);
    bytes.extend_from_slice(trailer);
    bytes
}

fn body_section(document: &Document) -> Vec<u8> {
    let mut bytes = vec![0u8];
    document.to_writer(&mut bytes).unwrap();
    bytes
}

// =============================================================================
// Message Encoding/Decoding Tests
// =============================================================================

#[test]
fn test_encode_decode_request() {
    let message = Message::request(42, doc! { "find": "people", "filter": { "a": 1 }, "$db": "test" });
    let encoded = encode_message(&message).unwrap();
    let decoded = decode_message(&encoded).unwrap();

    assert_eq!(decoded, message);
}

#[test]
fn test_header_layout() {
    let message = Message::reply(5, 42, doc! { "ok": 1.0 });
    let encoded = encode_message(&message).unwrap();

    let length = i32::from_le_bytes(encoded[0..4].try_into().unwrap());
    let request_id = i32::from_le_bytes(encoded[4..8].try_into().unwrap());
    let response_to = i32::from_le_bytes(encoded[8..12].try_into().unwrap());
    let op_code = i32::from_le_bytes(encoded[12..16].try_into().unwrap());

    assert_eq!(length as usize, encoded.len());
    assert_eq!(request_id, 5);
    assert_eq!(response_to, 42);
    assert_eq!(op_code, 2013);
    assert_eq!(encoded[HEADER_SIZE + 4], 0, "first section is kind 0");
}

#[test]
fn test_checksum_is_stripped() {
    let body = doc! { "ping": 1 };
    let bytes = frame(1, &body_section(&body), &[0xde, 0xad, 0xbe, 0xef]);

    let decoded = decode_message(&bytes).unwrap();
    assert_eq!(decoded.body, body);
}

#[test]
fn test_encode_never_sets_checksum_flag() {
    let mut message = Message::request(1, doc! { "ping": 1 });
    message.flags = 1;
    let encoded = encode_message(&message).unwrap();

    let flags = u32::from_le_bytes(encoded[16..20].try_into().unwrap());
    assert_eq!(flags & 1, 0);
}

#[test]
fn test_document_sequence_folded_into_body() {
    let mut sections = body_section(&doc! { "insert": "people", "$db": "test" });

    let first = doc! { "a": 1 };
    let second = doc! { "a": 2 };
    let mut payload = b"documents\0".to_vec();
    first.to_writer(&mut payload).unwrap();
    second.to_writer(&mut payload).unwrap();

    sections.push(1);
    sections.extend_from_slice(&((payload.len() + 4) as i32).to_le_bytes());
    sections.extend_from_slice(&payload);

    let decoded = decode_message(&frame(0, &sections, &[])).unwrap();
    assert_eq!(decoded.body.get_str("insert").unwrap(), "people");
    assert_eq!(
        decoded.body.get_array("documents").unwrap(),
        &vec![Bson::Document(first), Bson::Document(second)]
    );
}

#[test]
fn test_decode_rejects_wrong_opcode() {
    let mut bytes = encode_message(&Message::request(1, doc! { "ping": 1 })).unwrap();
    bytes[12..16].copy_from_slice(&2004i32.to_le_bytes());

    assert!(matches!(decode_message(&bytes), Err(DocwireError::Protocol(_))));
}

#[test]
fn test_decode_rejects_truncated_frames() {
    let bytes = encode_message(&Message::request(1, doc! { "ping": 1 })).unwrap();

    assert!(decode_message(&bytes[..10]).is_err());
    assert!(decode_message(&bytes[..bytes.len() - 1]).is_err());
}

#[test]
fn test_decode_rejects_missing_body() {
    assert!(decode_message(&frame(0, &[], &[])).is_err());
}

#[test]
fn test_decode_rejects_oversized_length() {
    let mut bytes = encode_message(&Message::request(1, doc! { "ping": 1 })).unwrap();
    bytes[0..4].copy_from_slice(&((MAX_MESSAGE_SIZE + 1) as i32).to_le_bytes());

    assert!(decode_message(&bytes).is_err());
}

// =============================================================================
// Stream I/O Tests
// =============================================================================

#[tokio::test]
async fn test_stream_write_then_read() {
    let first = Message::request(1, doc! { "ping": 1 });
    let second = Message::request(2, doc! { "count": "people", "query": {} });

    let mut buffer: Vec<u8> = Vec::new();
    write_message(&mut buffer, &first).await.unwrap();
    write_message(&mut buffer, &second).await.unwrap();

    let mut reader = Cursor::new(buffer);
    assert_eq!(read_message(&mut reader).await.unwrap(), first);
    assert_eq!(read_message(&mut reader).await.unwrap(), second);
    assert!(read_message(&mut reader).await.is_err());
}

// =============================================================================
// Command Rendering Tests
// =============================================================================

#[test]
fn test_find_command_document() {
    let command = Command::Find {
        collection: "people".to_string(),
        filter: doc! { "a": { "$gt": 1 } },
        projection: None,
        sort: Some(doc! { "b": 1, "a": -1 }),
        skip: 0,
        limit: 10,
        batch_size: 0,
    };
    let rendered = command.to_document("shop");

    assert_eq!(rendered.keys().next().map(String::as_str), Some("find"));
    assert_eq!(rendered.get_str("$db").unwrap(), "shop");
    assert_eq!(rendered.get_document("sort").unwrap(), &doc! { "b": 1, "a": -1 });
    assert_eq!(rendered.get_i64("limit").unwrap(), 10);
    assert!(!rendered.contains_key("skip"));
    assert!(!rendered.contains_key("batchSize"));
}

#[test]
fn test_find_counts_saturate_at_i64_max() {
    let command = Command::Find {
        collection: "people".to_string(),
        filter: doc! {},
        projection: None,
        sort: None,
        skip: u64::MAX,
        limit: u64::MAX,
        batch_size: 0,
    };
    let rendered = command.to_body();

    assert_eq!(rendered.get_i64("skip").unwrap(), i64::MAX);
    assert_eq!(rendered.get_i64("limit").unwrap(), i64::MAX);
}

#[test]
fn test_write_command_document() {
    let command = Command::Write {
        kind: WriteKind::Delete,
        collection: "people".to_string(),
        payload: vec![doc! { "q": { "a": 1 }, "limit": 1 }],
        ordered: false,
        write_concern: Some(doc! { "w": 1 }),
        max_time_ms: Some(500),
    };
    let rendered = command.to_body();

    assert_eq!(rendered.get_str("delete").unwrap(), "people");
    assert_eq!(rendered.get_array("deletes").unwrap().len(), 1);
    assert!(!rendered.get_bool("ordered").unwrap());
    assert_eq!(rendered.get_document("writeConcern").unwrap(), &doc! { "w": 1 });
    assert_eq!(rendered.get_i64("maxTimeMS").unwrap(), 500);
    assert!(command.is_write());
}

#[test]
fn test_aggregate_explain_omits_cursor() {
    let command = Command::Aggregate {
        collection: "people".to_string(),
        pipeline: vec![doc! { "$match": {} }],
        batch_size: 5,
        explain: true,
        read_preference: Some(doc! { "mode": "secondary" }),
    };
    let rendered = command.to_body();

    assert!(rendered.get_bool("explain").unwrap());
    assert!(!rendered.contains_key("cursor"));
    assert_eq!(
        rendered.get_document("$readPreference").unwrap(),
        &doc! { "mode": "secondary" }
    );
}

// =============================================================================
// Reply Parsing Tests
// =============================================================================

#[test]
fn test_check_reply_failure() {
    let failure = check_reply(doc! { "ok": 0.0, "errmsg": "bad", "code": 2, "codeName": "BadValue" })
        .unwrap_err();

    assert_eq!(failure.code, 2);
    assert_eq!(failure.message, "bad");
    assert_eq!(failure.code_name.as_deref(), Some("BadValue"));
}

#[test]
fn test_check_reply_accepts_integer_ok() {
    assert!(check_reply(doc! { "ok": 1 }).is_ok());
}

#[test]
fn test_cursor_reply_pages() {
    let first = CursorReply::from_reply(doc! {
        "cursor": { "id": 9i64, "ns": "test.people", "firstBatch": [{ "a": 1 }] },
        "ok": 1.0,
    })
    .unwrap();
    assert_eq!(first.id, 9);
    assert_eq!(first.batch, vec![doc! { "a": 1 }]);

    let next = CursorReply::from_reply(doc! {
        "cursor": { "id": 0i64, "ns": "test.people", "nextBatch": [] },
        "ok": 1.0,
    })
    .unwrap();
    assert_eq!(next.id, 0);
    assert!(next.batch.is_empty());
}

#[test]
fn test_write_reply_single_upsert_normalized() {
    let reply = WriteReply::from_reply(&doc! {
        "n": 1,
        "nModified": 0,
        "upserted": { "index": 0, "_id": 17 },
        "ok": 1.0,
    })
    .unwrap();

    assert_eq!(reply.upserted.len(), 1);
    assert_eq!(reply.upserted[0].index, 0);
    assert_eq!(reply.upserted[0].id, Bson::Int32(17));
}

#[test]
fn test_write_reply_errors_and_concern() {
    let reply = WriteReply::from_reply(&doc! {
        "n": 1,
        "writeErrors": [{ "index": 1, "code": 11000, "errmsg": "dup" }],
        "writeConcernError": { "code": 64, "errmsg": "timeout" },
        "ok": 1.0,
    })
    .unwrap();

    assert_eq!(reply.n, 1);
    assert_eq!(reply.write_errors[0].index, 1);
    assert_eq!(reply.write_errors[0].code, 11000);
    assert_eq!(reply.write_concern_error.map(|e| e.code), Some(64));
}

#[test]
fn test_write_reply_rejects_bad_upserted() {
    let reply = WriteReply::from_reply(&doc! { "n": 1, "upserted": bson!("nope"), "ok": 1.0 });
    assert!(matches!(reply, Err(DocwireError::Protocol(_))));
}
