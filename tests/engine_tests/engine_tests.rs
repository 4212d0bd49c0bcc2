//! Tests for Engine
//!
//! These tests verify:
//! - Write commands (insert/update/delete) and their reply shapes
//! - Query commands, cursor paging and cursor cleanup
//! - Aggregation stages
//! - Error replies for unknown and failing commands

use std::sync::Arc;
use std::thread;

use bson::{doc, Bson, Document};
use docwire::Engine;

// =============================================================================
// Helper Functions
// =============================================================================

fn run(engine: &Engine, mut command: Document) -> Document {
    command.insert("$db", "test");
    engine.execute(&command)
}

fn seeded() -> Engine {
    let engine = Engine::new();
    let reply = run(
        &engine,
        doc! {
            "insert": "items",
            "documents": [
                { "_id": 1, "a": 3, "tag": "x" },
                { "_id": 2, "a": 1, "tag": "y" },
                { "_id": 3, "a": 2, "tag": "x" },
            ],
        },
    );
    assert_eq!(reply.get_f64("ok").unwrap(), 1.0);
    engine
}

fn first_batch(reply: &Document) -> Vec<Document> {
    reply
        .get_document("cursor")
        .unwrap()
        .get_array("firstBatch")
        .unwrap()
        .iter()
        .map(|b| b.as_document().unwrap().clone())
        .collect()
}

fn cursor_id(reply: &Document) -> i64 {
    reply.get_document("cursor").unwrap().get_i64("id").unwrap()
}

fn ids(documents: &[Document]) -> Vec<i32> {
    documents.iter().map(|d| d.get_i32("_id").unwrap()).collect()
}

// =============================================================================
// Write Command Tests
// =============================================================================

#[test]
fn test_insert_reports_count() {
    let engine = Engine::new();
    let reply = run(&engine, doc! { "insert": "items", "documents": [{ "a": 1 }, { "a": 2 }] });

    assert_eq!(reply.get_i32("n").unwrap(), 2);
    assert_eq!(engine.document_count("test", "items"), 2);
}

#[test]
fn test_insert_generates_id_first() {
    let engine = Engine::new();
    run(&engine, doc! { "insert": "items", "documents": [{ "a": 1 }] });

    let found = first_batch(&run(&engine, doc! { "find": "items" }));
    assert_eq!(found[0].keys().next().map(String::as_str), Some("_id"));
    assert!(matches!(found[0].get("_id"), Some(Bson::ObjectId(_))));
}

#[test]
fn test_ordered_insert_stops_at_duplicate() {
    let engine = seeded();
    let reply = run(
        &engine,
        doc! { "insert": "items", "documents": [{ "_id": 4 }, { "_id": 1 }, { "_id": 5 }], "ordered": true },
    );

    assert_eq!(reply.get_f64("ok").unwrap(), 1.0);
    assert_eq!(reply.get_i32("n").unwrap(), 1);
    let errors = reply.get_array("writeErrors").unwrap();
    assert_eq!(errors.len(), 1);
    let error = errors[0].as_document().unwrap();
    assert_eq!(error.get_i32("index").unwrap(), 1);
    assert_eq!(error.get_i32("code").unwrap(), 11000);
    assert_eq!(engine.document_count("test", "items"), 4);
}

#[test]
fn test_unordered_insert_continues_past_duplicate() {
    let engine = seeded();
    let reply = run(
        &engine,
        doc! { "insert": "items", "documents": [{ "_id": 4 }, { "_id": 1 }, { "_id": 5 }], "ordered": false },
    );

    assert_eq!(reply.get_i32("n").unwrap(), 2);
    assert_eq!(engine.document_count("test", "items"), 5);
}

#[test]
fn test_update_modifier_and_upsert() {
    let engine = seeded();
    let reply = run(
        &engine,
        doc! {
            "update": "items",
            "updates": [
                { "q": { "tag": "x" }, "u": { "$inc": { "a": 10 } }, "multi": true, "upsert": false },
                { "q": { "tag": "z" }, "u": { "$set": { "a": 0 } }, "multi": false, "upsert": true },
            ],
        },
    );

    assert_eq!(reply.get_i64("n").unwrap(), 3);
    assert_eq!(reply.get_i64("nModified").unwrap(), 2);
    let upserted = reply.get_array("upserted").unwrap();
    assert_eq!(upserted.len(), 1);
    assert_eq!(upserted[0].as_document().unwrap().get_i32("index").unwrap(), 1);

    let found = first_batch(&run(&engine, doc! { "find": "items", "filter": { "tag": "z" } }));
    assert_eq!(found[0].get_i32("a").unwrap(), 0);
}

#[test]
fn test_update_without_change_is_not_modified() {
    let engine = seeded();
    let reply = run(
        &engine,
        doc! { "update": "items", "updates": [{ "q": { "_id": 2 }, "u": { "$set": { "a": 1 } } }] },
    );

    assert_eq!(reply.get_i64("n").unwrap(), 1);
    assert_eq!(reply.get_i64("nModified").unwrap(), 0);
}

#[test]
fn test_multi_replacement_rejected() {
    let engine = seeded();
    let reply = run(
        &engine,
        doc! { "update": "items", "updates": [{ "q": {}, "u": { "a": 1 }, "multi": true }] },
    );

    let error = reply.get_array("writeErrors").unwrap()[0].as_document().unwrap().clone();
    assert_eq!(error.get_i32("code").unwrap(), 2);
}

#[test]
fn test_delete_limit() {
    let engine = seeded();

    let reply = run(&engine, doc! { "delete": "items", "deletes": [{ "q": { "tag": "x" }, "limit": 1 }] });
    assert_eq!(reply.get_i64("n").unwrap(), 1);
    assert_eq!(engine.document_count("test", "items"), 2);

    let reply = run(&engine, doc! { "delete": "items", "deletes": [{ "q": {}, "limit": 0 }] });
    assert_eq!(reply.get_i64("n").unwrap(), 2);
    assert_eq!(engine.document_count("test", "items"), 0);
}

// =============================================================================
// Query / Cursor Tests
// =============================================================================

#[test]
fn test_find_filter_sort_skip_limit_projection() {
    let engine = seeded();
    let reply = run(
        &engine,
        doc! {
            "find": "items",
            "filter": { "a": { "$gte": 1 } },
            "sort": { "a": -1 },
            "skip": 1,
            "limit": 2,
            "projection": { "a": 1 },
        },
    );

    assert_eq!(first_batch(&reply), vec![doc! { "_id": 3, "a": 2 }, doc! { "_id": 2, "a": 1 }]);
    assert_eq!(cursor_id(&reply), 0);
}

#[test]
fn test_find_pages_through_get_more() {
    let engine = seeded();

    let reply = run(&engine, doc! { "find": "items", "batchSize": 1 });
    assert_eq!(ids(&first_batch(&reply)), vec![1]);
    let id = cursor_id(&reply);
    assert_ne!(id, 0);
    assert_eq!(engine.open_cursor_count(), 1);

    let reply = run(&engine, doc! { "getMore": id, "collection": "items", "batchSize": 1 });
    let next: Vec<Bson> = reply.get_document("cursor").unwrap().get_array("nextBatch").unwrap().clone();
    assert_eq!(next.len(), 1);
    assert_eq!(cursor_id(&reply), id);

    let reply = run(&engine, doc! { "getMore": id, "collection": "items" });
    assert_eq!(cursor_id(&reply), 0);
    assert_eq!(engine.open_cursor_count(), 0);
}

#[test]
fn test_get_more_unknown_cursor() {
    let engine = Engine::new();
    let reply = run(&engine, doc! { "getMore": 42i64, "collection": "items" });

    assert_eq!(reply.get_f64("ok").unwrap(), 0.0);
    assert_eq!(reply.get_i32("code").unwrap(), 43);
}

#[test]
fn test_kill_cursors() {
    let engine = seeded();
    let id = cursor_id(&run(&engine, doc! { "find": "items", "batchSize": 1 }));

    let reply = run(&engine, doc! { "killCursors": "items", "cursors": [id, 999i64] });
    assert_eq!(reply.get_array("cursorsKilled").unwrap(), &vec![Bson::Int64(id)]);
    assert_eq!(reply.get_array("cursorsNotFound").unwrap(), &vec![Bson::Int64(999)]);
    assert_eq!(engine.open_cursor_count(), 0);
}

#[test]
fn test_unknown_query_operator() {
    let engine = seeded();
    let reply = run(&engine, doc! { "find": "items", "filter": { "a": { "$regexish": 1 } } });

    assert_eq!(reply.get_f64("ok").unwrap(), 0.0);
    assert_eq!(reply.get_i32("code").unwrap(), 2);
}

#[test]
fn test_count() {
    let engine = seeded();
    let reply = run(&engine, doc! { "count": "items", "query": { "tag": "x" } });
    assert_eq!(reply.get_i64("n").unwrap(), 2);

    let reply = run(&engine, doc! { "count": "missing" });
    assert_eq!(reply.get_i64("n").unwrap(), 0);
}

#[test]
fn test_explain_find() {
    let engine = seeded();
    let reply = run(
        &engine,
        doc! { "explain": { "find": "items", "filter": { "tag": "x" }, "sort": { "a": 1 } } },
    );

    let planner = reply.get_document("queryPlanner").unwrap();
    assert_eq!(planner.get_str("namespace").unwrap(), "test.items");
    assert_eq!(planner.get_document("winningPlan").unwrap().get_str("stage").unwrap(), "SORT");
    assert_eq!(engine.open_cursor_count(), 0);
}

// =============================================================================
// Aggregation Tests
// =============================================================================

#[test]
fn test_aggregate_stages() {
    let engine = seeded();
    let reply = run(
        &engine,
        doc! {
            "aggregate": "items",
            "pipeline": [
                { "$group": { "_id": "$tag", "total": { "$sum": "$a" } } },
                { "$sort": { "_id": 1 } },
            ],
            "cursor": {},
        },
    );

    assert_eq!(
        first_batch(&reply),
        vec![doc! { "_id": "x", "total": 5 }, doc! { "_id": "y", "total": 1 }]
    );
}

#[test]
fn test_aggregate_count_stage() {
    let engine = seeded();
    let reply = run(
        &engine,
        doc! { "aggregate": "items", "pipeline": [{ "$match": { "tag": "x" } }, { "$count": "n" }], "cursor": {} },
    );
    assert_eq!(first_batch(&reply), vec![doc! { "n": 2 }]);

    let reply = run(
        &engine,
        doc! { "aggregate": "items", "pipeline": [{ "$match": { "tag": "q" } }, { "$count": "n" }], "cursor": {} },
    );
    assert!(first_batch(&reply).is_empty());
}

#[test]
fn test_aggregate_unknown_stage() {
    let engine = seeded();
    let reply = run(&engine, doc! { "aggregate": "items", "pipeline": [{ "$teleport": {} }], "cursor": {} });

    assert_eq!(reply.get_i32("code").unwrap(), 40324);
}

#[test]
fn test_aggregate_explain() {
    let engine = seeded();
    let reply = run(
        &engine,
        doc! { "aggregate": "items", "pipeline": [{ "$match": {} }], "explain": true },
    );

    assert_eq!(reply.get_array("stages").unwrap().len(), 1);
    assert!(reply.contains_key("queryPlanner"));
}

// =============================================================================
// Error Reply Tests
// =============================================================================

#[test]
fn test_unknown_command() {
    let engine = Engine::new();
    let reply = run(&engine, doc! { "frobnicate": 1 });

    assert_eq!(reply.get_f64("ok").unwrap(), 0.0);
    assert_eq!(reply.get_i32("code").unwrap(), 59);
    assert_eq!(reply.get_str("codeName").unwrap(), "CommandNotFound");
}

#[test]
fn test_forceerror() {
    let engine = Engine::new();
    let reply = run(&engine, doc! { "forceerror": 1 });

    assert_eq!(reply.get_i32("code").unwrap(), 10038);
    assert_eq!(reply.get_str("errmsg").unwrap(), "forced error");
}

#[test]
fn test_drop() {
    let engine = seeded();

    let reply = run(&engine, doc! { "drop": "items" });
    assert_eq!(reply.get_f64("ok").unwrap(), 1.0);
    assert_eq!(engine.document_count("test", "items"), 0);

    let reply = run(&engine, doc! { "drop": "items" });
    assert_eq!(reply.get_i32("code").unwrap(), 26);
}

#[test]
fn test_ping() {
    let engine = Engine::new();
    assert_eq!(run(&engine, doc! { "ping": 1 }), doc! { "ok": 1.0 });
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_inserts() {
    let engine = Arc::new(Engine::new());
    let mut handles = vec![];

    for t in 0..4 {
        let engine = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            for i in 0..25 {
                let reply = run(&engine, doc! { "insert": "items", "documents": [{ "t": t, "i": i }] });
                assert_eq!(reply.get_i32("n").unwrap(), 1);
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(engine.document_count("test", "items"), 100);
}
