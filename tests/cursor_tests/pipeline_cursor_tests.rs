//! Pipeline Cursor Tests
//!
//! Tests for aggregation cursors: fluent stage building, execution,
//! count/explain and closed-cursor behavior.

use std::sync::Arc;

use bson::{doc, Document};
use docwire::cursor::{AggregateOptions, ReadPreference};
use docwire::network::MemoryConnector;
use docwire::{ClientConfig, Collection, Database, DocwireError, Engine, SortDirection, SortSpec};
use futures::TryStreamExt;

// =============================================================================
// Helper Functions
// =============================================================================

async fn setup() -> (Arc<Engine>, Collection) {
    let engine = Arc::new(Engine::new());
    let connector = MemoryConnector::new(Arc::clone(&engine));
    let config = ClientConfig::builder().endpoint("mem").build();
    let db = Database::with_connector(config, connector).await.unwrap();

    let orders = db.collection("orders");
    orders
        .insert_many(vec![
            doc! { "_id": 1, "cust": "ann", "amount": 10, "tags": ["x", "y"] },
            doc! { "_id": 2, "cust": "bob", "amount": 5, "tags": ["y"] },
            doc! { "_id": 3, "cust": "ann", "amount": 20, "tags": [] },
            doc! { "_id": 4, "cust": "cat", "amount": 15, "tags": ["x", "y", "z"] },
            doc! { "_id": 5, "cust": "bob", "amount": 30, "tags": ["z"] },
        ])
        .await
        .unwrap();
    (engine, orders)
}

fn ids(documents: &[Document]) -> Vec<i32> {
    documents.iter().map(|d| d.get_i32("_id").unwrap()).collect()
}

// =============================================================================
// Execution Tests
// =============================================================================

#[tokio::test]
async fn test_match_group_sort() {
    let (_engine, orders) = setup().await;

    let mut cursor = orders.aggregate(vec![], AggregateOptions::default());
    cursor
        .find(doc! { "amount": { "$gte": 10 } })
        .group(doc! { "_id": "$cust", "total": { "$sum": "$amount" } })
        .sort("_id");
    let results = cursor.to_array().await.unwrap();

    assert_eq!(
        results,
        vec![
            doc! { "_id": "ann", "total": 30 },
            doc! { "_id": "bob", "total": 30 },
            doc! { "_id": "cat", "total": 15 },
        ]
    );
}

#[tokio::test]
async fn test_unwind_project_skip_limit() {
    let (_engine, orders) = setup().await;

    let mut cursor = orders.aggregate(vec![doc! { "$match": { "cust": { "$ne": "bob" } } }], AggregateOptions::default());
    cursor
        .unwind("tags")
        .project(doc! { "tags": 1 })
        .sort(SortSpec::new().then("_id", SortDirection::Ascending))
        .skip(1)
        .limit(3);
    let results = cursor.to_array().await.unwrap();

    assert_eq!(
        results,
        vec![
            doc! { "_id": 1, "tags": "y" },
            doc! { "_id": 4, "tags": "x" },
            doc! { "_id": 4, "tags": "y" },
        ]
    );
}

#[tokio::test]
async fn test_builders_do_not_touch_network() {
    let (engine, orders) = setup().await;

    let mut cursor = orders.aggregate(vec![], AggregateOptions::default());
    cursor.match_stage(doc! {}).limit(1).with_read_preference(ReadPreference::Secondary);

    assert_eq!(cursor.spec().stages().len(), 2);
    assert_eq!(cursor.spec().read_preference(), Some(ReadPreference::Secondary));
    assert_eq!(engine.open_cursor_count(), 0);
}

#[tokio::test]
async fn test_read_preference_is_accepted() {
    let (_engine, orders) = setup().await;

    let options = AggregateOptions {
        read_preference: Some(ReadPreference::Nearest),
        ..AggregateOptions::default()
    };
    let results = orders.aggregate(vec![doc! { "$match": {} }], options).to_array().await.unwrap();
    assert_eq!(results.len(), 5);
}

#[tokio::test]
async fn test_pages_with_batch_size() {
    let (engine, orders) = setup().await;

    let mut cursor = orders.aggregate(
        vec![],
        AggregateOptions {
            batch_size: Some(2),
            ..AggregateOptions::default()
        },
    );
    cursor.sort(vec!["_id"]);

    assert!(cursor.next().await.unwrap().is_some());
    assert_eq!(engine.open_cursor_count(), 1);

    let rest = cursor.to_array().await.unwrap();
    assert_eq!(ids(&rest), vec![2, 3, 4, 5]);
    assert_eq!(engine.open_cursor_count(), 0);
}

#[tokio::test]
async fn test_into_stream() {
    let (_engine, orders) = setup().await;

    let mut cursor = orders.aggregate(vec![], AggregateOptions::default());
    cursor.find(doc! { "cust": "bob" }).batch_size(1);

    let results: Vec<Document> = cursor.into_stream().try_collect().await.unwrap();
    assert_eq!(ids(&results), vec![2, 5]);
}

#[tokio::test]
async fn test_get_one() {
    let (_engine, orders) = setup().await;

    let mut cursor = orders.aggregate(vec![], AggregateOptions::default());
    cursor.sort(vec![("amount", SortDirection::Descending)]);
    let top = cursor.get_one().await.unwrap().unwrap();

    assert_eq!(top.get_i32("_id").unwrap(), 5);
    assert!(cursor.is_closed());
}

#[tokio::test]
async fn test_get_one_on_empty_result() {
    let (_engine, orders) = setup().await;

    let mut cursor = orders.aggregate(vec![doc! { "$match": { "cust": "zed" } }], AggregateOptions::default());
    assert!(cursor.get_one().await.unwrap().is_none());
}

#[tokio::test]
async fn test_get_one_after_reading_started() {
    let (engine, orders) = setup().await;

    let mut cursor = orders.aggregate(vec![], AggregateOptions::default());
    cursor.sort("_id").batch_size(2);
    assert_eq!(cursor.next().await.unwrap().unwrap().get_i32("_id").unwrap(), 1);

    let second = cursor.get_one().await.unwrap().unwrap();
    assert_eq!(second.get_i32("_id").unwrap(), 2);

    // No stage was appended to a pipeline already running
    assert_eq!(cursor.spec().stages().len(), 1);
    assert!(cursor.is_closed());
    assert_eq!(engine.open_cursor_count(), 0);
}

#[tokio::test]
async fn test_huge_skip_and_limit_stay_positive() {
    let (_engine, orders) = setup().await;

    let mut cursor = orders.aggregate(vec![], AggregateOptions::default());
    cursor.limit(u64::MAX);
    assert_eq!(cursor.spec().stages()[0], doc! { "$limit": i64::MAX });
    assert_eq!(cursor.to_array().await.unwrap().len(), 5);

    let mut cursor = orders.aggregate(vec![], AggregateOptions::default());
    cursor.skip(u64::MAX);
    assert_eq!(cursor.spec().stages()[0], doc! { "$skip": i64::MAX });
    assert!(cursor.to_array().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_geo_near_without_index_fails() {
    let (_engine, orders) = setup().await;

    let mut cursor = orders.aggregate(vec![], AggregateOptions::default());
    cursor.geo_near(doc! { "near": [0.0, 0.0], "distanceField": "dist" });

    let err = cursor.to_array().await.unwrap_err();
    assert_eq!(err.code(), Some(291));
    assert!(matches!(cursor.to_array().await, Err(DocwireError::CursorClosed)));
}

// =============================================================================
// Closed Cursor Tests
// =============================================================================

#[tokio::test]
async fn test_to_array_twice_fails() {
    let (_engine, orders) = setup().await;

    let mut cursor = orders.aggregate(vec![], AggregateOptions::default());
    assert_eq!(cursor.to_array().await.unwrap().len(), 5);
    assert!(matches!(cursor.to_array().await, Err(DocwireError::CursorClosed)));
}

#[tokio::test]
async fn test_each_then_next_fails() {
    let (_engine, orders) = setup().await;

    let mut visits = 0;
    let mut ended = false;
    let mut cursor = orders.aggregate(vec![], AggregateOptions::default());
    cursor
        .each(|item| match item {
            Some(_) => visits += 1,
            None => ended = true,
        })
        .await
        .unwrap();

    assert_eq!(visits, 5);
    assert!(ended);
    assert!(matches!(cursor.next().await, Err(DocwireError::CursorClosed)));
}

// =============================================================================
// Count / Explain Tests
// =============================================================================

#[tokio::test]
async fn test_count_ignores_trailing_skip_limit() {
    let (_engine, orders) = setup().await;

    let mut cursor = orders.aggregate(vec![], AggregateOptions::default());
    cursor.find(doc! { "amount": { "$gt": 5 } }).skip(1).limit(1);

    assert_eq!(cursor.count().await.unwrap(), 4);
    assert_eq!(cursor.to_array().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_count_of_empty_pipeline_result() {
    let (_engine, orders) = setup().await;

    let cursor = orders.aggregate(vec![doc! { "$match": { "cust": "zed" } }], AggregateOptions::default());
    assert_eq!(cursor.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_explain_returns_plan_without_consuming() {
    let (_engine, orders) = setup().await;

    let mut cursor = orders.aggregate(vec![], AggregateOptions::default());
    cursor.find(doc! { "cust": "ann" });

    let plan = cursor.explain().await.unwrap();
    assert_eq!(plan.get_array("stages").unwrap().len(), 1);
    assert!(plan.contains_key("queryPlanner"));

    assert_eq!(cursor.to_array().await.unwrap().len(), 2);
}
