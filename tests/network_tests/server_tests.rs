//! Server Tests
//!
//! End-to-end tests over real TCP: the reference server on an ephemeral
//! port and the client connecting through `Database::connect`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bson::doc;
use docwire::bulk::BulkOptions;
use docwire::cursor::FindOptions;
use docwire::network::{Connection, Server, ShutdownHandle};
use docwire::protocol::{read_message, write_message, Message};
use docwire::{ClientConfig, Database, DocwireError, Engine, SessionState, ServerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

// =============================================================================
// Helper Functions
// =============================================================================

async fn start_server() -> (Arc<Engine>, SocketAddr, ShutdownHandle, JoinHandle<docwire::Result<()>>) {
    let engine = Arc::new(Engine::new());
    let config = ServerConfig::builder().listen_addr("127.0.0.1:0").build();
    let server = Server::bind(config, Arc::clone(&engine)).await.unwrap();

    let addr = server.local_addr().unwrap();
    let shutdown = server.shutdown_handle();
    let task = tokio::spawn(server.run());
    (engine, addr, shutdown, task)
}

fn client_config(addr: SocketAddr) -> ClientConfig {
    ClientConfig::builder()
        .endpoint(addr.to_string())
        .connect_attempts(1)
        .retry_delay_ms(0)
        .build()
}

/// How the first connection answers its first request
#[derive(Clone, Copy)]
enum BadReply {
    /// A length prefix below the header size, followed by stray bytes
    TruncatedFrame,

    /// A well-formed reply to some other request id
    WrongRequestId,
}

/// Server whose first connection sends `bad` and whose later connections
/// serve normally; returns the address and the accepted-connection count
async fn start_misbehaving_server(bad: BadReply) -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let engine = Arc::new(Engine::new());

    let counter = Arc::clone(&accepted);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let first = counter.fetch_add(1, Ordering::SeqCst) == 0;
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                if first {
                    answer_badly(stream, bad).await;
                } else {
                    let mut connection = Connection::new(stream, engine).unwrap();
                    let _ = connection.handle().await;
                }
            });
        }
    });
    (addr, accepted)
}

async fn answer_badly(mut stream: TcpStream, bad: BadReply) {
    let request = read_message(&mut stream).await.unwrap();
    match bad {
        BadReply::TruncatedFrame => {
            let mut bytes = vec![8u8, 0, 0, 0];
            bytes.extend(1..=12u8);
            stream.write_all(&bytes).await.unwrap();
        }
        BadReply::WrongRequestId => {
            let reply = Message::reply(1, request.request_id + 100, doc! { "ok": 1.0 });
            write_message(&mut stream, &reply).await.unwrap();
        }
    }

    // Hold the socket open until the client drops it
    let mut sink = [0u8; 1024];
    while let Ok(n) = stream.read(&mut sink).await {
        if n == 0 {
            break;
        }
    }
}

// =============================================================================
// Round Trip Tests
// =============================================================================

#[tokio::test]
async fn test_ping_over_tcp() {
    let (_engine, addr, shutdown, _task) = start_server().await;

    let db = Database::connect(client_config(addr)).await.unwrap();
    db.ping().await.unwrap();

    db.close().await;
    shutdown.shutdown();
}

#[tokio::test]
async fn test_insert_and_find_over_tcp() {
    let (engine, addr, shutdown, _task) = start_server().await;

    let db = Database::connect(client_config(addr)).await.unwrap();
    let people = db.collection("people");
    people
        .insert_many(vec![doc! { "_id": 1, "a": 1 }, doc! { "_id": 2, "a": 2 }, doc! { "_id": 3, "a": 3 }])
        .await
        .unwrap();
    assert_eq!(engine.document_count("test", "people"), 3);

    let mut cursor = people.find(
        doc! { "a": { "$gt": 1 } },
        FindOptions {
            batch_size: Some(1),
            ..FindOptions::default()
        },
    );
    let results = cursor.to_array().await.unwrap();
    assert_eq!(results, vec![doc! { "_id": 2, "a": 2 }, doc! { "_id": 3, "a": 3 }]);
    assert_eq!(engine.open_cursor_count(), 0);

    shutdown.shutdown();
}

#[tokio::test]
async fn test_command_error_over_tcp() {
    let (_engine, addr, shutdown, _task) = start_server().await;

    let db = Database::connect(client_config(addr)).await.unwrap();
    let err = db.run_command(doc! { "forceerror": 1 }).await.unwrap_err();

    assert!(matches!(err, DocwireError::Command(ref failure) if failure.code == 10038));
    assert_eq!(db.session().previous_errors().len(), 1);

    shutdown.shutdown();
}

#[tokio::test]
async fn test_bulk_over_tcp() {
    let (engine, addr, shutdown, _task) = start_server().await;

    let db = Database::connect(client_config(addr)).await.unwrap();
    let mut bulk = db.collection("people").initialize_unordered_bulk_op(BulkOptions::default());
    bulk.insert(doc! { "a": 1 }).insert(doc! { "a": 2 });
    bulk.find(doc! { "a": 2 }).remove_one();

    let result = bulk.execute().await.unwrap();
    assert_eq!(result.n_inserted, 2);
    assert_eq!(result.n_removed, 1);
    assert_eq!(engine.document_count("test", "people"), 1);

    shutdown.shutdown();
}

#[tokio::test]
async fn test_concurrent_clients() {
    let (engine, addr, shutdown, _task) = start_server().await;

    let mut handles = vec![];
    for client in 0..4 {
        handles.push(tokio::spawn(async move {
            let db = Database::connect(client_config(addr)).await.unwrap();
            let people = db.collection("people");
            for i in 0..10 {
                people.insert_one(doc! { "client": client, "i": i }).await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(engine.document_count("test", "people"), 40);
    shutdown.shutdown();
}

// =============================================================================
// Desynchronized Stream Tests
// =============================================================================

#[tokio::test]
async fn test_malformed_frame_retires_channel() {
    let (addr, accepted) = start_misbehaving_server(BadReply::TruncatedFrame).await;
    let db = Database::connect(client_config(addr)).await.unwrap();

    let err = db.ping().await.unwrap_err();
    assert!(err.is_transport(), "Expected a transport error, got {:?}", err);

    // The next command runs on a fresh connection, not the leftover bytes
    db.ping().await.unwrap();
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
    assert_eq!(db.session().state(), SessionState::Connected);
}

#[tokio::test]
async fn test_mismatched_reply_retires_channel() {
    let (addr, accepted) = start_misbehaving_server(BadReply::WrongRequestId).await;
    let db = Database::connect(client_config(addr)).await.unwrap();

    let err = db.ping().await.unwrap_err();
    assert!(matches!(err, DocwireError::Connection(_)));

    db.ping().await.unwrap();
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
}

// =============================================================================
// Shutdown Tests
// =============================================================================

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let (_engine, addr, shutdown, task) = start_server().await;

    shutdown.shutdown();
    task.await.unwrap().unwrap();

    let result = Database::connect(client_config(addr)).await;
    assert!(matches!(result, Err(DocwireError::Connection(_))));
}

#[tokio::test]
async fn test_connect_to_closed_port_fails() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = Database::connect(client_config(addr)).await;
    assert!(matches!(result, Err(DocwireError::Connection(_))));
}
