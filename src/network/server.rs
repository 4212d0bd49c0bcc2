//! TCP Server
//!
//! Accepts connections and spawns one task per client.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{watch, Semaphore};

use super::connection::Connection;
use crate::config::ServerConfig;
use crate::engine::Engine;
use crate::error::{DocwireError, Result};

/// Reference OP_MSG server over an in-memory [`Engine`]
pub struct Server {
    config: ServerConfig,
    engine: Arc<Engine>,
    listener: TcpListener,
    permits: Arc<Semaphore>,
    shutdown_tx: watch::Sender<bool>,
}

/// Stops a running [`Server`] from another task
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    /// Signal the server to stop accepting connections
    pub fn shutdown(&self) {
        // No receivers means the server is already gone
        let _ = self.tx.send(true);
    }
}

impl Server {
    /// Bind the listen address
    pub async fn bind(config: ServerConfig, engine: Arc<Engine>) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen_addr).await.map_err(|e| {
            DocwireError::Connection(format!("Failed to bind {}: {}", config.listen_addr, e))
        })?;
        let permits = Arc::new(Semaphore::new(config.max_connections.max(1)));
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            engine,
            listener,
            permits,
            shutdown_tx,
        })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle that stops `run`
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Accept connections until shut down
    pub async fn run(self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tracing::info!("Listening on {}", self.local_addr()?);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            // Step 1: wait for a connection slot
            let permit = tokio::select! {
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown_rx.changed() => break,
            };

            // Step 2: accept
            let (stream, addr) = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!("Accept failed: {}", e);
                        continue;
                    }
                },
                _ = shutdown_rx.changed() => break,
            };

            // Step 3: serve on its own task
            let engine = Arc::clone(&self.engine);
            let read_timeout_ms = self.config.read_timeout_ms;
            tokio::spawn(async move {
                let _permit = permit;
                let mut connection = match Connection::new(stream, engine) {
                    Ok(connection) => connection,
                    Err(e) => {
                        tracing::warn!("Could not set up connection from {}: {}", addr, e);
                        return;
                    }
                };
                connection.set_read_timeout(read_timeout_ms);
                if let Err(e) = connection.handle().await {
                    tracing::debug!("Connection from {} ended with error: {}", addr, e);
                }
            });
        }

        tracing::info!("Server shutting down");
        Ok(())
    }
}
