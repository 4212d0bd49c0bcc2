//! Session Module
//!
//! One logical client-to-server relationship.
//!
//! ## Responsibilities
//! - Own the physical channel and rebuild it after transport loss
//! - Deliver commands one at a time, in submission order
//! - Turn `ok: 0` replies into `DocwireError::Command`
//! - Keep a bounded, most-recent-first history of command failures
//!
//! ## State machine
//!
//! ```text
//! Disconnected ──open──► Connecting ──► Connected
//!      ▲                                   │
//!      └────────── transport loss ─────────┘
//!                (reconnects at once when auto_reconnect is on)
//!
//! any state ──close──► Closed (terminal)
//! ```
//!
//! Reconnecting never re-issues the command that hit the transport failure.

mod history;

pub use history::{ErrorHistory, LastError, LastStatus};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bson::Document;
use parking_lot::Mutex;

use crate::config::ClientConfig;
use crate::error::{CommandFailure, DocwireError, Result};
use crate::network::{CommandChannel, Connector};
use crate::protocol::{check_reply, Command, WriteKind, WriteReply};

/// Connection state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

/// A session against one server
pub struct Session {
    /// Endpoints, reconnect policy and timeouts
    config: ClientConfig,

    /// Builds channels on open and reconnect
    connector: Arc<dyn Connector>,

    /// Active channel; the async lock serializes round trips
    channel: tokio::sync::Mutex<Option<Box<dyn CommandChannel>>>,

    state: Mutex<SessionState>,
    history: Mutex<ErrorHistory>,
    last_status: Mutex<LastStatus>,
}

impl Session {
    /// Create a disconnected session
    pub fn new(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        let history = ErrorHistory::new(config.max_error_history);
        Self {
            config,
            connector,
            channel: tokio::sync::Mutex::new(None),
            state: Mutex::new(SessionState::Disconnected),
            history: Mutex::new(history),
            last_status: Mutex::new(LastStatus::default()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Database commands are addressed to
    pub fn database_name(&self) -> &str {
        &self.config.database
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Establish connectivity to the first reachable endpoint
    ///
    /// A no-op when already connected.
    pub async fn open(&self) -> Result<()> {
        let mut channel = self.channel.lock().await;
        self.ensure_not_closed()?;

        if channel.is_some() {
            return Ok(());
        }

        *channel = Some(self.establish().await?);
        Ok(())
    }

    /// Terminate the channel; every later submission fails
    pub async fn close(&self) {
        let mut channel = self.channel.lock().await;

        if let Some(mut open) = channel.take() {
            if let Err(e) = open.shutdown().await {
                tracing::debug!("Error shutting down channel to {}: {}", open.peer(), e);
            }
        }

        let mut state = self.state.lock();
        if *state != SessionState::Closed {
            tracing::debug!("Session closed");
            *state = SessionState::Closed;
        }
    }

    // =========================================================================
    // Command Submission
    // =========================================================================

    /// Send a typed command to the session's database
    pub async fn submit(&self, command: Command) -> Result<Document> {
        let write_kind = match &command {
            Command::Write { kind, .. } => Some(*kind),
            _ => None,
        };

        let reply = self
            .submit_document(command.to_document(&self.config.database))
            .await?;

        if let Some(kind) = write_kind {
            self.observe_write(kind, &reply)?;
        }
        Ok(reply)
    }

    /// Send a fully formed command document and return its successful reply
    ///
    /// An `ok: 0` reply is recorded in the error history and returned as
    /// `DocwireError::Command`.
    pub async fn submit_document(&self, command: Document) -> Result<Document> {
        let name = command.keys().next().cloned().unwrap_or_default();
        let reply = self.round_trip(command).await?;

        match check_reply(reply) {
            Ok(reply) => Ok(reply),
            Err(failure) => {
                tracing::warn!("Command '{}' failed: {}", name, failure);
                self.record_error(failure.clone());
                Err(DocwireError::Command(failure))
            }
        }
    }

    /// One exchange on the channel, with reconnect on transport loss
    async fn round_trip(&self, command: Document) -> Result<Document> {
        let mut channel = self.channel.lock().await;
        self.ensure_not_closed()?;

        if channel.is_none() {
            if !self.config.auto_reconnect {
                return Err(DocwireError::Connection("not connected".to_string()));
            }
            *channel = Some(self.establish().await?);
        }

        let outcome = match channel.as_mut() {
            Some(open) => {
                tracing::trace!(
                    "Sending '{}' to {}",
                    command.keys().next().map(String::as_str).unwrap_or(""),
                    open.peer()
                );
                within(self.config.request_timeout_ms, open.round_trip(command)).await
            }
            None => Err(DocwireError::Connection("not connected".to_string())),
        };

        match outcome {
            Err(e) if e.is_transport() => {
                tracing::warn!("Transport failure: {}", e);
                *channel = None;
                self.set_state(SessionState::Disconnected);

                if self.config.auto_reconnect {
                    match self.establish().await {
                        Ok(fresh) => *channel = Some(fresh),
                        Err(reconnect_error) => {
                            tracing::warn!("Reconnect failed: {}", reconnect_error)
                        }
                    }
                }
                Err(e)
            }
            other => other,
        }
    }

    /// Connect to the first reachable endpoint within the attempt budget
    async fn establish(&self) -> Result<Box<dyn CommandChannel>> {
        self.set_state(SessionState::Connecting);

        let attempts = self.config.connect_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            for endpoint in &self.config.endpoints {
                let connecting = self.connector.connect(endpoint);
                match within(self.config.connect_timeout_ms, connecting).await {
                    Ok(channel) => {
                        tracing::info!("Connected to {} (attempt {})", endpoint, attempt);
                        self.set_state(SessionState::Connected);
                        return Ok(channel);
                    }
                    Err(e) => {
                        tracing::debug!("Connect to {} failed: {}", endpoint, e);
                        last_error = Some(e);
                    }
                }
            }

            if attempt < attempts && self.config.retry_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
            }
        }

        self.set_state(SessionState::Disconnected);
        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no endpoints configured".to_string());
        Err(DocwireError::Connection(format!(
            "no endpoint reachable after {} attempt(s): {}",
            attempts, reason
        )))
    }

    /// Capture the outcome of a write command for `last_status`
    fn observe_write(&self, kind: WriteKind, reply: &Document) -> Result<()> {
        let outcome = WriteReply::from_reply(reply)?;

        let error = outcome
            .write_errors
            .first()
            .map(|detail| CommandFailure::new(detail.code, detail.message.clone()));
        if let Some(failure) = &error {
            self.record_error(failure.clone());
        }

        let matched = outcome.n - outcome.upserted.len() as i64;
        *self.last_status.lock() = LastStatus {
            n: outcome.n,
            updated_existing: kind == WriteKind::Update && matched > 0,
            error,
        };
        Ok(())
    }

    // =========================================================================
    // Error History
    // =========================================================================

    /// Record a failure as the newest history entry
    pub fn record_error(&self, failure: CommandFailure) {
        self.history.lock().record(failure);
    }

    /// History contents, newest first; does not clear
    pub fn previous_errors(&self) -> Vec<CommandFailure> {
        self.history.lock().to_vec()
    }

    pub fn reset_error_history(&self) {
        self.history.lock().clear();
    }

    /// Most recent failure, or `Ok { n: 0 }` when the history is empty
    pub fn last_error(&self) -> LastError {
        match self.history.lock().latest() {
            Some(failure) => LastError::Failed(failure.clone()),
            None => LastError::Ok { n: 0 },
        }
    }

    /// Outcome of the most recent write command
    pub fn last_status(&self) -> LastStatus {
        self.last_status.lock().clone()
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn ensure_not_closed(&self) -> Result<()> {
        if self.state() == SessionState::Closed {
            return Err(DocwireError::SessionClosed);
        }
        Ok(())
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock();
        if *state != SessionState::Closed && *state != next {
            tracing::debug!("Session state {:?} -> {:?}", *state, next);
            *state = next;
        }
    }
}

/// Bound `future` by `timeout_ms` (0 = unbounded)
async fn within<T, F>(timeout_ms: u64, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if timeout_ms == 0 {
        return future.await;
    }
    tokio::time::timeout(Duration::from_millis(timeout_ms), future)
        .await
        .map_err(|_| DocwireError::Timeout(timeout_ms))?
}
