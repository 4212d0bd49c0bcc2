//! Configuration for docwire
//!
//! Centralized configuration with sensible defaults.

use bson::Document;

/// Main configuration for a client session
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -------------------------------------------------------------------------
    // Endpoint Configuration
    // -------------------------------------------------------------------------
    /// Server endpoints (host:port), tried in order on connect
    pub endpoints: Vec<String>,

    /// Database every command is addressed to (`$db`)
    pub database: String,

    // -------------------------------------------------------------------------
    // Connection Configuration
    // -------------------------------------------------------------------------
    /// Re-establish the connection automatically after a transport loss
    pub auto_reconnect: bool,

    /// Full passes over the endpoint list before `open` gives up
    pub connect_attempts: u32,

    /// Pause between connect passes (milliseconds)
    pub retry_delay_ms: u64,

    /// Per-endpoint connect timeout (milliseconds, 0 = none)
    pub connect_timeout_ms: u64,

    /// Per-command round-trip timeout (milliseconds, 0 = none)
    pub request_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // Session Configuration
    // -------------------------------------------------------------------------
    /// Number of command failures kept in the rolling error history
    pub max_error_history: usize,

    // -------------------------------------------------------------------------
    // Cursor Configuration
    // -------------------------------------------------------------------------
    /// Documents requested per page (0 = server default)
    pub cursor_batch_size: u32,

    // -------------------------------------------------------------------------
    // Bulk Write Configuration
    // -------------------------------------------------------------------------
    /// Max operations per write command
    pub max_batch_documents: usize,

    /// Max cumulative payload bytes per write command
    pub max_batch_bytes: usize,

    /// Default write concern attached to write commands
    pub write_concern: Option<Document>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["127.0.0.1:27017".to_string()],
            database: "test".to_string(),
            auto_reconnect: true,
            connect_attempts: 3,
            retry_delay_ms: 100,
            connect_timeout_ms: 5000,
            request_timeout_ms: 30_000,
            max_error_history: 32,
            cursor_batch_size: 0,
            max_batch_documents: 1000,
            max_batch_bytes: 16 * 1024 * 1024, // 16 MB
            write_concern: None,
        }
    }
}

impl ClientConfig {
    /// Create a new config builder
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }
}

/// Builder for ClientConfig
#[derive(Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
    explicit_endpoints: bool,
}

impl ClientConfigBuilder {
    /// Add a server endpoint; the first call replaces the default endpoint
    pub fn endpoint(mut self, addr: impl Into<String>) -> Self {
        if !self.explicit_endpoints {
            self.config.endpoints.clear();
            self.explicit_endpoints = true;
        }
        self.config.endpoints.push(addr.into());
        self
    }

    /// Set the database name
    pub fn database(mut self, name: impl Into<String>) -> Self {
        self.config.database = name.into();
        self
    }

    /// Enable or disable automatic reconnection
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.config.auto_reconnect = enabled;
        self
    }

    /// Set the number of connect passes
    pub fn connect_attempts(mut self, attempts: u32) -> Self {
        self.config.connect_attempts = attempts;
        self
    }

    /// Set the pause between connect passes (in milliseconds)
    pub fn retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry_delay_ms = ms;
        self
    }

    /// Set the connect timeout (in milliseconds)
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    /// Set the request timeout (in milliseconds)
    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.config.request_timeout_ms = ms;
        self
    }

    /// Set the error history capacity
    pub fn max_error_history(mut self, count: usize) -> Self {
        self.config.max_error_history = count;
        self
    }

    /// Set the cursor page size
    pub fn cursor_batch_size(mut self, size: u32) -> Self {
        self.config.cursor_batch_size = size;
        self
    }

    /// Set the max operations per bulk batch
    pub fn max_batch_documents(mut self, count: usize) -> Self {
        self.config.max_batch_documents = count;
        self
    }

    /// Set the max payload bytes per bulk batch
    pub fn max_batch_bytes(mut self, bytes: usize) -> Self {
        self.config.max_batch_bytes = bytes;
        self
    }

    /// Set the default write concern
    pub fn write_concern(mut self, write_concern: Document) -> Self {
        self.config.write_concern = Some(write_concern);
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

/// Configuration for the bundled reference server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP listen address
    pub listen_addr: String,

    /// Max concurrent client connections
    pub max_connections: usize,

    /// Idle read timeout per connection (milliseconds, 0 = none)
    pub read_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:27017".to_string(),
            max_connections: 1024,
            read_timeout_ms: 0,
        }
    }
}

impl ServerConfig {
    /// Create a new config builder
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }
}

/// Builder for ServerConfig
#[derive(Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Set the TCP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the idle read timeout (in milliseconds)
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    pub fn build(self) -> ServerConfig {
        self.config
    }
}
