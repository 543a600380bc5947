//! Server configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use vaultsync_core::StoreConfig;
use vaultsync_sync::{ConflictPolicy, DEFAULT_MAX_BATCH};

/// Default listen port.
pub const DEFAULT_PORT: u16 = 7878;

/// Configuration for the vault service.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Deadline for each operation against the store.
    pub request_timeout: Duration,
    /// Interval between expiry sweeps.
    pub sweep_interval: Duration,
    /// Maximum client changes in one sync request.
    pub max_sync_batch: usize,
    /// How sync conflicts are resolved.
    pub conflict_policy: ConflictPolicy,
    /// Directory backups are kept in, if any. Without one they live in memory.
    pub backup_dir: Option<PathBuf>,
    /// Record store settings.
    pub store: StoreConfig,
}

impl ServerConfig {
    /// Creates a configuration listening on `bind_addr`.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_connections: 256,
            request_timeout: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(60),
            max_sync_batch: DEFAULT_MAX_BATCH,
            conflict_policy: ConflictPolicy::ServerWins,
            backup_dir: None,
            store: StoreConfig::default(),
        }
    }

    /// Sets the maximum concurrent connections.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the per-operation timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the expiry sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets the maximum sync batch size.
    pub fn with_max_sync_batch(mut self, size: usize) -> Self {
        self.max_sync_batch = size;
        self
    }

    /// Sets the conflict policy.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Mirrors backups into `dir`.
    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = Some(dir.into());
        self
    }

    /// Sets the record store configuration.
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)))
    }
}
