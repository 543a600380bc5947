//! The `serve` command.

use super::open_store;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use vaultsync_core::{load_or_generate_key, AesGcmCipher, RecordStore};
use vaultsync_server::{transport, ServerConfig, VaultServer};
use vaultsync_sync::ConflictPolicy;

/// Flags for `serve`.
pub struct ServeOptions {
    /// Listen address.
    pub bind: SocketAddr,
    /// Sync conflict policy.
    pub policy: ConflictPolicy,
    /// Backup mirror directory.
    pub backup_dir: Option<PathBuf>,
    /// Seconds between sweeps.
    pub sweep_interval: u64,
    /// Request deadline in milliseconds.
    pub request_timeout: u64,
    /// Connection cap.
    pub max_connections: usize,
}

impl ServeOptions {
    fn into_config(self) -> ServerConfig {
        let mut config = ServerConfig::new(self.bind)
            .with_conflict_policy(self.policy)
            .with_sweep_interval(Duration::from_secs(self.sweep_interval.max(1)))
            .with_request_timeout(Duration::from_millis(self.request_timeout.max(1)))
            .with_max_connections(self.max_connections);
        if let Some(dir) = self.backup_dir {
            config = config.with_backup_dir(dir);
        }
        config
    }
}

/// Runs the service until Ctrl-C.
pub fn run(
    data_dir: &Path,
    key_file: &Path,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = options.into_config();
    let store = Arc::new(open_store(data_dir, config.store.clone())?);
    let key = load_or_generate_key(key_file)?;
    info!(
        data_dir = %data_dir.display(),
        records = store.live_count(),
        policy = %config.conflict_policy,
        "store ready"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let bind_addr = config.bind_addr;
    let shared: Arc<dyn RecordStore> = store.clone();
    let server = VaultServer::new(config, shared, Arc::new(AesGcmCipher), key)?;

    runtime.block_on(async {
        let listener = TcpListener::bind(bind_addr).await?;
        let sweeper = server.spawn_sweeper();

        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown requested");
        };
        let served = transport::serve(server, listener, shutdown).await;
        sweeper.shutdown().await;
        served
    })?;

    store.flush()?;
    println!("✓ Server stopped");
    Ok(())
}
