//! VaultSync CLI
//!
//! Runs the vault service and offers offline maintenance over a data
//! directory.
//!
//! # Commands
//!
//! - `serve` - Run the TCP service
//! - `keygen` - Create an encryption key file
//! - `export` - Write a backup of the records to a file
//! - `stats` - Print record and storage counters
//! - `sweep` - Remove expired records and prune the change log

mod commands;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use vaultsync_core::ExportFormat;
use vaultsync_server::DEFAULT_PORT;
use vaultsync_sync::ConflictPolicy;

/// VaultSync encrypted record service.
#[derive(Parser)]
#[command(name = "vaultsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding the record journal
    #[arg(global = true, short, long, default_value = "vaultsync-data")]
    data_dir: PathBuf,

    /// Path to the encryption key file (defaults to <data-dir>/vault.key)
    #[arg(global = true, short, long)]
    key_file: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the vault service
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value_t = SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)))]
        bind: SocketAddr,

        /// Conflict policy (server_wins, client_wins, last_write_wins, manual)
        #[arg(long, default_value = "server_wins")]
        policy: ConflictPolicy,

        /// Directory to mirror backups into
        #[arg(long)]
        backup_dir: Option<PathBuf>,

        /// Seconds between expiry sweeps
        #[arg(long, default_value_t = 60)]
        sweep_interval: u64,

        /// Per-request deadline in milliseconds
        #[arg(long, default_value_t = 5_000)]
        request_timeout: u64,

        /// Maximum concurrent connections
        #[arg(long, default_value_t = 256)]
        max_connections: usize,
    },

    /// Create a new encryption key file
    Keygen {
        /// Replace an existing key file
        #[arg(short, long)]
        force: bool,
    },

    /// Export records to a backup file
    Export {
        /// Only export records of this session
        #[arg(short, long)]
        session: Option<String>,

        /// Output format (json, delimited, encrypted)
        #[arg(short, long, default_value = "json")]
        format: ExportFormat,

        /// Output file
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Print record and storage counters
    Stats {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Remove expired records and prune the change log
    Sweep,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let key_file = cli
        .key_file
        .unwrap_or_else(|| cli.data_dir.join(commands::DEFAULT_KEY_FILE));

    match cli.command {
        Commands::Serve {
            bind,
            policy,
            backup_dir,
            sweep_interval,
            request_timeout,
            max_connections,
        } => {
            let options = commands::serve::ServeOptions {
                bind,
                policy,
                backup_dir,
                sweep_interval,
                request_timeout,
                max_connections,
            };
            commands::serve::run(&cli.data_dir, &key_file, options)?;
        }
        Commands::Keygen { force } => {
            commands::keygen::run(&key_file, force)?;
        }
        Commands::Export {
            session,
            format,
            out,
        } => {
            commands::export::run(&cli.data_dir, &key_file, session.as_deref(), format, &out)?;
        }
        Commands::Stats { format } => {
            commands::maintenance::stats(&cli.data_dir, &format)?;
        }
        Commands::Sweep => {
            commands::maintenance::sweep(&cli.data_dir)?;
        }
    }

    Ok(())
}
