//! MCC Daemon - Ground station relay server
//!
//! This binary bridges the spacecraft telemetry transport and operator
//! clients: it accepts TCP (optionally TLS) connections, authenticates
//! operators, and relays packets in both directions.
//!
//! # Usage
//!
//! ```bash
//! # Start the server (foreground)
//! mccd start
//!
//! # Start the server (background/daemonized)
//! mccd start -d
//!
//! # Stop the server
//! mccd stop
//!
//! # Check server status
//! mccd status
//!
//! # Store an operator credential
//! mccd adduser alice s3cr3t
//!
//! # Start with a custom config file
//! mccd --config /etc/mcc.toml start
//!
//! # Enable debug logging
//! RUST_LOG=mccd=debug mccd start
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use mcc_core::Config;

use mccd::registry::spawn_registry;
use mccd::server::RelayServer;
use mccd::storage::{digest_password, SqliteStorage, Storage};
use mccd::telemetry::ChannelLink;

/// MCC daemon - spacecraft ground station relay
#[derive(Parser, Debug)]
#[command(name = "mccd", version, about)]
struct Args {
    /// Configuration file
    #[arg(short = 'f', long, global = true, default_value = "mcc.toml")]
    config: PathBuf,

    /// Raise the default log level to debug
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the server
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,
    },
    /// Stop the running server
    Stop,
    /// Show server status
    Status,
    /// Store an operator credential in the user database
    Adduser { username: String, password: String },
}

/// Returns the state directory for runtime files.
fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("mcc")
}

/// Returns the path to the PID file.
fn pid_file_path(config: &Config) -> PathBuf {
    match &config.server.pid_file {
        Some(path) => path.clone(),
        None => state_dir().join("mccd.pid"),
    }
}

/// Returns the path to the log file used when daemonized.
fn log_file_path() -> PathBuf {
    state_dir().join("mcc.log")
}

/// Reads the PID from the PID file, if it exists.
fn read_pid(config: &Config) -> Option<u32> {
    let path = pid_file_path(config);
    let mut file = File::open(&path).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

/// Writes the current PID to the PID file.
fn write_pid(config: &Config) -> Result<()> {
    let path = pid_file_path(config);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

/// Removes the PID file.
fn remove_pid_file(config: &Config) {
    let path = pid_file_path(config);
    let _ = fs::remove_file(path);
}

/// Checks if a process with the given PID is running.
fn is_process_running(pid: u32) -> bool {
    // Check if /proc/{pid} exists (Linux-specific but we're already Linux-only)
    PathBuf::from(format!("/proc/{}", pid)).exists()
}

/// Checks if the server is already running.
fn is_daemon_running(config: &Config) -> Option<u32> {
    if let Some(pid) = read_pid(config) {
        if is_process_running(pid) {
            return Some(pid);
        }
        // Stale PID file - remove it
        remove_pid_file(config);
    }
    None
}

/// Sends SIGTERM to the server process.
fn stop_daemon(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        // Use kill syscall
        let result = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
        if result != 0 {
            bail!("Failed to send SIGTERM to process {}", pid);
        }
    }
    #[cfg(not(unix))]
    {
        bail!("Stop command is only supported on Unix systems");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config =
        Config::load_or_default(&args.config).context("Failed to load configuration")?;

    // Default to 'start' if no subcommand given
    let command = args.command.unwrap_or(Command::Start { daemon: false });

    match command {
        Command::Start { daemon } => {
            // Check if already running
            if let Some(pid) = is_daemon_running(&config) {
                eprintln!("Server is already running (PID {})", pid);
                eprintln!("Use 'mccd stop' to stop it first.");
                process::exit(1);
            }

            if daemon {
                // Daemonize before starting the tokio runtime
                daemonize()?;
            }

            // Write PID file
            write_pid(&config)?;

            // Run the async main
            let result = run_daemon(config.clone(), args.verbose);

            // Clean up PID file on exit
            remove_pid_file(&config);

            result
        }
        Command::Stop => {
            if let Some(pid) = is_daemon_running(&config) {
                println!("Stopping server (PID {})...", pid);
                stop_daemon(pid)?;

                // Wait for process to exit (up to 5 seconds)
                for _ in 0..50 {
                    if !is_process_running(pid) {
                        println!("Server stopped.");
                        return Ok(());
                    }
                    std::thread::sleep(std::time::Duration::from_millis(100));
                }

                eprintln!("Server did not stop within 5 seconds.");
                process::exit(1);
            } else {
                println!("Server is not running.");
                Ok(())
            }
        }
        Command::Status => {
            if let Some(pid) = is_daemon_running(&config) {
                println!("Server is running (PID {})", pid);
                println!("Listen port: {}", config.server.port);
                Ok(())
            } else {
                println!("Server is not running.");
                process::exit(1);
            }
        }
        Command::Adduser { username, password } => run_adduser(config, username, password),
    }
}

/// Daemonizes the current process.
fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();

    // Ensure log directory exists
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = File::create(&log_path).context("Failed to create log file for stderr")?;

    let daemonize = Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr);

    daemonize.start().context("Failed to daemonize")?;

    Ok(())
}

/// Runs the server (async entry point).
#[tokio::main]
async fn run_daemon(config: Config, verbose: bool) -> Result<()> {
    // Initialize logging
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("mccd={default_level}").parse()?)
                .add_directive(format!("mcc_core={default_level}").parse()?)
                .add_directive(format!("mcc_protocol={default_level}").parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "MCC server starting"
    );

    if unsafe { libc::geteuid() } == 0 {
        warn!("Running as root is not recommended");
    }
    if !config.server.tls {
        warn!("TLS is disabled, client connections are unencrypted");
    }

    // Create cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();

    // Setup signal handlers
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    // Spawn the session registry
    let registry = spawn_registry(config.server.max_sessions);

    // Open packet and user storage
    let storage: Arc<dyn Storage> = Arc::new(
        SqliteStorage::open(&config.database.file)
            .await
            .context("Failed to open packet database")?,
    );

    // The outbound drain is the integration point for a physical
    // transport driver. None ships with the server, so the drain is
    // held here unread and clients are limited to stored history.
    let (link, _outbound_drain) =
        ChannelLink::new(config.link.outbound_capacity, Arc::clone(&storage));
    warn!("No telemetry transport attached. Replay only mode.");

    // Bind and run the server
    let server = RelayServer::bind(&config, registry, storage, link, cancel_token.clone())
        .await
        .context("Failed to start server")?;

    info!(addr = %server.local_addr(), "Startup sequence completed");

    server.run().await;

    info!("MCC server stopped");
    Ok(())
}

/// Stores an operator credential, replacing any existing one.
#[tokio::main]
async fn run_adduser(config: Config, username: String, password: String) -> Result<()> {
    let storage = SqliteStorage::open(&config.database.file)
        .await
        .context("Failed to open user database")?;

    storage
        .add_user(&username, &digest_password(&password))
        .await
        .context("Failed to store user")?;

    println!("User '{}' stored.", username);
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
