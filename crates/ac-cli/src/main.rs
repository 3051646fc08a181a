//! CLI entry point for autocopy.
//!
//! Watches a local project directory and copies every changed file to a
//! remote device over SSH, keeping the relative layout.
//!
//! # Usage
//!
//! ```bash
//! autocopy [OPTIONS] <COMMAND>
//!
//! # Mirror ./proj to /home/robot/proj on the default ev3dev host
//! autocopy watch ./proj /home/robot/proj
//!
//! # Same, running the program after every upload
//! autocopy --host 192.168.0.42 watch ./proj /home/robot/proj \
//!     --post-command "python3 /home/robot/proj/main.py"
//!
//! # Run a single command on the device
//! autocopy exec "ls -la /home/robot"
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

use std::io::Write;

use ac_core::{Config, RemoteRoot, TimestampSource, WatchRoot};
use ac_sync::WatchCoordinator;
use ac_transfer::{SshConnector, TransferSession};
use ac_watcher::{FileWatcher, PatternFilter};
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{WrapErr, eyre};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// CLI ARGUMENT TYPES
// =============================================================================

/// Copy changed files to a remote device as soon as they are saved.
#[derive(Parser)]
#[command(name = "autocopy", version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Command to execute.
    #[command(subcommand)]
    command: Commands,

    /// JSON configuration file. Command-line options override its values.
    #[arg(short, long, global = true, env = "AUTOCOPY_CONFIG")]
    config: Option<Utf8PathBuf>,

    #[command(flatten)]
    remote: RemoteArgs,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
}

/// Connection options shared by every subcommand.
#[derive(Args)]
struct RemoteArgs {
    /// Remote host name or address.
    #[arg(long, global = true, env = "AUTOCOPY_HOST")]
    host: Option<String>,

    /// Remote SSH port.
    #[arg(long, global = true, env = "AUTOCOPY_PORT")]
    port: Option<u16>,

    /// Remote user name.
    #[arg(short, long, global = true, env = "AUTOCOPY_USER")]
    user: Option<String>,

    /// Password for password authentication.
    #[arg(long, global = true, env = "AUTOCOPY_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Private key for public-key authentication.
    #[arg(short, long, global = true, env = "AUTOCOPY_IDENTITY")]
    identity: Option<Utf8PathBuf>,

    /// Expected SHA-256 fingerprint of the server's host key.
    #[arg(long, global = true)]
    host_key: Option<String>,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Watch a directory and copy every changed file to the remote target.
    Watch(WatchArgs),

    /// Run one command on the remote host and print its output.
    Exec {
        /// The command line, passed to the remote shell unchanged.
        command: String,
    },
}

#[derive(Args)]
struct WatchArgs {
    /// Directory to watch for changes (`.` for the current directory).
    watchdir: String,

    /// Directory on the remote host where changed files are copied to.
    targetdir: String,

    /// Glob of files to copy. Repeatable; replaces the configured list.
    #[arg(short, long = "pattern")]
    patterns: Vec<String>,

    /// Glob of files never to copy. Repeatable; replaces the configured list.
    #[arg(long = "ignore")]
    ignore_patterns: Vec<String>,

    /// Minimum gap between two uploads of the same file, in milliseconds.
    #[arg(short, long)]
    debounce_ms: Option<u64>,

    /// Which time decides whether two changes belong to one save.
    #[arg(long, value_enum)]
    timestamp: Option<TimestampArg>,

    /// Remote command to run after every successful upload.
    #[arg(long, alias = "force-execution")]
    post_command: Option<String>,
}

/// Command-line spelling of [`TimestampSource`].
#[derive(Clone, Copy, ValueEnum)]
enum TimestampArg {
    /// The file's modification time.
    Modified,
    /// The time the event was observed.
    Observed,
}

impl From<TimestampArg> for TimestampSource {
    fn from(arg: TimestampArg) -> Self {
        match arg {
            TimestampArg::Modified => Self::Modified,
            TimestampArg::Observed => Self::Observed,
        }
    }
}

// =============================================================================
// INITIALIZATION FUNCTIONS
// =============================================================================

/// Initializes the tracing subscriber for logging.
///
/// Respects the `RUST_LOG` environment variable if set. Otherwise, uses
/// `debug` level if `--verbose` is set, or `info` level by default.
/// Noisy crates like `russh` and `notify` are filtered to `warn` level.
fn init_tracing(verbose: bool, no_color: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { "info" };
        EnvFilter::new(format!("{level},russh=warn,notify=warn,mio=warn"))
    });

    let use_ansi = !no_color && std::env::var("NO_COLOR").is_err();

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_ansi(use_ansi))
        .with(filter)
        .init();
}

/// Builds a [`Config`] from the optional config file and CLI arguments.
///
/// # Errors
///
/// Returns an error if the config file cannot be read or the merged
/// configuration is invalid.
fn build_config(cli: &Cli) -> color_eyre::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_json_file(path).wrap_err_with(|| format!("Failed to load {path}"))?,
        None => Config::default(),
    };

    let remote = &cli.remote;
    if let Some(host) = &remote.host {
        config.remote.host.clone_from(host);
    }
    if let Some(port) = remote.port {
        config.remote.port = port;
    }
    if let Some(user) = &remote.user {
        config.remote.user.clone_from(user);
    }
    if remote.password.is_some() {
        config.remote.password.clone_from(&remote.password);
    }
    if remote.identity.is_some() {
        config.remote.identity_file.clone_from(&remote.identity);
    }
    if remote.host_key.is_some() {
        config.remote.host_key_fingerprint.clone_from(&remote.host_key);
    }

    if let Commands::Watch(args) = &cli.command {
        if !args.patterns.is_empty() {
            config.watch.patterns.clone_from(&args.patterns);
        }
        if !args.ignore_patterns.is_empty() {
            config.watch.ignore_patterns.clone_from(&args.ignore_patterns);
        }
        if let Some(ms) = args.debounce_ms {
            config.watch.debounce_ms = ms;
        }
        if let Some(source) = args.timestamp {
            config.watch.timestamp_source = source.into();
        }
        if args.post_command.is_some() {
            config.transfer.post_command.clone_from(&args.post_command);
        }
    }

    config.validate()?;
    Ok(config)
}

// =============================================================================
// COMMAND IMPLEMENTATIONS
// =============================================================================

/// Watches `args.watchdir` until interrupted.
///
/// # Errors
///
/// Returns an error if the paths are invalid, the first connection fails,
/// or the watcher cannot start.
async fn run_watch(config: Config, args: &WatchArgs) -> color_eyre::Result<()> {
    let watch_root = WatchRoot::resolve(&args.watchdir)?;
    let remote_root = RemoteRoot::new(args.targetdir.as_str())?;

    let mut session = TransferSession::new(SshConnector::new(config.remote.clone()), &config.transfer);
    let destination = session.destination();
    session
        .connect()
        .await
        .wrap_err_with(|| format!("Failed to connect to {destination}"))?;

    let filter = PatternFilter::from_config(&config.watch)?;
    let mut watcher = FileWatcher::new(watch_root.absolute_path(), &config.watch, filter).await?;

    let coordinator = WatchCoordinator::new(
        watch_root,
        remote_root,
        session,
        &config.watch,
        &config.transfer,
    );

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    coordinator.run(watcher.events(), shutdown).await;
    watcher.shutdown().await?;

    Ok(())
}

/// Runs a single remote command and forwards its output.
///
/// # Errors
///
/// Returns an error if the connection fails or the command does not exit
/// with status 0.
async fn run_exec(config: Config, command: &str) -> color_eyre::Result<()> {
    let mut session = TransferSession::new(SshConnector::new(config.remote), &config.transfer);
    let destination = session.destination();
    session
        .connect()
        .await
        .wrap_err_with(|| format!("Failed to connect to {destination}"))?;

    let stdout = std::io::stdout();
    let result = session
        .run_remote_command_with(command, |chunk| {
            let mut handle = stdout.lock();
            let _ = write!(handle, "{chunk}");
            let _ = handle.flush();
        })
        .await;
    session.disconnect().await;
    let output = result?;

    if !output.stderr.is_empty() {
        let stderr = std::io::stderr();
        let mut handle = stderr.lock();
        write!(handle, "{}", output.stderr)?;
    }

    if output.success() {
        Ok(())
    } else if let Some(signal) = output.exit_signal {
        Err(eyre!("`{command}` was killed by {signal}"))
    } else {
        match output.exit_status {
            Some(code) => Err(eyre!("`{command}` exited with status {code}")),
            None => Err(eyre!("`{command}` ended without an exit status")),
        }
    }
}

/// Cancels `shutdown` on Ctrl-C, or SIGTERM on Unix.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        () = signal_received(tokio::signal::ctrl_c(), "Ctrl-C") => {}
                        _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                    }
                }
                Err(error) => {
                    warn!(error = %error, "Cannot listen for SIGTERM");
                    signal_received(tokio::signal::ctrl_c(), "Ctrl-C").await;
                }
            }
        }

        #[cfg(not(unix))]
        signal_received(tokio::signal::ctrl_c(), "Ctrl-C").await;

        shutdown.cancel();
    });
}

/// Resolves once `listener` reports the signal. A listener that fails to
/// install never resolves, so the watch keeps running.
async fn signal_received<F>(listener: F, name: &str)
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    match listener.await {
        Ok(()) => info!("Received {name}, shutting down"),
        Err(error) => {
            warn!(error = %error, signal = name, "Cannot listen for signal");
            std::future::pending::<()>().await;
        }
    }
}

// =============================================================================
// MAIN ENTRY POINT
// =============================================================================

/// Application entry point.
#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // 1. Install color-eyre FIRST (before any potential panics)
    color_eyre::install()?;

    // 2. Parse CLI arguments
    let cli = Cli::parse();

    // 3. Initialize tracing (handles --no-color for log output)
    init_tracing(cli.verbose, cli.no_color);

    // 4. Merge config file and flags
    let config = build_config(&cli)?;

    // 5. Route to appropriate command
    match &cli.command {
        Commands::Watch(args) => run_watch(config, args).await,
        Commands::Exec { command } => run_exec(config, command).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[tokio::test]
    async fn test_signal_received_after_delivery() {
        let delivered = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            signal_received(async { Ok(()) }, "Ctrl-C"),
        )
        .await;
        assert!(delivered.is_ok());
    }

    #[tokio::test]
    async fn test_failed_listener_never_signals() {
        let failed = async { Err(std::io::Error::other("no signal driver")) };
        let outcome = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            signal_received(failed, "Ctrl-C"),
        )
        .await;
        assert!(outcome.is_err());
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_watch_flags_override_defaults() {
        let cli = Cli::parse_from([
            "autocopy",
            "--host",
            "10.0.0.5",
            "watch",
            "proj",
            "/home/robot/proj",
            "--pattern",
            "*.py",
            "--pattern",
            "*.json",
            "--debounce-ms",
            "250",
            "--force-execution",
            "python3 main.py",
        ]);
        let config = build_config(&cli).unwrap();

        assert_eq!(config.remote.host, "10.0.0.5");
        assert_eq!(config.watch.patterns, vec!["*.py".to_owned(), "*.json".to_owned()]);
        assert_eq!(config.watch.debounce_ms, 250);
        assert_eq!(config.transfer.post_command.as_deref(), Some("python3 main.py"));
        assert_eq!(config.watch.ignore_patterns, Config::default().watch.ignore_patterns);
    }

    #[test]
    fn test_config_file_then_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("autocopy.json");
        std::fs::write(&path, r#"{"remote": {"host": "brick", "user": "maker"}, "watch": {"debounce_ms": 900}}"#)
            .unwrap();

        let cli = Cli::parse_from([
            "autocopy",
            "--config",
            path.to_str().unwrap(),
            "--user",
            "robot",
            "exec",
            "uptime",
        ]);
        let config = build_config(&cli).unwrap();

        assert_eq!(config.remote.host, "brick");
        assert_eq!(config.remote.user, "robot");
        assert_eq!(config.watch.debounce_ms, 900);
    }
}
