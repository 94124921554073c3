//! fsgate daemon
//!
//! Sandboxed filesystem tool server.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use daemon::config::Config;
use daemon::ipc::{default_socket_path, serve_stdio, IpcClient, IpcError, IpcServer};
use daemon::{logging, Service, ToolRouter};
use tokio_util::sync::CancellationToken;

/// fsgate - sandboxed filesystem tool server.
#[derive(Parser, Debug)]
#[command(name = "fsgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Serve tool calls on stdin/stdout, or on a Unix socket
    Serve {
        /// Comma separated list of allowed directories
        #[arg(long, value_name = "DIRS")]
        allowed_dirs: Option<String>,

        /// Listen on this Unix socket instead of stdin/stdout
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Call one tool on a running socket server
    Call {
        /// Socket of the running server (default: configured or XDG runtime path)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,

        /// Tool name, e.g. read_file
        tool: String,

        /// Tool arguments as a JSON object
        #[arg(long, value_name = "JSON")]
        args: Option<String>,

        /// Timeout in seconds for the call
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// Check whether paths fall inside the allowed directories
    Check {
        /// Comma separated list of allowed directories
        #[arg(long, value_name = "DIRS")]
        allowed_dirs: Option<String>,

        /// Paths to check
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Print the tool catalog as JSON
    Tools,
}

/// How long runtime shutdown waits for blocking tasks. A read on stdin
/// cannot be interrupted and would otherwise hold the process open.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

fn main() -> ExitCode {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run(cli));
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    match result {
        Ok(status) => ExitCode::from(status),
        Err(e) => {
            eprintln!("Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

/// Load configuration, install logging and run the command.
///
/// The log guard is dropped before this returns, flushing the file writer.
async fn run(cli: Cli) -> anyhow::Result<u8> {
    // Load configuration
    let mut config = match &cli.config {
        Some(config_path) => Config::load(config_path)?,
        None => Config::load_default()?,
    };

    // Apply environment variable overrides
    config.apply_env_overrides();

    // Initialize tracing
    let level = logging::effective_level(&config.daemon.log_level, cli.verbose);
    let _log_guard = logging::init(&level, config.daemon.log_dir.as_deref())?;

    if let Some(config_path) = &cli.config {
        tracing::debug!(path = %config_path.display(), "Using config file");
    }

    run_command(cli.command, config).await
}

/// Run one command and return the process exit status.
async fn run_command(command: Commands, mut config: Config) -> anyhow::Result<u8> {
    match command {
        Commands::Serve {
            allowed_dirs,
            socket,
        } => {
            if let Some(list) = &allowed_dirs {
                config.apply_allowed_dirs_flag(list);
            }
            config.validate()?;
            let socket = socket.or_else(|| config.server.socket_path.clone());
            run_server(&config, socket).await?;
            Ok(0)
        }
        Commands::Call {
            socket,
            tool,
            args,
            timeout,
        } => {
            let socket = socket
                .or_else(|| config.server.socket_path.clone())
                .unwrap_or_else(default_socket_path);

            match call_tool(&socket, &tool, args.as_deref(), timeout).await {
                Ok(text) => {
                    println!("{}", text);
                    Ok(0)
                }
                Err(e) => {
                    eprintln!("{} failed: {:#}", tool, e);
                    Ok(1)
                }
            }
        }
        Commands::Check {
            allowed_dirs,
            paths,
        } => {
            if let Some(list) = &allowed_dirs {
                config.apply_allowed_dirs_flag(list);
            }
            config.validate()?;
            let allow_list = config.allow_list()?;

            let mut all_allowed = true;
            for path in &paths {
                if allow_list.is_allowed(path) {
                    println!("allowed  {}", path.display());
                } else {
                    all_allowed = false;
                    println!("denied   {}", path.display());
                }
            }
            Ok(if all_allowed { 0 } else { 1 })
        }
        Commands::Tools => {
            let tools: Vec<_> = daemon::Tool::ALL
                .into_iter()
                .map(daemon::Tool::descriptor)
                .collect();
            println!("{}", serde_json::to_string_pretty(&tools)?);
            Ok(0)
        }
    }
}

/// Serve until the input ends (stdio) or a shutdown signal arrives.
async fn run_server(config: &Config, socket: Option<PathBuf>) -> anyhow::Result<()> {
    let allow_list = Arc::new(config.allow_list()?);
    for root in allow_list.roots() {
        tracing::info!(root = %root.display(), "Allowed directory");
    }

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match wait_for_shutdown_signal().await {
                Ok(()) => shutdown.cancel(),
                Err(e) => tracing::error!(error = %e, "Failed to register signal handlers"),
            }
        });
    }

    let service = Service::new(ToolRouter::new(allow_list), shutdown.clone())
        .with_request_timeout(config.request_timeout());

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "fsgate starting");

    match socket {
        Some(path) => {
            let server = IpcServer::bind(&path)
                .await
                .with_context(|| format!("Failed to bind socket: {}", path.display()))?;
            server.run(service, shutdown).await?;
        }
        None => serve_stdio(service).await?,
    }

    tracing::info!("fsgate stopped");
    Ok(())
}

/// Send a single tool call to a running server.
async fn call_tool(
    socket: &std::path::Path,
    tool: &str,
    args: Option<&str>,
    timeout: u64,
) -> Result<String, IpcError> {
    let arguments = match args {
        Some(json) => serde_json::from_str(json).map_err(|e| {
            IpcError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("--args is not valid JSON: {}", e),
            ))
        })?,
        None => serde_json::Value::Object(Default::default()),
    };

    let mut client = IpcClient::connect_with_timeout(socket, Duration::from_secs(timeout)).await?;
    client.call_tool(1, tool, arguments).await
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::info!("Received Ctrl-C");
    Ok(())
}
