//! filter-server
//!
//! Runs any command that reads standard input and writes standard output as
//! a forking TCP/IP service.

use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use filter_core::config::{self, ServerConfig, MAXIMUM_SESSIONS};
use filter_core::{ServerContext, SessionTimeout};
use filter_server::ShutdownFlag;

const EXAMPLE: &str = "\
Example (trivial):

on server...
   filter-server -- 4242 stdbuf -oL tr 'a-z' 'A-Z'

   stdbuf is an easy way to modify (output) buffering.

on client...
   ncat server_host 4242

   Any text typed on the command line will be converted to upper case.";

#[derive(Parser)]
#[command(name = "filter-server")]
#[command(version, about = "Run a stdin/stdout filter command as a forking TCP/IP service")]
#[command(after_help = EXAMPLE)]
struct Args {
    /// Maximum number of simultaneous sessions, clamped to 1..=80 [default: 20]
    #[arg(short, long, allow_negative_numbers = true)]
    sessions: Option<i64>,

    /// Maximum session time in seconds; may be suffixed with s, m, h, d or w,
    /// or 'none' for no limit. Raised to at least 1 second [default: 1d]
    #[arg(short, long)]
    timeout: Option<SessionTimeout>,

    /// Decompress the input (using gunzip) sent to the command
    #[arg(short = 'u', long)]
    unzip: bool,

    /// Compress the output (using gzip) of the command
    #[arg(short = 'z', long)]
    zip: bool,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// IPv4 address to bind (overrides config) [default: 0.0.0.0]
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Port on which the service runs (1-65535; below 1024 needs root)
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    port: Option<u16>,

    /// Command to run for each connection, with its arguments. Must be on
    /// the PATH or given as an absolute path
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Workers inherit stderr; stdout becomes the client connection
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(std::io::stderr().is_terminal()),
        )
        .init();

    let config = build_config(&args)?;
    report_settings(&config);

    let shutdown = ShutdownFlag::install().context("Failed to install signal handlers")?;
    filter_server::serve(&config, ServerContext::new(), shutdown)?;

    tracing::info!("filter server complete");
    Ok(())
}

/// Merge the config file with command-line overrides, then sanitize and
/// validate the result.
fn build_config(args: &Args) -> Result<ServerConfig> {
    let mut config: ServerConfig = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_config_path();
        if default_path.exists() {
            config::load_config(&default_path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
                ServerConfig::default()
            })
        } else {
            ServerConfig::default()
        }
    };

    if let Some(sessions) = args.sessions {
        config.max_sessions = sessions;
    }
    if let Some(timeout) = args.timeout {
        config.session_timeout = timeout;
    }
    if let Some(bind) = &args.bind {
        config.bind_address = bind.clone();
    }
    if let Some(port) = args.port {
        config.port = Some(port);
    }
    if !args.command.is_empty() {
        config.command = args.command.clone();
    }
    config.decompress_input |= args.unzip;
    config.compress_output |= args.zip;

    for adjustment in config.sanitize() {
        tracing::warn!("{}", adjustment);
    }
    config.validate()?;

    if config.is_privileged_port() {
        tracing::warn!(
            "port {} requires root privilege",
            config.port.unwrap_or_default()
        );
    }

    Ok(config)
}

fn report_settings(config: &ServerConfig) {
    tracing::info!("port :             {}", config.port.unwrap_or_default());
    tracing::info!(
        "maximum sessions : {} (limit {})",
        config.session_capacity(),
        MAXIMUM_SESSIONS
    );
    tracing::info!("maximum time :     {}", config.session_timeout);
    tracing::info!(
        "decompress input : {}",
        if config.decompress_input { "yes" } else { "no" }
    );
    tracing::info!(
        "compress output :  {}",
        if config.compress_output { "yes" } else { "no" }
    );
    tracing::info!("command :          {}", config.command.join(" "));
}
