//! Core error types for filter-server

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Exit status of a worker that failed while building its filter stages.
pub const STAGE_FAILURE_EXIT: i32 = 4;

/// Exit status of a worker that could not exec the target command.
pub const COMMAND_FAILURE_EXIT: i32 = 8;

// errno values shared by Linux, the BSDs and macOS
const ESRCH: i32 = 3;
const ECHILD: i32 = 10;

/// Top-level error type for filter-server
#[derive(Error, Debug)]
pub enum FilterError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Listener construction error
    #[error("Listener error: {0}")]
    Listener(#[from] ListenerError),

    /// Worker session error
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Timeout value could not be parsed
    #[error("Invalid timeout '{0}': expected a number with optional s/m/h/d/w suffix, or 'none'")]
    InvalidTimeout(String),

    /// No port was given on the command line or in the config file
    #[error("No port specified")]
    MissingPort,

    /// Port outside 1..=65535
    #[error("Port number must be in range 1 to 65535")]
    InvalidPort,

    /// Command vector is empty or starts with an empty string
    #[error("Command is empty")]
    EmptyCommand,
}

/// Errors raised while creating the listening socket
#[derive(Error, Debug)]
pub enum ListenerError {
    /// Socket creation or option setting failed
    #[error("Failed to configure listening socket: {0}")]
    Configure(#[source] io::Error),

    /// bind() failed
    #[error("Failed to bind to {address}: {source}")]
    Bind {
        /// Address we tried to bind
        address: String,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// listen() failed
    #[error("Failed to listen: {0}")]
    Listen(#[source] io::Error),
}

/// Errors fatal to a single worker process.
///
/// These never cross the fork boundary: the worker reports the error on
/// stderr and exits with [`SessionError::exit_code`].
#[derive(Error, Debug)]
pub enum SessionError {
    /// pipe() failed
    #[error("Failed to create pipe: {0}")]
    Pipe(#[source] io::Error),

    /// fork() failed while creating a filter stage
    #[error("Failed to fork filter stage: {0}")]
    Fork(#[source] io::Error),

    /// dup2() onto a standard descriptor failed
    #[error("Failed to redirect descriptor {fd}: {source}")]
    Redirect {
        /// Target standard descriptor
        fd: i32,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// exec of a filter stage failed
    #[error("Failed to execute filter stage '{program}': {source}")]
    StageExec {
        /// Stage program name
        program: String,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// exec of the target command failed
    #[error("Failed to execute '{program}': {source}")]
    Exec {
        /// Target program name
        program: String,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// An argument could not be passed to exec (interior NUL byte or empty argv)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl SessionError {
    /// Exit status the worker terminates with for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            SessionError::Exec { .. } => COMMAND_FAILURE_EXIT,
            _ => STAGE_FAILURE_EXIT,
        }
    }
}

/// Errors from the exit-check and signal-delivery primitives
#[derive(Error, Debug)]
pub enum ProcessControlError {
    /// Non-blocking wait failed
    #[error("waitpid({pid}) failed: {source}")]
    Wait {
        /// Process waited on
        pid: i32,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// Signal delivery failed
    #[error("kill({pid}, {signal}) failed: {source}")]
    Signal {
        /// Target process
        pid: i32,
        /// Signal name
        signal: &'static str,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },
}

impl ProcessControlError {
    /// Whether the error only means the process is already gone
    /// (ESRCH for signals, ECHILD for waits).
    pub fn is_gone(&self) -> bool {
        let source = match self {
            ProcessControlError::Wait { source, .. } => source,
            ProcessControlError::Signal { source, .. } => source,
        };
        matches!(source.raw_os_error(), Some(ESRCH) | Some(ECHILD))
    }
}
