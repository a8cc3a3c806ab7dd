//! Server configuration

use serde::{Deserialize, Serialize};
use std::fmt;

use super::serde_utils::session_timeout;
use crate::error::ConfigError;
use crate::timeout::{SessionTimeout, MIN_SESSION_TIMEOUT};

/// Upper bound on simultaneous sessions
pub const MAXIMUM_SESSIONS: usize = 80;

/// Default number of simultaneous sessions
pub const DEFAULT_SESSIONS: usize = 20;

/// Ports below this need root privilege
const PRIVILEGED_PORT_LIMIT: u16 = 1024;

/// Configuration for the filter server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// IPv4 address to bind the listener to
    pub bind_address: String,

    /// TCP port to listen on
    pub port: Option<u16>,

    /// Maximum number of simultaneous sessions
    pub max_sessions: i64,

    /// Maximum time a session may run
    #[serde(with = "session_timeout")]
    pub session_timeout: SessionTimeout,

    /// Decompress input before it reaches the command
    pub decompress_input: bool,

    /// Compress the command's output
    pub compress_output: bool,

    /// Decompression stage command
    pub decompress_command: Vec<String>,

    /// Compression stage command
    pub compress_command: Vec<String>,

    /// Command (and arguments) run for each connection
    pub command: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: None,
            max_sessions: DEFAULT_SESSIONS as i64,
            session_timeout: SessionTimeout::default(),
            decompress_input: false,
            compress_output: false,
            decompress_command: vec!["gunzip".to_string()],
            compress_command: vec!["gzip".to_string()],
            command: Vec::new(),
        }
    }
}

/// A value changed by [`ServerConfig::sanitize`]
#[derive(Debug, Clone, PartialEq)]
pub enum Adjustment {
    /// Session count clamped into range
    Sessions {
        /// Requested value
        requested: i64,
        /// Value used
        applied: usize,
    },
    /// Timeout raised to the minimum
    Timeout {
        /// Requested value
        requested: SessionTimeout,
        /// Value used
        applied: SessionTimeout,
    },
}

impl fmt::Display for Adjustment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Adjustment::Sessions { requested, applied } => write!(
                f,
                "maximum sessions {} clamped to {} (allowed range 1 to {})",
                requested, applied, MAXIMUM_SESSIONS
            ),
            Adjustment::Timeout { requested, applied } => write!(
                f,
                "timeout {} raised to {}",
                requested, applied
            ),
        }
    }
}

/// Stdio topology requested for each session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSpec {
    /// Target command and arguments
    pub command: Vec<String>,
    /// Stage placed between the connection and the command's stdin
    pub decompress: Option<Vec<String>>,
    /// Stage placed between the command's stdout and the connection
    pub compress: Option<Vec<String>>,
}

impl ServerConfig {
    /// Clamp out-of-range values, reporting every change.
    pub fn sanitize(&mut self) -> Vec<Adjustment> {
        let mut adjustments = Vec::new();

        let applied = self.max_sessions.clamp(1, MAXIMUM_SESSIONS as i64);
        if applied != self.max_sessions {
            adjustments.push(Adjustment::Sessions {
                requested: self.max_sessions,
                applied: applied as usize,
            });
            self.max_sessions = applied;
        }

        let requested = self.session_timeout;
        if self.session_timeout.clamp_to_minimum() {
            adjustments.push(Adjustment::Timeout {
                requested,
                applied: SessionTimeout::Limited(MIN_SESSION_TIMEOUT),
            });
        }

        adjustments
    }

    /// Check that the configuration can be served.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.port {
            None => return Err(ConfigError::MissingPort),
            Some(0) => return Err(ConfigError::InvalidPort),
            Some(_) => {}
        }

        match self.command.first() {
            None => return Err(ConfigError::EmptyCommand),
            Some(program) if program.is_empty() => return Err(ConfigError::EmptyCommand),
            Some(_) => {}
        }

        if self.decompress_input && self.decompress_command.is_empty() {
            return Err(ConfigError::Invalid(
                "decompress_command must not be empty".to_string(),
            ));
        }
        if self.compress_output && self.compress_command.is_empty() {
            return Err(ConfigError::Invalid(
                "compress_command must not be empty".to_string(),
            ));
        }

        self.bind_address
            .parse::<std::net::Ipv4Addr>()
            .map_err(|e| {
                ConfigError::Invalid(format!("bind_address '{}': {}", self.bind_address, e))
            })?;

        Ok(())
    }

    /// Session capacity after sanitizing
    pub fn session_capacity(&self) -> usize {
        self.max_sessions.clamp(1, MAXIMUM_SESSIONS as i64) as usize
    }

    /// Whether the configured port needs root privilege
    pub fn is_privileged_port(&self) -> bool {
        matches!(self.port, Some(port) if port < PRIVILEGED_PORT_LIMIT)
    }

    /// Listener address as `ip:port`
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port.unwrap_or(0))
    }

    /// Describe the per-session process topology
    pub fn pipeline(&self) -> PipelineSpec {
        PipelineSpec {
            command: self.command.clone(),
            decompress: self
                .decompress_input
                .then(|| self.decompress_command.clone()),
            compress: self.compress_output.then(|| self.compress_command.clone()),
        }
    }
}
