//! Process-wide runtime context
//!
//! Built once at startup and shared read-only afterwards.

use std::time::{Duration, Instant};

/// Values fixed for the lifetime of the server process
#[derive(Debug, Clone)]
pub struct ServerContext {
    /// Host name looked up at startup
    pub hostname: String,
    /// Monotonic start time of the server
    pub started: Instant,
}

impl ServerContext {
    /// Capture the host name and start time
    pub fn new() -> Self {
        Self {
            hostname: gethostname::gethostname().to_string_lossy().into_owned(),
            started: Instant::now(),
        }
    }

    /// Time since the server started
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Default for ServerContext {
    fn default() -> Self {
        Self::new()
    }
}
