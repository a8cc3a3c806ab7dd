//! Core domain types

use std::fmt;
use std::time::Instant;

/// OS identity of a forked worker process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub i32);

impl ProcessId {
    /// Get the raw pid
    pub fn as_raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for ProcessId {
    fn from(pid: i32) -> Self {
        Self(pid)
    }
}

/// How a worker process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Normal exit with a status code
    Code(i32),
    /// Terminated by a signal
    Signaled(i32),
    /// The process can no longer be waited on; status unknown
    Unknown,
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::Code(code) => write!(f, "exit code: {}", code),
            ExitOutcome::Signaled(sig) => write!(f, "killed by signal {}", sig),
            ExitOutcome::Unknown => write!(f, "exit status unknown"),
        }
    }
}

/// Result of a non-blocking exit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCheck {
    /// Process has not exited yet
    StillRunning,
    /// Process has exited and been reaped
    Exited(ExitOutcome),
}

/// Escalation ladder of a session.
///
/// Transitions only go forward: `Running` -> `GracePeriod` -> `ForceKilled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Worker running within its deadline
    Running,
    /// Graceful terminate sent at `signalled_at`
    GracePeriod {
        /// When the graceful signal was sent
        signalled_at: Instant,
    },
    /// Forceful kill sent; waiting for the exit to be observed
    ForceKilled,
}

impl LifecycleState {
    /// Position on the escalation ladder
    pub fn rank(&self) -> u8 {
        match self {
            LifecycleState::Running => 0,
            LifecycleState::GracePeriod { .. } => 1,
            LifecycleState::ForceKilled => 2,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Running => write!(f, "running"),
            LifecycleState::GracePeriod { .. } => write!(f, "grace-period"),
            LifecycleState::ForceKilled => write!(f, "force-killed"),
        }
    }
}
