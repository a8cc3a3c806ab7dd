//! Process control traits

use crate::error::ProcessControlError;
use crate::types::{ExitCheck, ProcessId};

/// Exit-check and signal-delivery primitives addressed by process identity.
///
/// The reaper only talks to worker processes through this trait.
pub trait ProcessControl {
    /// Check whether `pid` has exited, without blocking.
    ///
    /// A successful `Exited` result also reaps the process.
    fn try_wait(&mut self, pid: ProcessId) -> Result<ExitCheck, ProcessControlError>;

    /// Ask the process to terminate (SIGTERM).
    fn terminate(&mut self, pid: ProcessId) -> Result<(), ProcessControlError>;

    /// Forcefully kill the process (SIGKILL).
    fn kill(&mut self, pid: ProcessId) -> Result<(), ProcessControlError>;
}
