//! Unix process control
//!
//! [`ProcessControl`] backed by `waitpid(WNOHANG)` and `kill(2)`.
//!
//! Workers lead their own process group, so signals go to the group and
//! reach the filter stages together with the command. Exit checks stay on
//! the worker pid.

use std::io;

use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use filter_core::error::ProcessControlError;
use filter_core::traits::ProcessControl;
use filter_core::{ExitCheck, ExitOutcome, ProcessId};

/// Controls direct children of this process
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixProcessControl;

impl UnixProcessControl {
    fn signal(&self, pid: ProcessId, signal: Signal) -> Result<(), ProcessControlError> {
        let target = Pid::from_raw(pid.as_raw());
        // No such group: the process never became a group leader
        let result = match killpg(target, signal) {
            Err(Errno::ESRCH) => kill(target, signal),
            other => other,
        };
        result.map_err(|e| ProcessControlError::Signal {
            pid: pid.as_raw(),
            signal: signal.as_str(),
            source: io::Error::from(e),
        })
    }
}

impl ProcessControl for UnixProcessControl {
    fn try_wait(&mut self, pid: ProcessId) -> Result<ExitCheck, ProcessControlError> {
        let status = waitpid(Pid::from_raw(pid.as_raw()), Some(WaitPidFlag::WNOHANG)).map_err(
            |e| ProcessControlError::Wait {
                pid: pid.as_raw(),
                source: io::Error::from(e),
            },
        )?;

        Ok(match status {
            WaitStatus::Exited(_, code) => ExitCheck::Exited(ExitOutcome::Code(code)),
            WaitStatus::Signaled(_, signal, _) => {
                ExitCheck::Exited(ExitOutcome::Signaled(signal as i32))
            }
            // StillAlive, or a stop/continue report we did not ask for
            _ => ExitCheck::StillRunning,
        })
    }

    fn terminate(&mut self, pid: ProcessId) -> Result<(), ProcessControlError> {
        self.signal(pid, Signal::SIGTERM)
    }

    fn kill(&mut self, pid: ProcessId) -> Result<(), ProcessControlError> {
        self.signal(pid, Signal::SIGKILL)
    }
}
