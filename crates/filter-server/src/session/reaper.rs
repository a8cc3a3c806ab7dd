//! Timeout reaper
//!
//! Runs once per dispatch tick. For every occupied slot it first checks,
//! without blocking, whether the worker has exited; a finished worker frees
//! its slot no matter what state it was in. Workers still running past their
//! deadline are escalated:
//!
//! - `Running` past its deadline gets SIGTERM and enters `GracePeriod`.
//! - `GracePeriod` for at least [`GRACE_WINDOW`] since the SIGTERM was sent
//!   gets SIGKILL and becomes `ForceKilled`.
//! - `ForceKilled` waits until the exit is observed.

use std::time::{Duration, Instant};

use filter_core::traits::ProcessControl;
use filter_core::{ExitCheck, ExitOutcome, LifecycleState, ProcessId};

use super::table::SlotTable;

/// Delay between the graceful terminate and the forceful kill
pub const GRACE_WINDOW: Duration = Duration::from_secs(2);

/// What a single reaper pass did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReapReport {
    /// Slots freed, with the observed exit
    pub completed: Vec<(usize, ProcessId, ExitOutcome)>,
    /// Workers sent the graceful terminate signal
    pub terminated: Vec<ProcessId>,
    /// Workers sent the forceful kill signal
    pub killed: Vec<ProcessId>,
}

impl ReapReport {
    /// Whether the pass changed anything
    pub fn is_empty(&self) -> bool {
        self.completed.is_empty() && self.terminated.is_empty() && self.killed.is_empty()
    }
}

/// Reap finished workers and escalate overdue ones.
pub fn reap_sessions<P: ProcessControl>(
    slots: &mut SlotTable,
    control: &mut P,
    now: Instant,
) -> ReapReport {
    let mut report = ReapReport::default();

    for index in slots.occupied_indices() {
        let Some(slot) = slots.get_mut(index) else {
            continue;
        };
        let pid = slot.pid;

        match control.try_wait(pid) {
            Ok(ExitCheck::Exited(outcome)) => {
                tracing::info!("Process {} is complete, {}", pid, outcome);
                slots.release(index);
                report.completed.push((index, pid, outcome));
                continue;
            }
            Ok(ExitCheck::StillRunning) => {}
            Err(e) if e.is_gone() => {
                // Nothing left to wait for
                tracing::warn!("Process {} can no longer be waited on: {}", pid, e);
                slots.release(index);
                report.completed.push((index, pid, ExitOutcome::Unknown));
                continue;
            }
            Err(e) => {
                tracing::error!("{}", e);
                continue;
            }
        }

        if !slot.is_expired(now) {
            continue;
        }

        match slot.state {
            LifecycleState::Running => {
                tracing::info!("Timeout: terminating process {}", pid);
                if let Err(e) = control.terminate(pid) {
                    log_signal_failure(&e);
                }
                slot.advance(LifecycleState::GracePeriod { signalled_at: now });
                report.terminated.push(pid);
            }
            LifecycleState::GracePeriod { signalled_at } => {
                if now.saturating_duration_since(signalled_at) >= GRACE_WINDOW {
                    tracing::info!("Timeout: killing process {}", pid);
                    if let Err(e) = control.kill(pid) {
                        log_signal_failure(&e);
                    }
                    slot.advance(LifecycleState::ForceKilled);
                    report.killed.push(pid);
                }
            }
            LifecycleState::ForceKilled => {}
        }
    }

    report
}

fn log_signal_failure(err: &filter_core::error::ProcessControlError) {
    if err.is_gone() {
        tracing::debug!("{} (process already gone)", err);
    } else {
        tracing::warn!("{}", err);
    }
}
