//! Shutdown signalling
//!
//! SIGINT and SIGTERM only set an atomic flag; the dispatch loop polls it
//! between ticks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nix::sys::signal::{sigaction, signal, SaFlags, SigAction, SigHandler, SigSet, Signal};

static SIGNAL_RECEIVED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_shutdown_signal(_: nix::libc::c_int) {
    SIGNAL_RECEIVED.store(true, Ordering::SeqCst);
}

/// Request to stop the dispatch loop
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    requested: Arc<AtomicBool>,
    watch_signals: bool,
}

impl ShutdownFlag {
    /// A flag that is only set through [`ShutdownFlag::request`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install SIGINT/SIGTERM handlers and return a flag that observes them
    pub fn install() -> nix::Result<Self> {
        let action = SigAction::new(
            SigHandler::Handler(on_shutdown_signal),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );
        for sig in [Signal::SIGINT, Signal::SIGTERM] {
            // SAFETY: the handler only stores to an atomic
            unsafe { sigaction(sig, &action) }?;
        }

        Ok(Self {
            requested: Arc::new(AtomicBool::new(false)),
            watch_signals: true,
        })
    }

    /// Ask the loop to stop
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested, by call or by signal
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
            || (self.watch_signals && SIGNAL_RECEIVED.load(Ordering::SeqCst))
    }
}

/// Put signal dispositions back to their defaults before exec.
///
/// The Rust runtime ignores SIGPIPE and the server traps SIGINT/SIGTERM;
/// ignored dispositions survive exec, so reset them for spawned commands.
pub fn restore_default_signals() {
    for sig in [Signal::SIGINT, Signal::SIGTERM, Signal::SIGPIPE] {
        // SAFETY: installing SIG_DFL does not run any code in this process
        let _ = unsafe { signal(sig, SigHandler::SigDfl) };
    }
}
