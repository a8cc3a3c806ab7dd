//! Accept/dispatch loop
//!
//! Single-threaded polling loop. Every tick reaps and escalates sessions,
//! looks for a free slot, tries a non-blocking accept and forks a worker for
//! the new connection. The parent only does bookkeeping; the worker runs the
//! filter pipeline and never comes back.

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::time::{Duration, Instant};

use nix::unistd::{close, fork, setpgid, ForkResult, Pid};

use filter_core::traits::ProcessControl;
use filter_core::{LifecycleState, ProcessId, ServerContext, SessionTimeout};

use crate::session::{reap_sessions, Slot, SlotTable};
use crate::shutdown::ShutdownFlag;
use crate::worker::{abort_worker, FilterPipeline};

/// Sleep after a tick that had nothing to do
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(5);

/// Result of one loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Every slot is occupied; no accept was attempted
    Saturated,
    /// No pending connection
    Idle,
    /// accept() failed with a real error
    AcceptFailed,
    /// fork() failed; the connection was dropped
    ForkFailed,
    /// A worker was started for a new session
    Started {
        /// Slot now holding the session
        slot: usize,
        /// Worker process
        pid: ProcessId,
    },
    /// Shutdown was requested
    ShuttingDown,
}

impl TickOutcome {
    /// Whether the loop should sleep before the next tick
    pub fn should_back_off(&self) -> bool {
        !matches!(self, TickOutcome::Started { .. } | TickOutcome::ShuttingDown)
    }
}

/// Owns the listener and the slot table and runs the server loop
pub struct Dispatcher<P: ProcessControl> {
    listener: TcpListener,
    slots: SlotTable,
    control: P,
    pipeline: FilterPipeline,
    timeout: SessionTimeout,
    shutdown: ShutdownFlag,
    context: ServerContext,
}

impl<P: ProcessControl> Dispatcher<P> {
    /// Create a dispatcher with `capacity` session slots
    pub fn new(
        listener: TcpListener,
        capacity: usize,
        timeout: SessionTimeout,
        pipeline: FilterPipeline,
        control: P,
        shutdown: ShutdownFlag,
        context: ServerContext,
    ) -> Self {
        Self {
            listener,
            slots: SlotTable::new(capacity),
            control,
            pipeline,
            timeout,
            shutdown,
            context,
        }
    }

    /// The session slot table
    pub fn slots(&self) -> &SlotTable {
        &self.slots
    }

    /// Mutable access to the slot table
    pub fn slots_mut(&mut self) -> &mut SlotTable {
        &mut self.slots
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run until shutdown is requested.
    pub fn run(&mut self) -> std::io::Result<()> {
        let address = self.listener.local_addr()?;
        tracing::info!(
            "{} {} waiting for connections",
            self.context.hostname,
            address.port()
        );

        loop {
            let outcome = self.tick(Instant::now());
            if outcome == TickOutcome::ShuttingDown {
                break;
            }
            if outcome.should_back_off() {
                std::thread::sleep(ACCEPT_BACKOFF);
            }
        }

        self.terminate_sessions();
        tracing::info!(
            "Dispatcher stopped after {:.1}s",
            self.context.uptime().as_secs_f64()
        );
        Ok(())
    }

    /// One iteration of the loop.
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        if self.shutdown.is_requested() {
            return TickOutcome::ShuttingDown;
        }

        reap_sessions(&mut self.slots, &mut self.control, now);

        let Some(slot) = self.slots.find_free() else {
            return TickOutcome::Saturated;
        };

        let (stream, peer) = match self.listener.accept() {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {
                return TickOutcome::Idle;
            }
            Err(e) => {
                tracing::error!("accept failed: {}", e);
                return TickOutcome::AcceptFailed;
            }
        };

        tracing::info!("Accepted connection from {}", peer);
        self.start_session(slot, stream, peer)
    }

    fn start_session(&mut self, slot: usize, stream: TcpStream, peer: SocketAddr) -> TickOutcome {
        // Some platforms hand out accepted sockets in the listener's mode
        if let Err(e) = stream.set_nonblocking(false) {
            tracing::warn!("Failed to make connection from {} blocking: {}", peer, e);
        }

        // SAFETY: the dispatcher is single threaded, so the child starts with
        // consistent allocator and logging state
        match unsafe { fork() } {
            Err(e) => {
                tracing::error!("fork failed: {}", e);
                TickOutcome::ForkFailed
            }
            Ok(ForkResult::Parent { child }) => {
                drop(stream);
                // Also done in the child; whichever runs first wins the race
                // against an early signal
                let _ = setpgid(child, child);
                let pid = ProcessId(child.as_raw());
                let started = Instant::now();
                let session = Slot::running(
                    pid,
                    started,
                    self.timeout.deadline_from(started),
                    Some(peer),
                );
                if let Err(e) = self.slots.occupy(slot, session) {
                    // Cannot happen while find_free and occupy run back to back
                    tracing::error!("Failed to register process {}: {}", pid, e);
                }
                tracing::info!(
                    "Process {},{} starting (slot {})",
                    self.pipeline.program(),
                    pid,
                    slot
                );
                TickOutcome::Started { slot, pid }
            }
            Ok(ForkResult::Child) => self.become_worker(stream),
        }
    }

    /// Worker side of the fork. The slot table is a private copy here and
    /// is never touched.
    fn become_worker(&self, stream: TcpStream) -> ! {
        // The listener belongs to the parent; this process never returns to
        // drop it
        let _ = close(self.listener.as_raw_fd());

        // Filter stages forked later join this group and are signalled
        // with the worker
        if let Err(e) = setpgid(Pid::from_raw(0), Pid::from_raw(0)) {
            tracing::warn!(
                "Worker {}: failed to create process group: {}",
                std::process::id(),
                e
            );
        }

        match self.pipeline.exec(stream.as_raw_fd()) {
            Err(e) => abort_worker(e),
            Ok(never) => match never {},
        }
    }

    /// Send the graceful terminate to every session still running.
    pub fn terminate_sessions(&mut self) {
        let now = Instant::now();
        let running: Vec<usize> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.state == LifecycleState::Running)
            .map(|(index, _)| index)
            .collect();

        if !running.is_empty() {
            tracing::info!("Terminating {} running sessions", running.len());
        }

        for index in running {
            let Some(slot) = self.slots.get_mut(index) else {
                continue;
            };
            if let Err(e) = self.control.terminate(slot.pid) {
                tracing::warn!("{}", e);
            }
            slot.advance(LifecycleState::GracePeriod { signalled_at: now });
        }
    }
}
