//! Filter pipeline builder
//!
//! Runs inside a freshly forked worker. The worker's stdin and stdout are
//! bound to the accepted connection, optional filter stages are spliced in
//! with anonymous pipes, and the worker finally execs the target command:
//!
//! ```text
//! connection -> [decompress] -> command -> [compress] -> connection
//! ```
//!
//! Each stage is its own process, forked from the worker before the exec so
//! that the target command inherits the rewired stdio.

use std::convert::Infallible;
use std::ffi::CString;
use std::io;
use std::os::unix::io::RawFd;

use nix::unistd::{close, dup2, execvp, fork, pipe, ForkResult};

use filter_core::config::PipelineSpec;
use filter_core::error::SessionError;

use crate::shutdown::restore_default_signals;

const STDIN: RawFd = 0;
const STDOUT: RawFd = 1;
const STDERR: RawFd = 2;

/// Which side of the command a filter stage sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageSide {
    /// Between the connection and the command's stdin
    Input,
    /// Between the command's stdout and the connection
    Output,
}

/// Argument vectors for one session's processes, ready for exec
#[derive(Debug, Clone)]
pub struct FilterPipeline {
    command: Vec<CString>,
    decompress: Option<Vec<CString>>,
    compress: Option<Vec<CString>>,
}

impl FilterPipeline {
    /// Convert a pipeline description into exec-ready argument vectors.
    ///
    /// Done once at startup so workers do not have to validate arguments.
    pub fn from_spec(spec: &PipelineSpec) -> Result<Self, SessionError> {
        Ok(Self {
            command: to_argv(&spec.command)?,
            decompress: spec.decompress.as_deref().map(to_argv).transpose()?,
            compress: spec.compress.as_deref().map(to_argv).transpose()?,
        })
    }

    /// Name of the target program
    pub fn program(&self) -> String {
        self.command[0].to_string_lossy().into_owned()
    }

    /// Whether input passes through a decompression stage
    pub fn decompresses_input(&self) -> bool {
        self.decompress.is_some()
    }

    /// Whether output passes through a compression stage
    pub fn compresses_output(&self) -> bool {
        self.compress.is_some()
    }

    /// Wire the worker's stdio to `connection`, start the filter stages and
    /// exec the target command.
    ///
    /// Only returns on failure.
    pub fn exec(&self, connection: RawFd) -> Result<Infallible, SessionError> {
        redirect(connection, STDIN)?;
        redirect(connection, STDOUT)?;
        close_inherited_descriptors();

        if let Some(argv) = &self.decompress {
            spawn_stage(argv, StageSide::Input)?;
        }
        if let Some(argv) = &self.compress {
            spawn_stage(argv, StageSide::Output)?;
        }

        restore_default_signals();
        execvp(&self.command[0], &self.command).map_err(|e| SessionError::Exec {
            program: self.program(),
            source: io::Error::from(e),
        })
    }
}

fn to_argv(args: &[String]) -> Result<Vec<CString>, SessionError> {
    if args.is_empty() || args[0].is_empty() {
        return Err(SessionError::InvalidArgument("empty command".to_string()));
    }
    args.iter()
        .map(|arg| {
            CString::new(arg.as_bytes())
                .map_err(|_| SessionError::InvalidArgument(format!("{:?} contains a NUL byte", arg)))
        })
        .collect()
}

/// Make `target` refer to the same open file as `fd`.
fn redirect(fd: RawFd, target: RawFd) -> Result<(), SessionError> {
    match dup2(fd, target) {
        Ok(result) if result == target => Ok(()),
        Ok(result) => Err(SessionError::Redirect {
            fd: target,
            source: io::Error::new(
                io::ErrorKind::Other,
                format!("dup2 returned {} instead of {}", result, target),
            ),
        }),
        Err(e) => Err(SessionError::Redirect {
            fd: target,
            source: io::Error::from(e),
        }),
    }
}

/// Move a pipe end onto a standard descriptor and drop the original.
fn redirect_and_close(fd: RawFd, target: RawFd) -> Result<(), SessionError> {
    redirect(fd, target)?;
    if fd != target {
        let _ = close(fd);
    }
    Ok(())
}

/// Fork a filter stage connected to this process through a new pipe.
///
/// For [`StageSide::Input`] the stage writes into the pipe and this process
/// reads it as stdin; for [`StageSide::Output`] this process writes into the
/// pipe as stdout and the stage reads it. The stage keeps the other standard
/// descriptor, which is still the connection.
pub fn spawn_stage(argv: &[CString], side: StageSide) -> Result<(), SessionError> {
    let (read_end, write_end) = pipe().map_err(|e| SessionError::Pipe(io::Error::from(e)))?;

    // SAFETY: workers are single threaded
    match unsafe { fork() }.map_err(|e| SessionError::Fork(io::Error::from(e)))? {
        ForkResult::Child => {
            let result = match side {
                StageSide::Input => {
                    let _ = close(read_end);
                    redirect_and_close(write_end, STDOUT)
                }
                StageSide::Output => {
                    let _ = close(write_end);
                    redirect_and_close(read_end, STDIN)
                }
            }
            .and_then(|()| exec_stage(argv));

            match result {
                Err(e) => abort_worker(e),
                Ok(never) => match never {},
            }
        }
        ForkResult::Parent { child } => {
            tracing::debug!("Filter stage {:?} started as process {}", argv[0], child);
            match side {
                StageSide::Input => {
                    let _ = close(write_end);
                    redirect_and_close(read_end, STDIN)
                }
                StageSide::Output => {
                    let _ = close(read_end);
                    redirect_and_close(write_end, STDOUT)
                }
            }
        }
    }
}

fn exec_stage(argv: &[CString]) -> Result<Infallible, SessionError> {
    restore_default_signals();
    execvp(&argv[0], argv).map_err(|e| SessionError::StageExec {
        program: argv[0].to_string_lossy().into_owned(),
        source: io::Error::from(e),
    })
}

/// Close every descriptor above stderr so that stages and the command do
/// not inherit the listener or other sessions' connections.
pub fn close_inherited_descriptors() {
    for fd in open_descriptors() {
        if fd > STDERR {
            let _ = close(fd);
        }
    }
}

#[cfg(target_os = "linux")]
fn open_descriptors() -> Vec<RawFd> {
    // Collect first: the directory handle itself is one of the entries
    match std::fs::read_dir("/proc/self/fd") {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse().ok())
            .collect(),
        Err(_) => descriptor_range(),
    }
}

#[cfg(not(target_os = "linux"))]
fn open_descriptors() -> Vec<RawFd> {
    descriptor_range()
}

fn descriptor_range() -> Vec<RawFd> {
    use nix::unistd::{sysconf, SysconfVar};

    let max = sysconf(SysconfVar::OPEN_MAX)
        .ok()
        .flatten()
        .unwrap_or(1024)
        .clamp(3, RawFd::MAX as nix::libc::c_long) as RawFd;
    (0..max).collect()
}

/// Report a worker-fatal error and terminate the calling process.
pub fn abort_worker(err: SessionError) -> ! {
    tracing::error!("Worker {}: {}", std::process::id(), err);
    // SAFETY: _exit skips atexit handlers and stdio flushing inherited from
    // the server across fork
    unsafe { nix::libc::_exit(err.exit_code()) }
}
