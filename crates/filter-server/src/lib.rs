//! filter-server: forking TCP/IP server that runs a filter command
//!
//! Each accepted connection gets its own worker process whose stdin and
//! stdout are the socket, optionally through gunzip/gzip filter stages.
//! The parent keeps a fixed-size slot table of workers and escalates those
//! that overrun their session timeout from SIGTERM to SIGKILL.

pub mod process;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod worker;

pub use process::UnixProcessControl;
pub use server::{create_listener, serve, Dispatcher, TickOutcome};
pub use shutdown::ShutdownFlag;
