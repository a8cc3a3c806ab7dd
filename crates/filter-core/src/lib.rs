//! filter-core: Core abstractions and configuration for filter-server
//!
//! This crate provides the configuration, error taxonomy, domain types and
//! process-control trait used by the server crate.

pub mod config;
pub mod context;
pub mod error;
pub mod timeout;
pub mod traits;
pub mod types;

pub use context::ServerContext;
pub use error::FilterError;
pub use timeout::SessionTimeout;
pub use types::{ExitCheck, ExitOutcome, LifecycleState, ProcessId};
