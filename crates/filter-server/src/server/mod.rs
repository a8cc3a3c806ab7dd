//! TCP server: listener and accept/dispatch loop

mod dispatch;
mod listener;

pub use dispatch::{Dispatcher, TickOutcome, ACCEPT_BACKOFF};
pub use listener::{create_listener, LISTEN_BACKLOG};

use std::net::SocketAddr;

use filter_core::config::ServerConfig;
use filter_core::error::ConfigError;
use filter_core::{FilterError, ServerContext};

use crate::process::UnixProcessControl;
use crate::shutdown::ShutdownFlag;
use crate::worker::FilterPipeline;

/// Build the pipeline and listener for `config` and run the dispatch loop
/// until `shutdown` is requested.
///
/// Fails before the loop starts if the configuration is unusable or the
/// listener cannot be created.
pub fn serve(
    config: &ServerConfig,
    context: ServerContext,
    shutdown: ShutdownFlag,
) -> Result<(), FilterError> {
    config.validate()?;
    let pipeline = FilterPipeline::from_spec(&config.pipeline())?;

    let address: SocketAddr = config.listen_address().parse().map_err(|e| {
        ConfigError::Invalid(format!("listen address {}: {}", config.listen_address(), e))
    })?;
    tracing::info!(
        "binding to {}:{} ({})",
        context.hostname,
        address.port(),
        address
    );
    let listener = create_listener(address)?;

    let mut dispatcher = Dispatcher::new(
        listener,
        config.session_capacity(),
        config.session_timeout,
        pipeline,
        UnixProcessControl,
        shutdown,
        context,
    );
    dispatcher.run()?;
    Ok(())
}
