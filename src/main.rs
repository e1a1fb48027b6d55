//! mux-chat: a multiplexed line chat server
//!
//! Features:
//! - Many concurrent clients on a single thread (epoll/kqueue via mio)
//! - Username registration on the first line
//! - Timestamped broadcast to every named client, sender included
//! - Short writes resumed on write readiness
//! - Configuration via CLI arguments or TOML file

use mux_chat::config::Config;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        backlog = config.backlog,
        announce_departures = config.announce_departures,
        evict_on_send_failure = config.evict_on_send_failure,
        max_pending_bytes = config.max_pending_bytes,
        "Starting mux-chat server"
    );

    if let Err(e) = mux_chat::runtime::run(&config) {
        error!(error = %e, "Server stopped");
        return Err(e.into());
    }
    Ok(())
}
