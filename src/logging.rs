//! Tracing subscriber setup
//!
//! The engine itself only emits `tracing` events; embedding services call
//! [`init_tracing`] once at startup to route them somewhere.

use crate::config::MonitoringConfig;
use tracing_subscriber::EnvFilter;

/// Install a global `fmt` subscriber
///
/// `RUST_LOG` wins over `config.log_level` when set. Returns `false` when a
/// global subscriber was already installed, which leaves the existing one in
/// place.
pub fn init_tracing(config: &MonitoringConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let installed = if config.structured_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_current_span(true)
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .try_init()
            .is_ok()
    };

    if installed {
        tracing::info!(
            level = %config.log_level,
            structured = config.structured_logging,
            "Tracing initialized"
        );
    }
    installed
}
