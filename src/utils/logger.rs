//! Logging initialization.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise this crate logs at info (debug with
/// `verbose`) and everything else at warn.
pub fn init(verbose: bool) {
    let default = if verbose {
        "warn,xr_frame_loop=debug"
    } else {
        "warn,xr_frame_loop=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}
