//! Logging setup.
//!
//! Modules log through [`prelude`] so the macros in use stay uniform
//! across the crate.

use time::macros::format_description;
use tracing_subscriber::{EnvFilter, fmt::time::LocalTime, prelude::*};

pub mod prelude {
    pub use tracing::{debug, error, info, trace, warn};
}

const DEFAULT_FILTER: &str = "info";

/// Install the global subscriber.
///
/// Logs go to the systemd journal when the process was started by
/// systemd with its output connected to the journal, and to stdout
/// otherwise. `RUST_LOG` overrides the default `info` filter.
pub fn init_journald_or_stdout() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    if std::env::var_os("JOURNAL_STREAM").is_some() {
        match tracing_journald::layer() {
            Ok(journald) => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(journald)
                    .init();
                return;
            }
            Err(e) => {
                eprintln!("journald unavailable, logging to stdout: {e}");
            }
        }
    }

    let timer = LocalTime::new(format_description!(
        "[hour]:[minute]:[second].[subsecond digits:3]"
    ));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_timer(timer))
        .init();
}
