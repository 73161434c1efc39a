//! Observability: structured logging initialization.
//!
//! The engine itself only emits `tracing` events and `metrics` facade
//! counters; hosts decide where those go. [`init_logging`] installs a
//! stderr fmt subscriber filtered by `RUST_LOG` for embedders that want
//! a sensible default.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initializes a default stderr logging subscriber.
///
/// Filter level comes from `RUST_LOG` (default `info`). Safe to call more
/// than once; subsequent calls are no-ops.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging();
        init_logging();
    }
}
