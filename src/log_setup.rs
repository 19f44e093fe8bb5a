use std::sync::OnceLock;

use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static LOG_INIT: OnceLock<bool> = OnceLock::new();

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` wins over `base_level` when set. Every event goes to stdout;
/// warnings and errors are mirrored to stderr. Calling this more than once is a no-op;
/// the return value says whether this call (or the first one) installed the
/// subscriber, which is false if another subscriber was already in place.
pub fn setup_logging(base_level: &str) -> bool {
    *LOG_INIT.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(base_level))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let console_writer = std::io::stdout.and(std::io::stderr.with_min_level(Level::WARN));

        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_writer(console_writer);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .try_init()
            .is_ok()
    })
}
