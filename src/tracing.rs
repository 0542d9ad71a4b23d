//! Structured logging setup
//!
//! Console output goes through `tracing-subscriber`'s fmt layer, either human
//! readable or one JSON object per event. The filter comes from `RUST_LOG`,
//! falling back to `info,cadbench=debug`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info,cadbench=debug";

/// Initialize the global subscriber
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(json: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    if json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true);
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false);
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()?;
    }

    tracing::debug!(json, "tracing initialized");
    Ok(())
}

/// Log with trace context
///
/// Automatically includes trace_id in structured log output
#[macro_export]
macro_rules! trace_log {
    ($level:ident, $trace_id:expr, $($arg:tt)*) => {
        tracing::$level!(trace_id = %$trace_id, $($arg)*)
    };
}
