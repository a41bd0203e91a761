use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize structured logging. Call once at startup.
///
/// `RUST_LOG` overrides the default `info` filter, e.g.
/// `RUST_LOG=pharmacy_locator=debug,sqlx=warn`.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    fmt().with_env_filter(filter).with_target(false).compact().init();

    info!("Logging initialized");
}
