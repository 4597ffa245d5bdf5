//! Ambient logging setup. Every component in this workspace emits through
//! `tracing`; this module is the one place a binary embedding
//! `smarterbase` needs to call to get those spans and events on stdout.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs a `tracing` subscriber filtered by `RUST_LOG`
/// (`smarterbase=info` if unset) as the global default. Call once, at
/// process start; calling it twice is a caller error and is reported via
/// `tracing`'s own `SetGlobalDefaultError`, not panicked on here.
pub fn init() -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("smarterbase=info"));

    let subscriber = fmt::Subscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
}
