// Tracing initialization for hosts and tests without their own subscriber.
use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, tracing_subscriber::Registry>> =
    OnceLock::new();

/// Installs a global subscriber with an `EnvFilter` and a `fmt` layer.
///
/// `RUST_LOG` wins over `filter` when set. Calling this again, or after the
/// host installed its own subscriber, is a no-op.
pub fn init_tracing(filter: &str) {
    let base_filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(filter));

    let (reload_layer, handle) = reload::Layer::new(base_filter);

    let installed = tracing_subscriber::registry()
        .with(reload_layer)
        .with(fmt::layer())
        .try_init()
        .is_ok();
    if installed {
        let _ = FILTER_HANDLE.set(handle);
    }
}

/// Replaces the log filter installed by [`init_tracing`].
///
/// Returns `false` if this crate did not install the subscriber.
pub fn set_log_filter(filter: &str) -> bool {
    FILTER_HANDLE
        .get()
        .is_some_and(|handle| handle.modify(|f| *f = EnvFilter::new(filter)).is_ok())
}
