//! Logging initialisation. Detailed log-sink configuration (file rotation,
//! remote collectors) is out of scope per `spec.md` §1; what's in scope is
//! wiring `tracing` the way every other binary in the teacher's workspace
//! does, so every crate's `tracing::info!`/`debug!`/`error!` calls land
//! somewhere readable.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global `tracing` subscriber reading `RUST_LOG` (defaulting to
/// `info`), with JSON output when `json` is true. Safe to call once per
/// process; a second call is a no-op logged at `warn`.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);

    let result = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };

    if let Err(err) = result {
        tracing::warn!(%err, "tracing subscriber already initialised");
    }
}
