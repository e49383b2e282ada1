//! In-memory IR core with a PSV runtime-info emitter.
//!
//! The IR lives in [`tessel_ir`] and is re-exported at the crate root. The
//! binary record consumed by pipeline loaders lives in [`psv`].

use std::sync::Once;

pub use tessel_ir::*;
pub use tessel_psv as psv;

static TRACING_INIT: Once = Once::new();

/// Install a `tracing` fmt subscriber filtered by `RUST_LOG`.
///
/// Does nothing when `RUST_LOG` is unset or a global subscriber is already
/// installed. Safe to call more than once.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{EnvFilter, fmt, prelude::*};

        if std::env::var("RUST_LOG").is_ok() {
            let filter = EnvFilter::from_default_env();
            let _ = tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true))
                .with(filter)
                .try_init();
            tracing::debug!("tracing initialized");
        }
    });
}
