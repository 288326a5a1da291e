//! Tracing setup for the binary.
//!
//! Log filtering follows `RUST_LOG`; without it (or with an invalid value)
//! everything at `info` and above is printed.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false));
    // Tests and embedders may have installed a subscriber already.
    let _ = registry.try_init();
}
