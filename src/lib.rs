//! Omnilink - saved data-source connections
//!
//! Per-user encrypted connection descriptors, SSH tunnels to reach them, and
//! side-effect-free connectivity probes.

// Use mimalloc as the global allocator for better performance
// with high-frequency small allocations (forwarding buffers, probe tasks)
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod commands;
pub mod config;
pub mod error;
pub mod probe;
pub mod session;
pub mod ssh;
pub mod store;
pub mod tunnel;
pub mod vault;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use commands::{CommandReply, CoreState};
pub use error::CoreError;

/// Install the global subscriber. `RUST_LOG` overrides the `info` default.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
