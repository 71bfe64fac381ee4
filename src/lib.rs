pub mod ws;

pub use ws::{WsSocket, WsTransport};

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install the `tracing` subscriber used by the binaries.
///
/// Honors `RUST_LOG`, defaulting to info for this workspace's crates.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("wirelink=info,wirelink_core=info")),
        )
        .init();
}
