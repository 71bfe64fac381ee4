mod config;
mod handler;
mod router;
mod session;
mod shutdown;

pub use config::ServerOptions;
pub use handler::ServerImplementation;
pub use router::{Acceptor, Server};
pub use shutdown::{OpGuard, ShutdownCoordinator, ShutdownPhase};
