pub mod logging;

pub use tracing;

/// Cooperative shutdown signal broadcast to every long-running loop.
#[derive(Debug, Clone, Copy)]
pub enum Signal {
    Shutdown,
    Finalised,
}
