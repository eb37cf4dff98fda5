//! # Uniclip
//!
//! One logical clipboard shared across many machines.
//!
//! A central relay (the hub) holds the universal clipboard value and a
//! registry of connected daemons. Each daemon bridges its machine's OS
//! clipboard to the hub: local copies are pushed up and fanned out to
//! every other daemon, which writes them to its own clipboard.

pub mod cli;
pub mod clipboard;
pub mod config;
pub mod daemon;
pub mod guard;
pub mod hub;
pub mod protocol;
pub mod store;

pub use config::Config;

/// Result type alias for uniclip operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for uniclip operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Wire protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    /// Clipboard operation error
    #[error("Clipboard error: {0}")]
    Clipboard(#[from] clipboard::ClipboardError),

    /// Hub error
    #[error("Hub error: {0}")]
    Hub(#[from] hub::HubError),

    /// Daemon error
    #[error("Daemon error: {0}")]
    Daemon(#[from] daemon::DaemonError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum clipboard payload size (5MB default)
pub const MAX_PAYLOAD_SIZE: usize = 5 * 1024 * 1024;
