//! # Pipe Tunnel
//!
//! Starts a tunnel session from three pipe descriptors owned by a host
//! process (for example a network extension), over a C ABI.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 C boundary (ffi)                     │
//! │     OpenTunnel(read, write, log) -> 0 / -1          │
//! ├─────────────────────────────────────────────────────┤
//! │               Bootstrap (bootstrap)                  │
//! │   duplicate → wrap → hand off, total cleanup        │
//! ├──────────────────────────┬──────────────────────────┤
//! │   Duplex stream (stream) │    Log sink (logging)    │
//! │   read pipe + write pipe │   tracing → log pipe     │
//! ├──────────────────────────┴──────────────────────────┤
//! │           Descriptor duplication (fd)               │
//! └─────────────────────────────────────────────────────┘
//!                 ▼ ownership moves to
//!        Tunnel engine (engine), runs until process exit
//! ```

pub mod bootstrap;
pub mod config;
pub mod engine;
pub mod fd;
pub mod ffi;
pub mod logging;
pub mod stream;

pub use bootstrap::{open_tunnel, BootstrapError, BootstrapStage, HostDescriptors};
pub use config::Config;
pub use engine::{EchoEngine, EngineContext, Tunnel, TunnelEngine};
pub use logging::LogSink;
pub use stream::{DuplexStream, PipeConn};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bootstrap error: {0}")]
    Bootstrap(#[from] BootstrapError),

    #[error("No tunnel engine installed")]
    NoEngine,

    #[error("Configuration error: {0}")]
    Config(String),
}
