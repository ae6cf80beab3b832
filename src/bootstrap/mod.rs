//! Tunnel bootstrap
//!
//! Turns the three host descriptors into a running session:
//!
//! ```text
//! Start → DuplicatingRead → DuplicatingWrite → Wrapping
//!       → DuplicatingLog → WrappingLog → Constructing → {Success, Failed}
//! ```
//!
//! Each step owns what the previous steps produced, so an early return drops
//! (and closes) every duplicate made so far. Once the stream and logger are
//! handed to the engine, releasing them is the engine's job.

use crate::config::LoggingConfig;
use crate::engine::{EngineContext, EngineError, Tunnel, TunnelEngine};
use crate::fd::{self, DuplicationError};
use crate::logging::{LogSink, LogSinkError};
use crate::stream::{DuplexStream, PipeConn, StreamWrapError};
use std::fmt;
use std::os::fd::RawFd;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Descriptors supplied by the host. Borrowed, never closed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostDescriptors {
    pub read: RawFd,
    pub write: RawFd,
    pub log: RawFd,
}

impl HostDescriptors {
    pub fn new(read: RawFd, write: RawFd, log: RawFd) -> Self {
        Self { read, write, log }
    }
}

/// Where a bootstrap call is, or where it stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStage {
    Start,
    DuplicatingRead,
    DuplicatingWrite,
    Wrapping,
    DuplicatingLog,
    WrappingLog,
    Constructing,
    Success,
    Failed,
}

impl fmt::Display for BootstrapStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::DuplicatingRead => "duplicating read",
            Self::DuplicatingWrite => "duplicating write",
            Self::Wrapping => "wrapping stream",
            Self::DuplicatingLog => "duplicating log",
            Self::WrappingLog => "wrapping log",
            Self::Constructing => "constructing engine",
            Self::Success => "success",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Bootstrap errors, one per step that can fail
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("read descriptor: {0}")]
    DuplicateRead(#[source] DuplicationError),

    #[error("write descriptor: {0}")]
    DuplicateWrite(#[source] DuplicationError),

    #[error("stream: {0}")]
    WrapStream(#[from] StreamWrapError),

    #[error("log descriptor: {0}")]
    DuplicateLog(#[source] DuplicationError),

    #[error("log sink: {0}")]
    WrapLog(#[from] LogSinkError),

    #[error("engine: {0}")]
    Engine(#[from] EngineError),
}

impl BootstrapError {
    /// The step that failed
    pub fn stage(&self) -> BootstrapStage {
        match self {
            Self::DuplicateRead(_) => BootstrapStage::DuplicatingRead,
            Self::DuplicateWrite(_) => BootstrapStage::DuplicatingWrite,
            Self::WrapStream(_) => BootstrapStage::Wrapping,
            Self::DuplicateLog(_) => BootstrapStage::DuplicatingLog,
            Self::WrapLog(_) => BootstrapStage::WrappingLog,
            Self::Engine(_) => BootstrapStage::Constructing,
        }
    }
}

/// Duplicate, wrap and hand the host descriptors to `engine`.
///
/// On error every descriptor duplicated by this call has been closed and the
/// host's originals are untouched. On success the host may close its
/// originals; the session only uses the duplicates.
pub fn open_tunnel(
    engine: &dyn TunnelEngine,
    ctx: &EngineContext,
    host: HostDescriptors,
    logging: &LoggingConfig,
) -> Result<Tunnel, BootstrapError> {
    let result = run(engine, ctx, host, logging);
    match &result {
        Ok(tunnel) => {
            debug!(stage = %BootstrapStage::Success, id = tunnel.id(), "tunnel bootstrap complete")
        }
        Err(e) => warn!(
            stage = %BootstrapStage::Failed,
            failed_at = %e.stage(),
            error = %e,
            "tunnel bootstrap failed"
        ),
    }
    result
}

fn run(
    engine: &dyn TunnelEngine,
    ctx: &EngineContext,
    host: HostDescriptors,
    logging: &LoggingConfig,
) -> Result<Tunnel, BootstrapError> {
    debug!(
        stage = %BootstrapStage::Start,
        read = host.read,
        write = host.write,
        log = host.log,
        engine = engine.name(),
        "tunnel bootstrap"
    );

    debug!(stage = %BootstrapStage::DuplicatingRead);
    let read = fd::duplicate(host.read).map_err(BootstrapError::DuplicateRead)?;

    // `read` is dropped (closed) if this fails
    debug!(stage = %BootstrapStage::DuplicatingWrite);
    let write = fd::duplicate(host.write).map_err(BootstrapError::DuplicateWrite)?;

    debug!(stage = %BootstrapStage::Wrapping);
    let mut conn = PipeConn::new(read, write)?;

    debug!(stage = %BootstrapStage::DuplicatingLog);
    let log = match fd::duplicate(host.log) {
        Ok(log) => log,
        Err(e) => {
            let _ = conn.close();
            return Err(BootstrapError::DuplicateLog(e));
        }
    };

    debug!(stage = %BootstrapStage::WrappingLog);
    let logger = match LogSink::new(log, logging) {
        Ok(logger) => logger,
        Err(e) => {
            let _ = conn.close();
            return Err(BootstrapError::WrapLog(e));
        }
    };

    debug!(stage = %BootstrapStage::Constructing);
    logger.in_scope(|| {
        info!(
            engine = engine.name(),
            read_fd = ?conn.read_fd(),
            write_fd = ?conn.write_fd(),
            "handing pipe stream to tunnel engine"
        )
    });

    // Ownership moves here; the engine releases both on its own error path
    Ok(engine.start(ctx, logger, conn)?)
}
