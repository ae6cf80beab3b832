//! Structured log sink over a pipe descriptor
//!
//! Engine code logs with the ordinary `tracing` macros inside the sink's
//! scope. Records are rendered as plain text lines and written to the log
//! pipe the host handed over. Writing is best effort: a broken or full log
//! pipe is counted, never reported to the caller, and never raises SIGPIPE.

use crate::config::LoggingConfig;
use crate::fd::{self, sigpipe};
use std::fs::File;
use std::io::{self, Write};
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::dispatcher::{self, DefaultGuard};
use tracing::{Dispatch, Level};
use tracing_subscriber::fmt::MakeWriter;

/// Verbosity of every session log sink
pub const LOG_LEVEL: Level = Level::DEBUG;

/// Log sink construction errors
#[derive(Debug, Error)]
pub enum LogSinkError {
    #[error("log descriptor {fd} is not writable")]
    NotWritable { fd: RawFd },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// The log pipe plus a count of writes it refused
#[derive(Debug)]
struct LogPipe {
    file: File,
    dropped: AtomicU64,
}

impl Write for &LogPipe {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut file = &self.file;
        match sigpipe::suppress(|| file.write(buf)) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Err(e),
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Ok(buf.len())
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct LogWriter(Arc<LogPipe>);

impl<'a> MakeWriter<'a> for LogWriter {
    type Writer = &'a LogPipe;

    fn make_writer(&'a self) -> Self::Writer {
        &self.0
    }
}

/// Leveled structured logger bound to one pipe descriptor
#[derive(Clone)]
pub struct LogSink {
    dispatch: Dispatch,
    pipe: Arc<LogPipe>,
}

impl LogSink {
    /// Wrap a duplicated log descriptor.
    ///
    /// The descriptor is owned by this call and closed if it cannot be
    /// written to.
    pub fn new(fd: OwnedFd, config: &LoggingConfig) -> Result<Self, LogSinkError> {
        if !fd::access_mode(fd.as_fd())?.is_writable() {
            return Err(LogSinkError::NotWritable { fd: fd.as_raw_fd() });
        }

        let pipe = Arc::new(LogPipe {
            file: File::from(fd),
            dropped: AtomicU64::new(0),
        });

        let builder = tracing_subscriber::fmt()
            .with_writer(LogWriter(pipe.clone()))
            .with_ansi(false)
            .with_max_level(LOG_LEVEL)
            .with_target(config.with_target)
            .with_thread_ids(config.thread_ids);

        let dispatch = if config.timestamps {
            Dispatch::new(builder.finish())
        } else {
            Dispatch::new(builder.without_time().finish())
        };

        Ok(Self { dispatch, pipe })
    }

    /// The dispatcher records are routed through
    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Run `f` with this sink as the current default subscriber
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        dispatcher::with_default(&self.dispatch, f)
    }

    /// Make this sink the thread's default subscriber until the guard drops
    pub fn set_default(&self) -> DefaultGuard {
        dispatcher::set_default(&self.dispatch)
    }

    /// Descriptor number of the log pipe
    pub fn fd(&self) -> RawFd {
        self.pipe.file.as_raw_fd()
    }

    /// Number of writes the log pipe rejected
    pub fn dropped_writes(&self) -> u64 {
        self.pipe.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSink")
            .field("fd", &self.fd())
            .field("level", &LOG_LEVEL)
            .finish()
    }
}
