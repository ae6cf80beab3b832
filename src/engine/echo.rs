//! Loopback engine that writes every byte it reads straight back

use super::{EngineContext, EngineError, ShutdownSignal, Tunnel, TunnelEngine};
use crate::logging::LogSink;
use crate::stream::{DuplexStream, PipeConn};
use std::io::{self, Read, Write};
use tracing::{debug, info, warn};

/// Default read buffer (16 KB)
const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// Reference engine: echoes the stream back to the host.
///
/// Used by the harness binary and as the loopback peer in tests. Each session
/// runs on its own thread. Shutdown is honoured once the blocking read in
/// progress returns.
#[derive(Debug, Clone)]
pub struct EchoEngine {
    buffer_size: usize,
}

impl EchoEngine {
    pub fn new(buffer_size: usize) -> Self {
        Self { buffer_size }
    }
}

impl Default for EchoEngine {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

impl TunnelEngine for EchoEngine {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn start(
        &self,
        ctx: &EngineContext,
        logger: LogSink,
        mut conn: PipeConn,
    ) -> Result<Tunnel, EngineError> {
        if self.buffer_size == 0 {
            return Err(EngineError::Rejected("buffer size must be non-zero".to_string()));
        }

        logger.in_scope(|| {
            info!(
                read_fd = ?conn.read_fd(),
                write_fd = ?conn.write_fd(),
                "echo tunnel starting"
            )
        });

        let buffer_size = self.buffer_size;
        // A failed thread spawn drops the closure, closing conn and logger
        ctx.spawn_thread(self.name(), move |shutdown| {
            let _guard = logger.set_default();
            match relay(&mut conn, &shutdown, buffer_size) {
                Ok(total) => info!(bytes = total, "echo tunnel finished"),
                Err(e) => warn!(error = %e, "echo tunnel failed"),
            }
            let _ = conn.close();
        })
    }
}

fn relay(conn: &mut PipeConn, shutdown: &ShutdownSignal, buffer_size: usize) -> io::Result<u64> {
    let mut buf = vec![0u8; buffer_size];
    let mut total = 0u64;

    loop {
        if shutdown.is_triggered() {
            debug!("shutdown requested");
            break;
        }

        let n = match conn.read(&mut buf) {
            Ok(0) => {
                debug!("peer closed stream");
                break;
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };

        // The read may have been what woke us after a shutdown request
        if shutdown.is_triggered() {
            debug!(bytes = n, "shutdown requested, discarding chunk");
            break;
        }

        conn.write_all(&buf[..n])?;
        total += n as u64;
        debug!(bytes = n, "echoed chunk");
    }

    Ok(total)
}
