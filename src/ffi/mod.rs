//! C entry points
//!
//! The host calls `OpenTunnel` with three pipe descriptors it owns and gets
//! back `0` (session running) or `-1` (nothing started, nothing leaked).
//! No error detail and no panic crosses this boundary.
//!
//! Sessions run on a process-wide runtime with whatever engine was installed
//! through [`install_engine`]. `OpenTunnelSession` / `CloseTunnelSession`
//! additionally give the host a handle to stop a session.

mod registry;

use crate::bootstrap::{self, HostDescriptors};
use crate::config::Config;
use crate::{Error, Result};
use crate::engine::{runtime, EngineContext, Tunnel, TunnelEngine};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{error, warn};

/// Status returned to the host on success
pub const STATUS_OK: i32 = 0;

/// Status returned to the host on any failure
pub const STATUS_ERROR: i32 = -1;

static ENGINE: RwLock<Option<Arc<dyn TunnelEngine>>> = RwLock::new(None);

/// Set the engine used by the C entry points, returning the previous one
pub fn install_engine(engine: Arc<dyn TunnelEngine>) -> Option<Arc<dyn TunnelEngine>> {
    ENGINE
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .replace(engine)
}

/// Remove the installed engine
pub fn uninstall_engine() -> Option<Arc<dyn TunnelEngine>> {
    ENGINE
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
}

fn installed_engine() -> Option<Arc<dyn TunnelEngine>> {
    ENGINE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Bootstrap a session with the installed engine, config from the
/// environment and the shared runtime
fn start(read: i32, write: i32, log: i32) -> Result<Tunnel> {
    let engine = installed_engine().ok_or(Error::NoEngine)?;
    let config = Config::from_env()?;
    let runtime = runtime::shared(&config.runtime)?;

    let ctx = EngineContext::new(runtime.handle().clone());
    let host = HostDescriptors::new(read, write, log);
    Ok(bootstrap::open_tunnel(engine.as_ref(), &ctx, host, &config.logging)?)
}

/// [`start`] for a C entry point: failures are logged and become `None`
fn start_for(entry: &'static str, read: i32, write: i32, log: i32) -> Option<Tunnel> {
    match start(read, write, log) {
        Ok(tunnel) => Some(tunnel),
        Err(e) => {
            warn!(entry, error = %e, "tunnel not started");
            None
        }
    }
}

/// Run `f`, turning a panic into `None`
fn guarded<T>(entry: &'static str, f: impl FnOnce() -> Option<T>) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            error!(entry, "panic caught at C boundary");
            None
        }
    }
}

/// Start a tunnel over the host's pipes.
///
/// `read_fd` is read from, `write_fd` and `log_fd` are written to. The
/// descriptors are duplicated; the host keeps ownership of the originals.
/// Returns `0` on success and `-1` on failure.
#[no_mangle]
#[allow(non_snake_case)]
pub extern "C" fn OpenTunnel(read_fd: i32, write_fd: i32, log_fd: i32) -> i32 {
    match guarded("OpenTunnel", || start_for("OpenTunnel", read_fd, write_fd, log_fd)) {
        // The session keeps running without a handle
        Some(_tunnel) => STATUS_OK,
        None => STATUS_ERROR,
    }
}

/// Like `OpenTunnel`, but returns a positive session id that can be passed
/// to `CloseTunnelSession`, or `-1` on failure.
#[no_mangle]
#[allow(non_snake_case)]
pub extern "C" fn OpenTunnelSession(read_fd: i32, write_fd: i32, log_fd: i32) -> i64 {
    let id = guarded("OpenTunnelSession", || {
        let tunnel = start_for("OpenTunnelSession", read_fd, write_fd, log_fd)?;
        i64::try_from(registry::insert(tunnel)).ok()
    });
    id.unwrap_or(i64::from(STATUS_ERROR))
}

/// Ask a session started by `OpenTunnelSession` to stop.
///
/// Returns `0` if the session was known, `-1` otherwise.
#[no_mangle]
#[allow(non_snake_case)]
pub extern "C" fn CloseTunnelSession(session_id: i64) -> i32 {
    let closed = guarded("CloseTunnelSession", || {
        let id = u64::try_from(session_id).ok()?;
        let tunnel = registry::remove(id)?;
        tunnel.shutdown();
        Some(())
    });
    match closed {
        Some(()) => STATUS_OK,
        None => STATUS_ERROR,
    }
}
