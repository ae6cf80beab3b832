//! Process-wide runtime for sessions started through the C entry points

use crate::config::RuntimeConfig;
use crate::fd::sigpipe;
use std::io;
use std::sync::OnceLock;
use tokio::runtime::{Builder, Runtime};

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Get the shared runtime, building it from `config` on first use.
///
/// Later calls return the same runtime whatever config they pass. Must not
/// be called from inside an async context.
pub fn shared(config: &RuntimeConfig) -> io::Result<&'static Runtime> {
    if let Some(runtime) = RUNTIME.get() {
        return Ok(runtime);
    }

    let runtime = Builder::new_multi_thread()
        .worker_threads(config.worker_threads.max(1))
        .max_blocking_threads(config.max_blocking_threads.max(1))
        .thread_name(config.thread_name.clone())
        .on_thread_start(|| {
            // Runtime threads live in the host process; a closed pipe must
            // surface as EPIPE, not kill it
            if let Err(e) = sigpipe::block_current_thread() {
                tracing::warn!(error = %e, "failed to block SIGPIPE on runtime thread");
            }
        })
        .enable_all()
        .build()?;

    // A concurrent caller may have won; ours is dropped in that case
    Ok(RUNTIME.get_or_init(move || runtime))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_is_built_once() {
        let first = shared(&RuntimeConfig::default()).unwrap();
        let other = RuntimeConfig {
            worker_threads: 7,
            ..RuntimeConfig::default()
        };
        let second = shared(&other).unwrap();
        assert!(std::ptr::eq(first, second));

        let value = first.block_on(async { 21 * 2 });
        assert_eq!(value, 42);
    }
}
