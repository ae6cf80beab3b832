//! Tunnel engine contract
//!
//! An engine is handed a [`PipeConn`] and a [`LogSink`] and turns them into a
//! running session. Sessions run on a tokio runtime independent of the
//! caller's stack frame; the [`Tunnel`] handle can be kept to stop or await
//! them, or dropped to let them run for the rest of the process.

mod echo;
pub mod runtime;

pub use echo::EchoEngine;

use crate::fd::sigpipe;
use crate::logging::LogSink;
use crate::stream::PipeConn;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Engine rejected session: {0}")]
    Rejected(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Session task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Session thread for {0} exited without finishing")]
    ThreadExited(&'static str),
}

/// Constructor contract for tunnel engines.
///
/// `start` takes ownership of the stream and the logger. On error the engine
/// must not keep either; returning without storing them closes their
/// descriptors.
pub trait TunnelEngine: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Begin a session over `conn`, logging through `logger`
    fn start(
        &self,
        ctx: &EngineContext,
        logger: LogSink,
        conn: PipeConn,
    ) -> Result<Tunnel, EngineError>;
}

static NEXT_TUNNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Where engine sessions run
#[derive(Debug, Clone)]
pub struct EngineContext {
    runtime: Handle,
}

impl EngineContext {
    /// Run sessions on the given runtime
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Context for the runtime the caller is already inside, if any
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }

    /// Runtime handle
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Start an async session task
    pub fn spawn<F, Fut>(&self, engine: &'static str, session: F) -> Tunnel
    where
        F: FnOnce(ShutdownSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = watch::channel(false);
        let fut = session(ShutdownSignal { rx });
        let task = self.runtime.spawn(async move {
            fut.await;
            Ok(())
        });
        Tunnel::new(engine, tx, task)
    }

    /// Start a session that does blocking pipe I/O on a thread of its own.
    ///
    /// Each session gets a dedicated thread, so long-lived sessions never
    /// queue behind each other. SIGPIPE is blocked on that thread and the
    /// runtime is entered, so the session may still spawn tasks.
    pub fn spawn_thread<F>(&self, engine: &'static str, session: F) -> Result<Tunnel, EngineError>
    where
        F: FnOnce(ShutdownSignal) + Send + 'static,
    {
        let (tx, rx) = watch::channel(false);
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let runtime = self.runtime.clone();

        std::thread::Builder::new()
            .name(format!("{engine}-tunnel"))
            .spawn(move || {
                let _enter = runtime.enter();
                if let Err(e) = sigpipe::block_current_thread() {
                    tracing::warn!(error = %e, "failed to block SIGPIPE on session thread");
                }
                session(ShutdownSignal { rx });
                let _ = done_tx.send(());
            })?;

        // Completion is observed through the runtime so `join` stays async
        let task = self.runtime.spawn(async move {
            done_rx.await.map_err(|_| EngineError::ThreadExited(engine))
        });
        Ok(Tunnel::new(engine, tx, task))
    }
}

/// Handle to a running tunnel session.
///
/// Dropping the handle detaches the session; it keeps running.
#[derive(Debug)]
pub struct Tunnel {
    id: u64,
    engine: &'static str,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<(), EngineError>>,
}

impl Tunnel {
    fn new(
        engine: &'static str,
        shutdown: watch::Sender<bool>,
        task: JoinHandle<Result<(), EngineError>>,
    ) -> Self {
        Self {
            id: NEXT_TUNNEL_ID.fetch_add(1, Ordering::Relaxed),
            engine,
            shutdown,
            task,
        }
    }

    /// Process-unique session id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Name of the engine running this session
    pub fn engine(&self) -> &'static str {
        self.engine
    }

    /// Whether the session task has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Ask the session to stop
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Wait for the session task to exit
    pub async fn join(self) -> Result<(), EngineError> {
        self.task.await?
    }
}

/// Session side of a [`Tunnel`]'s shutdown request
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Whether shutdown has been requested
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown is requested. Never resolves for a detached
    /// session.
    pub async fn triggered(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Handle dropped without a request: run until the process ends
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_spawn_and_shutdown() {
        let ctx = EngineContext::current().unwrap();
        let tunnel = ctx.spawn("test", |mut shutdown| async move {
            shutdown.triggered().await;
        });
        assert_eq!(tunnel.engine(), "test");
        assert!(!tunnel.is_finished());

        tunnel.shutdown();
        tokio::time::timeout(Duration::from_secs(5), tunnel.join())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_thread_session_sees_shutdown() {
        let ctx = EngineContext::current().unwrap();
        let tunnel = ctx
            .spawn_thread("test", |shutdown| {
                while !shutdown.is_triggered() {
                    std::thread::sleep(Duration::from_millis(5));
                }
            })
            .unwrap();

        tunnel.shutdown();
        tokio::time::timeout(Duration::from_secs(5), tunnel.join())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_detached_session_keeps_running() {
        let ctx = EngineContext::current().unwrap();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let tunnel = ctx.spawn("test", |mut shutdown| async move {
            let stopped = tokio::time::timeout(Duration::from_millis(50), shutdown.triggered())
                .await
                .is_ok();
            let _ = done_tx.send(stopped);
        });
        drop(tunnel);

        // Dropping the handle is not a shutdown request
        assert!(!done_rx.await.unwrap());
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let ctx = EngineContext::current().unwrap();
        let a = ctx.spawn("a", |_| async {});
        let b = ctx.spawn("b", |_| async {});
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn test_thread_sessions_run_concurrently() {
        let ctx = EngineContext::current().unwrap();
        let (started_tx, mut started_rx) = tokio::sync::mpsc::unbounded_channel();

        // Each session parks until shutdown; all of them must still start
        let tunnels: Vec<_> = (0..4)
            .map(|i| {
                let started_tx = started_tx.clone();
                ctx.spawn_thread("test", move |shutdown| {
                    let _ = started_tx.send(i);
                    while !shutdown.is_triggered() {
                        std::thread::sleep(Duration::from_millis(5));
                    }
                })
                .unwrap()
            })
            .collect();

        for _ in 0..4 {
            tokio::time::timeout(Duration::from_secs(5), started_rx.recv())
                .await
                .unwrap()
                .unwrap();
        }
        for tunnel in tunnels {
            tunnel.shutdown();
            tunnel.join().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_panicked_thread_session_reports_exit() {
        let ctx = EngineContext::current().unwrap();
        let tunnel = ctx
            .spawn_thread("test", |_| panic!("session bug"))
            .unwrap();

        let err = tokio::time::timeout(Duration::from_secs(5), tunnel.join())
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, EngineError::ThreadExited("test")));
    }

    #[test]
    fn test_current_outside_runtime() {
        assert!(EngineContext::current().is_none());
    }
}
