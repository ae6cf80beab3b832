//! Shared helpers for the integration tests
//!
//! `HostPipes` plays the host process: it creates the three pipes, passes
//! one end of each to the tunnel and keeps the other end to talk to it.

#![allow(dead_code)]

use pipe_tunnel::fd::pipe;
use pipe_tunnel::HostDescriptors;
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// The host's side of one bootstrap
pub struct HostPipes {
    /// Ends handed to the tunnel (the host's originals)
    pub tunnel_read: Option<OwnedFd>,
    pub tunnel_write: Option<OwnedFd>,
    pub tunnel_log: Option<OwnedFd>,
    /// Ends the host keeps
    pub host_tx: Option<File>,
    pub host_rx: File,
    pub host_log: File,
}

impl HostPipes {
    pub fn new() -> Self {
        let (tunnel_read, host_tx) = pipe().unwrap();
        let (host_rx, tunnel_write) = pipe().unwrap();
        let (host_log, tunnel_log) = pipe().unwrap();
        Self {
            tunnel_read: Some(tunnel_read),
            tunnel_write: Some(tunnel_write),
            tunnel_log: Some(tunnel_log),
            host_tx: Some(File::from(host_tx)),
            host_rx: File::from(host_rx),
            host_log: File::from(host_log),
        }
    }

    pub fn descriptors(&self) -> HostDescriptors {
        let raw = |fd: &Option<OwnedFd>| fd.as_ref().map(AsRawFd::as_raw_fd).unwrap();
        HostDescriptors::new(
            raw(&self.tunnel_read),
            raw(&self.tunnel_write),
            raw(&self.tunnel_log),
        )
    }

    /// Close the host's originals, as a host does once bootstrap returns
    pub fn close_originals(&mut self) {
        self.tunnel_read.take();
        self.tunnel_write.take();
        self.tunnel_log.take();
    }

    pub fn send(&mut self, data: &[u8]) {
        self.host_tx.as_mut().unwrap().write_all(data).unwrap();
    }

    /// Close the host's inbound writer so the session reads EOF
    pub fn finish_sending(&mut self) {
        self.host_tx.take();
    }

    pub fn recv_exact(&mut self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.host_rx.read_exact(&mut buf).unwrap();
        buf
    }

    pub fn recv_to_end(&mut self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.host_rx.read_to_end(&mut buf).unwrap();
        buf
    }

    pub fn log_to_end(&mut self) -> String {
        let mut log = String::new();
        self.host_log.read_to_string(&mut log).unwrap();
        log
    }
}

/// Number of descriptors open in this process
pub fn open_fd_count() -> usize {
    std::fs::read_dir("/dev/fd").unwrap().count()
}

static SERIAL: Mutex<()> = Mutex::new(());

/// Serialize tests that count descriptors or touch process-wide state
pub fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(PoisonError::into_inner)
}
