//! Duplex byte stream over a pair of pipe descriptors
//!
//! The tunnel engine sees one bidirectional stream; underneath it is a read
//! pipe and a write pipe, each owned through its own duplicated descriptor.

use crate::fd::{self, sigpipe, AccessMode};
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use thiserror::Error;

/// Stream construction errors
#[derive(Debug, Error)]
pub enum StreamWrapError {
    #[error("read descriptor {fd} is not readable ({mode:?})")]
    NotReadable { fd: RawFd, mode: AccessMode },

    #[error("write descriptor {fd} is not writable ({mode:?})")]
    NotWritable { fd: RawFd, mode: AccessMode },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Bidirectional byte stream handed to a tunnel engine
pub trait DuplexStream: Read + Write + Send {
    /// Release both directions. Only the first call closes anything.
    fn close(&mut self) -> io::Result<()>;

    /// Whether `close` has already run
    fn is_closed(&self) -> bool;
}

/// A duplex stream built from a read pipe and a write pipe
#[derive(Debug)]
pub struct PipeConn {
    reader: Option<File>,
    writer: Option<File>,
}

impl PipeConn {
    /// Wrap a read-side and a write-side descriptor.
    ///
    /// Both descriptors are owned by this call. If either points the wrong
    /// way both are closed before the error is returned. No I/O is done and
    /// the descriptors' blocking mode is left as the host set it; reads and
    /// writes wait for readiness either way.
    pub fn new(read: OwnedFd, write: OwnedFd) -> Result<Self, StreamWrapError> {
        let read_mode = fd::access_mode(read.as_fd())?;
        if !read_mode.is_readable() {
            return Err(StreamWrapError::NotReadable {
                fd: read.as_raw_fd(),
                mode: read_mode,
            });
        }

        let write_mode = fd::access_mode(write.as_fd())?;
        if !write_mode.is_writable() {
            return Err(StreamWrapError::NotWritable {
                fd: write.as_raw_fd(),
                mode: write_mode,
            });
        }

        Ok(Self {
            reader: Some(File::from(read)),
            writer: Some(File::from(write)),
        })
    }

    /// Descriptor number of the read side, while open
    pub fn read_fd(&self) -> Option<RawFd> {
        self.reader.as_ref().map(AsRawFd::as_raw_fd)
    }

    /// Descriptor number of the write side, while open
    pub fn write_fd(&self) -> Option<RawFd> {
        self.writer.as_ref().map(AsRawFd::as_raw_fd)
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "pipe stream closed")
}

impl Read for PipeConn {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let reader = self.reader.as_mut().ok_or_else(closed)?;
        loop {
            match reader.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    fd::wait_ready(reader.as_fd(), false)?
                }
                other => return other,
            }
        }
    }
}

impl Write for PipeConn {
    /// Writes to a pipe with no reader fail with `BrokenPipe`; SIGPIPE is
    /// never delivered.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut writer = self.writer.as_ref().ok_or_else(closed)?;
        loop {
            match sigpipe::suppress(|| writer.write(buf)) {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    fd::wait_ready(writer.as_fd(), true)?
                }
                other => return other,
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl DuplexStream for PipeConn {
    fn close(&mut self) -> io::Result<()> {
        // Dropping the files closes the descriptors; take() makes it once-only
        drop(self.reader.take());
        drop(self.writer.take());
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.reader.is_none() && self.writer.is_none()
    }
}
