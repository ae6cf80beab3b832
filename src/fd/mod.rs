//! Descriptor duplication
//!
//! Host descriptors are only borrowed for the duration of a boundary call.
//! Everything this crate keeps is a duplicate it owns outright, so the host
//! can close its originals at any time without affecting a running session.

pub mod sigpipe;

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use thiserror::Error;

/// Descriptor duplication errors
#[derive(Debug, Error)]
pub enum DuplicationError {
    #[error("invalid descriptor: {fd}")]
    Invalid { fd: RawFd },

    #[error("dup descriptor {fd}: {source}")]
    Os {
        fd: RawFd,
        #[source]
        source: io::Error,
    },
}

impl DuplicationError {
    /// The host descriptor that could not be duplicated
    pub fn fd(&self) -> RawFd {
        match self {
            Self::Invalid { fd } | Self::Os { fd, .. } => *fd,
        }
    }
}

/// Open mode of a descriptor's underlying file description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    pub fn is_readable(self) -> bool {
        matches!(self, Self::ReadOnly | Self::ReadWrite)
    }

    pub fn is_writable(self) -> bool {
        matches!(self, Self::WriteOnly | Self::ReadWrite)
    }
}

/// Duplicate a host descriptor into a new descriptor owned by the caller.
///
/// The duplicate refers to the same pipe endpoint but has its own descriptor
/// table entry, marked close-on-exec. The original is left untouched. On
/// failure no descriptor is allocated.
pub fn duplicate(fd: RawFd) -> Result<OwnedFd, DuplicationError> {
    if fd < 0 {
        return Err(DuplicationError::Invalid { fd });
    }

    let dup = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 0) };
    if dup == -1 {
        return Err(DuplicationError::Os {
            fd,
            source: io::Error::last_os_error(),
        });
    }

    // SAFETY: fcntl just returned a fresh descriptor that nothing else owns.
    Ok(unsafe { OwnedFd::from_raw_fd(dup) })
}

/// Read the access mode of an open descriptor
pub fn access_mode(fd: BorrowedFd<'_>) -> io::Result<AccessMode> {
    let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFL) };
    if flags == -1 {
        return Err(io::Error::last_os_error());
    }

    match flags & libc::O_ACCMODE {
        libc::O_RDONLY => Ok(AccessMode::ReadOnly),
        libc::O_WRONLY => Ok(AccessMode::WriteOnly),
        _ => Ok(AccessMode::ReadWrite),
    }
}

/// Create an anonymous pipe, returning `(read, write)` ends
pub fn pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as RawFd; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } == -1 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: pipe(2) returned two fresh descriptors.
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

/// Block until `fd` is readable, or writable if `writable` is set.
///
/// Lets blocking-style I/O run over a descriptor the host opened with
/// `O_NONBLOCK` without changing the shared file description's flags.
pub fn wait_ready(fd: BorrowedFd<'_>, writable: bool) -> io::Result<()> {
    let mut pfd = libc::pollfd {
        fd: fd.as_raw_fd(),
        events: if writable { libc::POLLOUT } else { libc::POLLIN },
        revents: 0,
    };

    loop {
        // SAFETY: one valid pollfd, infinite timeout.
        let rc = unsafe { libc::poll(&mut pfd, 1, -1) };
        if rc >= 0 {
            // Hangup and error states are reported by the retried read/write
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Check whether a descriptor number is currently open in this process
pub fn is_open(fd: RawFd) -> bool {
    fd >= 0 && unsafe { libc::fcntl(fd, libc::F_GETFD) } != -1
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::{Read, Write};
    use std::os::fd::AsFd;

    #[test]
    fn test_duplicate_is_independent() {
        let (read, write) = pipe().unwrap();
        let dup = duplicate(write.as_raw_fd()).unwrap();
        assert_ne!(dup.as_raw_fd(), write.as_raw_fd());

        // Closing the original leaves the duplicate usable
        drop(write);
        let mut writer = File::from(dup);
        writer.write_all(b"ping").unwrap();
        drop(writer);

        let mut reader = File::from(read);
        let mut buf = String::new();
        reader.read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "ping");
    }

    #[test]
    fn test_duplicate_leaves_original_open() {
        let (read, _write) = pipe().unwrap();
        let raw = read.as_raw_fd();
        let dup = duplicate(raw).unwrap();
        drop(dup);

        assert!(is_open(raw));
        assert_eq!(access_mode(read.as_fd()).unwrap(), AccessMode::ReadOnly);
    }

    #[test]
    fn test_duplicate_closed_descriptor() {
        // Past any descriptor table limit, so never open
        let raw = i32::MAX;
        let err = duplicate(raw).unwrap_err();
        assert!(matches!(err, DuplicationError::Os { .. }));
        assert_eq!(err.fd(), raw);
    }

    #[test]
    fn test_duplicate_negative_descriptor() {
        let err = duplicate(-1).unwrap_err();
        assert!(matches!(err, DuplicationError::Invalid { fd: -1 }));
    }

    #[test]
    fn test_access_mode_of_pipe_ends() {
        let (read, write) = pipe().unwrap();
        let read_mode = access_mode(read.as_fd()).unwrap();
        let write_mode = access_mode(write.as_fd()).unwrap();

        assert!(read_mode.is_readable());
        assert!(!read_mode.is_writable());
        assert!(write_mode.is_writable());
        assert!(!write_mode.is_readable());
    }

    #[test]
    fn test_is_open() {
        assert!(!is_open(-1));
        let (read, _write) = pipe().unwrap();
        assert!(is_open(read.as_raw_fd()));
    }
}
