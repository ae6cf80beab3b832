//! SIGPIPE suppression for pipe writes
//!
//! Writing to a pipe whose reader is gone raises SIGPIPE, and the default
//! action kills the host process. Pipes have no `MSG_NOSIGNAL`, so writes are
//! made with the signal blocked on the writing thread and any SIGPIPE they
//! raise is consumed before the mask is restored. The write then fails with
//! `EPIPE` like any other error.

use std::io;
use std::mem::MaybeUninit;

fn sigpipe_set() -> libc::sigset_t {
    let mut set = MaybeUninit::<libc::sigset_t>::uninit();
    // SAFETY: sigemptyset initialises the set before sigaddset reads it.
    unsafe {
        libc::sigemptyset(set.as_mut_ptr());
        libc::sigaddset(set.as_mut_ptr(), libc::SIGPIPE);
        set.assume_init()
    }
}

fn is_member(set: &libc::sigset_t) -> bool {
    // SAFETY: `set` is an initialised signal set.
    unsafe { libc::sigismember(set, libc::SIGPIPE) == 1 }
}

/// Block SIGPIPE on the calling thread for the rest of its life.
///
/// Used for threads this crate owns.
pub fn block_current_thread() -> io::Result<()> {
    let set = sigpipe_set();
    // SAFETY: valid set, no old mask requested.
    let rc = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut()) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}

/// Run a write with SIGPIPE blocked on the calling thread.
///
/// A SIGPIPE raised by `write` is discarded; the caller sees the `EPIPE`
/// error instead. The thread's signal mask is restored afterwards, and a
/// SIGPIPE that was already pending before the call is left alone.
pub fn suppress<T>(write: impl FnOnce() -> io::Result<T>) -> io::Result<T> {
    let set = sigpipe_set();
    let mut previous = MaybeUninit::<libc::sigset_t>::uninit();
    // SAFETY: valid set; the kernel fills `previous`.
    let rc = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &set, previous.as_mut_ptr()) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    // SAFETY: pthread_sigmask succeeded and wrote the old mask.
    let previous = unsafe { previous.assume_init() };

    // Already blocked by the host: nothing to restore or consume
    if is_member(&previous) {
        return write();
    }

    let was_pending = pending();
    let result = write();

    if let Err(e) = &result {
        if e.kind() == io::ErrorKind::BrokenPipe && !was_pending && pending() {
            let mut signal = 0;
            // SAFETY: SIGPIPE is blocked and pending, so sigwait returns at once.
            unsafe { libc::sigwait(&set, &mut signal) };
        }
    }

    // SAFETY: restores the mask saved above.
    unsafe { libc::pthread_sigmask(libc::SIG_SETMASK, &previous, std::ptr::null_mut()) };
    result
}

/// Whether a SIGPIPE is pending for the calling thread
fn pending() -> bool {
    let mut set = MaybeUninit::<libc::sigset_t>::uninit();
    // SAFETY: sigpending fills the set on success.
    unsafe {
        if libc::sigpending(set.as_mut_ptr()) != 0 {
            return false;
        }
        is_member(&set.assume_init())
    }
}
