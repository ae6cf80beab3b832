//! Sessions the host asked to keep a handle to

use crate::engine::Tunnel;
use std::collections::HashMap;
use std::sync::{LazyLock, Mutex, PoisonError};

static SESSIONS: LazyLock<Mutex<HashMap<u64, Tunnel>>> = LazyLock::new(|| Mutex::new(HashMap::new()));

/// Keep `tunnel`, returning its id
pub(super) fn insert(tunnel: Tunnel) -> u64 {
    let id = tunnel.id();
    let mut sessions = SESSIONS.lock().unwrap_or_else(PoisonError::into_inner);
    // Finished sessions are forgotten on the next insert
    sessions.retain(|_, t| !t.is_finished());
    sessions.insert(id, tunnel);
    id
}

/// Forget a session, handing back its handle
pub(super) fn remove(id: u64) -> Option<Tunnel> {
    SESSIONS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&id)
}
