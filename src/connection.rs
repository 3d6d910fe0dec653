use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Per-client connection state, owned by the connection's handler task.
#[derive(Debug)]
pub struct ClientState {
    pub id: u64,
    pub db_index: usize,
    /// Password most recently sent via AUTH, compared against `requirepass`
    /// on every command.
    pub password: Option<String>,
    pub should_close: bool,
}

impl ClientState {
    pub fn new() -> Self {
        ClientState {
            id: NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed),
            db_index: 0,
            password: None,
            should_close: false,
        }
    }

    /// In-process connection used for AOF replay. It carries a selected DB
    /// (so replayed SELECT commands switch context) but never reaches a
    /// socket and skips authentication.
    pub fn replay(db_index: usize) -> Self {
        ClientState {
            id: 0,
            db_index,
            password: None,
            should_close: false,
        }
    }
}

impl Default for ClientState {
    fn default() -> Self {
        Self::new()
    }
}
