use crate::cluster::Cluster;
use crate::command;
use crate::connection::ClientState;
use crate::resp::{CmdLine, Reply};
use crate::store::lock::LockSet;
use crate::store::DataStore;
use crate::timewheel::TimeWheel;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

/// How long a prepared transaction may hold its keys before the deadline
/// task forces a rollback.
pub const MAX_LOCK_TIME: Duration = Duration::from_secs(3);
/// Finished transactions linger before the purge, in case a straggling
/// rollback arrives.
const WAIT_BEFORE_CLEAN_TX: Duration = Duration::from_secs(6);

pub type TransactionTable = Arc<Mutex<HashMap<String, Arc<Transaction>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Created,
    Prepared,
    Committed,
    RolledBack,
}

struct TxState {
    status: TxStatus,
    write_keys: Vec<String>,
    read_keys: Vec<String>,
    undo_log: Vec<CmdLine>,
    /// Held stripe guards from prepare until commit or rollback.
    locks: Option<LockSet>,
}

/// One participant-side try/commit/compensate transaction.
pub struct Transaction {
    pub id: String,
    cmd_line: CmdLine,
    db_index: usize,
    db: Arc<DataStore>,
    state: AsyncMutex<TxState>,
}

impl Transaction {
    pub fn new(db: Arc<DataStore>, id: String, cmd_line: CmdLine, db_index: usize) -> Arc<Self> {
        Arc::new(Transaction {
            id,
            cmd_line,
            db_index,
            db,
            state: AsyncMutex::new(TxState {
                status: TxStatus::Created,
                write_keys: Vec::new(),
                read_keys: Vec::new(),
                undo_log: Vec::new(),
                locks: None,
            }),
        })
    }

    pub async fn status(&self) -> TxStatus {
        self.state.lock().await.status
    }

    /// Try phase: extract keys, lock them, capture the undo log, and arm the
    /// rollback deadline on the timing wheel.
    pub async fn prepare(self: &Arc<Self>, wheel: &Arc<TimeWheel>) {
        let mut state = self.state.lock().await;

        let (write_keys, read_keys) = command::related_keys(&self.cmd_line);
        state.write_keys = write_keys;
        state.read_keys = read_keys;
        self.lock_keys(&mut state).await;

        state.undo_log = self.db.get_undo_logs(self.db_index, &self.cmd_line);
        state.status = TxStatus::Prepared;

        let tx = self.clone();
        wheel.add_job(MAX_LOCK_TIME, Some(task_key(&self.id)), move || {
            tokio::spawn(async move {
                let mut state = tx.state.lock().await;
                if state.status == TxStatus::Prepared {
                    warn!("transaction {} exceeded its lock deadline, rolling back", tx.id);
                    tx.rollback_with_lock(&mut state).await;
                }
            });
        });
    }

    async fn lock_keys(&self, state: &mut TxState) {
        if state.locks.is_none() {
            state.locks = self
                .db
                .lock_keys(self.db_index, &state.write_keys, &state.read_keys)
                .await;
        }
    }

    fn unlock_keys(state: &mut TxState) {
        state.locks = None;
    }

    /// Apply the undo log and release the keys. Idempotent: a transaction
    /// already rolled back stays rolled back.
    async fn rollback_with_lock(&self, state: &mut TxState) {
        if state.status == TxStatus::RolledBack {
            return;
        }
        self.lock_keys(state).await;
        let mut replay = ClientState::replay(self.db_index);
        for line in state.undo_log.clone() {
            let reply = self.db.exec_with_lock(&mut replay, &line);
            if reply.is_error() {
                warn!("undo command failed for tx {}: {reply:?}", self.id);
            }
        }
        Self::unlock_keys(state);
        state.status = TxStatus::RolledBack;
    }
}

pub fn task_key(tx_id: &str) -> String {
    format!("tx:{tx_id}")
}

/* ---- participant-side verbs ---- */

/// `Prepare <txid> <cmd> <args...>`
pub async fn exec_prepare(cluster: &Cluster, client: &mut ClientState, cmdline: &[Vec<u8>]) -> Reply {
    if cmdline.len() < 3 {
        return Reply::error("ERR wrong number of arguments for 'prepare' command");
    }
    let tx_id = command::arg_str(&cmdline[1]);
    let tx = Transaction::new(
        cluster.db().clone(),
        tx_id.clone(),
        cmdline[2..].to_vec(),
        client.db_index,
    );
    cluster.transactions().lock().insert(tx_id, tx.clone());
    tx.prepare(cluster.wheel()).await;
    Reply::ok()
}

/// `Commit <txid>`: run the prepared command under the already-held locks.
pub async fn exec_commit(cluster: &Cluster, _client: &mut ClientState, cmdline: &[Vec<u8>]) -> Reply {
    if cmdline.len() != 2 {
        return Reply::error("ERR wrong number of arguments for 'commit' command");
    }
    let tx_id = command::arg_str(&cmdline[1]);
    let tx = match cluster.transactions().lock().get(&tx_id).cloned() {
        Some(tx) => tx,
        None => return Reply::integer(0),
    };

    let mut state = tx.state.lock().await;
    if state.status != TxStatus::Prepared {
        return Reply::integer(0);
    }

    let mut replay = ClientState::replay(tx.db_index);
    let result = cluster.db().exec_with_lock(&mut replay, &tx.cmd_line);
    if result.is_error() {
        tx.rollback_with_lock(&mut state).await;
        return result;
    }

    Transaction::unlock_keys(&mut state);
    state.status = TxStatus::Committed;
    // The commit supersedes the prepare deadline.
    cluster.wheel().remove_job(&task_key(&tx.id));
    schedule_purge(cluster, &tx.id);
    result
}

/// `Rollback <txid>`: apply the undo log. Unknown ids answer 0 silently.
pub async fn exec_rollback(
    cluster: &Cluster,
    _client: &mut ClientState,
    cmdline: &[Vec<u8>],
) -> Reply {
    if cmdline.len() != 2 {
        return Reply::error("ERR wrong number of arguments for 'rollback' command");
    }
    let tx_id = command::arg_str(&cmdline[1]);
    let tx = match cluster.transactions().lock().get(&tx_id).cloned() {
        Some(tx) => tx,
        None => return Reply::integer(0),
    };

    let mut state = tx.state.lock().await;
    tx.rollback_with_lock(&mut state).await;
    cluster.wheel().remove_job(&task_key(&tx.id));
    schedule_purge(cluster, &tx.id);
    Reply::integer(1)
}

fn schedule_purge(cluster: &Cluster, tx_id: &str) {
    let table = cluster.transactions().clone();
    let tx_id = tx_id.to_string();
    cluster.wheel().add_job(WAIT_BEFORE_CLEAN_TX, None, move || {
        table.lock().remove(&tx_id);
    });
}

/* ---- coordinator-side helpers ---- */

/// Ask every participating node to commit; the first error triggers a
/// cluster-wide rollback and surfaces to the caller.
pub async fn request_commit(
    cluster: &Cluster,
    client: &mut ClientState,
    tx_id: i64,
    group_map: &HashMap<String, Vec<String>>,
) -> Result<Vec<Reply>, Reply> {
    let id = tx_id.to_string();
    let mut replies = Vec::with_capacity(group_map.len());
    let mut failure = None;

    for node in group_map.keys() {
        let line = vec![b"commit".to_vec(), id.clone().into_bytes()];
        let reply = if node.as_str() == cluster.self_addr() {
            exec_commit(cluster, client, &line).await
        } else {
            cluster.relay(node, client, &line).await
        };
        if reply.is_error() {
            failure = Some(reply);
            break;
        }
        replies.push(reply);
    }

    match failure {
        Some(err) => {
            request_rollback(cluster, client, tx_id, group_map).await;
            Err(err)
        }
        None => Ok(replies),
    }
}

/// Ask every participating node to roll back. Base-10 transaction ids,
/// matching the prepare and commit paths.
pub async fn request_rollback(
    cluster: &Cluster,
    client: &mut ClientState,
    tx_id: i64,
    group_map: &HashMap<String, Vec<String>>,
) {
    let id = tx_id.to_string();
    for node in group_map.keys() {
        let line = vec![b"rollback".to_vec(), id.clone().into_bytes()];
        let reply = if node.as_str() == cluster.self_addr() {
            exec_rollback(cluster, client, &line).await
        } else {
            cluster.relay(node, client, &line).await
        };
        if reply.is_error() {
            warn!("rollback on {node} failed: {reply:?}");
        }
    }
}
