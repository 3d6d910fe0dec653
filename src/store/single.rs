use crate::command::{self, Command};
use crate::persistence::aof::AofPayload;
use crate::resp::{CmdLine, Reply};
use crate::store::dict::ConcurrentDict;
use crate::store::entity::{now_millis, DataEntity};
use crate::store::lock::{LockSet, Locks};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::OnceLock;
use tracing::error;

const DATA_DICT_SIZE: usize = 1 << 16;
const TTL_DICT_SIZE: usize = 1 << 10;
const LOCKER_SIZE: usize = 1024;

/// One logical database: the sharded keyspace, its TTL and version maps and
/// the striped lock table that serializes multi-key operations.
pub struct Database {
    pub index: usize,
    data: ConcurrentDict<DataEntity>,
    ttls: ConcurrentDict<u64>,
    versions: ConcurrentDict<u32>,
    locks: Locks,
    /// Set once after AOF replay; mutation executors feed the writer queue
    /// through this.
    aof_tx: OnceLock<crossbeam_channel::Sender<AofPayload>>,
}

impl Database {
    pub fn new(index: usize) -> Self {
        Database {
            index,
            data: ConcurrentDict::new(DATA_DICT_SIZE),
            ttls: ConcurrentDict::new(TTL_DICT_SIZE),
            versions: ConcurrentDict::new(TTL_DICT_SIZE),
            locks: Locks::new(LOCKER_SIZE),
            aof_tx: OnceLock::new(),
        }
    }

    /* ---- dispatch ---- */

    /// Full command dispatch: arity check, key extraction, version bump for
    /// write keys, ordered multi-key locking, then the executor.
    pub async fn exec(&self, cmdline: &[Vec<u8>]) -> Reply {
        let name = String::from_utf8_lossy(&cmdline[0]).to_lowercase();
        let cmd = match command::lookup(&name) {
            Some(cmd) => cmd,
            None => return Reply::error(format!("ERR unknown command '{name}'")),
        };
        if !command::validate_arity(cmd.arity, cmdline.len()) {
            return command::wrong_arg_count(&name);
        }

        let args = &cmdline[1..];
        let (write_keys, read_keys) = match cmd.prepare {
            Some(prepare) => prepare(args),
            None => (Vec::new(), Vec::new()),
        };
        self.add_version(&write_keys);
        let _guard = self.locks.rw_locks(&write_keys, &read_keys).await;
        run_executor(cmd, self, args)
    }

    /// Dispatch for callers that already hold the relevant stripes (the
    /// cluster coordinator's commit and rollback paths). Skips key
    /// extraction, versioning and locking.
    pub fn exec_with_lock(&self, cmdline: &[Vec<u8>]) -> Reply {
        let name = String::from_utf8_lossy(&cmdline[0]).to_lowercase();
        let cmd = match command::lookup(&name) {
            Some(cmd) => cmd,
            None => return Reply::error(format!("ERR unknown command '{name}'")),
        };
        if !command::validate_arity(cmd.arity, cmdline.len()) {
            return command::wrong_arg_count(&name);
        }
        run_executor(cmd, self, &cmdline[1..])
    }

    /// Acquire this database's stripes for the given key sets. Used by the
    /// transaction prepare phase, which holds the returned set until commit
    /// or rollback.
    pub async fn lock_keys(&self, write_keys: &[String], read_keys: &[String]) -> LockSet {
        self.locks.rw_locks(write_keys, read_keys).await
    }

    /* ---- keyspace accessors (lazy TTL at every entry point) ---- */

    /// Drop the key when its TTL has passed. Returns whether it expired.
    fn expire_if_needed(&self, key: &str) -> bool {
        match self.ttls.get(key) {
            Some(at) if at <= now_millis() => {
                self.data.remove(key);
                self.ttls.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn get_entity(&self, key: &str) -> Option<DataEntity> {
        if self.expire_if_needed(key) {
            return None;
        }
        self.data.get(key)
    }

    pub fn with_entity<R>(&self, key: &str, f: impl FnOnce(&DataEntity) -> R) -> Option<R> {
        if self.expire_if_needed(key) {
            return None;
        }
        self.data.with_value(key, f)
    }

    pub fn with_entity_mut<R>(&self, key: &str, f: impl FnOnce(&mut DataEntity) -> R) -> Option<R> {
        if self.expire_if_needed(key) {
            return None;
        }
        self.data.with_value_mut(key, f)
    }

    pub fn put_entity(&self, key: &str, entity: DataEntity) -> usize {
        self.data.put(key, entity)
    }

    pub fn put_if_absent(&self, key: &str, entity: DataEntity) -> usize {
        self.expire_if_needed(key);
        self.data.put_if_absent(key, entity)
    }

    pub fn put_if_exists(&self, key: &str, entity: DataEntity) -> usize {
        if self.expire_if_needed(key) {
            return 0;
        }
        self.data.put_if_exists(key, entity)
    }

    /// Remove a key together with its TTL entry.
    pub fn remove(&self, key: &str) -> usize {
        self.ttls.remove(key);
        self.data.remove(key)
    }

    pub fn expire(&self, key: &str, at_ms: u64) {
        self.ttls.put(key, at_ms);
    }

    pub fn persist(&self, key: &str) -> usize {
        self.ttls.remove(key)
    }

    pub fn expiration(&self, key: &str) -> Option<u64> {
        self.ttls.get(key)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /* ---- versions ---- */

    pub fn add_version(&self, keys: &[String]) {
        for key in keys {
            if self.versions.with_value_mut(key, |v| *v += 1).is_none() {
                self.versions.put(key, 1);
            }
        }
    }

    pub fn version(&self, key: &str) -> u32 {
        self.versions.get(key).unwrap_or(0)
    }

    /* ---- AOF hookup ---- */

    pub fn set_aof_sender(&self, tx: crossbeam_channel::Sender<AofPayload>) {
        let _ = self.aof_tx.set(tx);
    }

    /// Queue a mutation for the append-only log. A no-op until persistence
    /// is wired up (and always during replay, which runs before that).
    pub fn add_aof(&self, line: CmdLine) {
        if let Some(tx) = self.aof_tx.get() {
            if let Err(err) = tx.send(AofPayload {
                db_index: self.index,
                cmd_line: line,
            }) {
                error!("aof queue rejected payload: {err}");
            }
        }
    }

    /// Visit every live entry with its optional expiration. Entries whose
    /// TTL already passed are skipped (and left for lazy removal).
    pub fn for_each(&self, mut f: impl FnMut(&str, &DataEntity, Option<u64>) -> bool) {
        let now = now_millis();
        self.data.for_each(|key, entity| {
            let expire_at = self.ttls.get(key);
            if matches!(expire_at, Some(at) if at <= now) {
                return true;
            }
            f(key, entity, expire_at)
        });
    }
}

/// Panic boundary around executors: a crashing command must not take the
/// connection handler down with it.
fn run_executor(cmd: &'static Command, db: &Database, args: &[Vec<u8>]) -> Reply {
    match catch_unwind(AssertUnwindSafe(|| (cmd.executor)(db, args))) {
        Ok(reply) => reply,
        Err(_) => {
            error!(
                command = cmd.name,
                backtrace = %std::backtrace::Backtrace::force_capture(),
                "executor panicked"
            );
            Reply::error("ERR unknow")
        }
    }
}
