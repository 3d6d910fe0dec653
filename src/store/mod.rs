pub mod dict;
pub mod entity;
pub mod lock;
pub mod single;
pub mod undo;

use crate::command::{self, arg_str, wrong_arg_count};
use crate::config::Config;
use crate::connection::ClientState;
use crate::persistence::aof::AofHandler;
use crate::resp::{CmdLine, Reply};
use crate::store::lock::LockSet;
use async_trait::async_trait;
use parking_lot::RwLock;
use self::single::Database;
use std::io;
use std::sync::{Arc, OnceLock};
use tracing::info;

/// The command sink a connection handler talks to: either the local
/// multi-database store or the cluster router wrapping one.
#[async_trait]
pub trait DbEngine: Send + Sync {
    async fn exec(&self, client: &mut ClientState, cmdline: &[Vec<u8>]) -> Reply;
    async fn close(&self);
}

/// Container of the N logical databases plus container-level commands
/// (AUTH, SELECT, REWRITEAOF) and the authentication gate.
pub struct DataStore {
    /// Each slot is an atomically swappable reference so a database could be
    /// replaced wholesale without touching its siblings.
    dbs: Vec<RwLock<Arc<Database>>>,
    config: Arc<Config>,
    aof: OnceLock<Arc<AofHandler>>,
}

impl DataStore {
    /// A bare store with no persistence attached: the form used for the
    /// rewrite shadow database and as the base of a standalone server.
    pub fn new_basic(config: &Arc<Config>) -> Arc<DataStore> {
        let dbs = (0..config.databases)
            .map(|index| RwLock::new(Arc::new(Database::new(index))))
            .collect();
        Arc::new(DataStore {
            dbs,
            config: config.clone(),
            aof: OnceLock::new(),
        })
    }

    /// A standalone server store: replays the append-only log when enabled,
    /// then wires every database's mutation path into the writer queue.
    pub async fn new_standalone(config: Arc<Config>) -> io::Result<Arc<DataStore>> {
        let store = Self::new_basic(&config);
        if config.appendonly {
            let maker_config = config.clone();
            let handler = AofHandler::new(
                store.clone(),
                Box::new(move || DataStore::new_basic(&maker_config)),
            )
            .await?;
            for cell in &store.dbs {
                cell.read().set_aof_sender(handler.sender());
            }
            let _ = store.aof.set(handler);
            info!("append-only file enabled: {}", config.appendfilename);
        }
        Ok(store)
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn database_count(&self) -> usize {
        self.dbs.len()
    }

    pub fn db_at(&self, index: usize) -> Option<Arc<Database>> {
        self.dbs.get(index).map(|cell| cell.read().clone())
    }

    /// Undo command lines for a command against the selected database,
    /// evaluated while the coordinator holds the keys locked.
    pub fn get_undo_logs(&self, db_index: usize, cmdline: &[Vec<u8>]) -> Vec<CmdLine> {
        if cmdline.is_empty() {
            return Vec::new();
        }
        let name = String::from_utf8_lossy(&cmdline[0]).to_lowercase();
        let undo = match command::lookup(&name).and_then(|cmd| cmd.undo) {
            Some(undo) => undo,
            None => return Vec::new(),
        };
        match self.db_at(db_index) {
            Some(db) => undo(&db, &cmdline[1..]),
            None => Vec::new(),
        }
    }

    /// Take the multi-key locks of the selected database on behalf of a
    /// prepared transaction.
    pub async fn lock_keys(
        &self,
        db_index: usize,
        write_keys: &[String],
        read_keys: &[String],
    ) -> Option<LockSet> {
        let db = self.db_at(db_index)?;
        Some(db.lock_keys(write_keys, read_keys).await)
    }

    /// Execute with the caller holding the relevant stripes already.
    pub fn exec_with_lock(&self, client: &mut ClientState, cmdline: &[Vec<u8>]) -> Reply {
        match self.db_at(client.db_index) {
            Some(db) => db.exec_with_lock(cmdline),
            None => Reply::error("ERR DB index is out of range"),
        }
    }

    async fn rewrite_aof(&self) -> Reply {
        match self.aof.get() {
            Some(handler) => match handler.rewrite().await {
                Ok(()) => Reply::ok(),
                Err(err) => Reply::error(format!("ERR rewrite failed: {err}")),
            },
            None => Reply::error("ERR appendonly is disabled"),
        }
    }
}

#[async_trait]
impl DbEngine for DataStore {
    async fn exec(&self, client: &mut ClientState, cmdline: &[Vec<u8>]) -> Reply {
        if cmdline.is_empty() {
            return Reply::error("ERR empty command");
        }
        let name = String::from_utf8_lossy(&cmdline[0]).to_lowercase();

        // AUTH gates everything else when a password is configured.
        if name == "auth" {
            return exec_auth(client, &cmdline[1..], &self.config);
        }
        if !is_authenticated(client, &self.config) {
            return Reply::error("NOAUTH Authentication required");
        }

        match name.as_str() {
            "quit" => {
                client.should_close = true;
                Reply::ok()
            }
            "select" => exec_select(client, &cmdline[1..], self.config.databases),
            "rewriteaof" => self.rewrite_aof().await,
            _ => match self.db_at(client.db_index) {
                Some(db) => db.exec(cmdline).await,
                None => Reply::error("ERR DB index is out of range"),
            },
        }
    }

    async fn close(&self) {
        if let Some(handler) = self.aof.get() {
            let handler = handler.clone();
            // The writer join blocks; keep it off the runtime threads.
            let _ = tokio::task::spawn_blocking(move || handler.close()).await;
        }
    }
}

pub fn is_authenticated(client: &ClientState, config: &Config) -> bool {
    match &config.requirepass {
        None => true,
        Some(required) => client.password.as_deref() == Some(required.as_str()),
    }
}

pub fn exec_auth(client: &mut ClientState, args: &[Vec<u8>], config: &Config) -> Reply {
    if args.len() != 1 {
        return wrong_arg_count("auth");
    }
    let required = match &config.requirepass {
        Some(required) => required,
        None => return Reply::error("ERR client sent AUTH, but no password is set"),
    };
    let password = arg_str(&args[0]);
    client.password = Some(password.clone());
    if &password != required {
        return Reply::error("ERR invalid password");
    }
    Reply::ok()
}

pub fn exec_select(client: &mut ClientState, args: &[Vec<u8>], databases: usize) -> Reply {
    if args.len() != 1 {
        return wrong_arg_count("select");
    }
    let index: usize = match arg_str(&args[0]).parse() {
        Ok(index) => index,
        Err(_) => return Reply::error("ERR value is not an integer or out of range"),
    };
    if index >= databases {
        return Reply::error("ERR DB index is out of range");
    }
    client.db_index = index;
    Reply::ok()
}
