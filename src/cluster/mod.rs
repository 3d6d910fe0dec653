pub mod multi_key;
pub mod peer_client;
pub mod pool;
pub mod ring;
pub mod tcc;

use crate::config::Config;
use crate::connection::ClientState;
use crate::idgen::IdGenerator;
use crate::resp::Reply;
use crate::store::{self, DataStore, DbEngine};
use crate::timewheel::TimeWheel;
use self::peer_client::PeerClient;
use self::pool::{Pool, PoolConfig};
use self::ring::Ring;
use self::tcc::TransactionTable;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Virtual points each node contributes to the hash ring.
const REPLICA_COUNT: usize = 4;
const POOL_MAX_IDLE: usize = 1;
const POOL_MAX_ACTIVE: usize = 16;
const WHEEL_TICK: Duration = Duration::from_secs(1);
const WHEEL_SLOTS: usize = 3600;

/// One node of the cluster: routes commands to their owning node by
/// consistent hashing, coordinates cross-node writes through the TCC verbs,
/// and answers those verbs as a participant.
pub struct Cluster {
    self_addr: String,
    db: Arc<DataStore>,
    ring: Ring,
    pools: HashMap<String, Pool<PeerClient>>,
    transactions: TransactionTable,
    id_gen: IdGenerator,
    wheel: Arc<TimeWheel>,
    config: Arc<Config>,
}

impl Cluster {
    pub async fn new(config: Arc<Config>) -> io::Result<Arc<Cluster>> {
        let db = DataStore::new_standalone(config.clone()).await?;

        let mut ring = Ring::new(REPLICA_COUNT);
        let mut nodes: Vec<String> = vec![config.self_addr.clone()];
        nodes.extend(config.peers.iter().cloned());
        ring.add_nodes(&nodes);

        let mut pools = HashMap::new();
        for peer in &config.peers {
            let addr = peer.clone();
            let factory: pool::Factory<PeerClient> = Box::new(move || {
                let addr = addr.clone();
                Box::pin(async move { PeerClient::connect(&addr).await })
            });
            let finalizer: pool::Finalizer<PeerClient> = Box::new(|client: PeerClient| {
                tokio::spawn(async move { client.close().await });
            });
            pools.insert(
                peer.clone(),
                Pool::new(
                    PoolConfig {
                        max_idle: POOL_MAX_IDLE,
                        max_active: POOL_MAX_ACTIVE,
                    },
                    factory,
                    finalizer,
                ),
            );
        }

        let wheel = TimeWheel::new(WHEEL_TICK, WHEEL_SLOTS);
        wheel.start();

        info!(
            "cluster mode: self={} peers={:?}",
            config.self_addr, config.peers
        );
        Ok(Arc::new(Cluster {
            self_addr: config.self_addr.clone(),
            db,
            ring,
            pools,
            transactions: TransactionTable::default(),
            id_gen: IdGenerator::new(&config.self_addr),
            wheel,
            config,
        }))
    }

    pub fn self_addr(&self) -> &str {
        &self.self_addr
    }

    pub fn db(&self) -> &Arc<DataStore> {
        &self.db
    }

    pub fn wheel(&self) -> &Arc<TimeWheel> {
        &self.wheel
    }

    pub fn transactions(&self) -> &TransactionTable {
        &self.transactions
    }

    pub fn next_tx_id(&self) -> i64 {
        self.id_gen.next_id()
    }

    /// Owning node for each key: `node -> keys`.
    pub fn group_by(&self, keys: &[String]) -> HashMap<String, Vec<String>> {
        let mut groups: HashMap<String, Vec<String>> = HashMap::new();
        for key in keys {
            let node = self
                .ring
                .pick_node(key)
                .unwrap_or(&self.self_addr)
                .to_string();
            groups.entry(node).or_default().push(key.clone());
        }
        groups
    }

    /// Run a command on the given node: locally when it is this node,
    /// otherwise through a pooled peer client (selecting the caller's
    /// database on the wire first).
    pub async fn relay(&self, node: &str, client: &mut ClientState, cmdline: &[Vec<u8>]) -> Reply {
        if node == self.self_addr {
            return self.db.exec(client, cmdline).await;
        }
        let pool = match self.pools.get(node) {
            Some(pool) => pool,
            None => return Reply::error("connection pool not found"),
        };
        let peer = match pool.get().await {
            Ok(peer) => peer,
            Err(err) => return Reply::error(err.to_string()),
        };

        let select = vec![
            b"SELECT".to_vec(),
            client.db_index.to_string().into_bytes(),
        ];
        let _ = peer.send(&select).await;
        let reply = match peer.send(&cmdline.to_vec()).await {
            Ok(reply) => reply,
            Err(err) => Reply::error(err.to_string()),
        };
        pool.put(peer);
        reply
    }
}

#[async_trait]
impl DbEngine for Cluster {
    async fn exec(&self, client: &mut ClientState, cmdline: &[Vec<u8>]) -> Reply {
        if cmdline.is_empty() {
            return Reply::error("ERR empty command");
        }
        let name = String::from_utf8_lossy(&cmdline[0]).to_lowercase();

        if name == "auth" {
            return store::exec_auth(client, &cmdline[1..], &self.config);
        }
        if !store::is_authenticated(client, &self.config) {
            return Reply::error("NOAUTH Authentication required");
        }

        match name.as_str() {
            // Connection-local and node-local commands never leave this node.
            "ping" | "quit" | "select" | "rewriteaof" => self.db.exec(client, cmdline).await,
            "prepare" => tcc::exec_prepare(self, client, cmdline).await,
            "commit" => tcc::exec_commit(self, client, cmdline).await,
            "rollback" => tcc::exec_rollback(self, client, cmdline).await,
            "mset" => multi_key::mset(self, client, cmdline).await,
            "mget" => multi_key::mget(self, client, cmdline).await,
            "msetnx" => multi_key::msetnx(self, client, cmdline).await,
            _ => {
                // Everything else routes by its first key; keyless commands
                // run locally.
                let (write_keys, read_keys) = crate::command::related_keys(cmdline);
                let routing_key = write_keys.first().or_else(|| read_keys.first());
                match routing_key {
                    Some(key) => {
                        let node = self
                            .ring
                            .pick_node(key)
                            .unwrap_or(&self.self_addr)
                            .to_string();
                        self.relay(&node, client, cmdline).await
                    }
                    None => self.db.exec(client, cmdline).await,
                }
            }
        }
    }

    async fn close(&self) {
        for pool in self.pools.values() {
            pool.close();
        }
        self.wheel.stop();
        self.db.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::tcc::TxStatus;
    use crate::resp::CmdLine;
    use bytes::Bytes;

    fn line(parts: &[&str]) -> CmdLine {
        parts.iter().map(|p| p.as_bytes().to_vec()).collect()
    }

    async fn single_node_cluster() -> Arc<Cluster> {
        let mut config = Config::default();
        config.self_addr = "127.0.0.1:16399".to_string();
        Cluster::new(Arc::new(config)).await.unwrap()
    }

    async fn tx_status(cluster: &Cluster, tx_id: &str) -> TxStatus {
        let tx = cluster.transactions().lock().get(tx_id).unwrap().clone();
        tx.status().await
    }

    #[tokio::test]
    async fn group_by_puts_every_key_somewhere() {
        let cluster = single_node_cluster().await;
        let keys = vec!["a".to_string(), "b".to_string(), "{a}x".to_string()];
        let groups = cluster.group_by(&keys);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[cluster.self_addr()].len(), 3);
    }

    #[tokio::test]
    async fn single_group_mset_takes_the_fast_path() {
        let cluster = single_node_cluster().await;
        let mut client = ClientState::new();
        let reply = cluster
            .exec(&mut client, &line(&["MSET", "k1", "v1", "k2", "v2"]))
            .await;
        assert_eq!(reply, Reply::ok());
        assert_eq!(
            cluster.exec(&mut client, &line(&["GET", "k1"])).await,
            Reply::bulk(Bytes::from_static(b"v1"))
        );
    }

    #[tokio::test]
    async fn prepare_then_commit_applies_the_command() {
        let cluster = single_node_cluster().await;
        let mut client = ClientState::new();

        let reply = cluster
            .exec(
                &mut client,
                &line(&["PREPARE", "42", "MSET", "k1", "v1", "k2", "v2"]),
            )
            .await;
        assert_eq!(reply, Reply::ok());
        assert_eq!(tx_status(&cluster, "42").await, TxStatus::Prepared);

        let reply = cluster.exec(&mut client, &line(&["COMMIT", "42"])).await;
        assert_eq!(reply, Reply::ok());
        assert_eq!(
            cluster.exec(&mut client, &line(&["GET", "k2"])).await,
            Reply::bulk(Bytes::from_static(b"v2"))
        );
        assert_eq!(tx_status(&cluster, "42").await, TxStatus::Committed);
    }

    #[tokio::test]
    async fn rollback_restores_the_pre_image() {
        let cluster = single_node_cluster().await;
        let mut client = ClientState::new();

        cluster
            .exec(&mut client, &line(&["SET", "k1", "before"]))
            .await;
        cluster
            .exec(
                &mut client,
                &line(&["PREPARE", "43", "MSET", "k1", "after", "fresh", "x"]),
            )
            .await;
        let reply = cluster.exec(&mut client, &line(&["ROLLBACK", "43"])).await;
        assert_eq!(reply, Reply::integer(1));

        assert_eq!(
            cluster.exec(&mut client, &line(&["GET", "k1"])).await,
            Reply::bulk(Bytes::from_static(b"before"))
        );
        assert_eq!(
            cluster.exec(&mut client, &line(&["GET", "fresh"])).await,
            Reply::null_bulk()
        );
        assert_eq!(tx_status(&cluster, "43").await, TxStatus::RolledBack);
    }

    #[tokio::test]
    async fn commit_and_rollback_of_unknown_tx_answer_zero() {
        let cluster = single_node_cluster().await;
        let mut client = ClientState::new();
        assert_eq!(
            cluster.exec(&mut client, &line(&["COMMIT", "999"])).await,
            Reply::integer(0)
        );
        assert_eq!(
            cluster.exec(&mut client, &line(&["ROLLBACK", "999"])).await,
            Reply::integer(0)
        );
    }

    #[tokio::test]
    async fn double_rollback_is_a_no_op() {
        let cluster = single_node_cluster().await;
        let mut client = ClientState::new();
        cluster
            .exec(&mut client, &line(&["PREPARE", "44", "MSET", "k", "v"]))
            .await;
        assert_eq!(
            cluster.exec(&mut client, &line(&["ROLLBACK", "44"])).await,
            Reply::integer(1)
        );
        assert_eq!(
            cluster.exec(&mut client, &line(&["ROLLBACK", "44"])).await,
            Reply::integer(1)
        );
        assert_eq!(
            cluster.exec(&mut client, &line(&["GET", "k"])).await,
            Reply::null_bulk()
        );
    }

    #[tokio::test]
    async fn commit_after_rollback_answers_zero() {
        let cluster = single_node_cluster().await;
        let mut client = ClientState::new();
        cluster
            .exec(&mut client, &line(&["PREPARE", "45", "MSET", "k", "v"]))
            .await;
        cluster.exec(&mut client, &line(&["ROLLBACK", "45"])).await;
        assert_eq!(
            cluster.exec(&mut client, &line(&["COMMIT", "45"])).await,
            Reply::integer(0)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn prepared_transactions_roll_back_after_the_deadline() {
        let cluster = single_node_cluster().await;
        let mut client = ClientState::new();
        cluster
            .exec(&mut client, &line(&["SET", "k", "orig"]))
            .await;
        cluster
            .exec(&mut client, &line(&["PREPARE", "46", "MSET", "k", "hijacked"]))
            .await;

        // Past MAX_LOCK_TIME plus a wheel tick.
        tokio::time::sleep(Duration::from_secs(6)).await;

        let tx = cluster.transactions().lock().get("46").unwrap().clone();
        assert_eq!(tx.status().await, TxStatus::RolledBack);
        assert_eq!(
            cluster.exec(&mut client, &line(&["GET", "k"])).await,
            Reply::bulk(Bytes::from_static(b"orig"))
        );
    }

    #[tokio::test]
    async fn msetnx_across_nodes_requires_one_slot() {
        // Two configured peers so the ring actually splits keys; the peers
        // are never contacted because grouping fails first.
        let mut config = Config::default();
        config.self_addr = "127.0.0.1:16399".to_string();
        config.peers = vec!["127.0.0.1:16400".to_string(), "127.0.0.1:16401".to_string()];
        let cluster = Cluster::new(Arc::new(config)).await.unwrap();
        let mut client = ClientState::new();

        // Find two keys owned by different nodes.
        let mut split_pair = None;
        'outer: for i in 0..64 {
            for j in (i + 1)..64 {
                let a = format!("key-{i}");
                let b = format!("key-{j}");
                let groups = cluster.group_by(&[a.clone(), b.clone()]);
                if groups.len() == 2 {
                    split_pair = Some((a, b));
                    break 'outer;
                }
            }
        }
        let (a, b) = split_pair.expect("ring should split some pair across nodes");
        let reply = cluster
            .exec(&mut client, &line(&["MSETNX", &a, "1", &b, "2"]))
            .await;
        assert_eq!(
            reply,
            Reply::error("ERR MSETNX must group keys within one slot in cluster mode")
        );
    }
}
