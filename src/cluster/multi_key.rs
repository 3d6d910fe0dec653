use crate::cluster::{tcc, Cluster};
use crate::command::{arg_str, wrong_arg_count};
use crate::connection::ClientState;
use crate::resp::Reply;
use std::collections::HashMap;

/// A write whose keys all land on one node skips the transaction protocol
/// and is relayed whole.
const ALLOW_FAST_TRANSACTION: bool = true;

/// Cluster MGET: one relay per owning node, replies merged back into the
/// caller's key order.
pub async fn mget(cluster: &Cluster, client: &mut ClientState, cmdline: &[Vec<u8>]) -> Reply {
    if cmdline.len() < 2 {
        return wrong_arg_count("mget");
    }
    let keys: Vec<String> = cmdline[1..].iter().map(|arg| arg_str(arg)).collect();
    let group_map = cluster.group_by(&keys);

    let mut values: HashMap<String, Reply> = HashMap::with_capacity(keys.len());
    for (node, group) in &group_map {
        let mut line = vec![b"mget".to_vec()];
        line.extend(group.iter().map(|key| key.as_bytes().to_vec()));

        let reply = cluster.relay(node, client, &line).await;
        let items = match reply {
            Reply::Error(message) => {
                return Reply::error(format!("ERR during get {} occurs: {message}", group[0]));
            }
            Reply::Array(Some(items)) if items.len() == group.len() => items,
            _ => {
                return Reply::error(format!(
                    "ERR during get {} occurs: unexpected reply from {node}",
                    group[0]
                ));
            }
        };
        for (key, value) in group.iter().zip(items) {
            values.insert(key.clone(), value);
        }
    }

    Reply::array(
        keys.iter()
            .map(|key| values.remove(key).unwrap_or_else(Reply::null_bulk))
            .collect(),
    )
}

/// Cluster MSET: single-group writes are relayed directly; anything spanning
/// nodes runs the try/commit/compensate protocol under a snowflake tx id.
pub async fn mset(cluster: &Cluster, client: &mut ClientState, cmdline: &[Vec<u8>]) -> Reply {
    let arg_count = cmdline.len() - 1;
    if arg_count < 2 || arg_count % 2 != 0 {
        return wrong_arg_count("mset");
    }

    let size = arg_count / 2;
    let mut keys = Vec::with_capacity(size);
    let mut values: HashMap<String, Vec<u8>> = HashMap::with_capacity(size);
    for i in 0..size {
        let key = arg_str(&cmdline[2 * i + 1]);
        values.insert(key.clone(), cmdline[2 * i + 2].clone());
        keys.push(key);
    }

    let group_map = cluster.group_by(&keys);
    if ALLOW_FAST_TRANSACTION && group_map.len() == 1 {
        let node = group_map.keys().next().cloned().unwrap_or_default();
        return cluster.relay(&node, client, cmdline).await;
    }

    // Try phase: every node prepares its slice of the key/value pairs.
    let tx_id = cluster.next_tx_id();
    let tx_id_str = tx_id.to_string();
    let mut failure = None;
    for (node, group) in &group_map {
        let mut line = vec![
            b"prepare".to_vec(),
            tx_id_str.clone().into_bytes(),
            b"MSET".to_vec(),
        ];
        for key in group {
            line.push(key.as_bytes().to_vec());
            line.push(values[key].clone());
        }
        let reply = if node.as_str() == cluster.self_addr() {
            tcc::exec_prepare(cluster, client, &line).await
        } else {
            cluster.relay(node, client, &line).await
        };
        if reply.is_error() {
            failure = Some(reply);
            break;
        }
    }

    if let Some(err) = failure {
        tcc::request_rollback(cluster, client, tx_id, &group_map).await;
        return err;
    }
    match tcc::request_commit(cluster, client, tx_id, &group_map).await {
        Ok(_) => Reply::ok(),
        Err(err) => err,
    }
}

/// Cluster MSETNX keeps its all-or-nothing meaning only within one node;
/// keys spanning nodes are rejected.
pub async fn msetnx(cluster: &Cluster, client: &mut ClientState, cmdline: &[Vec<u8>]) -> Reply {
    let arg_count = cmdline.len() - 1;
    if arg_count < 2 || arg_count % 2 != 0 {
        return wrong_arg_count("msetnx");
    }
    let keys: Vec<String> = (0..arg_count / 2)
        .map(|i| arg_str(&cmdline[2 * i + 1]))
        .collect();

    let group_map = cluster.group_by(&keys);
    if group_map.len() != 1 {
        return Reply::error("ERR MSETNX must group keys within one slot in cluster mode");
    }
    let node = group_map.keys().next().cloned().unwrap_or_default();
    cluster.relay(&node, client, cmdline).await
}
