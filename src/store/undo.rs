use crate::persistence::marshal::{entity_to_cmd, make_expire_cmd};
use crate::resp::CmdLine;
use crate::store::entity::DataEntity;
use crate::store::single::Database;

/// Compensating commands that restore the given keys to their current state:
/// delete whatever the transaction may have written, then recreate the
/// pre-image (value and expiration) for keys that exist now.
pub fn rollback_given_keys(db: &Database, keys: &[String]) -> Vec<CmdLine> {
    let mut undo = Vec::new();
    for key in keys {
        match db.get_entity(key) {
            None => undo.push(vec![b"DEL".to_vec(), key.as_bytes().to_vec()]),
            Some(entity) => {
                undo.push(vec![b"DEL".to_vec(), key.as_bytes().to_vec()]);
                undo.push(entity_to_cmd(key, &entity));
                if let Some(at) = db.expiration(key) {
                    undo.push(make_expire_cmd(key, at));
                }
            }
        }
    }
    undo
}

/// Member-granular compensation for sorted-set mutations: re-add members
/// that exist with their current score, remove members that do not.
pub fn rollback_zset_fields(db: &Database, key: &str, members: &[String]) -> Vec<CmdLine> {
    let scores: Option<Option<Vec<Option<f64>>>> = db.with_entity(key, |entity| match entity {
        DataEntity::SortedSet(set) => Some(members.iter().map(|m| set.score(m)).collect()),
        _ => None,
    });

    match scores {
        // Key absent: the transaction may create it, so undo drops it whole.
        None => vec![vec![b"DEL".to_vec(), key.as_bytes().to_vec()]],
        // Wrong type: the command will fail, nothing to compensate.
        Some(None) => Vec::new(),
        Some(Some(scores)) => members
            .iter()
            .zip(scores)
            .map(|(member, score)| match score {
                Some(score) => vec![
                    b"ZADD".to_vec(),
                    key.as_bytes().to_vec(),
                    format!("{score}").into_bytes(),
                    member.as_bytes().to_vec(),
                ],
                None => vec![
                    b"ZREM".to_vec(),
                    key.as_bytes().to_vec(),
                    member.as_bytes().to_vec(),
                ],
            })
            .collect(),
    }
}
