use crate::command::sorted_set::format_score;
use crate::resp::CmdLine;
use crate::store::entity::DataEntity;

/// The minimal command that recreates an entity, as written during AOF
/// rewrite and into transaction undo logs.
pub fn entity_to_cmd(key: &str, entity: &DataEntity) -> CmdLine {
    match entity {
        DataEntity::Bytes(data) => vec![
            b"SET".to_vec(),
            key.as_bytes().to_vec(),
            data.to_vec(),
        ],
        DataEntity::SortedSet(set) => {
            let mut line = Vec::with_capacity(2 + 2 * set.len() as usize);
            line.push(b"ZADD".to_vec());
            line.push(key.as_bytes().to_vec());
            set.for_each(0, set.len(), false, |element| {
                line.push(format_score(element.score).into_bytes());
                line.push(element.member.as_bytes().to_vec());
                true
            });
            line
        }
    }
}

/// Absolute-deadline expiration record: `PEXPIREAT key <unix-ms>`.
pub fn make_expire_cmd(key: &str, expire_at_ms: u64) -> CmdLine {
    vec![
        b"PEXPIREAT".to_vec(),
        key.as_bytes().to_vec(),
        expire_at_ms.to_string().into_bytes(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::sorted_set::SortedSet;
    use bytes::Bytes;

    #[test]
    fn string_entity_serializes_to_set() {
        let entity = DataEntity::Bytes(Bytes::from_static(b"value"));
        assert_eq!(
            entity_to_cmd("k", &entity),
            vec![b"SET".to_vec(), b"k".to_vec(), b"value".to_vec()]
        );
    }

    #[test]
    fn zset_entity_serializes_to_zadd_in_order() {
        let mut set = SortedSet::new();
        set.add("b", 2.0);
        set.add("a", 1.0);
        let line = entity_to_cmd("zs", &DataEntity::SortedSet(set));
        assert_eq!(
            line,
            vec![
                b"ZADD".to_vec(),
                b"zs".to_vec(),
                b"1".to_vec(),
                b"a".to_vec(),
                b"2".to_vec(),
                b"b".to_vec(),
            ]
        );
    }

    #[test]
    fn expire_cmd_uses_absolute_milliseconds() {
        assert_eq!(
            make_expire_cmd("k", 1234),
            vec![b"PEXPIREAT".to_vec(), b"k".to_vec(), b"1234".to_vec()]
        );
    }
}
