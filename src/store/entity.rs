use crate::types::sorted_set::SortedSet;
use bytes::Bytes;
use std::time::{SystemTime, UNIX_EPOCH};

/// A stored value with its runtime type tag. Executors match on the variant
/// and answer WRONGTYPE when a key holds something else.
#[derive(Debug, Clone)]
pub enum DataEntity {
    Bytes(Bytes),
    SortedSet(SortedSet),
}

impl DataEntity {
    pub fn type_name(&self) -> &'static str {
        match self {
            DataEntity::Bytes(_) => "string",
            DataEntity::SortedSet(_) => "zset",
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            DataEntity::Bytes(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_sorted_set(&self) -> Option<&SortedSet> {
        match self {
            DataEntity::SortedSet(set) => Some(set),
            _ => None,
        }
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before UNIX epoch")
        .as_millis() as u64
}
