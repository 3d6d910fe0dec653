use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicIsize, Ordering};

const FNV32_OFFSET: u32 = 2_166_136_261;
const FNV32_PRIME: u32 = 16_777_619;

pub fn fnv32(key: &str) -> u32 {
    let mut hash = FNV32_OFFSET;
    for byte in key.as_bytes() {
        hash = hash.wrapping_mul(FNV32_PRIME);
        hash ^= *byte as u32;
    }
    hash
}

/// Mix the high bits into the low bits so that keys whose FNV hashes differ
/// only above the shard mask still spread across shards.
pub fn spread(hash: u32) -> u32 {
    (hash ^ (hash >> 16)) & 0x7fff_ffff
}

/// Round up to a power of two, with a floor of 16 shards.
fn compute_capacity(param: usize) -> usize {
    if param <= 16 {
        return 16;
    }
    param.next_power_of_two()
}

struct Shard<V> {
    map: RwLock<HashMap<String, V>>,
}

/// A concurrent map segmented into 2^k shards, each guarded by its own
/// reader-writer lock. The shard of a key never changes (the table is never
/// resized), so per-key operations contend only within one shard.
pub struct ConcurrentDict<V> {
    table: Vec<Shard<V>>,
    count: AtomicIsize,
}

impl<V> ConcurrentDict<V> {
    pub fn new(shard_count: usize) -> Self {
        let shard_count = compute_capacity(shard_count);
        let table = (0..shard_count)
            .map(|_| Shard {
                map: RwLock::new(HashMap::new()),
            })
            .collect();
        ConcurrentDict {
            table,
            count: AtomicIsize::new(0),
        }
    }

    fn shard(&self, key: &str) -> &Shard<V> {
        let index = spread(fnv32(key)) as usize & (self.table.len() - 1);
        &self.table[index]
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.shard(key).map.read().contains_key(key)
    }

    /// Run a closure against the value without cloning it.
    pub fn with_value<R>(&self, key: &str, f: impl FnOnce(&V) -> R) -> Option<R> {
        let guard = self.shard(key).map.read();
        guard.get(key).map(f)
    }

    /// Run a closure against the value with in-place mutation rights.
    pub fn with_value_mut<R>(&self, key: &str, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        let mut guard = self.shard(key).map.write();
        guard.get_mut(key).map(f)
    }

    /// Insert or overwrite. Returns 1 when a new key was created.
    pub fn put(&self, key: &str, value: V) -> usize {
        let mut guard = self.shard(key).map.write();
        let created = guard.insert(key.to_string(), value).is_none();
        if created {
            self.count.fetch_add(1, Ordering::Relaxed);
        }
        usize::from(created)
    }

    /// Insert only when absent. Returns the number of inserted entries.
    pub fn put_if_absent(&self, key: &str, value: V) -> usize {
        let mut guard = self.shard(key).map.write();
        if guard.contains_key(key) {
            return 0;
        }
        guard.insert(key.to_string(), value);
        self.count.fetch_add(1, Ordering::Relaxed);
        1
    }

    /// Overwrite only when present. Returns the number of updated entries.
    pub fn put_if_exists(&self, key: &str, value: V) -> usize {
        let mut guard = self.shard(key).map.write();
        match guard.get_mut(key) {
            Some(slot) => {
                *slot = value;
                1
            }
            None => 0,
        }
    }

    /// Remove a key. Returns the number of removed entries.
    pub fn remove(&self, key: &str) -> usize {
        let mut guard = self.shard(key).map.write();
        if guard.remove(key).is_some() {
            self.count.fetch_sub(1, Ordering::Relaxed);
            1
        } else {
            0
        }
    }

    /// Visit every entry shard by shard. The consumer returning `false`
    /// stops iteration within the current shard and moves to the next,
    /// matching a per-shard snapshot view rather than a global one.
    pub fn for_each(&self, mut consumer: impl FnMut(&str, &V) -> bool) {
        for shard in &self.table {
            let guard = shard.map.read();
            for (key, value) in guard.iter() {
                if !consumer(key, value) {
                    break;
                }
            }
        }
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(self.len());
        self.for_each(|key, _| {
            keys.push(key.to_string());
            true
        });
        keys
    }
}

impl<V: Clone> ConcurrentDict<V> {
    pub fn get(&self, key: &str) -> Option<V> {
        let guard = self.shard(key).map.read();
        guard.get(key).cloned()
    }
}
