use crate::store::dict::fnv32;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Striped lock table guarding multi-key operations.
///
/// Every key hashes to one of a fixed number of stripes. A multi-key call
/// locks the deduplicated stripe set in ascending index order (write lock
/// when any write key maps to the stripe, read lock otherwise) and releases
/// in descending order, so overlapping operations can never form a cycle.
///
/// The guards are owned so a prepared cluster transaction can keep its keys
/// locked across RPC round-trips and hand them to whichever task commits or
/// rolls back.
pub struct Locks {
    table: Vec<Arc<RwLock<()>>>,
}

enum StripeGuard {
    Read(#[allow(dead_code)] OwnedRwLockReadGuard<()>),
    Write(#[allow(dead_code)] OwnedRwLockWriteGuard<()>),
}

/// RAII holder for one multi-key acquisition. Dropping it releases the
/// stripes back-to-front, the reverse of acquisition order.
pub struct LockSet {
    guards: Vec<StripeGuard>,
}

impl Drop for LockSet {
    fn drop(&mut self) {
        while let Some(guard) = self.guards.pop() {
            drop(guard);
        }
    }
}

impl Locks {
    pub fn new(size: usize) -> Self {
        let size = size.next_power_of_two();
        Locks {
            table: (0..size).map(|_| Arc::new(RwLock::new(()))).collect(),
        }
    }

    fn stripe_of(&self, key: &str) -> u32 {
        fnv32(key) & (self.table.len() as u32 - 1)
    }

    /// Deduplicated stripe indices for a key set, sorted ascending (or
    /// descending when `reverse`, the unlock order).
    fn to_lock_indices<'a>(
        &self,
        keys: impl IntoIterator<Item = &'a str>,
        reverse: bool,
    ) -> Vec<u32> {
        let set: HashSet<u32> = keys.into_iter().map(|key| self.stripe_of(key)).collect();
        let mut indices: Vec<u32> = set.into_iter().collect();
        indices.sort_unstable();
        if reverse {
            indices.reverse();
        }
        indices
    }

    /// Lock write keys exclusively and read keys shared, in one ordered pass.
    /// Duplicate keys and write/read overlaps are allowed; a stripe touched
    /// by any write key is taken exclusively.
    pub async fn rw_locks(&self, write_keys: &[String], read_keys: &[String]) -> LockSet {
        let all = write_keys
            .iter()
            .chain(read_keys.iter())
            .map(String::as_str);
        let indices = self.to_lock_indices(all, false);

        let write_stripes: HashSet<u32> = write_keys
            .iter()
            .map(|key| self.stripe_of(key))
            .collect();

        let mut guards = Vec::with_capacity(indices.len());
        for index in indices {
            let stripe = self.table[index as usize].clone();
            if write_stripes.contains(&index) {
                guards.push(StripeGuard::Write(stripe.write_owned().await));
            } else {
                guards.push(StripeGuard::Read(stripe.read_owned().await));
            }
        }
        LockSet { guards }
    }

    #[cfg(test)]
    fn stripes(&self, keys: &[&str]) -> Vec<u32> {
        self.to_lock_indices(keys.iter().copied(), false)
    }
}
