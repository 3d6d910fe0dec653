use crate::error::{ServerError, ServerResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::oneshot;

pub type Factory<T> =
    Box<dyn Fn() -> Pin<Box<dyn Future<Output = ServerResult<T>> + Send>> + Send + Sync>;
pub type Finalizer<T> = Box<dyn Fn(T) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub max_idle: usize,
    pub max_active: usize,
}

struct PoolState<T> {
    idles: VecDeque<T>,
    /// Items currently alive: idle plus checked out.
    active: usize,
    waiters: VecDeque<oneshot::Sender<T>>,
    closed: bool,
}

enum Acquire<T> {
    Idle(T),
    Create,
    Wait(oneshot::Receiver<T>),
}

/// Bounded object pool. `get` prefers an idle item, creates while under
/// `max_active`, and otherwise queues on a single-shot handoff channel;
/// `put` hands the item to the oldest waiter first. Acquirers block
/// indefinitely; only closing the pool unblocks them with an error.
pub struct Pool<T> {
    config: PoolConfig,
    factory: Factory<T>,
    finalizer: Finalizer<T>,
    state: Mutex<PoolState<T>>,
}

impl<T: Send + 'static> Pool<T> {
    pub fn new(config: PoolConfig, factory: Factory<T>, finalizer: Finalizer<T>) -> Self {
        Pool {
            config,
            factory,
            finalizer,
            state: Mutex::new(PoolState {
                idles: VecDeque::new(),
                active: 0,
                waiters: VecDeque::new(),
                closed: false,
            }),
        }
    }

    pub async fn get(&self) -> ServerResult<T> {
        let acquire = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(ServerError::PoolClosed);
            }
            if let Some(item) = state.idles.pop_front() {
                Acquire::Idle(item)
            } else if state.active < self.config.max_active {
                state.active += 1;
                Acquire::Create
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                Acquire::Wait(rx)
            }
        };

        match acquire {
            Acquire::Idle(item) => Ok(item),
            Acquire::Create => match (self.factory)().await {
                Ok(item) => Ok(item),
                Err(err) => {
                    self.state.lock().active -= 1;
                    Err(err)
                }
            },
            Acquire::Wait(rx) => rx.await.map_err(|_| ServerError::PoolClosed),
        }
    }

    pub fn put(&self, item: T) {
        let mut item = item;
        let mut state = self.state.lock();
        if state.closed {
            drop(state);
            (self.finalizer)(item);
            return;
        }

        // Oldest waiter first; a waiter whose receiver is gone yields to the
        // next one.
        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.send(item) {
                Ok(()) => return,
                Err(returned) => item = returned,
            }
        }

        if state.idles.len() < self.config.max_idle {
            state.idles.push_back(item);
            return;
        }
        state.active -= 1;
        drop(state);
        (self.finalizer)(item);
    }

    /// Close the pool: destroy idle items and fail all waiters. Later `get`
    /// calls error out; later `put` calls destroy their item.
    pub fn close(&self) {
        let (idles, waiters) = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            (
                std::mem::take(&mut state.idles),
                std::mem::take(&mut state.waiters),
            )
        };
        drop(waiters);
        for item in idles {
            (self.finalizer)(item);
        }
    }

    #[cfg(test)]
    fn active_count(&self) -> usize {
        self.state.lock().active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn counting_pool(max_idle: usize, max_active: usize) -> (Arc<Pool<u64>>, Arc<AtomicUsize>) {
        let created = Arc::new(AtomicUsize::new(0));
        let destroyed = Arc::new(AtomicUsize::new(0));
        let created_in_factory = created.clone();
        let destroyed_in_finalizer = destroyed.clone();
        let pool = Pool::new(
            PoolConfig {
                max_idle,
                max_active,
            },
            Box::new(move || {
                let n = created_in_factory.fetch_add(1, Ordering::SeqCst) as u64;
                Box::pin(async move { Ok(n) })
            }),
            Box::new(move |_| {
                destroyed_in_finalizer.fetch_add(1, Ordering::SeqCst);
            }),
        );
        (Arc::new(pool), destroyed)
    }

    #[tokio::test]
    async fn reuses_idle_items() {
        let (pool, _) = counting_pool(2, 4);
        let a = pool.get().await.unwrap();
        pool.put(a);
        let b = pool.get().await.unwrap();
        assert_eq!(b, a);
        assert_eq!(pool.active_count(), 1);
    }

    #[tokio::test]
    async fn blocks_at_max_active_until_a_put() {
        let (pool, _) = counting_pool(1, 2);
        let a = pool.get().await.unwrap();
        let _b = pool.get().await.unwrap();
        assert_eq!(pool.active_count(), 2);

        let waiter_pool = pool.clone();
        let waiter = tokio::spawn(async move { waiter_pool.get().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        pool.put(a);
        let handed = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(handed, a);
        assert_eq!(pool.active_count(), 2);
    }

    #[tokio::test]
    async fn overflow_puts_are_finalized() {
        let (pool, destroyed) = counting_pool(1, 4);
        let a = pool.get().await.unwrap();
        let b = pool.get().await.unwrap();
        pool.put(a);
        pool.put(b); // idle already full
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.active_count(), 1);
    }

    #[tokio::test]
    async fn close_rejects_gets_and_unblocks_waiters() {
        let (pool, destroyed) = counting_pool(1, 1);
        let a = pool.get().await.unwrap();

        let waiter_pool = pool.clone();
        let waiter = tokio::spawn(async move { waiter_pool.get().await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        pool.close();
        assert!(matches!(
            waiter.await.unwrap(),
            Err(ServerError::PoolClosed)
        ));
        assert!(matches!(pool.get().await, Err(ServerError::PoolClosed)));

        pool.put(a);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }
}
