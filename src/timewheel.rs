use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::error;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Task {
    /// Remaining full rotations before this task is due.
    circle: usize,
    key: Option<String>,
    job: Job,
}

struct WheelState {
    slots: Vec<HashMap<u64, Task>>,
    /// key -> (slot, task id), for cancellation and replacement.
    timer: HashMap<String, (usize, u64)>,
    current_pos: usize,
    next_id: u64,
}

/// Hashed timing wheel: a fixed ring of slots advanced by a ticker task.
/// A delayed job lands `delay / tick` slots ahead, wrapping with a rotation
/// counter; keyed jobs can be cancelled (or replaced) before they fire.
pub struct TimeWheel {
    interval: Duration,
    state: Mutex<WheelState>,
    cancel: CancellationToken,
}

impl TimeWheel {
    pub fn new(interval: Duration, slot_count: usize) -> Arc<TimeWheel> {
        assert!(slot_count > 0 && !interval.is_zero());
        Arc::new(TimeWheel {
            interval,
            state: Mutex::new(WheelState {
                slots: (0..slot_count).map(|_| HashMap::new()).collect(),
                timer: HashMap::new(),
                current_pos: 0,
                next_id: 0,
            }),
            cancel: CancellationToken::new(),
        })
    }

    /// Spawn the ticker task driving the wheel.
    pub fn start(self: &Arc<Self>) {
        let wheel = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(wheel.interval);
            ticker.tick().await; // completes immediately
            loop {
                tokio::select! {
                    _ = wheel.cancel.cancelled() => break,
                    _ = ticker.tick() => wheel.on_tick(),
                }
            }
        });
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Schedule `job` to run after `delay`. A keyed job replaces any pending
    /// job under the same key.
    pub fn add_job(&self, delay: Duration, key: Option<String>, job: impl FnOnce() + Send + 'static) {
        let mut state = self.state.lock();
        if let Some(key) = &key {
            remove_locked(&mut state, key);
        }

        let ticks = (delay.as_millis() / self.interval.as_millis()) as usize;
        let slot_count = state.slots.len();
        let slot = (state.current_pos + ticks) % slot_count;
        let circle = ticks / slot_count;

        let id = state.next_id;
        state.next_id += 1;
        if let Some(key) = &key {
            state.timer.insert(key.clone(), (slot, id));
        }
        state.slots[slot].insert(
            id,
            Task {
                circle,
                key,
                job: Box::new(job),
            },
        );
    }

    /// Cancel a keyed job before it fires. Unknown keys are ignored.
    pub fn remove_job(&self, key: &str) {
        let mut state = self.state.lock();
        remove_locked(&mut state, key);
    }

    fn on_tick(&self) {
        let mut due = Vec::new();
        {
            let mut state = self.state.lock();
            let pos = state.current_pos;
            state.current_pos = (pos + 1) % state.slots.len();

            let due_ids: Vec<u64> = state.slots[pos]
                .iter_mut()
                .filter_map(|(id, task)| {
                    if task.circle == 0 {
                        Some(*id)
                    } else {
                        task.circle -= 1;
                        None
                    }
                })
                .collect();

            for id in due_ids {
                if let Some(task) = state.slots[pos].remove(&id) {
                    if let Some(key) = &task.key {
                        state.timer.remove(key);
                    }
                    due.push(task);
                }
            }
        }

        // Each job runs on its own task behind a panic guard.
        for task in due {
            tokio::spawn(async move {
                if std::panic::catch_unwind(std::panic::AssertUnwindSafe(task.job)).is_err() {
                    error!("timewheel job panicked");
                }
            });
        }
    }
}

fn remove_locked(state: &mut WheelState, key: &str) {
    if let Some((slot, id)) = state.timer.remove(key) {
        state.slots[slot].remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn job_fires_after_its_delay() {
        let wheel = TimeWheel::new(Duration::from_millis(100), 8);
        wheel.start();

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        wheel.add_job(Duration::from_millis(300), None, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        wheel.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn delays_longer_than_one_rotation_wait_for_their_circle() {
        let wheel = TimeWheel::new(Duration::from_millis(100), 4);
        wheel.start();

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        // 10 ticks on a 4-slot wheel: circle = 2.
        wheel.add_job(Duration::from_millis(1000), None, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        wheel.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn keyed_jobs_can_be_cancelled() {
        let wheel = TimeWheel::new(Duration::from_millis(100), 8);
        wheel.start();

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        wheel.add_job(Duration::from_millis(200), Some("tx:1".to_string()), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        wheel.remove_job("tx:1");

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        wheel.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn readding_a_key_replaces_the_pending_job() {
        let wheel = TimeWheel::new(Duration::from_millis(100), 8);
        wheel.start();

        let fired = Arc::new(AtomicUsize::new(0));
        let first = fired.clone();
        wheel.add_job(Duration::from_millis(200), Some("tx:2".to_string()), move || {
            first.fetch_add(1, Ordering::SeqCst);
        });
        let second = fired.clone();
        wheel.add_job(Duration::from_millis(400), Some("tx:2".to_string()), move || {
            second.fetch_add(10, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 10);
        wheel.stop();
    }
}
