//! The time-triggered scheduler ("Timer Manager", §4.2).
//!
//! A single dedicated worker thread drives a deadline-ordered priority queue
//! of callbacks. Firing a callback never holds the internal lock, so a
//! callback is free to register or cancel other timers (including itself)
//! without deadlocking. Long-running callbacks still block subsequent
//! timers, exactly as the contract warns (§4.2) — callers are expected to
//! keep them short or dispatch onto their own thread.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use uuid::Uuid;

use crate::clock::Timestamp;

type Callback = Box<dyn FnMut() + Send>;

struct Entry {
    duration: Duration,
    repeat: bool,
    generation: u64,
    callback: Option<Callback>,
}

struct State {
    entries: HashMap<Uuid, Entry>,
    heap: BinaryHeap<Reverse<(Timestamp, u64, Uuid)>>,
    next_generation: u64,
    running: bool,
}

/// Fires callbacks at absolute wall-clock instants, optionally repeating
/// (§4.2).
pub struct TimerManager {
    state: Arc<Mutex<State>>,
    cv: Arc<Condvar>,
    worker: Option<JoinHandle<()>>,
}

impl TimerManager {
    pub fn start() -> Self {
        let state = Arc::new(Mutex::new(State {
            entries: HashMap::new(),
            heap: BinaryHeap::new(),
            next_generation: 0,
            running: true,
        }));
        let cv = Arc::new(Condvar::new());

        let worker_state = state.clone();
        let worker_cv = cv.clone();
        let worker = std::thread::Builder::new()
            .name("timer-manager".into())
            .spawn(move || Self::run(worker_state, worker_cv))
            .expect("failed to spawn timer-manager thread");

        TimerManager {
            state,
            cv,
            worker: Some(worker),
        }
    }

    /// `register(id, duration, repeat, fn)` (§4.2). Registering an id that
    /// already has a pending timer atomically replaces it: the stale heap
    /// entry is recognized and skipped by its generation number.
    pub fn register(&self, id: Uuid, duration: Duration, repeat: bool, callback: Callback) {
        let mut state = self.state.lock().unwrap();
        let generation = state.next_generation;
        state.next_generation += 1;
        let fire_at = Timestamp::now().add_duration(duration);
        state.entries.insert(
            id,
            Entry {
                duration,
                repeat,
                generation,
                callback: Some(callback),
            },
        );
        state.heap.push(Reverse((fire_at, generation, id)));
        drop(state);
        self.cv.notify_one();
    }

    /// `cancel(id)` — prevents any not-yet-fired instance from firing. An
    /// already-firing callback runs to completion (§4.2).
    pub fn cancel(&self, id: Uuid) {
        let mut state = self.state.lock().unwrap();
        state.entries.remove(&id);
        drop(state);
        self.cv.notify_one();
    }

    pub fn stop(&mut self) {
        {
            let mut state = self.state.lock().unwrap();
            state.running = false;
        }
        self.cv.notify_all();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }

    fn run(state: Arc<Mutex<State>>, cv: Arc<Condvar>) {
        let mut guard = state.lock().unwrap();
        loop {
            if !guard.running {
                return;
            }
            match guard.heap.peek().copied() {
                None => {
                    guard = cv.wait_timeout(guard, Duration::from_secs(3600)).unwrap().0;
                }
                Some(Reverse((deadline, generation, id))) => {
                    let now = Timestamp::now();
                    if now >= deadline {
                        guard.heap.pop();
                        let fired = match guard.entries.get_mut(&id) {
                            Some(entry) if entry.generation == generation => {
                                entry.callback.take().map(|cb| (entry.repeat, entry.duration, cb))
                            }
                            _ => None,
                        };
                        if let Some((repeat, duration, mut callback)) = fired {
                            drop(guard);
                            callback();
                            guard = state.lock().unwrap();
                            if repeat {
                                if let Some(entry) = guard.entries.get_mut(&id) {
                                    if entry.generation == generation {
                                        entry.callback = Some(callback);
                                        let fire_at = Timestamp::now().add_duration(duration);
                                        guard.heap.push(Reverse((fire_at, generation, id)));
                                    }
                                }
                            }
                        }
                    } else {
                        let wait_for = now.saturating_sub(deadline);
                        // saturating_sub(deadline) on `now` before `deadline` clamps to
                        // zero; compute the real remaining wait the other way round.
                        let wait_for = if wait_for.is_zero() {
                            deadline.saturating_sub(now)
                        } else {
                            wait_for
                        };
                        let (g, _) = cv.wait_timeout(guard, wait_for).unwrap();
                        guard = g;
                    }
                }
            }
        }
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn fires_after_duration() {
        let timer = TimerManager::start();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        timer.register(
            Uuid::new_v4(),
            Duration::from_millis(20),
            false,
            Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_prevents_fire() {
        let timer = TimerManager::start();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let id = Uuid::new_v4();
        timer.register(
            id,
            Duration::from_millis(50),
            false,
            Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );
        timer.cancel(id);
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn repeat_fires_multiple_times() {
        let timer = TimerManager::start();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        timer.register(
            Uuid::new_v4(),
            Duration::from_millis(15),
            true,
            Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );
        std::thread::sleep(Duration::from_millis(100));
        assert!(counter.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn reregistering_same_id_replaces_prior_timer() {
        let timer = TimerManager::start();
        let counter = Arc::new(AtomicUsize::new(0));
        let id = Uuid::new_v4();
        let c1 = counter.clone();
        timer.register(
            id,
            Duration::from_millis(200),
            false,
            Box::new(move || {
                c1.fetch_add(100, Ordering::SeqCst);
            }),
        );
        let c2 = counter.clone();
        timer.register(
            id,
            Duration::from_millis(10),
            false,
            Box::new(move || {
                c2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        std::thread::sleep(Duration::from_millis(260));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
