/*
 * Copyright (C) 2025 The Fleetcontroller Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Base delay of the per-key exponential backoff.
const RATE_LIMIT_BASE_DELAY_MS: u64 = 5;
/// Ceiling of the per-key exponential backoff.
const RATE_LIMIT_MAX_DELAY_MS: u64 = 1_000_000;

/// Deduplicating, rate-limited work queue of framework keys.
///
/// The queue is a FIFO pending set combined with a processing set rather than
/// a strict FIFO: a key is only enqueued if it is not already pending, and a
/// key handed to one worker is withheld from all others until `done`. This
/// gives every key a processing lock, so per-key state can be treated as
/// single threaded, while distinct keys still process concurrently. There is
/// no ordering guarantee across distinct keys.
#[derive(Clone)]
pub struct KeyQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    state: Mutex<QueueState>,
    cond: Condvar,
}

struct QueueState {
    /// Pending keys in arrival order; always a subset of `dirty` minus
    /// `processing`.
    queue: VecDeque<String>,
    /// Keys that need (re)processing.
    dirty: HashSet<String>,
    /// Keys currently held by a worker.
    processing: HashSet<String>,
    /// Earliest scheduled enqueue time per delayed key.
    delayed: HashMap<String, Instant>,
    /// Consecutive rate-limited requeues per key.
    requeues: HashMap<String, u32>,
    shutting_down: bool,
}

impl Default for KeyQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    delayed: HashMap::new(),
                    requeues: HashMap::new(),
                    shutting_down: false,
                }),
                cond: Condvar::new(),
            }),
        }
    }

    /// Enqueues the key unless it is already pending. A key enqueued while it
    /// is being processed is re-queued when its processor calls `done`.
    pub fn add(&self, key: &str) {
        let mut state = self.inner.state.lock();
        if Self::add_locked(&mut state, key) {
            self.inner.cond.notify_one();
        }
    }

    fn add_locked(state: &mut QueueState, key: &str) -> bool {
        if state.shutting_down {
            return false;
        }
        if state.dirty.contains(key) {
            return false;
        }
        state.dirty.insert(key.to_string());
        if state.processing.contains(key) {
            return false;
        }
        state.queue.push_back(key.to_string());
        true
    }

    /// Schedules the key to be enqueued after `delay`, collapsing repeated
    /// schedules for the same key to the earliest one.
    pub fn add_after(&self, key: &str, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let deadline = Instant::now() + delay;
        let mut state = self.inner.state.lock();
        if state.shutting_down {
            return;
        }
        let entry = state
            .delayed
            .entry(key.to_string())
            .or_insert(deadline);
        if deadline < *entry {
            *entry = deadline;
        }
        // Wake a waiter so it re-arms its sleep against the new deadline.
        self.inner.cond.notify_one();
    }

    /// Re-enqueues the key with an exponentially backed-off delay.
    pub fn add_rate_limited(&self, key: &str) {
        let delay = {
            let mut state = self.inner.state.lock();
            let attempts = state.requeues.entry(key.to_string()).or_insert(0);
            let delay = rate_limit_delay(*attempts);
            *attempts = attempts.saturating_add(1);
            delay
        };
        self.add_after(key, delay);
    }

    /// Resets the key's rate limit counters after a clean sync.
    pub fn forget(&self, key: &str) {
        let mut state = self.inner.state.lock();
        state.requeues.remove(key);
    }

    /// Blocks until a key not being processed elsewhere is available, or the
    /// queue is shut down (`None`).
    pub fn get(&self) -> Option<String> {
        let mut state = self.inner.state.lock();
        loop {
            Self::promote_due_delayed(&mut state);

            if let Some(key) = state.queue.pop_front() {
                state.dirty.remove(&key);
                state.processing.insert(key.clone());
                return Some(key);
            }

            if state.shutting_down {
                return None;
            }

            match Self::earliest_deadline(&state) {
                Some(deadline) => {
                    self.inner.cond.wait_until(&mut state, deadline);
                }
                None => self.inner.cond.wait(&mut state),
            }
        }
    }

    /// Non-blocking variant of `get` for drivers that poll.
    pub fn try_get(&self) -> Option<String> {
        let mut state = self.inner.state.lock();
        Self::promote_due_delayed(&mut state);
        let key = state.queue.pop_front()?;
        state.dirty.remove(&key);
        state.processing.insert(key.clone());
        Some(key)
    }

    /// Releases the key's processing lock; re-queues it if it was re-added
    /// while being processed.
    pub fn done(&self, key: &str) {
        let mut state = self.inner.state.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.to_string());
            self.inner.cond.notify_one();
        }
    }

    /// Stops the queue: pending keys drain, then `get` returns `None`.
    pub fn shut_down(&self) {
        let mut state = self.inner.state.lock();
        state.shutting_down = true;
        self.inner.cond.notify_all();
    }

    pub fn pending_len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn delayed_len(&self) -> usize {
        self.inner.state.lock().delayed.len()
    }

    pub fn num_requeues(&self, key: &str) -> u32 {
        self.inner
            .state
            .lock()
            .requeues
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    fn promote_due_delayed(state: &mut QueueState) {
        let now = Instant::now();
        let due: Vec<String> = state
            .delayed
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in due {
            state.delayed.remove(&key);
            Self::add_locked(state, &key);
        }
    }

    fn earliest_deadline(state: &QueueState) -> Option<Instant> {
        state.delayed.values().min().copied()
    }
}

fn rate_limit_delay(attempts: u32) -> Duration {
    let shifted = RATE_LIMIT_BASE_DELAY_MS
        .checked_shl(attempts.min(63))
        .unwrap_or(RATE_LIMIT_MAX_DELAY_MS);
    Duration::from_millis(shifted.min(RATE_LIMIT_MAX_DELAY_MS))
}
