// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Process-wide scanner thread arbitration.
//!
//! Responsibilities:
//! - Defines the `ThreadArbiter` contract consumed by multi-threaded scan nodes.
//! - Provides `ThreadResourcePool`, a quota shared by every scan node in the process.
//!
//! Key exported interfaces:
//! - Traits: `ThreadArbiter`.
//! - Types: `ThreadResourcePool`, `CallbackId`, `ThreadAvailableCb`.
//! - Functions: `scan_thread_pool`.
//!
//! A mandatory acquisition always succeeds, even above quota, so that every scan node can
//! make progress with one thread. Optional acquisitions only succeed below quota.
//! Thread-available callbacks are invoked without holding the pool lock: callers may
//! re-enter the pool from inside a callback.

use std::sync::{Arc, Mutex, OnceLock};

use crate::common::config::scan_thread_quota;
use crate::novascan_logging::debug;

/// Callback invoked when a thread slot may have become available.
pub type ThreadAvailableCb = Arc<dyn Fn() + Send + Sync + 'static>;

/// Handle returned by `add_thread_available_cb`, used to unsubscribe.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct CallbackId(u64);

/// Grants and revokes scanner thread slots across concurrently running scan nodes.
pub trait ThreadArbiter: Send + Sync {
    /// Acquire a slot that is always granted.
    fn acquire_mandatory(&self);

    /// Acquire a slot only if the quota has room for it.
    fn try_acquire_optional(&self) -> bool;

    /// Return a slot. Unless `skip_callbacks` is set, registered callbacks may run
    /// synchronously on the calling thread before this returns.
    fn release(&self, mandatory: bool, skip_callbacks: bool);

    /// True when more threads are in use than the quota allows.
    fn optional_exceeded(&self) -> bool;

    fn add_thread_available_cb(&self, cb: ThreadAvailableCb) -> CallbackId;

    fn remove_thread_available_cb(&self, id: CallbackId);
}

struct PoolState {
    quota: usize,
    num_required: usize,
    num_optional: usize,
    callbacks: Vec<(CallbackId, ThreadAvailableCb)>,
    next_callback_id: u64,
    // Round-robin start so one scan node does not always win freed slots.
    next_callback_idx: usize,
}

impl PoolState {
    fn in_use(&self) -> usize {
        self.num_required + self.num_optional
    }

    fn available(&self) -> usize {
        self.quota.saturating_sub(self.in_use())
    }
}

/// Fixed-quota thread pool accounting shared by scan nodes.
pub struct ThreadResourcePool {
    state: Mutex<PoolState>,
}

impl ThreadResourcePool {
    pub fn new(quota: usize) -> Self {
        Self {
            state: Mutex::new(PoolState {
                quota: quota.max(1),
                num_required: 0,
                num_optional: 0,
                callbacks: Vec::new(),
                next_callback_id: 0,
                next_callback_idx: 0,
            }),
        }
    }

    pub fn quota(&self) -> usize {
        self.state.lock().expect("thread pool lock").quota
    }

    pub fn num_threads(&self) -> usize {
        self.state.lock().expect("thread pool lock").in_use()
    }

    pub fn num_required_threads(&self) -> usize {
        self.state.lock().expect("thread pool lock").num_required
    }

    pub fn num_available(&self) -> usize {
        self.state.lock().expect("thread pool lock").available()
    }

    pub fn num_callbacks(&self) -> usize {
        self.state.lock().expect("thread pool lock").callbacks.len()
    }

    /// Change the quota. Growing it notifies subscribers of the new room.
    pub fn set_quota(&self, quota: usize) {
        let grew = {
            let mut guard = self.state.lock().expect("thread pool lock");
            let old = guard.quota;
            guard.quota = quota.max(1);
            guard.quota > old
        };
        debug!("ThreadResourcePool quota set to {}", quota.max(1));
        if grew {
            self.invoke_callbacks();
        }
    }

    fn invoke_callbacks(&self) {
        let to_run = {
            let mut guard = self.state.lock().expect("thread pool lock");
            if guard.available() == 0 || guard.callbacks.is_empty() {
                return;
            }
            let n = guard.callbacks.len();
            let start = guard.next_callback_idx % n;
            guard.next_callback_idx = (start + 1) % n;
            (0..n)
                .map(|i| Arc::clone(&guard.callbacks[(start + i) % n].1))
                .collect::<Vec<_>>()
        };
        for cb in to_run {
            cb();
        }
    }
}

impl ThreadArbiter for ThreadResourcePool {
    fn acquire_mandatory(&self) {
        let mut guard = self.state.lock().expect("thread pool lock");
        guard.num_required += 1;
    }

    fn try_acquire_optional(&self) -> bool {
        let mut guard = self.state.lock().expect("thread pool lock");
        if guard.in_use() >= guard.quota {
            return false;
        }
        guard.num_optional += 1;
        true
    }

    fn release(&self, mandatory: bool, skip_callbacks: bool) {
        {
            let mut guard = self.state.lock().expect("thread pool lock");
            if mandatory {
                debug_assert!(guard.num_required > 0, "release of unheld mandatory slot");
                guard.num_required = guard.num_required.saturating_sub(1);
            } else {
                debug_assert!(guard.num_optional > 0, "release of unheld optional slot");
                guard.num_optional = guard.num_optional.saturating_sub(1);
            }
        }
        if !skip_callbacks {
            self.invoke_callbacks();
        }
    }

    fn optional_exceeded(&self) -> bool {
        let guard = self.state.lock().expect("thread pool lock");
        guard.in_use() > guard.quota
    }

    fn add_thread_available_cb(&self, cb: ThreadAvailableCb) -> CallbackId {
        let mut guard = self.state.lock().expect("thread pool lock");
        let id = CallbackId(guard.next_callback_id);
        guard.next_callback_id += 1;
        guard.callbacks.push((id, cb));
        id
    }

    fn remove_thread_available_cb(&self, id: CallbackId) {
        let mut guard = self.state.lock().expect("thread pool lock");
        let before = guard.callbacks.len();
        guard.callbacks.retain(|(cb_id, _)| *cb_id != id);
        debug_assert_eq!(before, guard.callbacks.len() + 1, "unknown callback {id:?}");
    }
}

static SCAN_THREAD_POOL: OnceLock<Arc<ThreadResourcePool>> = OnceLock::new();

/// Process-wide scanner thread pool, sized from `[scan] thread_quota`.
pub fn scan_thread_pool() -> Arc<ThreadResourcePool> {
    let pool = SCAN_THREAD_POOL
        .get_or_init(|| Arc::new(ThreadResourcePool::new(scan_thread_quota())));
    Arc::clone(pool)
}
