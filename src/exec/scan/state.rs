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
//! Shared run state of one threaded scan.
//!
//! Responsibilities:
//! - Guards `done`, the first recorded error, and the active worker count under one lock.
//! - Shuts the batch queue down exactly once, on the transition to done.
//!
//! Key exported interfaces:
//! - Types: `ScanRunState`.
//!
//! The lock is only held for field updates. Callers must not hold it across arbiter calls,
//! thread creation, or scanner I/O.

use std::sync::{Arc, Mutex, MutexGuard};

use super::queue::BatchQueue;
use super::types::ScanError;
use crate::novascan_logging::{debug, warn};

#[derive(Debug, Default)]
pub(super) struct RunStateInner {
    pub(super) done: bool,
    pub(super) status: Option<ScanError>,
    pub(super) active_workers: usize,
}

/// `done` flag, first-wins status, and active worker accounting for one scan node.
pub struct ScanRunState {
    inner: Mutex<RunStateInner>,
    queue: Arc<BatchQueue>,
}

impl ScanRunState {
    pub fn new(queue: Arc<BatchQueue>) -> Self {
        Self {
            inner: Mutex::new(RunStateInner::default()),
            queue,
        }
    }

    pub(super) fn lock(&self) -> MutexGuard<'_, RunStateInner> {
        self.inner.lock().expect("scan run state lock")
    }

    pub fn is_done(&self) -> bool {
        self.lock().done
    }

    /// Current status: `Err` once a failure has been recorded, `Ok` otherwise (including
    /// after a clean cancellation).
    pub fn status(&self) -> Result<(), ScanError> {
        match &self.lock().status {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    pub fn active_workers(&self) -> usize {
        self.lock().active_workers
    }

    /// Transition to done. Only the first caller shuts the queue down.
    pub fn mark_done(&self) {
        let transitioned = Self::mark_done_locked(&mut self.lock());
        if transitioned {
            self.queue.shutdown();
        }
    }

    /// Record `err` if no failure was recorded yet, then mark done.
    pub fn record_error(&self, err: ScanError) {
        let transitioned = {
            let mut guard = self.lock();
            if guard.status.is_none() {
                warn!("threaded scan aborted: {}", err);
                guard.status = Some(err);
            } else {
                debug!("threaded scan dropping secondary error: {}", err);
            }
            Self::mark_done_locked(&mut guard)
        };
        if transitioned {
            self.queue.shutdown();
        }
    }

    /// Returns true if this call performed the transition.
    fn mark_done_locked(guard: &mut RunStateInner) -> bool {
        if guard.done {
            return false;
        }
        guard.done = true;
        true
    }

    /// Count a worker that is about to start and return how many were counted before it.
    /// Refused once the scan is done.
    ///
    /// The reservation must be taken before the worker's first token is claimed: while it
    /// is held, a running worker that finds the source empty can never be the last one out.
    pub(super) fn reserve_worker(&self) -> Option<usize> {
        let mut guard = self.lock();
        if guard.done {
            return None;
        }
        let prior = guard.active_workers;
        guard.active_workers += 1;
        Some(prior)
    }

    /// Undo `reserve_worker` for a worker that never started. Like an exiting worker, the
    /// last reservation to go marks the scan done.
    pub(super) fn cancel_reservation(&self) {
        self.release_worker();
    }

    /// Account for an exiting worker. When the last one leaves, the scan is done:
    /// nothing is left to produce batches.
    pub(super) fn finish_worker(&self) {
        self.release_worker();
    }

    fn release_worker(&self) {
        let transitioned = {
            let mut guard = self.lock();
            debug_assert!(guard.active_workers > 0);
            guard.active_workers = guard.active_workers.saturating_sub(1);
            guard.active_workers == 0 && Self::mark_done_locked(&mut guard)
        };
        if transitioned {
            self.queue.shutdown();
        }
    }
}
