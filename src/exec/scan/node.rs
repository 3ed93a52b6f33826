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
//! Multi-threaded scan node.
//!
//! Responsibilities:
//! - Wires the batch queue, run state, token dispatcher, and admission for one scan.
//! - Subscribes to the thread arbiter on open and unsubscribes on close.
//! - Serves the pull side: returns queued batches, enforces the row limit, and reports the
//!   recorded scan status on every call.
//!
//! Key exported interfaces:
//! - Types: `ThreadedScanNode`, `ScanNodeOptions`, `ScanFetch`.
//!
//! Batches are returned in queue order. With more than one scanner thread that order is
//! not token order.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::admission::{AdmissionController, OsThreadLauncher, WorkerLauncher};
use super::dispatch::TokenDispatcher;
use super::queue::BatchQueue;
use super::state::ScanRunState;
use super::types::{ScanError, ScannerFactory, TokenSource};
use super::worker::ScanWorkerContext;
use crate::common::config::{
    resolve_queue_capacity, scan_enqueue_timeout, scan_max_queue_batches,
    scan_max_scanner_threads, scan_row_limit,
};
use crate::common::types::{PlanNodeId, UniqueId};
use crate::exec::batch::ResultBatch;
use crate::novascan_logging::{debug, info};
use crate::runtime::thread_resource::{CallbackId, ThreadArbiter};

/// Tuning knobs of one threaded scan node.
#[derive(Clone, Debug)]
pub struct ScanNodeOptions {
    pub node_id: PlanNodeId,
    pub fragment_instance_id: UniqueId,
    /// Batch queue capacity. 0 derives it from `max_scanner_threads`.
    pub max_queue_batches: usize,
    /// Maximum number of concurrently running scanner threads for this node.
    pub max_scanner_threads: usize,
    /// Maximum number of rows returned to the consumer.
    pub row_limit: Option<usize>,
    /// Wait per enqueue attempt before keeping the scanner alive and re-checking done.
    pub enqueue_timeout: Duration,
}

impl ScanNodeOptions {
    /// Options for `node_id` populated from the `[scan]` config section.
    pub fn from_config(node_id: PlanNodeId) -> Self {
        let row_limit = usize::try_from(scan_row_limit()).unwrap_or(usize::MAX);
        Self {
            node_id,
            fragment_instance_id: UniqueId::default(),
            max_queue_batches: scan_max_queue_batches(),
            max_scanner_threads: scan_max_scanner_threads(),
            row_limit: (row_limit > 0).then_some(row_limit),
            enqueue_timeout: scan_enqueue_timeout(),
        }
    }

    pub fn with_fragment_instance_id(mut self, id: UniqueId) -> Self {
        self.fragment_instance_id = id;
        self
    }

    pub fn with_max_queue_batches(mut self, n: usize) -> Self {
        self.max_queue_batches = n;
        self
    }

    pub fn with_max_scanner_threads(mut self, n: usize) -> Self {
        self.max_scanner_threads = n.max(1);
        self
    }

    /// 0 means unbounded.
    pub fn with_row_limit(mut self, limit: usize) -> Self {
        self.row_limit = (limit > 0).then_some(limit);
        self
    }

    pub fn with_enqueue_timeout(mut self, timeout: Duration) -> Self {
        self.enqueue_timeout = timeout.max(Duration::from_millis(1));
        self
    }

    pub fn queue_capacity(&self) -> usize {
        resolve_queue_capacity(self.max_queue_batches, self.max_scanner_threads)
    }
}

impl Default for ScanNodeOptions {
    fn default() -> Self {
        Self::from_config(PlanNodeId::default())
    }
}

/// Result of one `get_next` call.
///
/// `status` is the scan's recorded status at the time of the call. It can be an error even
/// when `batch` is set, which distinguishes a partial result of an aborted scan from a
/// clean end of stream.
#[derive(Debug)]
pub struct ScanFetch {
    pub batch: Option<ResultBatch>,
    pub eos: bool,
    pub status: Result<(), ScanError>,
}

impl ScanFetch {
    fn eos(status: Result<(), ScanError>) -> Self {
        Self {
            batch: None,
            eos: true,
            status,
        }
    }
}

struct RunningScan {
    ctx: Arc<ScanWorkerContext>,
    admission: Arc<AdmissionController>,
    callback_id: Option<CallbackId>,
}

/// Scan node that runs an elastic pool of scanner threads over a set of scan tokens.
pub struct ThreadedScanNode {
    name: String,
    options: ScanNodeOptions,
    token_source: Arc<dyn TokenSource>,
    scanner_factory: Arc<dyn ScannerFactory>,
    arbiter: Arc<dyn ThreadArbiter>,
    launcher: Arc<dyn WorkerLauncher>,
    running: Option<RunningScan>,
    rows_returned: usize,
    closed: bool,
}

impl ThreadedScanNode {
    pub fn new(
        options: ScanNodeOptions,
        token_source: Arc<dyn TokenSource>,
        scanner_factory: Arc<dyn ScannerFactory>,
        arbiter: Arc<dyn ThreadArbiter>,
    ) -> Self {
        let name = format!("THREADED_SCAN (id={})", options.node_id);
        Self {
            name,
            options,
            token_source,
            scanner_factory,
            arbiter,
            launcher: Arc::new(OsThreadLauncher),
            running: None,
            rows_returned: 0,
            closed: false,
        }
    }

    /// Replace how scanner threads are started.
    pub fn with_launcher(mut self, launcher: Arc<dyn WorkerLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &ScanNodeOptions {
        &self.options
    }

    pub fn rows_returned(&self) -> usize {
        self.rows_returned
    }

    pub fn num_workers_started(&self) -> usize {
        self.running
            .as_ref()
            .map(|r| r.admission.num_started())
            .unwrap_or(0)
    }

    pub fn active_workers(&self) -> usize {
        self.running
            .as_ref()
            .map(|r| r.ctx.run_state.active_workers())
            .unwrap_or(0)
    }

    pub fn tokens_completed(&self) -> usize {
        self.running
            .as_ref()
            .map(|r| r.ctx.tokens_completed.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn is_done(&self) -> bool {
        self.running
            .as_ref()
            .map(|r| r.ctx.run_state.is_done())
            .unwrap_or(self.closed)
    }

    pub fn status(&self) -> Result<(), ScanError> {
        match &self.running {
            Some(r) => r.ctx.run_state.status(),
            None => Ok(()),
        }
    }

    fn reached_limit(&self) -> bool {
        self.options
            .row_limit
            .is_some_and(|limit| self.rows_returned >= limit)
    }

    /// Subscribe to the arbiter and run the first admission pass.
    ///
    /// Returns the scan status after that pass, so a failure to start the first scanner
    /// threads is reported here as well as on the next `get_next`.
    pub fn open(&mut self) -> Result<(), ScanError> {
        if self.closed || self.running.is_some() {
            return self.status();
        }
        let capacity = self.options.queue_capacity();
        let queue = Arc::new(BatchQueue::new(capacity));
        let run_state = Arc::new(ScanRunState::new(Arc::clone(&queue)));
        let dispatcher =
            TokenDispatcher::new(Arc::clone(&self.token_source), Arc::clone(&run_state));
        let ctx = Arc::new(ScanWorkerContext {
            label: self.name.clone(),
            run_state,
            queue,
            dispatcher,
            arbiter: Arc::clone(&self.arbiter),
            scanner_factory: Arc::clone(&self.scanner_factory),
            enqueue_timeout: self.options.enqueue_timeout,
            tokens_completed: AtomicUsize::new(0),
        });
        let admission = Arc::new(AdmissionController::new(
            Arc::clone(&ctx),
            Arc::clone(&self.launcher),
            self.options.max_scanner_threads,
            self.options.fragment_instance_id,
            self.options.node_id,
        ));

        let weak = Arc::downgrade(&admission);
        let callback_id = self.arbiter.add_thread_available_cb(Arc::new(move || {
            if let Some(admission) = weak.upgrade() {
                admission.thread_available();
            }
        }));
        info!(
            "{} open: tokens={} queue_capacity={} max_scanner_threads={} row_limit={:?}",
            self.name,
            self.token_source.num_tokens(),
            capacity,
            admission.concurrency_ceiling(),
            self.options.row_limit
        );
        self.running = Some(RunningScan {
            ctx,
            admission: Arc::clone(&admission),
            callback_id: Some(callback_id),
        });

        admission.thread_available();
        if let Some(running) = &self.running {
            let ctx = &running.ctx;
            // A source drained before open leaves nothing to start a thread for.
            if ctx.run_state.active_workers() == 0 && !ctx.dispatcher.has_more() {
                ctx.run_state.mark_done();
            }
        }
        self.status()
    }

    /// Return the next batch produced by the scanner threads.
    ///
    /// Blocks while the queue is empty and the scan is still running.
    pub fn get_next(&mut self) -> ScanFetch {
        let Some(running) = self.running.as_ref() else {
            return ScanFetch::eos(Ok(()));
        };
        let ctx = Arc::clone(&running.ctx);
        // With no tokens nothing is ever queued, so do not wait on the queue.
        if self.reached_limit() || ctx.dispatcher.num_tokens() == 0 {
            return ScanFetch::eos(ctx.run_state.status());
        }

        let Some(batch) = ctx.queue.get() else {
            return ScanFetch::eos(ctx.run_state.status());
        };
        self.rows_returned += batch.num_rows();
        let mut batch = batch;
        let mut eos = false;
        if let Some(limit) = self.options.row_limit
            && self.rows_returned >= limit
        {
            let keep = batch.num_rows() - (self.rows_returned - limit);
            batch = batch.truncate(keep);
            self.rows_returned = limit;
            eos = true;
            // Everything still queued or being scanned is surplus now.
            ctx.run_state.mark_done();
            debug!("{} reached row limit {}", self.name, limit);
        }
        ScanFetch {
            batch: Some(batch),
            eos,
            status: ctx.run_state.status(),
        }
    }

    /// Stop the scan without recording an error.
    pub fn cancel(&self) {
        if let Some(running) = &self.running {
            running.ctx.run_state.mark_done();
        }
    }

    /// Unsubscribe from the arbiter, stop the scan, and join every scanner thread.
    /// Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let Some(running) = self.running.as_mut() else {
            return;
        };
        if let Some(id) = running.callback_id.take() {
            self.arbiter.remove_thread_available_cb(id);
        }
        running.ctx.run_state.mark_done();
        running.admission.join_workers();
        let dropped = running.ctx.queue.clear();
        debug!(
            "{} closed: workers_started={} tokens_dispatched={} tokens_completed={} rows_returned={} dropped_batches={}",
            self.name,
            running.admission.num_started(),
            running.ctx.dispatcher.num_dispatched(),
            running.ctx.tokens_completed.load(Ordering::Acquire),
            self.rows_returned,
            dropped
        );
    }
}

impl Drop for ThreadedScanNode {
    fn drop(&mut self) {
        self.close();
    }
}
