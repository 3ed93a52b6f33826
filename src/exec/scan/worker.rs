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
//! Scanner thread body.
//!
//! Responsibilities:
//! - Opens one scanner per thread and drives it over a sequence of claimed tokens.
//! - Publishes batches into the bounded queue, keeping remote scans alive while blocked.
//! - Yields optional threads back to the arbiter when the process is over quota.
//!
//! Key exported interfaces:
//! - Types: `ScanWorkerContext`.
//! - Functions: `run_scanner_thread`.
//!
//! Exit order matters: the scanner is closed first, then the run state is updated, and the
//! thread slot is released last, after the run-state lock is dropped. Releasing a slot may
//! synchronously re-enter admission on this thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use super::dispatch::TokenDispatcher;
use super::queue::{BatchQueue, PushResult};
use super::state::ScanRunState;
use super::types::{ScanError, ScanToken, Scanner, ScannerFactory};
use crate::exec::batch::ResultBatch;
use crate::novascan_logging::debug;
use crate::runtime::thread_resource::ThreadArbiter;

const SLOW_ENQUEUE_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Everything a scanner thread shares with its scan node.
pub(super) struct ScanWorkerContext {
    pub(super) label: String,
    pub(super) run_state: Arc<ScanRunState>,
    pub(super) queue: Arc<BatchQueue>,
    pub(super) dispatcher: TokenDispatcher,
    pub(super) arbiter: Arc<dyn ThreadArbiter>,
    pub(super) scanner_factory: Arc<dyn ScannerFactory>,
    pub(super) enqueue_timeout: Duration,
    pub(super) tokens_completed: AtomicUsize,
}

/// Closes the scanner on every exit path, including unwinding.
struct ScannerGuard {
    scanner: Box<dyn Scanner>,
    closed: bool,
}

impl ScannerGuard {
    fn new(scanner: Box<dyn Scanner>) -> Self {
        Self {
            scanner,
            closed: false,
        }
    }

    fn scanner(&mut self) -> &mut dyn Scanner {
        self.scanner.as_mut()
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.scanner.close();
        }
    }
}

impl Drop for ScannerGuard {
    fn drop(&mut self) {
        self.close();
    }
}

/// Worker exit bookkeeping, run from `Drop` so a panicking scanner cannot leak the
/// active-worker count or the thread slot.
struct WorkerExit<'a> {
    ctx: &'a ScanWorkerContext,
    mandatory: bool,
    name: &'a str,
}

impl Drop for WorkerExit<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.ctx
                .run_state
                .record_error(ScanError::WorkerPanicked(self.name.to_string()));
        }
        self.ctx.run_state.finish_worker();
        debug!("Thread done: {}", self.name);
        self.ctx.arbiter.release(self.mandatory, false);
    }
}

/// Body of one scanner thread. `initial_token` was reserved for this thread by admission.
pub(super) fn run_scanner_thread(
    ctx: Arc<ScanWorkerContext>,
    mandatory: bool,
    name: String,
    initial_token: ScanToken,
) {
    let _exit = WorkerExit {
        ctx: &ctx,
        mandatory,
        name: &name,
    };
    debug!(
        "{} started: mandatory={} token={:?}",
        name, mandatory, initial_token
    );
    let mut scanner = ScannerGuard::new(ctx.scanner_factory.create());
    let status = scan_tokens(&ctx, scanner.scanner(), mandatory, initial_token);
    scanner.close();
    if let Err(err) = status {
        ctx.run_state.record_error(err);
    }
}

fn scan_tokens(
    ctx: &ScanWorkerContext,
    scanner: &mut dyn Scanner,
    mandatory: bool,
    initial_token: ScanToken,
) -> Result<(), ScanError> {
    scanner.open().map_err(ScanError::ScannerOpen)?;

    let mut token = Some(initial_token);
    while let Some(current) = token.take() {
        if ctx.run_state.is_done() {
            break;
        }
        process_token(ctx, scanner, &current)?;

        // Several optional threads may see the quota exceeded and all exit. The next
        // thread-available callback re-runs admission.
        if !mandatory && ctx.arbiter.optional_exceeded() {
            debug!("{}: optional thread quota exceeded, yielding", ctx.label);
            break;
        }
        token = ctx.dispatcher.next();
    }
    Ok(())
}

fn process_token(
    ctx: &ScanWorkerContext,
    scanner: &mut dyn Scanner,
    token: &ScanToken,
) -> Result<(), ScanError> {
    scanner
        .open_token(token)
        .map_err(ScanError::ScannerProcess)?;
    while !ctx.run_state.is_done() {
        let Some(batch) = scanner.next_batch().map_err(ScanError::ScannerProcess)? else {
            ctx.tokens_completed.fetch_add(1, Ordering::AcqRel);
            return Ok(());
        };
        if !enqueue_batch(ctx, scanner, batch) {
            break;
        }
    }
    Ok(())
}

/// Push `batch` into the queue, keeping the scanner alive on every timeout.
/// Returns false when the scan finished before the batch could be queued.
fn enqueue_batch(ctx: &ScanWorkerContext, scanner: &mut dyn Scanner, batch: ResultBatch) -> bool {
    let start = Instant::now();
    let mut last_log = start;
    let mut batch = batch;
    loop {
        match ctx.queue.put_with_timeout(batch, ctx.enqueue_timeout) {
            PushResult::Pushed => return true,
            PushResult::Shutdown(_) => return false,
            PushResult::TimedOut(rejected) => {
                if ctx.run_state.is_done() {
                    return false;
                }
                scanner.keep_alive();
                batch = rejected;
                if last_log.elapsed() >= SLOW_ENQUEUE_LOG_INTERVAL {
                    last_log = Instant::now();
                    debug!(
                        "{}: scanner blocked on full batch queue for {:?} (capacity={})",
                        ctx.label,
                        start.elapsed(),
                        ctx.queue.capacity()
                    );
                }
            }
        }
    }
}
