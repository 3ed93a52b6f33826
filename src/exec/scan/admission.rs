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
//! Scanner thread admission.
//!
//! Responsibilities:
//! - Reacts to thread-available notifications by starting scanner threads, up to the
//!   per-node ceiling and as far as the arbiter grants optional slots.
//! - Guarantees one mandatory thread whenever tokens remain and no thread is running.
//! - Aborts the scan on the first thread-creation failure.
//!
//! Key exported interfaces:
//! - Types: `AdmissionController`, `WorkerRecord`, `OsThreadLauncher`.
//! - Traits: `WorkerLauncher`.
//!
//! Admission passes are serialized by their own mutex. The run-state lock is only taken
//! for short reads and updates, never across arbiter calls or thread creation.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use super::types::ScanError;
use super::worker::{ScanWorkerContext, run_scanner_thread};
use crate::common::types::{PlanNodeId, UniqueId};
use crate::novascan_logging::{debug, warn};

/// Work executed on a newly started scanner thread.
pub type WorkerBody = Box<dyn FnOnce() + Send + 'static>;

/// Starts scanner threads. Failing to start one aborts the scan.
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, name: String, body: WorkerBody) -> io::Result<JoinHandle<()>>;
}

/// Launches each scanner thread as a named OS thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsThreadLauncher;

impl WorkerLauncher for OsThreadLauncher {
    fn launch(&self, name: String, body: WorkerBody) -> io::Result<JoinHandle<()>> {
        thread::Builder::new().name(name).spawn(body)
    }
}

/// A started scanner thread, joined when the scan node closes.
pub struct WorkerRecord {
    pub name: String,
    pub mandatory: bool,
    handle: JoinHandle<()>,
}

/// Decides, on every thread-available notification, how many scanner threads to start.
pub struct AdmissionController {
    ctx: Arc<ScanWorkerContext>,
    launcher: Arc<dyn WorkerLauncher>,
    concurrency_ceiling: usize,
    fragment_instance_id: UniqueId,
    node_id: PlanNodeId,
    admit_lock: Mutex<()>,
    workers: Mutex<Vec<WorkerRecord>>,
    num_started: AtomicUsize,
}

impl AdmissionController {
    pub(super) fn new(
        ctx: Arc<ScanWorkerContext>,
        launcher: Arc<dyn WorkerLauncher>,
        concurrency_ceiling: usize,
        fragment_instance_id: UniqueId,
        node_id: PlanNodeId,
    ) -> Self {
        Self {
            ctx,
            launcher,
            concurrency_ceiling: concurrency_ceiling.max(1),
            fragment_instance_id,
            node_id,
            admit_lock: Mutex::new(()),
            workers: Mutex::new(Vec::new()),
            num_started: AtomicUsize::new(0),
        }
    }

    pub fn concurrency_ceiling(&self) -> usize {
        self.concurrency_ceiling
    }

    pub fn num_started(&self) -> usize {
        self.num_started.load(Ordering::Acquire)
    }

    /// Start as many scanner threads as the ceiling and the arbiter allow.
    ///
    /// Called once when the scan opens and then from the arbiter's thread-available
    /// callback, possibly on a scanner thread that is releasing its own slot.
    pub fn thread_available(&self) {
        let _admit = self.admit_lock.lock().expect("scan admission lock");
        let ctx = &self.ctx;
        let arbiter = &ctx.arbiter;
        while ctx.dispatcher.has_more() {
            // Count the thread before it claims a token. A running thread that finds the
            // source drained in the meantime then exits without ending the scan.
            let Some(active) = ctx.run_state.reserve_worker() else {
                break;
            };

            // Without a running thread nothing else would make progress, so the first
            // thread takes a slot the arbiter cannot refuse.
            let mandatory = active == 0;
            if mandatory {
                arbiter.acquire_mandatory();
            } else if active >= self.concurrency_ceiling || !arbiter.try_acquire_optional() {
                ctx.run_state.cancel_reservation();
                break;
            }

            let Some(token) = ctx.dispatcher.next() else {
                arbiter.release(mandatory, true);
                ctx.run_state.cancel_reservation();
                break;
            };

            let idx = self.num_started.load(Ordering::Acquire);
            let name = self.worker_name(idx);
            let worker_ctx = Arc::clone(ctx);
            let worker_name = name.clone();
            let body: WorkerBody =
                Box::new(move || run_scanner_thread(worker_ctx, mandatory, worker_name, token));
            match self.launcher.launch(name.clone(), body) {
                Ok(handle) => {
                    self.num_started.fetch_add(1, Ordering::AcqRel);
                    debug!("{}: started {} (mandatory={})", ctx.label, name, mandatory);
                    self.workers
                        .lock()
                        .expect("scan workers lock")
                        .push(WorkerRecord {
                            name,
                            mandatory,
                            handle,
                        });
                }
                Err(err) => {
                    // Skip callbacks on release: they would re-enter this pass, and a
                    // failed thread creation is likely to keep failing.
                    warn!("{}: failed to start {}: {}", ctx.label, name, err);
                    ctx.run_state.record_error(ScanError::WorkerStart(err.to_string()));
                    arbiter.release(mandatory, true);
                    ctx.run_state.cancel_reservation();
                    break;
                }
            }
        }
    }

    fn worker_name(&self, idx: usize) -> String {
        format!(
            "scan-worker (finst:{}, node:{}, idx:{})",
            self.fragment_instance_id, self.node_id, idx
        )
    }

    /// Wait for every started scanner thread to exit. The scan must already be done.
    pub(super) fn join_workers(&self) {
        debug_assert!(self.ctx.run_state.is_done());
        // An admission pass that began before `done` may still be starting a thread.
        drop(self.admit_lock.lock().expect("scan admission lock"));
        let workers = std::mem::take(&mut *self.workers.lock().expect("scan workers lock"));
        for worker in workers {
            if worker.handle.join().is_err() {
                warn!(
                    "{}: {} exited by panic (mandatory={})",
                    self.ctx.label, worker.name, worker.mandatory
                );
            }
        }
    }
}
