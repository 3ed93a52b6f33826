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
//! Scan token dispatch.
//!
//! Responsibilities:
//! - Hands each scan token to exactly one requesting worker (or admission pass).
//! - Stops handing out tokens as soon as the scan is done, even if tokens remain.
//!
//! Key exported interfaces:
//! - Types: `TokenDispatcher`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::state::ScanRunState;
use super::types::{ScanToken, TokenSource};

/// Serializes token claims against the scan run state.
pub struct TokenDispatcher {
    source: Arc<dyn TokenSource>,
    run_state: Arc<ScanRunState>,
    num_dispatched: AtomicUsize,
}

impl TokenDispatcher {
    pub fn new(source: Arc<dyn TokenSource>, run_state: Arc<ScanRunState>) -> Self {
        Self {
            source,
            run_state,
            num_dispatched: AtomicUsize::new(0),
        }
    }

    pub fn num_tokens(&self) -> usize {
        self.source.num_tokens()
    }

    pub fn num_dispatched(&self) -> usize {
        self.num_dispatched.load(Ordering::Acquire)
    }

    pub fn has_more(&self) -> bool {
        self.source.has_more()
    }

    /// Claim the next token, or `None` when exhausted or the scan is done.
    pub fn next(&self) -> Option<ScanToken> {
        // Claims happen under the run-state lock so a token is never handed out after
        // `done` became visible to other threads.
        let guard = self.run_state.lock();
        if guard.done {
            return None;
        }
        let token = self.source.next();
        drop(guard);
        if token.is_some() {
            self.num_dispatched.fetch_add(1, Ordering::AcqRel);
        }
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::scan::queue::BatchQueue;
    use crate::exec::scan::types::VecTokenSource;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::thread;

    fn dispatcher_for(n: usize) -> (Arc<ScanRunState>, TokenDispatcher) {
        let run_state = Arc::new(ScanRunState::new(Arc::new(BatchQueue::new(1))));
        let source: VecTokenSource = (0..n).map(|i| ScanToken::from(format!("t{i}"))).collect();
        let dispatcher = TokenDispatcher::new(Arc::new(source), Arc::clone(&run_state));
        (run_state, dispatcher)
    }

    #[test]
    fn dispatch_stops_when_done() {
        let (run_state, dispatcher) = dispatcher_for(3);
        assert!(dispatcher.next().is_some());
        run_state.mark_done();
        assert!(dispatcher.has_more());
        assert!(dispatcher.next().is_none());
        assert_eq!(dispatcher.num_dispatched(), 1);
    }

    #[test]
    fn concurrent_dispatch_is_exact() {
        let (_run_state, dispatcher) = dispatcher_for(500);
        let dispatcher = Arc::new(dispatcher);
        let claimed = Arc::new(Mutex::new(Vec::new()));
        let handles = (0..8)
            .map(|_| {
                let dispatcher = Arc::clone(&dispatcher);
                let claimed = Arc::clone(&claimed);
                thread::spawn(move || {
                    while let Some(token) = dispatcher.next() {
                        claimed
                            .lock()
                            .expect("claimed lock")
                            .push(token.as_bytes().to_vec());
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().expect("join");
        }
        let claimed = claimed.lock().expect("claimed lock");
        assert_eq!(claimed.len(), 500);
        let unique = claimed.iter().cloned().collect::<HashSet<_>>();
        assert_eq!(unique.len(), 500);
        assert_eq!(dispatcher.num_dispatched(), 500);
        assert_eq!(dispatcher.num_tokens(), 500);
    }
}
