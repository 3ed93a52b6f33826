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
//! Bounded batch queue between scanner threads and the scan consumer.
//!
//! Responsibilities:
//! - Buffers at most `capacity` materialized batches (backpressure on scanner threads).
//! - Offers a timed enqueue so blocked producers can poll cancellation and keep their
//!   remote scans alive.
//! - Drains remaining batches after shutdown, then reports closed.
//!
//! Key exported interfaces:
//! - Types: `BatchQueue`, `PushResult`.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::exec::batch::ResultBatch;

struct QueueState {
    batches: VecDeque<ResultBatch>,
    shutdown: bool,
}

/// Result of offering one batch to the queue. Ownership of a rejected batch is handed back.
#[derive(Debug)]
pub enum PushResult {
    Pushed,
    TimedOut(ResultBatch),
    Shutdown(ResultBatch),
}

/// Fixed-capacity FIFO of result batches with blocking get and timed put.
pub struct BatchQueue {
    mu: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl BatchQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            mu: Mutex::new(QueueState {
                batches: VecDeque::with_capacity(capacity),
                shutdown: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.mu.lock().expect("batch queue lock").batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_shutdown(&self) -> bool {
        self.mu.lock().expect("batch queue lock").shutdown
    }

    /// Enqueue `batch`, waiting at most `timeout` for a free slot.
    pub fn put_with_timeout(&self, batch: ResultBatch, timeout: Duration) -> PushResult {
        let deadline = Instant::now() + timeout;
        let mut guard = self.mu.lock().expect("batch queue lock");
        loop {
            if guard.shutdown {
                return PushResult::Shutdown(batch);
            }
            if guard.batches.len() < self.capacity {
                guard.batches.push_back(batch);
                drop(guard);
                self.not_empty.notify_one();
                return PushResult::Pushed;
            }
            let now = Instant::now();
            if now >= deadline {
                return PushResult::TimedOut(batch);
            }
            let (next, _) = self
                .not_full
                .wait_timeout(guard, deadline - now)
                .expect("batch queue wait");
            guard = next;
        }
    }

    /// Dequeue the oldest batch, blocking while the queue is empty and open.
    /// Returns `None` once the queue is shut down and fully drained.
    pub fn get(&self) -> Option<ResultBatch> {
        let mut guard = self.mu.lock().expect("batch queue lock");
        loop {
            if let Some(batch) = guard.batches.pop_front() {
                drop(guard);
                self.not_full.notify_one();
                return Some(batch);
            }
            if guard.shutdown {
                return None;
            }
            guard = self.not_empty.wait(guard).expect("batch queue wait");
        }
    }

    /// Reject further puts and wake every blocked producer and consumer. Idempotent.
    pub fn shutdown(&self) {
        let mut guard = self.mu.lock().expect("batch queue lock");
        guard.shutdown = true;
        drop(guard);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Drop every buffered batch. Used on close after all producers have exited.
    pub fn clear(&self) -> usize {
        let mut guard = self.mu.lock().expect("batch queue lock");
        let dropped = guard.batches.len();
        guard.batches.clear();
        drop(guard);
        self.not_full.notify_all();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int32Array;
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::thread;

    fn batch_of(rows: usize) -> ResultBatch {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int32, false)]));
        let values = (0..rows as i32).collect::<Vec<_>>();
        let array = Arc::new(Int32Array::from(values)) as arrow::array::ArrayRef;
        ResultBatch::new(RecordBatch::try_new(schema, vec![array]).expect("record batch"))
    }

    #[test]
    fn put_times_out_when_full_and_returns_batch() {
        let queue = BatchQueue::new(1);
        assert!(matches!(
            queue.put_with_timeout(batch_of(1), Duration::from_millis(10)),
            PushResult::Pushed
        ));
        match queue.put_with_timeout(batch_of(2), Duration::from_millis(20)) {
            PushResult::TimedOut(batch) => assert_eq!(batch.num_rows(), 2),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn get_preserves_fifo_order() {
        let queue = BatchQueue::new(4);
        for rows in [3, 1, 2] {
            assert!(matches!(
                queue.put_with_timeout(batch_of(rows), Duration::from_millis(10)),
                PushResult::Pushed
            ));
        }
        let order = (0..3)
            .map(|_| queue.get().expect("batch").num_rows())
            .collect::<Vec<_>>();
        assert_eq!(order, vec![3, 1, 2]);
    }

    #[test]
    fn shutdown_drains_then_closes() {
        let queue = BatchQueue::new(2);
        assert!(matches!(
            queue.put_with_timeout(batch_of(5), Duration::from_millis(10)),
            PushResult::Pushed
        ));
        queue.shutdown();
        queue.shutdown();
        assert!(matches!(
            queue.put_with_timeout(batch_of(1), Duration::from_millis(10)),
            PushResult::Shutdown(_)
        ));
        assert_eq!(queue.get().expect("drained batch").num_rows(), 5);
        assert!(queue.get().is_none());
    }

    #[test]
    fn blocked_producer_unblocks_on_get() {
        let queue = Arc::new(BatchQueue::new(1));
        assert!(matches!(
            queue.put_with_timeout(batch_of(1), Duration::from_millis(10)),
            PushResult::Pushed
        ));
        let producer_queue = Arc::clone(&queue);
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            let res = producer_queue.put_with_timeout(batch_of(2), Duration::from_secs(5));
            let _ = tx.send(matches!(res, PushResult::Pushed));
        });
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(queue.get().expect("first").num_rows(), 1);
        assert!(rx.recv_timeout(Duration::from_secs(5)).expect("producer result"));
        handle.join().expect("producer join");
        assert!(queue.len() <= queue.capacity());
    }

    #[test]
    fn shutdown_wakes_blocked_consumer() {
        let queue = Arc::new(BatchQueue::new(1));
        let consumer_queue = Arc::clone(&queue);
        let handle = thread::spawn(move || consumer_queue.get().is_none());
        thread::sleep(Duration::from_millis(20));
        queue.shutdown();
        assert!(handle.join().expect("consumer join"));
    }

    #[test]
    fn clear_drops_buffered_batches() {
        let queue = BatchQueue::new(3);
        for rows in [1, 2] {
            let _ = queue.put_with_timeout(batch_of(rows), Duration::from_millis(10));
        }
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }
}
