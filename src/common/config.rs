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
use std::time::Duration;

use crate::novascan_config::config as novascan_app_config;

/// Queue slots reserved per scanner thread when no explicit capacity is configured.
pub(crate) const DEFAULT_BATCHES_PER_SCANNER_THREAD: usize = 10;

fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

pub(crate) fn scan_max_queue_batches() -> usize {
    novascan_app_config()
        .ok()
        .map(|c| c.scan.max_queue_batches)
        .unwrap_or(0)
}

pub(crate) fn scan_max_scanner_threads() -> usize {
    novascan_app_config()
        .ok()
        .map(|c| c.scan.actual_scanner_threads())
        .unwrap_or_else(available_cores)
}

pub(crate) fn scan_row_limit() -> u64 {
    novascan_app_config()
        .ok()
        .map(|c| c.scan.row_limit)
        .unwrap_or(0)
}

pub(crate) fn scan_enqueue_timeout() -> Duration {
    let ms = novascan_app_config()
        .ok()
        .map(|c| c.scan.enqueue_timeout_ms)
        .unwrap_or(1_000);
    Duration::from_millis(ms.max(1))
}

pub(crate) fn scan_thread_quota() -> usize {
    novascan_app_config()
        .ok()
        .map(|c| c.scan.actual_thread_quota())
        .unwrap_or_else(available_cores)
}

/// Resolve the batch queue capacity for a scan node.
///
/// A positive `configured` value wins; otherwise the queue holds
/// `DEFAULT_BATCHES_PER_SCANNER_THREAD` batches per allowed scanner thread.
pub(crate) fn resolve_queue_capacity(configured: usize, max_scanner_threads: usize) -> usize {
    if configured > 0 {
        return configured;
    }
    DEFAULT_BATCHES_PER_SCANNER_THREAD
        .saturating_mul(max_scanner_threads.max(1))
        .max(1)
}
