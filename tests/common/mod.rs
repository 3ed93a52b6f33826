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
//! Common utilities and helpers for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use arrow::array::{ArrayRef, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use tempfile::TempDir;

use novascan::exec::scan::WorkerBody;
use novascan::{
    OsThreadLauncher, PlanNodeId, ResultBatch, ScanNodeOptions, ScanToken, Scanner,
    ScannerFactory, ThreadArbiter, ThreadResourcePool, ThreadedScanNode, TokenSource, UniqueId,
    VecTokenSource, WorkerLauncher, novascan_config, novascan_logging,
};

/// Test configuration for integration tests.
pub struct TestConfig {
    /// Temporary directory for test artifacts
    pub temp_dir: TempDir,
    /// Test config path
    pub config_path: PathBuf,
}

impl TestConfig {
    /// Create a new test configuration with small scan settings.
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let config_path = temp_dir.path().join("test_novascan.toml");

        let config_content = r#"
log_level = "debug"

[scan]
max_queue_batches = 4
max_scanner_threads = 2
row_limit = 0
enqueue_timeout_ms = 20
thread_quota = 4
"#;

        std::fs::write(&config_path, config_content)?;

        Ok(Self {
            temp_dir,
            config_path,
        })
    }

    /// Initialize logging for tests into the temp directory.
    pub fn init_logging(&self) {
        // SAFETY: set before the subscriber is installed; tests in one binary agree on it.
        unsafe {
            std::env::set_var(
                "NOVASCAN_LOG_FILE",
                self.temp_dir.path().join("novascan.log"),
            );
        }
        novascan_logging::init_with_level("debug");
    }

    /// Load the test configuration.
    pub fn load_config(&self) -> anyhow::Result<&'static novascan_config::NovaScanConfig> {
        novascan_config::init_from_path(&self.config_path)
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self::new().expect("Failed to create test config")
    }
}

pub fn test_fragment_instance_id() -> UniqueId {
    UniqueId::new(1234567890, 9876543210)
}

/// Options with explicit values, independent of any config file.
pub fn scan_options(max_scanner_threads: usize, max_queue_batches: usize) -> ScanNodeOptions {
    ScanNodeOptions::from_config(PlanNodeId::new(1))
        .with_fragment_instance_id(test_fragment_instance_id())
        .with_max_scanner_threads(max_scanner_threads)
        .with_max_queue_batches(max_queue_batches)
        .with_row_limit(0)
        .with_enqueue_timeout(Duration::from_millis(10))
}

pub fn int64_batch(values: Vec<i64>) -> ResultBatch {
    let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]));
    let array = Arc::new(Int64Array::from(values)) as ArrayRef;
    ResultBatch::new(RecordBatch::try_new(schema, vec![array]).expect("record batch"))
}

pub fn batch_values(batch: &ResultBatch) -> Vec<i64> {
    batch.columns()[0]
        .as_any()
        .downcast_ref::<Int64Array>()
        .expect("int64 column")
        .values()
        .to_vec()
}

/// What a scripted scanner does for one token.
#[derive(Clone, Debug)]
pub enum TokenScript {
    /// Emit these batches, each given as its row values.
    Batches(Vec<Vec<i64>>),
    /// Fail when the token is opened.
    Fail(String),
}

/// Shared observations across every scanner created by one factory.
#[derive(Default)]
pub struct ScanLog {
    pub claimed: Mutex<Vec<String>>,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub keep_alives: AtomicUsize,
    /// Tokens currently between `open_token` and their last batch.
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl ScanLog {
    pub fn claimed(&self) -> Vec<String> {
        self.claimed.lock().expect("claimed lock").clone()
    }
}

pub struct ScriptedScanner {
    scripts: Arc<HashMap<String, TokenScript>>,
    log: Arc<ScanLog>,
    fail_open: Option<String>,
    pending: Vec<Vec<i64>>,
    scanning: bool,
}

impl Scanner for ScriptedScanner {
    fn open(&mut self) -> Result<(), String> {
        self.log.opened.fetch_add(1, Ordering::AcqRel);
        match &self.fail_open {
            Some(msg) => Err(msg.clone()),
            None => Ok(()),
        }
    }

    fn open_token(&mut self, token: &ScanToken) -> Result<(), String> {
        let key = String::from_utf8_lossy(token.as_bytes()).to_string();
        self.log.claimed.lock().expect("claimed lock").push(key.clone());
        match self.scripts.get(&key) {
            Some(TokenScript::Batches(batches)) => {
                self.pending = batches.iter().rev().cloned().collect();
                let now = self.log.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
                self.log.max_in_flight.fetch_max(now, Ordering::AcqRel);
                self.scanning = true;
                Ok(())
            }
            Some(TokenScript::Fail(msg)) => Err(msg.clone()),
            None => Err(format!("unknown token {key}")),
        }
    }

    fn next_batch(&mut self) -> Result<Option<ResultBatch>, String> {
        let next = self.pending.pop().map(int64_batch);
        if next.is_none() && self.scanning {
            self.scanning = false;
            self.log.in_flight.fetch_sub(1, Ordering::AcqRel);
        }
        Ok(next)
    }

    fn keep_alive(&mut self) {
        self.log.keep_alives.fetch_add(1, Ordering::AcqRel);
    }

    fn close(&mut self) {
        if self.scanning {
            self.scanning = false;
            self.log.in_flight.fetch_sub(1, Ordering::AcqRel);
        }
        self.log.closed.fetch_add(1, Ordering::AcqRel);
    }
}

pub struct ScriptedScannerFactory {
    scripts: Arc<HashMap<String, TokenScript>>,
    pub log: Arc<ScanLog>,
    fail_open: Option<String>,
}

impl ScannerFactory for ScriptedScannerFactory {
    fn create(&self) -> Box<dyn Scanner> {
        Box::new(ScriptedScanner {
            scripts: Arc::clone(&self.scripts),
            log: Arc::clone(&self.log),
            fail_open: self.fail_open.clone(),
            pending: Vec::new(),
            scanning: false,
        })
    }
}

/// A scripted scan: tokens in order plus what the scanner does for each.
pub struct ScanScript {
    tokens: Vec<(String, TokenScript)>,
    fail_open: Option<String>,
    last_claim_delay: Option<Duration>,
}

impl ScanScript {
    pub fn new() -> Self {
        Self {
            tokens: Vec::new(),
            fail_open: None,
            last_claim_delay: None,
        }
    }

    /// Stall every claim of the final token by `delay`.
    pub fn slow_last_claim(mut self, delay: Duration) -> Self {
        self.last_claim_delay = Some(delay);
        self
    }

    pub fn token(mut self, name: &str, script: TokenScript) -> Self {
        self.tokens.push((name.to_string(), script));
        self
    }

    pub fn fail_open(mut self, msg: &str) -> Self {
        self.fail_open = Some(msg.to_string());
        self
    }

    /// Total rows the script would produce if every token were scanned.
    pub fn total_rows(&self) -> usize {
        self.tokens
            .iter()
            .map(|(_, script)| match script {
                TokenScript::Batches(batches) => batches.iter().map(Vec::len).sum(),
                TokenScript::Fail(_) => 0,
            })
            .sum()
    }

    pub fn build(
        self,
        options: ScanNodeOptions,
        arbiter: Arc<dyn ThreadArbiter>,
    ) -> (ThreadedScanNode, Arc<ScanLog>) {
        let source: VecTokenSource = self
            .tokens
            .iter()
            .map(|(name, _)| ScanToken::from(name.clone()))
            .collect();
        let factory = ScriptedScannerFactory {
            scripts: Arc::new(self.tokens.into_iter().collect()),
            log: Arc::new(ScanLog::default()),
            fail_open: self.fail_open,
        };
        let log = Arc::clone(&factory.log);
        let source: Arc<dyn TokenSource> = match self.last_claim_delay {
            Some(delay) => Arc::new(SlowLastClaimSource {
                inner: source,
                delay,
            }),
            None => Arc::new(source),
        };
        let node = ThreadedScanNode::new(options, source, Arc::new(factory), arbiter);
        (node, log)
    }
}

/// Token source that sleeps while handing out its last token, holding any concurrent
/// claimer back for that long.
pub struct SlowLastClaimSource {
    inner: VecTokenSource,
    delay: Duration,
}

impl TokenSource for SlowLastClaimSource {
    fn num_tokens(&self) -> usize {
        self.inner.num_tokens()
    }

    fn has_more(&self) -> bool {
        self.inner.has_more()
    }

    fn next(&self) -> Option<ScanToken> {
        if self.inner.remaining() == 1 {
            std::thread::sleep(self.delay);
        }
        self.inner.next()
    }
}

impl Default for ScanScript {
    fn default() -> Self {
        Self::new()
    }
}

/// Fails the `fail_at`-th launch attempt (0-based) and starts real threads otherwise.
pub struct FailingLauncher {
    pub fail_at: usize,
    pub attempts: AtomicUsize,
}

impl FailingLauncher {
    pub fn new(fail_at: usize) -> Self {
        Self {
            fail_at,
            attempts: AtomicUsize::new(0),
        }
    }
}

impl WorkerLauncher for FailingLauncher {
    fn launch(&self, name: String, body: WorkerBody) -> io::Result<JoinHandle<()>> {
        let attempt = self.attempts.fetch_add(1, Ordering::AcqRel);
        if attempt == self.fail_at {
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "Resource temporarily unavailable",
            ));
        }
        OsThreadLauncher.launch(name, body)
    }
}

pub fn pool(quota: usize) -> Arc<ThreadResourcePool> {
    Arc::new(ThreadResourcePool::new(quota))
}

/// Pull until end of stream, returning every batch and the final status.
pub fn drain(
    node: &mut ThreadedScanNode,
) -> (Vec<ResultBatch>, Result<(), novascan::ScanError>) {
    let mut batches = Vec::new();
    loop {
        let fetch = node.get_next();
        if let Some(batch) = fetch.batch {
            batches.push(batch);
        }
        if fetch.eos {
            return (batches, fetch.status);
        }
    }
}
