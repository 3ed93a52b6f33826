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
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static CONFIG: OnceLock<NovaScanConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static NovaScanConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = path.as_ref().to_path_buf();
    let cfg = NovaScanConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    CONFIG
        .get()
        .ok_or_else(|| anyhow!("config not initialized after load: {}", path.display()))
}

pub fn init_from_env_or_default() -> Result<&'static NovaScanConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = config_path_from_env_or_default()?;
    init_from_path(path)
}

pub fn config() -> Result<&'static NovaScanConfig> {
    init_from_env_or_default()
}

fn config_path_from_env_or_default() -> Result<PathBuf> {
    if let Ok(p) = std::env::var("NOVASCAN_CONFIG") {
        if !p.trim().is_empty() {
            return Ok(PathBuf::from(p));
        }
    }

    let candidate = PathBuf::from("novascan.toml");
    if candidate.exists() {
        return Ok(candidate);
    }

    Err(anyhow!(
        "missing config file: set $NOVASCAN_CONFIG or create ./novascan.toml"
    ))
}

#[derive(Clone, Debug, Deserialize)]
pub struct NovaScanConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression.
    /// If set, this takes precedence over `log_level`.
    /// Example: "novascan=debug"
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub scan: ScanConfig,
}

impl NovaScanConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        let cfg: NovaScanConfig =
            toml::from_str(&s).with_context(|| format!("parse toml: {}", path.display()))?;
        Ok(cfg)
    }

    /// Filter expression handed to the tracing subscriber.
    pub fn effective_log_filter(&self) -> &str {
        self.log_filter
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .unwrap_or(&self.log_level)
    }
}

impl Default for NovaScanConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            scan: ScanConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ScanConfig {
    /// Capacity of the per-node batch queue. 0 derives it from the thread ceiling.
    #[serde(default)]
    pub max_queue_batches: usize,
    /// Maximum number of scanner threads per scan node. 0 means CPU cores.
    #[serde(default)]
    pub max_scanner_threads: usize,
    /// Row limit applied by the consumer. 0 means unbounded.
    #[serde(default)]
    pub row_limit: u64,
    /// How long a worker waits for queue capacity before keeping the scanner alive
    /// and re-checking cancellation.
    #[serde(default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,
    /// Process-wide scanner thread quota. 0 means CPU cores.
    #[serde(default)]
    pub thread_quota: usize,
}

fn default_enqueue_timeout_ms() -> u64 {
    1_000
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_queue_batches: 0,
            max_scanner_threads: 0,
            row_limit: 0,
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
            thread_quota: 0,
        }
    }
}

fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl ScanConfig {
    /// Get the actual scanner thread ceiling.
    /// Returns CPU cores if configured as 0.
    pub fn actual_scanner_threads(&self) -> usize {
        if self.max_scanner_threads > 0 {
            self.max_scanner_threads
        } else {
            available_cores()
        }
    }

    /// Get the actual process-wide thread quota.
    /// Returns CPU cores if configured as 0.
    pub fn actual_thread_quota(&self) -> usize {
        if self.thread_quota > 0 {
            self.thread_quota
        } else {
            available_cores()
        }
    }
}
