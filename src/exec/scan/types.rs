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
//! Scan capabilities and shared scan data types.
//!
//! Responsibilities:
//! - Defines the opaque scan token and the scan-path error kinds.
//! - Declares the external capabilities a threaded scan node drives: `TokenSource`,
//!   `Scanner`, and `ScannerFactory`.
//!
//! Key exported interfaces:
//! - Types: `ScanToken`, `ScanError`, `VecTokenSource`.
//! - Traits: `TokenSource`, `Scanner`, `ScannerFactory`.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use bytes::Bytes;
use thiserror::Error;

use crate::exec::batch::ResultBatch;

/// One unit of scannable work, such as a serialized partition/range descriptor.
///
/// Tokens are intentionally not `Clone`: once handed out by a `TokenSource` a token
/// belongs to exactly one worker.
#[derive(PartialEq, Eq, Hash)]
pub struct ScanToken(Bytes);

impl ScanToken {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ScanToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "ScanToken({s:?})"),
            Err(_) => write!(f, "ScanToken({} bytes)", self.0.len()),
        }
    }
}

impl From<&'static str> for ScanToken {
    fn from(value: &'static str) -> Self {
        Self(Bytes::from_static(value.as_bytes()))
    }
}

impl From<String> for ScanToken {
    fn from(value: String) -> Self {
        Self(Bytes::from(value))
    }
}

impl From<Vec<u8>> for ScanToken {
    fn from(value: Vec<u8>) -> Self {
        Self(Bytes::from(value))
    }
}

/// Errors that abort a threaded scan. Only the first one recorded is kept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("failed to open scanner: {0}")]
    ScannerOpen(String),
    #[error("scan failed: {0}")]
    ScannerProcess(String),
    #[error("failed to start scanner thread: {0}")]
    WorkerStart(String),
    #[error("scanner thread panicked: {0}")]
    WorkerPanicked(String),
}

/// Supplies scan tokens in a fixed order. Must tolerate concurrent callers.
pub trait TokenSource: Send + Sync {
    /// Total number of tokens this source was planned with.
    fn num_tokens(&self) -> usize;

    fn has_more(&self) -> bool;

    fn next(&self) -> Option<ScanToken>;
}

/// Drives scans of individual tokens. One scanner is owned by one worker thread.
pub trait Scanner: Send {
    fn open(&mut self) -> Result<(), String>;

    /// Start scanning `token`. Batches are then pulled with `next_batch`.
    fn open_token(&mut self, token: &ScanToken) -> Result<(), String>;

    /// Next batch of the current token, or `None` once the token is exhausted.
    fn next_batch(&mut self) -> Result<Option<ResultBatch>, String>;

    /// Keep the remote scan from expiring while the worker is blocked on backpressure.
    fn keep_alive(&mut self) {}

    /// Release scanner resources. Must be idempotent.
    fn close(&mut self);
}

/// Creates one scanner per worker thread.
pub trait ScannerFactory: Send + Sync {
    fn create(&self) -> Box<dyn Scanner>;
}

impl<F> ScannerFactory for F
where
    F: Fn() -> Box<dyn Scanner> + Send + Sync,
{
    fn create(&self) -> Box<dyn Scanner> {
        self()
    }
}

/// In-memory token source over a pre-planned token list.
pub struct VecTokenSource {
    tokens: Mutex<VecDeque<ScanToken>>,
    num_tokens: usize,
}

impl VecTokenSource {
    pub fn new(tokens: Vec<ScanToken>) -> Self {
        let num_tokens = tokens.len();
        Self {
            tokens: Mutex::new(tokens.into()),
            num_tokens,
        }
    }

    pub fn remaining(&self) -> usize {
        self.tokens.lock().expect("token source lock").len()
    }
}

impl FromIterator<ScanToken> for VecTokenSource {
    fn from_iter<I: IntoIterator<Item = ScanToken>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl TokenSource for VecTokenSource {
    fn num_tokens(&self) -> usize {
        self.num_tokens
    }

    fn has_more(&self) -> bool {
        !self.tokens.lock().expect("token source lock").is_empty()
    }

    fn next(&self) -> Option<ScanToken> {
        self.tokens.lock().expect("token source lock").pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_token_source_yields_in_order() {
        let source: VecTokenSource = ["a", "b", "c"].into_iter().map(ScanToken::from).collect();
        assert_eq!(source.num_tokens(), 3);
        assert_eq!(source.next().expect("a").as_bytes(), b"a");
        assert_eq!(source.next().expect("b").as_bytes(), b"b");
        assert!(source.has_more());
        assert_eq!(source.next().expect("c").as_bytes(), b"c");
        assert!(!source.has_more());
        assert!(source.next().is_none());
        assert_eq!(source.num_tokens(), 3);
        assert_eq!(source.remaining(), 0);
    }

    #[test]
    fn scan_token_debug_is_readable() {
        assert_eq!(format!("{:?}", ScanToken::from("p0")), "ScanToken(\"p0\")");
        assert_eq!(
            format!("{:?}", ScanToken::from(vec![0xff, 0xfe])),
            "ScanToken(2 bytes)"
        );
    }

    #[test]
    fn scan_error_messages() {
        let err = ScanError::WorkerStart("resource temporarily unavailable".to_string());
        assert_eq!(
            err.to_string(),
            "failed to start scanner thread: resource temporarily unavailable"
        );
    }
}
