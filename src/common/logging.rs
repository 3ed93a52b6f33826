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
//! Process logging for scan execution.
//!
//! Lines use the glog layout `Lyyyymmdd hh:mm:ss.uuuuuu thread file:line] message`, with the
//! thread column showing the scanner thread name (`scan-worker (finst:.., node:.., idx:..)`)
//! where one is set. Output goes to `$NOVASCAN_LOG_FILE`, else `novascan.log` under
//! `$NOVASCAN_LOG_DIR`, `$LOG_DIR` or `./log`, and falls back to stderr when that file cannot
//! be opened.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Local};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt};

use crate::novascan_config::NovaScanConfig;

static INIT: OnceLock<()> = OnceLock::new();

const DEFAULT_LOG_DIR: &str = "log";
const LOG_FILE_NAME: &str = "novascan.log";

struct GlogFormatter;

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn resolve_log_file_path(env: impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(log_path) = non_empty(env("NOVASCAN_LOG_FILE")) {
        return PathBuf::from(log_path);
    }
    let log_dir = non_empty(env("NOVASCAN_LOG_DIR"))
        .or_else(|| non_empty(env("LOG_DIR")))
        .unwrap_or_else(|| DEFAULT_LOG_DIR.to_string());
    PathBuf::from(log_dir).join(LOG_FILE_NAME)
}

fn open_log_file(path: &Path) -> Option<Arc<File>> {
    if let Some(parent) = path.parent()
        && let Err(err) = fs::create_dir_all(parent)
    {
        eprintln!(
            "failed to create log directory {}: {}, fallback to stderr",
            parent.display(),
            err
        );
        return None;
    }
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Some(Arc::new(file)),
        Err(err) => {
            eprintln!(
                "failed to open log file {}: {}, fallback to stderr",
                path.display(),
                err
            );
            None
        }
    }
}

fn level_char(level: &tracing::Level) -> char {
    match *level {
        tracing::Level::ERROR => 'E',
        tracing::Level::WARN => 'W',
        tracing::Level::INFO => 'I',
        tracing::Level::DEBUG => 'D',
        tracing::Level::TRACE => 'T',
    }
}

fn glog_timestamp(now: &DateTime<Local>) -> String {
    now.format("%Y%m%d %H:%M:%S%.6f").to_string()
}

/// Name of the current thread, or its numeric id for unnamed threads.
fn thread_label() -> String {
    let current = std::thread::current();
    match current.name() {
        Some(name) => name.to_string(),
        None => format!("{:?}", current.id())
            .trim_start_matches("ThreadId(")
            .trim_end_matches(')')
            .to_string(),
    }
}

impl<S, N> FormatEvent<S, N> for GlogFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &tracing_fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(
            writer,
            "{}{} {} {}:{}] ",
            level_char(metadata.level()),
            glog_timestamp(&Local::now()),
            thread_label(),
            metadata.file().unwrap_or("unknown"),
            metadata.line().unwrap_or(0)
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Install the global subscriber with `filter` (a level or per-target directives such as
/// `"warn,novascan=debug"`). Only the first call has an effect.
pub fn init_with_level(filter: &str) {
    INIT.get_or_init(|| {
        let path = resolve_log_file_path(|name| std::env::var(name).ok());
        let (writer, ansi) = match open_log_file(&path) {
            Some(file) => (BoxMakeWriter::new(file), false),
            None => (
                BoxMakeWriter::new(std::io::stderr),
                atty::is(atty::Stream::Stderr),
            ),
        };
        let _ = tracing_fmt()
            .with_env_filter(EnvFilter::new(filter))
            .with_writer(writer)
            .with_ansi(ansi)
            .event_format(GlogFormatter)
            .try_init();
    });
}

pub fn init_from_config(cfg: &NovaScanConfig) {
    init_with_level(cfg.effective_log_filter());
}

pub fn init() {
    init_with_level("info");
}

pub use tracing::{debug, error, info, trace, warn};
