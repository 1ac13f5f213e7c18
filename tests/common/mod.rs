//! Shared test setup: a `tracing` subscriber writing to the console and to an
//! NDJSON file.
//!
//! ```rust,ignore
//! mod common;
//!
//! #[test]
//! fn traced() {
//!     common::init_tracing();
//!     // ...
//! }
//! ```
//!
//! Environment:
//! - `RUST_LOG`: filter directives, e.g. `masstrie::tree=debug`
//! - `MASSTRIE_LOG_DIR`: directory for the log file (default `logs/`)
//! - `MASSTRIE_LOG_CONSOLE`: `0` turns console output off
//!
//! Library events only appear with `--features tracing`. The file is
//! `logs/masstrie.jsonl`, one JSON object per line:
//!
//! ```bash
//! jq 'select(.fields.message | test("split"))' logs/masstrie.jsonl
//! ```

#![allow(dead_code)]

use std::env;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::{Mutex, Once};

use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

static INIT: Once = Once::new();

/// Install the subscriber once per test binary.
pub fn init_tracing() {
    INIT.call_once(|| install(&TracingConfig::from_env()));
}

/// Where and how test logs are written.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub log_dir: PathBuf,
    pub log_file: String,
    pub console: bool,
    pub default_level: Level,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            log_file: "masstrie.jsonl".to_string(),
            console: true,
            default_level: Level::INFO,
        }
    }
}

impl TracingConfig {
    /// Defaults overridden by `MASSTRIE_LOG_DIR` and `MASSTRIE_LOG_CONSOLE`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = env::var("MASSTRIE_LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }
        if env::var("MASSTRIE_LOG_CONSOLE").is_ok_and(|v| v == "0") {
            config.console = false;
        }
        config
    }
}

fn filter(default_level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level.to_string()))
}

#[expect(clippy::expect_used)]
fn install(config: &TracingConfig) {
    fs::create_dir_all(&config.log_dir).expect("create log directory");

    // Append: nextest runs each test in its own process.
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(config.log_dir.join(&config.log_file))
        .expect("open log file");

    let console = config.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_thread_names(true)
            .with_target(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::CLOSE)
            .compact()
            .with_filter(filter(config.default_level))
    });

    let json = tracing_subscriber::fmt::layer()
        .with_writer(Mutex::new(file))
        .with_thread_ids(true)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .json()
        .with_filter(filter(config.default_level));

    let _ = Registry::default().with(console).with(json).try_init();
}
