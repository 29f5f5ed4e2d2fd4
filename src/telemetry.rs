//! Structured trace output for state transitions and turn timings.
//!
//! Traces land in a JSON-lines file next to the debug log, never on the
//! console the HUD owns. Shares the enable flags with the debug log and
//! only ever installs one global subscriber; later calls are no-ops.

use crate::config::AppConfig;
use std::env;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing::Level;
use tracing_subscriber::fmt::time::UtcTime;

static TRACING_INIT: OnceLock<bool> = OnceLock::new();

pub(crate) fn tracing_log_path() -> PathBuf {
    env::var("VOICEHUD_TRACE_LOG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::temp_dir().join("voicehud_trace.jsonl"))
}

fn open_trace_file(path: &Path) -> Option<File> {
    OpenOptions::new().create(true).append(true).open(path).ok()
}

pub(crate) fn init_tracing(config: &AppConfig) {
    let enabled = (config.logs || config.log_timings) && !config.no_logs;
    if !enabled {
        return;
    }
    let max_level = if config.log_timings {
        Level::TRACE
    } else {
        Level::DEBUG
    };

    let _ = TRACING_INIT.get_or_init(|| {
        let Some(file) = open_trace_file(&tracing_log_path()) else {
            return false;
        };
        let subscriber = tracing_subscriber::fmt()
            .json()
            .flatten_event(true)
            .with_timer(UtcTime::rfc_3339())
            .with_max_level(max_level)
            .with_writer(file)
            .with_current_span(false)
            .with_span_list(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber).is_ok()
    });
}
