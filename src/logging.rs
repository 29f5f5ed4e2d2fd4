use crate::config::AppConfig;
use std::{
    env, fs,
    io::Write,
    panic,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, OnceLock,
    },
    time::{SystemTime, UNIX_EPOCH},
};

const LOG_MAX_BYTES: u64 = 5 * 1024 * 1024;
const CRASH_LOG_MAX_BYTES: u64 = 256 * 1024;
static LOG_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_CONTENT_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_STATE: OnceLock<Mutex<Option<RotatingLog>>> = OnceLock::new();

/// Path to the temp debug log, rotated when it grows past the cap.
pub fn log_file_path() -> PathBuf {
    env::temp_dir().join("voicehud.log")
}

/// Path to the crash log (panic metadata only).
pub fn crash_log_path() -> PathBuf {
    env::temp_dir().join("voicehud_crash.log")
}

struct RotatingLog {
    path: PathBuf,
    file: fs::File,
    max_bytes: u64,
    bytes_written: u64,
}

impl RotatingLog {
    fn open(path: PathBuf, max_bytes: u64) -> Option<Self> {
        let mut bytes_written = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        // A stale oversized file from a previous run starts fresh.
        if bytes_written > max_bytes {
            let _ = fs::remove_file(&path);
            bytes_written = 0;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .ok()?;
        Some(Self {
            path,
            file,
            max_bytes,
            bytes_written,
        })
    }

    fn append(&mut self, line: &str) {
        if self.bytes_written.saturating_add(line.len() as u64) > self.max_bytes {
            let Ok(truncated) = fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.path)
            else {
                return;
            };
            self.file = truncated;
            self.bytes_written = 0;
        }
        if self.file.write_all(line.as_bytes()).is_ok() {
            self.bytes_written = self.bytes_written.saturating_add(line.len() as u64);
        }
    }
}

fn log_state() -> &'static Mutex<Option<RotatingLog>> {
    LOG_STATE.get_or_init(|| Mutex::new(None))
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Configure debug logging from CLI flags or environment.
pub fn init_logging(config: &AppConfig) {
    let enabled = (config.logs || config.log_timings) && !config.no_logs;
    apply_logging(enabled, enabled && config.log_content);
}

fn apply_logging(enabled: bool, content_enabled: bool) {
    LOG_ENABLED.store(enabled, Ordering::Relaxed);
    LOG_CONTENT_ENABLED.store(content_enabled, Ordering::Relaxed);
    let mut state = log_state()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *state = if enabled {
        RotatingLog::open(log_file_path(), LOG_MAX_BYTES)
    } else {
        None
    };
}

/// Write a debug line to the temp file so troubleshooting never touches the HUD.
pub fn log_debug(msg: &str) {
    if !LOG_ENABLED.load(Ordering::Relaxed) {
        return;
    }
    let line = format!("[{}] {msg}\n", epoch_secs());
    let mut state = log_state()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(log) = state.as_mut() {
        log.append(&line);
    }
}

/// Write a line that may contain user speech or assistant replies. Gated
/// separately so transcripts stay out of logs unless explicitly requested.
pub fn log_debug_content(msg: &str) {
    if !LOG_CONTENT_ENABLED.load(Ordering::Relaxed) {
        return;
    }
    log_debug(msg);
}

/// Crash log entry with panic location. The payload itself is recorded only
/// when content logging is on, since panic messages can embed transcripts.
pub fn log_panic(info: &panic::PanicHookInfo<'_>) {
    if !LOG_ENABLED.load(Ordering::Relaxed) {
        return;
    }
    let location = info
        .location()
        .map(|loc| format!("{}:{}", loc.file(), loc.line()))
        .unwrap_or_else(|| "unknown".to_string());
    let payload = if LOG_CONTENT_ENABLED.load(Ordering::Relaxed) {
        if let Some(text) = info.payload().downcast_ref::<&str>() {
            (*text).to_string()
        } else if let Some(text) = info.payload().downcast_ref::<String>() {
            text.clone()
        } else {
            "non-string panic payload".to_string()
        }
    } else {
        "panic payload omitted (log-content disabled)".to_string()
    };
    let line = format!(
        "[{}] panic at {location}: {payload} (v{})\n",
        epoch_secs(),
        env!("CARGO_PKG_VERSION")
    );
    if let Some(mut log) = RotatingLog::open(crash_log_path(), CRASH_LOG_MAX_BYTES) {
        log.append(&line);
    }
}

#[cfg(test)]
pub(crate) fn set_logging_for_tests(enabled: bool, content_enabled: bool) {
    apply_logging(enabled, content_enabled);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_logging_writes_nothing() {
        set_logging_for_tests(false, false);
        log_debug("should vanish");
        log_debug_content("should also vanish");
        let state = log_state()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        assert!(state.is_none());
    }
}
