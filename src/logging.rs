//! Logging setup, in the teacher's `fern`-dispatch style, plus a log-once
//! sink for the per-line warnings the reader and modifiers emit (a dataset
//! with a systematic formatting problem would otherwise spam a warning once
//! per line of the whole corpus).

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, OnceLock};

use chrono::Local;

/// Initializes the global logger once. Safe to call more than once; only
/// the first call takes effect.
pub fn init(level: log::LevelFilter, log_file: Option<&std::path::Path>) -> Result<(), fern::InitError> {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr());

    if let Some(path) = log_file {
        dispatch = dispatch.chain(fern::log_file(path)?);
    }

    dispatch.apply().or(Ok(()))
}

struct LogOnceSink {
    seen: Mutex<HashSet<u64>>,
}

impl LogOnceSink {
    fn new() -> Self {
        Self {
            seen: Mutex::new(HashSet::new()),
        }
    }

    fn warn_once(&self, message: &str) {
        let mut hasher = DefaultHasher::new();
        message.hash(&mut hasher);
        let key = hasher.finish();

        let mut seen = self.seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if seen.insert(key) {
            log::warn!("{message}");
        }
    }
}

static LOG_ONCE: OnceLock<LogOnceSink> = OnceLock::new();

/// Emit `message` as a `warn!`, but at most once for any distinct message
/// seen so far in this process.
pub fn log_once(message: impl AsRef<str>) {
    LOG_ONCE.get_or_init(LogOnceSink::new).warn_once(message.as_ref());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warn_once_dedupes_by_message() {
        let sink = LogOnceSink::new();
        assert!(sink.seen.lock().unwrap().is_empty());
        sink.warn_once("same message");
        sink.warn_once("same message");
        sink.warn_once("different message");
        assert_eq!(sink.seen.lock().unwrap().len(), 2);
    }
}
