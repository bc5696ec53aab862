// A global, injectable diagnostic channel. Lifecycle operations (subscribe,
// unsubscribe, start, abort, commit) report through here on top of whatever
// they log via `tracing`, so a host application can route progress/warning
// text to its own UI without scraping log output.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warning,
}

type Sink = Arc<dyn Fn(Level, &str) + Send + Sync>;

static SINK: Mutex<Option<Sink>> = Mutex::new(None);

/// Install a sink to receive diagnostic lines. Replaces any previous sink.
pub fn set_sink<F: Fn(Level, &str) + Send + Sync + 'static>(f: F) {
    *SINK.lock() = Some(Arc::new(f));
}

/// Remove any installed sink; diagnostics fall back to `tracing`.
pub fn clear_sink() {
    *SINK.lock() = None;
}

pub fn emit(level: Level, msg: &str) {
    let sink = SINK.lock().clone();
    match sink {
        Some(f) => f(level, msg),
        None => match level {
            Level::Info => info!(target: "kstate::diag", "{}", msg),
            Level::Warning => warn!(target: "kstate::diag", "{}", msg),
        },
    }
}

pub fn info(msg: impl AsRef<str>) {
    emit(Level::Info, msg.as_ref());
}

pub fn warning(msg: impl AsRef<str>) {
    emit(Level::Warning, msg.as_ref());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use test_log::test;

    #[test]
    fn sink_receives_emitted_lines() {
        static COUNT: AtomicUsize = AtomicUsize::new(0);
        set_sink(|_, _| {
            COUNT.fetch_add(1, Ordering::SeqCst);
        });
        info("subscribed to /kstate.Foo");
        warning("commit refused: baseline mismatch");
        assert_eq!(COUNT.load(Ordering::SeqCst), 2);
        clear_sink();
    }
}
