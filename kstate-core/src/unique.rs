// Produces names of the form `<prefix>.<secs><usecs>.<pid>.<counter>`,
// matching the original generator's separators and microsecond padding.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static COUNTER: AtomicU32 = AtomicU32::new(0);

/// Produce a unique, well-formed state name starting with `prefix`.
/// Best-effort: uniqueness is bounded by clock resolution and counter width.
/// Returns `None` if the wall clock is unavailable (before the epoch).
pub fn unique_name(prefix: &str) -> Option<String> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?;
    let secs = now.as_secs();
    let usecs = now.subsec_micros();
    let pid = std::process::id();
    let extra = COUNTER.fetch_add(1, Ordering::Relaxed);
    Some(format!("{prefix}.{secs}{usecs:06}.{pid}.{extra}"))
}
