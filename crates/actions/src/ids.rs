//! Monotonically distinct identifiers for synthesized resources.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

static LAST_ID: AtomicU64 = AtomicU64::new(0);

/// `"{prefix}-{n}"` where `n` is the current Unix time in nanoseconds,
/// bumped when necessary so that no two calls in this process return the
/// same value.
pub fn next_id(prefix: &str) -> String {
    let now = Utc::now().timestamp_nanos_opt().unwrap_or_default().max(0) as u64;
    let previous = LAST_ID
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or_else(|last| last);
    format!("{prefix}-{}", now.max(previous + 1))
}
