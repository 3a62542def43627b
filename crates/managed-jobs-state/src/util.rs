use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock seconds since epoch, matching the `f64` timestamp columns
/// used throughout the task table.
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
