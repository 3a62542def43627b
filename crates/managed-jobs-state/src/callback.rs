//! The transition notifier: an opaque sink invoked with a canonical
//! event name after a mutator's conditional update commits.
//! Firing the callback is never rolled back and its own failures (it
//! returns nothing, so "failure" means panicking) are the caller's
//! concern, not this crate's.

pub mod event {
    pub const SUBMITTED: &str = "SUBMITTED";
    pub const STARTING: &str = "STARTING";
    pub const STARTED: &str = "STARTED";
    pub const RECOVERING: &str = "RECOVERING";
    pub const RECOVERED: &str = "RECOVERED";
    pub const SUCCEEDED: &str = "SUCCEEDED";
    pub const FAILED: &str = "FAILED";
    pub const CANCELLING: &str = "CANCELLING";
    pub const CANCELLED: &str = "CANCELLED";
}

/// A callback accepting a single canonical event-name string.
pub type CallbackType<'a> = dyn Fn(&str) + Send + Sync + 'a;

pub(crate) fn fire(callback: Option<&CallbackType<'_>>, event: &str) {
    if let Some(cb) = callback {
        tracing::debug!(event, "invoking managed-job transition callback");
        cb(event);
    }
}
