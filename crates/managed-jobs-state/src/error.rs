/// A task transition's gating predicate did not hold: the expected
/// `status`/`end_at` combination was not observed, so the conditional
/// update affected zero rows (or, for a job-wide update, fewer rows than
/// the caller assumed).
#[derive(thiserror::Error, Debug)]
#[error("managed job status transition {transition} rejected for job {job_id} task {task_id:?}: expected to affect {expected} row(s), affected {affected}")]
pub struct ManagedJobStatusError {
    pub transition: &'static str,
    pub job_id: i64,
    pub task_id: Option<i64>,
    pub expected: usize,
    pub affected: usize,
}

/// The scheduler-state setters assert that their conditional update
/// affected exactly one row. A non-matching row count here means the
/// caller violated the external scheduler lock's mutual-exclusion
/// guarantee. This is a programming error, not an expected rejection.
#[derive(thiserror::Error, Debug)]
#[error("scheduler state invariant violated: {operation} on job {job_id} expected to affect {expected} row(s), affected {affected}")]
pub struct SchedulerInvariantError {
    pub operation: &'static str,
    pub job_id: i64,
    pub expected: usize,
    pub affected: usize,
}

impl SchedulerInvariantError {
    /// Panics with this error's Display message: these represent fatal
    /// assertion failures, not recoverable conditions. Kept separate
    /// from `Drop`-based auto-panic so tests can construct and inspect
    /// the error value without triggering the panic.
    pub fn panic(self) -> ! {
        panic!("{self}")
    }
}

/// Errors from the storage/schema layer: engine I/O, corruption, or
/// malformed JSON in columns that legacy rows may not have populated.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("sqlite error")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to initialize managed-job store: {0}")]
    Init(String),

    #[error("failed to create database directory {path:?}")]
    CreateDir {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read user yaml file {path:?}")]
    ReadUserYaml {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed specs JSON for job {job_id} task {task_id}")]
    MalformedSpecs {
        job_id: i64,
        task_id: i64,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    JobStatus(#[from] ManagedJobStatusError),

    #[error(transparent)]
    SchedulerInvariant(#[from] SchedulerInvariantError),
}
