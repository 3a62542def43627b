use serde_json::Value as JsonValue;

use crate::schedule_state::ManagedJobScheduleState;
use crate::status::ManagedJobStatus;

/// One task row, as read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRow {
    pub task_row_id: i64,
    pub job_id: i64,
    pub task_id: i64,
    pub task_name: String,
    pub resources: Option<String>,
    pub status: ManagedJobStatus,
    pub submitted_at: Option<f64>,
    pub start_at: Option<f64>,
    pub end_at: Option<f64>,
    /// `-1` in storage means "never"; surfaced here as that same sentinel
    /// rather than `Option`.
    pub last_recovered_at: f64,
    pub recovery_count: i64,
    pub job_duration: f64,
    pub run_timestamp: Option<String>,
    pub failure_reason: Option<String>,
    pub specs: JsonValue,
    pub metadata: JsonValue,
    pub local_log_file: Option<String>,
}

/// One job row, as read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub job_id: i64,
    pub name: Option<String>,
    pub schedule_state: Option<ManagedJobScheduleState>,
    pub controller_pid: Option<i64>,
    pub dag_yaml_path: Option<String>,
    pub env_file_path: Option<String>,
    pub original_user_yaml_path: Option<String>,
    pub user_hash: Option<String>,
    pub workspace: Option<String>,
    pub priority: i64,
    pub entrypoint: Option<String>,
}

/// One record of `get_managed_jobs`: the union of a task row and its
/// (possibly absent, for legacy data) job row, left-outer-joined.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedJobRecord {
    pub job_id: i64,
    pub task_id: i64,
    /// Display name: `job.name`, falling back to `task.task_name` when
    /// the job row is missing or predates the `name` column (a null
    /// `job.name` is the legacy sentinel).
    pub job_name: String,
    pub task_name: String,
    pub resources: Option<String>,
    pub status: ManagedJobStatus,
    pub schedule_state: Option<ManagedJobScheduleState>,
    pub controller_pid: Option<i64>,
    pub submitted_at: Option<f64>,
    pub start_at: Option<f64>,
    pub end_at: Option<f64>,
    pub last_recovered_at: f64,
    pub recovery_count: i64,
    pub job_duration: f64,
    pub run_timestamp: Option<String>,
    pub failure_reason: Option<String>,
    pub specs: JsonValue,
    pub metadata: JsonValue,
    pub local_log_file: Option<String>,
    pub dag_yaml_path: Option<String>,
    pub env_file_path: Option<String>,
    pub original_user_yaml_path: Option<String>,
    pub user_hash: Option<String>,
    pub workspace: String,
    pub priority: i64,
    pub entrypoint: Option<String>,
    /// Contents of `original_user_yaml_path`, attached on a best-effort
    /// basis. `None` if the path is unset or unreadable.
    pub user_yaml: Option<String>,
}

/// The job the scheduler should promote next.
#[derive(Debug, Clone, PartialEq)]
pub struct WaitingJob {
    pub job_id: i64,
    pub schedule_state: ManagedJobScheduleState,
    pub dag_yaml_path: Option<String>,
    pub env_file_path: Option<String>,
}

/// A live (scheduler-active) job, per `get_schedule_live_jobs`.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveJob {
    pub job_id: i64,
    pub schedule_state: ManagedJobScheduleState,
    pub controller_pid: Option<i64>,
}
