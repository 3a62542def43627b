//! Managed-job state store and scheduler-coordination layer.
//!
//! This crate is the durable record of every managed job and task a
//! cluster batch-job controller has ever submitted, plus the
//! compare-and-swap primitives the scheduler uses to admit, launch, and
//! retire jobs without a second coordination service. Everything here
//! is backed by a single SQLite file opened in WAL mode; callers
//! serialize concurrent writers through SQLite's own locking, and the
//! scheduler-state mutators additionally assume the caller holds the
//! external scheduler lock documented on each function.
//!
//! Module map:
//! - [`db`]: connection lifecycle, lazy process-wide singleton.
//! - [`schema`]: table creation and forward-only migration.
//! - [`status`] / [`schedule_state`]: the two state-machine enums.
//! - [`error`]: this crate's error types.
//! - [`callback`]: the transition notifier sink.
//! - [`task`] / [`job`]: the state machine mutators.
//! - [`models`]: read-side row/record structs.
//! - [`query`]: the read-only query layer.

pub mod callback;
pub mod db;
pub mod error;
pub mod job;
pub mod models;
pub mod query;
pub mod schedule_state;
pub mod schema;
pub mod status;
pub mod task;
mod util;

pub use callback::CallbackType;
pub use db::DbHandle;
pub use error::{ManagedJobStatusError, SchedulerInvariantError, StoreError};
pub use models::{JobRow, LiveJob, ManagedJobRecord, TaskRow, WaitingJob};
pub use schedule_state::ManagedJobScheduleState;
pub use status::{ManagedJobStatus, FAILURE_STATUSES};
pub use util::now_secs;

#[cfg(test)]
mod integration_test {
    //! End-to-end scenarios exercising the full lifecycle through the
    //! public API against a fresh in-memory store: migration
    //! idempotence, priority-respecting admission, exactly-one-row
    //! scheduler assertions, status-string round-trips, and the task
    //! and job lifecycle from submission through terminal status.

    use super::*;
    use crate::schedule_state::ManagedJobScheduleState as Sched;
    use crate::status::ManagedJobStatus as Status;

    fn setup() -> DbHandle {
        DbHandle::open_in_memory().unwrap()
    }

    /// Submit, run, and succeed a single-task job end to end.
    #[test]
    fn single_task_job_happy_path() {
        let db = setup();
        job::set_job_info(&db, 1, "my-job", None, "python train.py").unwrap();
        task::set_pending(&db, 1, 0, "my-job", "1x A100").unwrap();

        let specs = serde_json::json!({"max_restarts_on_errors": 3});
        task::set_starting(&db, 1, 0, "run-1", 100.0, "1x A100", &specs, None).unwrap();
        task::set_started(&db, 1, 0, 101.0, None).unwrap();
        task::set_succeeded(&db, 1, 0, 200.0, None).unwrap();

        let status = query::get_status(&db, 1).unwrap();
        assert_eq!(status, Some(Status::Succeeded));
        assert!(query::get_failure_reason(&db, 1).unwrap().is_none());

        let jobs = query::get_managed_jobs(&db, Some(1)).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_name, "my-job");
        assert_eq!(jobs[0].specs["max_restarts_on_errors"], 3);
    }

    /// A task that recovers once before succeeding accumulates
    /// `job_duration` and bumps `recovery_count` exactly once.
    #[test]
    fn recovery_then_success_accumulates_duration() {
        let db = setup();
        job::set_job_info(&db, 2, "recov-job", None, "run.sh").unwrap();
        task::set_pending(&db, 2, 0, "recov-job", "1x V100").unwrap();
        let specs = serde_json::json!({});
        task::set_starting(&db, 2, 0, "run-2", 0.0, "1x V100", &specs, None).unwrap();
        task::set_started(&db, 2, 0, 1.0, None).unwrap();

        task::set_recovering(&db, 2, 0, false, 10.0, None).unwrap();
        task::set_recovered(&db, 2, 0, 15.0, None).unwrap();
        task::set_succeeded(&db, 2, 0, 20.0, None).unwrap();

        let rows = query::get_managed_jobs(&db, Some(2)).unwrap();
        assert_eq!(rows[0].recovery_count, 1);
        assert!(rows[0].job_duration > 0.0);
    }

    /// Cancellation requires set_cancelling before set_cancelled; a
    /// bare set_cancelled on a running task is a silent no-op, not an
    /// error.
    #[test]
    fn cancel_requires_cancelling_first() {
        let db = setup();
        job::set_job_info(&db, 3, "cancel-me", None, "sleep 100").unwrap();
        task::set_pending(&db, 3, 0, "cancel-me", "1x T4").unwrap();

        let affected = task::set_cancelled(&db, 3, 5.0, None).unwrap();
        assert_eq!(affected, 0);
        assert_eq!(query::get_status(&db, 3).unwrap(), Some(Status::Pending));

        let cancelling = task::set_cancelling(&db, 3, None).unwrap();
        assert_eq!(cancelling, 1);
        let cancelled = task::set_cancelled(&db, 3, 5.0, None).unwrap();
        assert_eq!(cancelled, 1);
        assert_eq!(query::get_status(&db, 3).unwrap(), Some(Status::Cancelled));
    }

    /// A whole-job failure call marks every non-terminal task
    /// FAILED_CONTROLLER with the same reason and end time.
    #[test]
    fn whole_job_failure_marks_every_task() {
        let db = setup();
        job::set_job_info(&db, 4, "dag-job", None, "dag.yaml").unwrap();
        task::set_pending(&db, 4, 0, "stage-a", "1x A100").unwrap();
        task::set_pending(&db, 4, 1, "stage-b", "1x A100").unwrap();

        let affected = task::set_failed(
            &db,
            4,
            None,
            Status::FailedController,
            Some("controller crashed"),
            Some(42.0),
            false,
            None,
        )
        .unwrap();
        assert_eq!(affected, 2);

        for (_, status) in query::get_all_task_ids_statuses(&db, 4).unwrap() {
            assert_eq!(status, Status::FailedController);
        }
        assert_eq!(
            query::get_failure_reason(&db, 4).unwrap().as_deref(),
            Some("controller crashed")
        );
    }

    /// A legacy row (inserted before the scheduler columns existed)
    /// surfaces with `schedule_state = None` and is still picked up by
    /// the status-check sweep.
    #[test]
    fn legacy_task_row_without_job_info_is_visible() {
        let db = setup();
        {
            let conn = db.lock();
            conn.execute(
                "INSERT INTO spot_jobs (job_id, task_id, task_name, status)
                 VALUES (99, 0, 'orphaned', 'RUNNING')",
                [],
            )
            .unwrap();
        }

        let jobs = query::get_managed_jobs(&db, Some(99)).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_name, "orphaned");
        assert_eq!(jobs[0].schedule_state, None);

        let to_check = query::get_jobs_to_check_status(&db, None).unwrap();
        assert!(to_check.contains(&99));
    }

    /// The scheduler admits the highest-priority waiting job and never
    /// starves it behind a lower-priority in-flight job.
    #[test]
    fn waiting_job_admission_respects_priority() {
        let db = setup();
        for (id, priority) in [(10, 500), (11, 900)] {
            job::set_job_info(&db, id, "job", None, "entry").unwrap();
            job::scheduler_set_waiting(&db, id, "dag.yaml", "user.yaml", "env", "hash", priority)
                .unwrap();
        }

        let waiting = query::get_waiting_job(&db).unwrap().unwrap();
        assert_eq!(waiting.job_id, 11);
        assert_eq!(waiting.schedule_state, Sched::Waiting);
    }

    /// Once a higher-priority job is LAUNCHING, a lower-priority
    /// WAITING job is not admitted ahead of it.
    #[test]
    fn launching_high_priority_job_blocks_lower_priority_admission() {
        let db = setup();
        job::set_job_info(&db, 20, "high", None, "entry").unwrap();
        job::scheduler_set_waiting(&db, 20, "dag.yaml", "user.yaml", "env", "hash", 900).unwrap();
        job::scheduler_set_launching(&db, 20, Sched::Waiting).unwrap();

        job::set_job_info(&db, 21, "low", None, "entry").unwrap();
        job::scheduler_set_waiting(&db, 21, "dag.yaml", "user.yaml", "env", "hash", 500).unwrap();

        assert!(query::get_waiting_job(&db).unwrap().is_none());
    }

    /// Re-running schema migration against an already-migrated database
    /// changes nothing observable.
    #[test]
    fn migration_is_idempotent_through_the_public_api() {
        let db = setup();
        job::set_job_info(&db, 5, "idempotent", None, "entry").unwrap();
        task::set_pending(&db, 5, 0, "idempotent", "1x A100").unwrap();
        {
            let conn = db.lock();
            crate::schema::init(&conn).unwrap();
            crate::schema::init(&conn).unwrap();
        }
        assert_eq!(query::get_status(&db, 5).unwrap(), Some(Status::Pending));
    }

    /// Every `ManagedJobStatus` round-trips through its DB string.
    #[test]
    fn status_enum_round_trips() {
        for s in [
            Status::Pending,
            Status::Starting,
            Status::Running,
            Status::Recovering,
            Status::Cancelling,
            Status::Succeeded,
            Status::Cancelled,
            Status::Failed,
            Status::FailedSetup,
            Status::FailedPrechecks,
            Status::FailedNoResource,
            Status::FailedController,
            Status::Submitted,
        ] {
            assert_eq!(Status::from_db_str(s.as_db_str()), Some(s));
        }
    }

    /// Scheduler invariant violations panic rather than returning an
    /// `Err`.
    #[test]
    #[should_panic(expected = "scheduler state invariant violated")]
    fn scheduler_transition_on_wrong_state_panics() {
        let db = setup();
        job::set_job_info(&db, 6, "bad-transition", None, "entry").unwrap();
        // Job is still INACTIVE; ALIVE is only reachable from LAUNCHING.
        job::scheduler_set_alive(&db, 6).unwrap();
    }

    #[test]
    fn double_pending_insert_is_rejected() {
        let db = setup();
        job::set_job_info(&db, 7, "dup", None, "entry").unwrap();
        task::set_pending(&db, 7, 0, "dup", "1x A100").unwrap();
        let err = task::set_pending(&db, 7, 0, "dup", "1x A100");
        assert!(err.is_err());
    }
}
