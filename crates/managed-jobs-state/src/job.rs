//! Job / scheduler state machine.
//!
//! Every operation here requires the caller to already hold the external
//! scheduler lock. This crate does not and cannot enforce that; it only
//! enforces that the conditional update affects the row count the
//! caller's protocol guarantees. A mismatch is a programming-error
//! assertion failure (panic), not a recoverable
//! [`crate::error::ManagedJobStatusError`].

use crate::db::DbHandle;
use crate::error::{SchedulerInvariantError, StoreError};
use crate::schedule_state::ManagedJobScheduleState;
use crate::schema::DEFAULT_PRIORITY;

fn assert_affected(operation: &'static str, job_id: i64, expected: usize, affected: usize) {
    if affected != expected {
        SchedulerInvariantError {
            operation,
            job_id,
            expected,
            affected,
        }
        .panic();
    }
}

/// Inserts the job row in INACTIVE. Must be called once per job, before
/// any task row is inserted for it.
pub fn set_job_info(
    db: &DbHandle,
    job_id: i64,
    name: &str,
    workspace: Option<&str>,
    entrypoint: &str,
) -> Result<(), StoreError> {
    let affected = {
        let conn = db.lock();
        conn.execute(
            "INSERT INTO job_info (job_id, name, schedule_state, workspace, priority, entrypoint)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                job_id,
                name,
                ManagedJobScheduleState::Inactive.as_db_str(),
                workspace.unwrap_or(crate::schema::DEFAULT_WORKSPACE),
                DEFAULT_PRIORITY,
                entrypoint,
            ],
        )?
    };
    assert_affected("set_job_info", job_id, 1, affected);
    Ok(())
}

/// Admits the job into the scheduler queue. Returns `true` if no row was
/// updated (interpreted as a recovery run re-entering a job that is
/// already WAITING), or `false` on a genuine first-time transition.
pub fn scheduler_set_waiting(
    db: &DbHandle,
    job_id: i64,
    dag_yaml_path: &str,
    original_user_yaml_path: &str,
    env_file_path: &str,
    user_hash: &str,
    priority: i64,
) -> Result<bool, StoreError> {
    let affected = {
        let conn = db.lock();
        conn.execute(
            "UPDATE job_info SET
                schedule_state = ?1,
                dag_yaml_path = ?2,
                original_user_yaml_path = ?3,
                env_file_path = ?4,
                user_hash = ?5,
                priority = ?6
             WHERE job_id = ?7 AND schedule_state = ?8",
            rusqlite::params![
                ManagedJobScheduleState::Waiting.as_db_str(),
                dag_yaml_path,
                original_user_yaml_path,
                env_file_path,
                user_hash,
                priority,
                job_id,
                ManagedJobScheduleState::Inactive.as_db_str(),
            ],
        )?
    };
    debug_assert!(affected <= 1, "job_id is a primary key; can affect at most one row");
    Ok(affected == 0)
}

pub fn scheduler_set_launching(
    db: &DbHandle,
    job_id: i64,
    expected: ManagedJobScheduleState,
) -> Result<(), StoreError> {
    let affected = {
        let conn = db.lock();
        conn.execute(
            "UPDATE job_info SET schedule_state = ?1 WHERE job_id = ?2 AND schedule_state = ?3",
            rusqlite::params![
                ManagedJobScheduleState::Launching.as_db_str(),
                job_id,
                expected.as_db_str(),
            ],
        )?
    };
    assert_affected("scheduler_set_launching", job_id, 1, affected);
    Ok(())
}

pub fn scheduler_set_alive(db: &DbHandle, job_id: i64) -> Result<(), StoreError> {
    let affected = {
        let conn = db.lock();
        conn.execute(
            "UPDATE job_info SET schedule_state = ?1 WHERE job_id = ?2 AND schedule_state = ?3",
            rusqlite::params![
                ManagedJobScheduleState::Alive.as_db_str(),
                job_id,
                ManagedJobScheduleState::Launching.as_db_str(),
            ],
        )?
    };
    assert_affected("scheduler_set_alive", job_id, 1, affected);
    Ok(())
}

pub fn scheduler_set_alive_backoff(db: &DbHandle, job_id: i64) -> Result<(), StoreError> {
    let affected = {
        let conn = db.lock();
        conn.execute(
            "UPDATE job_info SET schedule_state = ?1 WHERE job_id = ?2 AND schedule_state = ?3",
            rusqlite::params![
                ManagedJobScheduleState::AliveBackoff.as_db_str(),
                job_id,
                ManagedJobScheduleState::Launching.as_db_str(),
            ],
        )?
    };
    assert_affected("scheduler_set_alive_backoff", job_id, 1, affected);
    Ok(())
}

pub fn scheduler_set_alive_waiting(db: &DbHandle, job_id: i64) -> Result<(), StoreError> {
    let affected = {
        let conn = db.lock();
        conn.execute(
            "UPDATE job_info SET schedule_state = ?1 WHERE job_id = ?2 AND schedule_state IN (?3, ?4)",
            rusqlite::params![
                ManagedJobScheduleState::AliveWaiting.as_db_str(),
                job_id,
                ManagedJobScheduleState::Alive.as_db_str(),
                ManagedJobScheduleState::AliveBackoff.as_db_str(),
            ],
        )?
    };
    assert_affected("scheduler_set_alive_waiting", job_id, 1, affected);
    Ok(())
}

/// Marks the job DONE. If `idempotent`, a call that affects zero rows
/// (the job is already DONE) is not an error.
pub fn scheduler_set_done(db: &DbHandle, job_id: i64, idempotent: bool) -> Result<(), StoreError> {
    let affected = {
        let conn = db.lock();
        conn.execute(
            "UPDATE job_info SET schedule_state = ?1 WHERE job_id = ?2 AND schedule_state != ?1",
            rusqlite::params![ManagedJobScheduleState::Done.as_db_str(), job_id],
        )?
    };
    if idempotent && affected == 0 {
        return Ok(());
    }
    assert_affected("scheduler_set_done", job_id, 1, affected);
    Ok(())
}

pub fn set_job_controller_pid(db: &DbHandle, job_id: i64, pid: i64) -> Result<(), StoreError> {
    let affected = {
        let conn = db.lock();
        conn.execute(
            "UPDATE job_info SET controller_pid = ?1 WHERE job_id = ?2",
            rusqlite::params![pid, job_id],
        )?
    };
    assert_affected("set_job_controller_pid", job_id, 1, affected);
    Ok(())
}
