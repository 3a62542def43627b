//! Task state machine: one conditional `UPDATE`/`INSERT` per operation.
//! Each mutator that targets a single `(job_id, task_id)` row requires
//! the update to affect exactly one row, surfacing
//! [`ManagedJobStatusError`] otherwise, a compare-and-swap riding on
//! the storage engine's single-writer serialization.

use rusqlite::OptionalExtension;

use crate::callback::{event, CallbackType};
use crate::db::DbHandle;
use crate::error::{ManagedJobStatusError, StoreError};
use crate::schema::{DEFAULT_METADATA_JSON_LITERAL, DEFAULT_SPECS_JSON_LITERAL};
use crate::status::ManagedJobStatus;
use crate::util::now_secs;

fn expect_one_row(
    transition: &'static str,
    job_id: i64,
    task_id: Option<i64>,
    affected: usize,
) -> Result<(), ManagedJobStatusError> {
    if affected == 1 {
        Ok(())
    } else {
        Err(ManagedJobStatusError {
            transition,
            job_id,
            task_id,
            expected: 1,
            affected,
        })
    }
}

/// Inserts a new task row in PENDING. Fails (via the table's unique
/// `(job_id, task_id)` index) if the row already exists.
pub fn set_pending(
    db: &DbHandle,
    job_id: i64,
    task_id: i64,
    task_name: &str,
    resources: &str,
) -> Result<(), StoreError> {
    let conn = db.lock();
    let affected = conn.execute(
        "INSERT INTO spot_jobs (job_id, task_id, task_name, resources, status, specs, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            job_id,
            task_id,
            task_name,
            resources,
            ManagedJobStatus::Pending.as_db_str(),
            DEFAULT_SPECS_JSON_LITERAL,
            DEFAULT_METADATA_JSON_LITERAL,
        ],
    )?;
    expect_one_row("set_pending", job_id, Some(task_id), affected)?;
    Ok(())
}

pub fn set_starting(
    db: &DbHandle,
    job_id: i64,
    task_id: i64,
    run_timestamp: &str,
    submit_time: f64,
    resources: &str,
    specs: &serde_json::Value,
    callback: Option<&CallbackType<'_>>,
) -> Result<(), StoreError> {
    let specs_json = serde_json::to_string(specs).unwrap_or_else(|_| DEFAULT_SPECS_JSON_LITERAL.to_string());
    let affected = {
        let conn = db.lock();
        conn.execute(
            "UPDATE spot_jobs SET
                status = ?1,
                submitted_at = ?2,
                run_timestamp = ?3,
                resources = ?4,
                specs = ?5
             WHERE job_id = ?6 AND task_id = ?7
               AND status = ?8 AND end_at IS NULL",
            rusqlite::params![
                ManagedJobStatus::Starting.as_db_str(),
                submit_time,
                run_timestamp,
                resources,
                specs_json,
                job_id,
                task_id,
                ManagedJobStatus::Pending.as_db_str(),
            ],
        )?
    };
    expect_one_row("set_starting", job_id, Some(task_id), affected)?;
    crate::callback::fire(callback, event::SUBMITTED);
    crate::callback::fire(callback, event::STARTING);
    Ok(())
}

pub fn set_backoff_pending(db: &DbHandle, job_id: i64, task_id: i64) -> Result<(), StoreError> {
    let affected = {
        let conn = db.lock();
        conn.execute(
            "UPDATE spot_jobs SET status = ?1
             WHERE job_id = ?2 AND task_id = ?3
               AND status IN (?4, ?5) AND end_at IS NULL",
            rusqlite::params![
                ManagedJobStatus::Pending.as_db_str(),
                job_id,
                task_id,
                ManagedJobStatus::Starting.as_db_str(),
                ManagedJobStatus::Recovering.as_db_str(),
            ],
        )?
    };
    expect_one_row("set_backoff_pending", job_id, Some(task_id), affected)?;
    Ok(())
}

pub fn set_restarting(
    db: &DbHandle,
    job_id: i64,
    task_id: i64,
    recovering: bool,
) -> Result<(), StoreError> {
    let target = if recovering {
        ManagedJobStatus::Recovering
    } else {
        ManagedJobStatus::Starting
    };
    let affected = {
        let conn = db.lock();
        conn.execute(
            "UPDATE spot_jobs SET status = ?1
             WHERE job_id = ?2 AND task_id = ?3
               AND status = ?4 AND end_at IS NULL",
            rusqlite::params![
                target.as_db_str(),
                job_id,
                task_id,
                ManagedJobStatus::Pending.as_db_str(),
            ],
        )?
    };
    expect_one_row("set_restarting", job_id, Some(task_id), affected)?;
    Ok(())
}

pub fn set_started(
    db: &DbHandle,
    job_id: i64,
    task_id: i64,
    start_time: f64,
    callback: Option<&CallbackType<'_>>,
) -> Result<(), StoreError> {
    let affected = {
        let conn = db.lock();
        conn.execute(
            "UPDATE spot_jobs SET
                status = ?1,
                start_at = ?2,
                last_recovered_at = ?2
             WHERE job_id = ?3 AND task_id = ?4
               AND status IN (?5, ?6) AND end_at IS NULL",
            rusqlite::params![
                ManagedJobStatus::Running.as_db_str(),
                start_time,
                job_id,
                task_id,
                ManagedJobStatus::Starting.as_db_str(),
                ManagedJobStatus::Pending.as_db_str(),
            ],
        )?
    };
    expect_one_row("set_started", job_id, Some(task_id), affected)?;
    crate::callback::fire(callback, event::STARTED);
    Ok(())
}

/// Transitions a task into RECOVERING, accumulating `job_duration` across
/// the just-finished run. `now` is the recovery-observed wall-clock time;
/// callers in production pass [`now_secs`], tests pass a fixed value.
pub fn set_recovering(
    db: &DbHandle,
    job_id: i64,
    task_id: i64,
    force: bool,
    now: f64,
    callback: Option<&CallbackType<'_>>,
) -> Result<(), StoreError> {
    let conn = db.lock();

    let gate_sql = if force {
        "status IN (?1, ?2, ?3, ?4)"
    } else {
        "status = ?1"
    };
    let running = ManagedJobStatus::Running.as_db_str();
    let pending = ManagedJobStatus::Pending.as_db_str();
    let starting = ManagedJobStatus::Starting.as_db_str();
    let recovering_status = ManagedJobStatus::Recovering.as_db_str();

    let affected = if force {
        conn.execute(
            &format!(
                "UPDATE spot_jobs SET
                    status = ?5,
                    job_duration = CASE WHEN last_recovered_at >= 0
                                        THEN job_duration + (?6 - last_recovered_at)
                                        ELSE job_duration END,
                    last_recovered_at = ?6
                 WHERE job_id = ?7 AND task_id = ?8 AND {gate_sql} AND end_at IS NULL"
            ),
            rusqlite::params![
                running,
                pending,
                starting,
                recovering_status,
                recovering_status,
                now,
                job_id,
                task_id,
            ],
        )?
    } else {
        conn.execute(
            &format!(
                "UPDATE spot_jobs SET
                    status = ?2,
                    job_duration = CASE WHEN last_recovered_at >= 0
                                        THEN job_duration + (?3 - last_recovered_at)
                                        ELSE job_duration END,
                    last_recovered_at = ?3
                 WHERE job_id = ?4 AND task_id = ?5 AND {gate_sql} AND end_at IS NULL"
            ),
            rusqlite::params![running, recovering_status, now, job_id, task_id],
        )?
    };
    drop(conn);

    expect_one_row("set_recovering", job_id, Some(task_id), affected)?;
    crate::callback::fire(callback, event::RECOVERING);
    Ok(())
}

pub fn set_recovered(
    db: &DbHandle,
    job_id: i64,
    task_id: i64,
    recovered_time: f64,
    callback: Option<&CallbackType<'_>>,
) -> Result<(), StoreError> {
    let affected = {
        let conn = db.lock();
        conn.execute(
            "UPDATE spot_jobs SET
                status = ?1,
                last_recovered_at = ?2,
                recovery_count = recovery_count + 1
             WHERE job_id = ?3 AND task_id = ?4
               AND status = ?5 AND end_at IS NULL",
            rusqlite::params![
                ManagedJobStatus::Running.as_db_str(),
                recovered_time,
                job_id,
                task_id,
                ManagedJobStatus::Recovering.as_db_str(),
            ],
        )?
    };
    expect_one_row("set_recovered", job_id, Some(task_id), affected)?;
    crate::callback::fire(callback, event::RECOVERED);
    Ok(())
}

pub fn set_succeeded(
    db: &DbHandle,
    job_id: i64,
    task_id: i64,
    end_time: f64,
    callback: Option<&CallbackType<'_>>,
) -> Result<(), StoreError> {
    let affected = {
        let conn = db.lock();
        conn.execute(
            "UPDATE spot_jobs SET status = ?1, end_at = ?2
             WHERE job_id = ?3 AND task_id = ?4
               AND status = ?5 AND end_at IS NULL",
            rusqlite::params![
                ManagedJobStatus::Succeeded.as_db_str(),
                end_time,
                job_id,
                task_id,
                ManagedJobStatus::Running.as_db_str(),
            ],
        )?
    };
    expect_one_row("set_succeeded", job_id, Some(task_id), affected)?;
    crate::callback::fire(callback, event::SUCCEEDED);
    Ok(())
}

/// Marks one task (or, if `task_id` is `None`, every task of the job) as
/// failed with `failure_kind`. Idempotent with respect to already-terminal
/// rows: affecting zero rows is not an error and fires no callback.
///
/// `previous_status` (used only to decide whether `last_recovered_at`
/// needs to be pinned to `end_time`) is read from a single row regardless
/// of how many rows this call ends up affecting; for a whole-job call
/// this is an arbitrary row among the job's tasks.
pub fn set_failed(
    db: &DbHandle,
    job_id: i64,
    task_id: Option<i64>,
    failure_kind: ManagedJobStatus,
    reason: Option<&str>,
    end_time: Option<f64>,
    override_terminal: bool,
    callback: Option<&CallbackType<'_>>,
) -> Result<usize, StoreError> {
    assert!(
        failure_kind.is_failed(),
        "set_failed called with non-failure status {failure_kind:?}"
    );
    let end_time = end_time.unwrap_or_else(now_secs);

    let conn = db.lock();

    let previous_status: Option<String> = match task_id {
        Some(t) => conn
            .query_row(
                "SELECT status FROM spot_jobs WHERE job_id = ?1 AND task_id = ?2",
                rusqlite::params![job_id, t],
                |r| r.get(0),
            )
            .optional()?,
        None => conn
            .query_row(
                "SELECT status FROM spot_jobs WHERE job_id = ?1 LIMIT 1",
                rusqlite::params![job_id],
                |r| r.get(0),
            )
            .optional()?,
    };
    let was_recovering = previous_status.as_deref() == Some(ManagedJobStatus::Recovering.as_db_str());

    let affected = match (task_id, override_terminal) {
        (Some(t), false) => conn.execute(
            "UPDATE spot_jobs SET
                status = ?1, failure_reason = ?2, end_at = ?3,
                last_recovered_at = CASE WHEN ?4 THEN ?3 ELSE last_recovered_at END
             WHERE job_id = ?5 AND task_id = ?6 AND end_at IS NULL",
            rusqlite::params![failure_kind.as_db_str(), reason, end_time, was_recovering, job_id, t],
        )?,
        (Some(t), true) => conn.execute(
            "UPDATE spot_jobs SET
                status = ?1, failure_reason = ?2, end_at = COALESCE(end_at, ?3),
                last_recovered_at = CASE WHEN ?4 THEN ?3 ELSE last_recovered_at END
             WHERE job_id = ?5 AND task_id = ?6",
            rusqlite::params![failure_kind.as_db_str(), reason, end_time, was_recovering, job_id, t],
        )?,
        (None, false) => conn.execute(
            "UPDATE spot_jobs SET
                status = ?1, failure_reason = ?2, end_at = ?3,
                last_recovered_at = CASE WHEN ?4 THEN ?3 ELSE last_recovered_at END
             WHERE job_id = ?5 AND end_at IS NULL",
            rusqlite::params![failure_kind.as_db_str(), reason, end_time, was_recovering, job_id],
        )?,
        (None, true) => conn.execute(
            "UPDATE spot_jobs SET
                status = ?1, failure_reason = ?2, end_at = COALESCE(end_at, ?3),
                last_recovered_at = CASE WHEN ?4 THEN ?3 ELSE last_recovered_at END
             WHERE job_id = ?5",
            rusqlite::params![failure_kind.as_db_str(), reason, end_time, was_recovering, job_id],
        )?,
    };
    drop(conn);

    if affected > 0 {
        crate::callback::fire(callback, event::FAILED);
    }
    Ok(affected)
}

/// Moves every non-terminal task of `job_id` to CANCELLING. Idempotent:
/// no matching rows means no change and no callback.
pub fn set_cancelling(
    db: &DbHandle,
    job_id: i64,
    callback: Option<&CallbackType<'_>>,
) -> Result<usize, StoreError> {
    let affected = {
        let conn = db.lock();
        conn.execute(
            "UPDATE spot_jobs SET status = ?1 WHERE job_id = ?2 AND end_at IS NULL",
            rusqlite::params![ManagedJobStatus::Cancelling.as_db_str(), job_id],
        )?
    };
    if affected > 0 {
        crate::callback::fire(callback, event::CANCELLING);
    }
    Ok(affected)
}

/// Moves every CANCELLING task of `job_id` to CANCELLED. Must be preceded
/// by [`set_cancelling`]; calling this without a prior `set_cancelling`
/// affects zero rows and is a silent no-op.
pub fn set_cancelled(
    db: &DbHandle,
    job_id: i64,
    now: f64,
    callback: Option<&CallbackType<'_>>,
) -> Result<usize, StoreError> {
    let affected = {
        let conn = db.lock();
        conn.execute(
            "UPDATE spot_jobs SET status = ?1, end_at = ?2
             WHERE job_id = ?3 AND status = ?4",
            rusqlite::params![
                ManagedJobStatus::Cancelled.as_db_str(),
                now,
                job_id,
                ManagedJobStatus::Cancelling.as_db_str(),
            ],
        )?
    };
    if affected > 0 {
        crate::callback::fire(callback, event::CANCELLED);
    }
    Ok(affected)
}
