//! The query layer: read-only questions the scheduler and any UI ask
//! of the store. Every query here reads a single consistent snapshot
//! (one statement) and tolerates legacy rows with a null
//! `schedule_state` via left-outer join semantics between `spot_jobs`
//! and `job_info`.

use rusqlite::OptionalExtension;
use serde_json::Value as JsonValue;

use crate::db::DbHandle;
use crate::error::StoreError;
use crate::models::{JobRow, LiveJob, ManagedJobRecord, TaskRow, WaitingJob};
use crate::schedule_state::ManagedJobScheduleState;
use crate::schema::DEFAULT_WORKSPACE;
use crate::status::ManagedJobStatus;

/// SQL literal for the fixed set of terminal statuses. Safe to splice
/// directly into query text: it is a compile-time constant, never
/// user input.
const TERMINAL_LIST: &str =
    "'SUCCEEDED','CANCELLED','FAILED','FAILED_SETUP','FAILED_PRECHECKS','FAILED_NO_RESOURCE','FAILED_CONTROLLER'";

fn parse_json_column(raw: Option<String>) -> JsonValue {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or(JsonValue::Null)
}

/// Distinct job ids with at least one non-terminal task, matching `name`
/// against `job.name` (or, for legacy rows where that's null,
/// `task.task_name`). When `name` is `None` and `all_users` is `false`,
/// restricts to jobs owned by `current_user_hash`.
pub fn get_nonterminal_job_ids_by_name(
    db: &DbHandle,
    name: Option<&str>,
    all_users: bool,
    current_user_hash: &str,
) -> Result<Vec<i64>, StoreError> {
    let conn = db.lock();
    let sql = format!(
        "SELECT DISTINCT t.job_id FROM spot_jobs t
         LEFT JOIN job_info j ON t.job_id = j.job_id
         WHERE t.status NOT IN ({TERMINAL_LIST})
           AND (?1 IS NULL OR COALESCE(j.name, t.task_name) = ?1)
           AND (?1 IS NOT NULL OR ?2 OR j.user_hash = ?3)
         ORDER BY t.job_id DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            rusqlite::params![name, all_users, current_user_hash],
            |r| r.get::<_, i64>(0),
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Same matching rules as [`get_nonterminal_job_ids_by_name`], without
/// the non-terminal filter and without a user restriction.
pub fn get_all_job_ids_by_name(db: &DbHandle, name: Option<&str>) -> Result<Vec<i64>, StoreError> {
    let conn = db.lock();
    let sql = "SELECT DISTINCT t.job_id FROM spot_jobs t
               LEFT JOIN job_info j ON t.job_id = j.job_id
               WHERE ?1 IS NULL OR COALESCE(j.name, t.task_name) = ?1
               ORDER BY t.job_id DESC";
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(rusqlite::params![name], |r| r.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Jobs with a live scheduler-held controller process.
pub fn get_schedule_live_jobs(
    db: &DbHandle,
    job_id: Option<i64>,
) -> Result<Vec<LiveJob>, StoreError> {
    let conn = db.lock();
    let sql = "SELECT job_id, schedule_state, controller_pid FROM job_info
               WHERE schedule_state NOT IN ('INACTIVE', 'WAITING', 'DONE')
                 AND (?1 IS NULL OR job_id = ?1)
               ORDER BY job_id DESC";
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(rusqlite::params![job_id], |r| {
            Ok(LiveJob {
                job_id: r.get(0)?,
                schedule_state: r.get(1)?,
                controller_pid: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Jobs the scheduler's periodic health-check pass should look at: live
/// (non-DONE) jobs, legacy jobs with no recorded schedule state, and
/// jobs stuck DONE with a still-non-terminal task (an inconsistency
/// repair case that can appear during the brief window between
/// controller-side updates).
pub fn get_jobs_to_check_status(
    db: &DbHandle,
    job_id: Option<i64>,
) -> Result<Vec<i64>, StoreError> {
    let conn = db.lock();
    let sql = format!(
        "SELECT DISTINCT t.job_id FROM spot_jobs t
         LEFT JOIN job_info j ON t.job_id = j.job_id
         WHERE (?1 IS NULL OR t.job_id = ?1)
           AND (
             (j.schedule_state IS NOT NULL AND j.schedule_state != 'DONE')
             OR (j.schedule_state IS NULL AND t.status NOT IN ({TERMINAL_LIST}))
             OR (j.schedule_state = 'DONE' AND t.status NOT IN ({TERMINAL_LIST}))
           )
         ORDER BY t.job_id DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params![job_id], |r| r.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Ordered `(task_id, status)` pairs for every task of `job_id`.
pub fn get_all_task_ids_statuses(
    db: &DbHandle,
    job_id: i64,
) -> Result<Vec<(i64, ManagedJobStatus)>, StoreError> {
    let conn = db.lock();
    let mut stmt =
        conn.prepare("SELECT task_id, status FROM spot_jobs WHERE job_id = ?1 ORDER BY task_id ASC")?;
    let rows = stmt
        .query_map(rusqlite::params![job_id], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// The first non-terminal `(task_id, status)` in ascending `task_id`
/// order, or the last task if every task is terminal; `None` if the job
/// has no tasks at all.
pub fn get_latest_task_id_status(
    db: &DbHandle,
    job_id: i64,
) -> Result<Option<(i64, ManagedJobStatus)>, StoreError> {
    let tasks = get_all_task_ids_statuses(db, job_id)?;
    if tasks.is_empty() {
        return Ok(None);
    }
    Ok(Some(
        tasks
            .iter()
            .find(|(_, status)| !status.is_terminal())
            .copied()
            .unwrap_or_else(|| *tasks.last().unwrap()),
    ))
}

/// The status component of [`get_latest_task_id_status`].
pub fn get_status(db: &DbHandle, job_id: i64) -> Result<Option<ManagedJobStatus>, StoreError> {
    Ok(get_latest_task_id_status(db, job_id)?.map(|(_, status)| status))
}

/// The first non-null `failure_reason` in task_id order, or `None`.
pub fn get_failure_reason(db: &DbHandle, job_id: i64) -> Result<Option<String>, StoreError> {
    let conn = db.lock();
    conn.query_row(
        "SELECT failure_reason FROM spot_jobs
         WHERE job_id = ?1 AND failure_reason IS NOT NULL
         ORDER BY task_id ASC LIMIT 1",
        rusqlite::params![job_id],
        |r| r.get(0),
    )
    .optional()
    .map_err(Into::into)
}

/// One record per task, left-outer-joined to its job row, sorted
/// `job_id DESC, task_id ASC`. `original_user_yaml_path`'s contents are
/// attached as `user_yaml` on a best-effort basis; any I/O error
/// (missing file, permissions) degrades silently to `None`.
pub fn get_managed_jobs(
    db: &DbHandle,
    job_id: Option<i64>,
) -> Result<Vec<ManagedJobRecord>, StoreError> {
    let conn = db.lock();
    let sql = "SELECT
            t.job_id, t.task_id, j.name, t.task_name, t.resources, t.status,
            j.schedule_state, j.controller_pid,
            t.submitted_at, t.start_at, t.end_at, t.last_recovered_at,
            t.recovery_count, t.job_duration, t.run_timestamp, t.failure_reason,
            t.specs, t.metadata, t.local_log_file,
            j.dag_yaml_path, j.env_file_path, j.original_user_yaml_path,
            j.user_hash, j.workspace, j.priority, j.entrypoint
         FROM spot_jobs t
         LEFT JOIN job_info j ON t.job_id = j.job_id
         WHERE ?1 IS NULL OR t.job_id = ?1
         ORDER BY t.job_id DESC, t.task_id ASC";
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(rusqlite::params![job_id])?;

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let job_name: Option<String> = row.get(2)?;
        let task_name: String = row.get(3)?;
        let original_user_yaml_path: Option<String> = row.get(21)?;
        let user_yaml = original_user_yaml_path
            .as_deref()
            .and_then(|p| std::fs::read_to_string(p).ok());

        out.push(ManagedJobRecord {
            job_id: row.get(0)?,
            task_id: row.get(1)?,
            job_name: job_name.unwrap_or_else(|| task_name.clone()),
            task_name,
            resources: row.get(4)?,
            status: row.get(5)?,
            schedule_state: {
                let raw: Option<String> = row.get(6)?;
                ManagedJobScheduleState::from_db_opt(raw.as_deref())
            },
            controller_pid: row.get(7)?,
            submitted_at: row.get(8)?,
            start_at: row.get(9)?,
            end_at: row.get(10)?,
            last_recovered_at: row.get(11)?,
            recovery_count: row.get(12)?,
            job_duration: row.get(13)?,
            run_timestamp: row.get(14)?,
            failure_reason: row.get(15)?,
            specs: parse_json_column(row.get(16)?),
            metadata: parse_json_column(row.get(17)?),
            local_log_file: row.get(18)?,
            dag_yaml_path: row.get(19)?,
            env_file_path: row.get(20)?,
            original_user_yaml_path,
            user_hash: row.get(22)?,
            workspace: row.get::<_, Option<String>>(23)?.unwrap_or_else(|| DEFAULT_WORKSPACE.to_string()),
            priority: row.get::<_, Option<i64>>(24)?.unwrap_or(crate::schema::DEFAULT_PRIORITY),
            entrypoint: row.get(25)?,
            user_yaml,
        });
    }
    Ok(out)
}

pub fn get_task_name(db: &DbHandle, job_id: i64, task_id: i64) -> Result<Option<String>, StoreError> {
    let conn = db.lock();
    conn.query_row(
        "SELECT task_name FROM spot_jobs WHERE job_id = ?1 AND task_id = ?2",
        rusqlite::params![job_id, task_id],
        |r| r.get(0),
    )
    .optional()
    .map_err(Into::into)
}

/// Parses and returns the task's `specs` column. Unlike
/// [`get_managed_jobs`], which degrades a malformed blob to `Null` for a
/// listing that spans many rows, a single-task lookup surfaces malformed
/// JSON as a [`StoreError::MalformedSpecs`] rather than hiding it.
pub fn get_task_specs(
    db: &DbHandle,
    job_id: i64,
    task_id: i64,
) -> Result<Option<JsonValue>, StoreError> {
    let conn = db.lock();
    let raw: Option<String> = conn
        .query_row(
            "SELECT specs FROM spot_jobs WHERE job_id = ?1 AND task_id = ?2",
            rusqlite::params![job_id, task_id],
            |r| r.get(0),
        )
        .optional()?;
    raw.map(|s| {
        serde_json::from_str(&s).map_err(|source| StoreError::MalformedSpecs {
            job_id,
            task_id,
            source,
        })
    })
    .transpose()
}

pub fn get_local_log_file(
    db: &DbHandle,
    job_id: i64,
    task_id: i64,
) -> Result<Option<String>, StoreError> {
    let conn = db.lock();
    conn.query_row(
        "SELECT local_log_file FROM spot_jobs WHERE job_id = ?1 AND task_id = ?2",
        rusqlite::params![job_id, task_id],
        |r| r.get(0),
    )
    .optional()
    .map_err(Into::into)
}

/// The job's workspace, or the system default if unset/legacy.
pub fn get_workspace(db: &DbHandle, job_id: i64) -> Result<String, StoreError> {
    let conn = db.lock();
    let raw: Option<String> = conn
        .query_row(
            "SELECT workspace FROM job_info WHERE job_id = ?1",
            rusqlite::params![job_id],
            |r| r.get(0),
        )
        .optional()?
        .flatten();
    Ok(raw.unwrap_or_else(|| DEFAULT_WORKSPACE.to_string()))
}

/// The highest job id known to the store, across both tables (a job may
/// predate the `job_info` table entirely).
pub fn get_latest_job_id(db: &DbHandle) -> Result<Option<i64>, StoreError> {
    let conn = db.lock();
    conn.query_row(
        "SELECT MAX(job_id) FROM (
            SELECT job_id FROM job_info
            UNION
            SELECT job_id FROM spot_jobs
         )",
        [],
        |r| r.get(0),
    )
    .map_err(Into::into)
}

pub fn get_job_schedule_state(
    db: &DbHandle,
    job_id: i64,
) -> Result<Option<ManagedJobScheduleState>, StoreError> {
    let conn = db.lock();
    let raw: Option<String> = conn
        .query_row(
            "SELECT schedule_state FROM job_info WHERE job_id = ?1",
            rusqlite::params![job_id],
            |r| r.get(0),
        )
        .optional()?
        .flatten();
    Ok(ManagedJobScheduleState::from_db_opt(raw.as_deref()))
}

pub fn get_num_launching_jobs(db: &DbHandle) -> Result<i64, StoreError> {
    let conn = db.lock();
    conn.query_row(
        "SELECT COUNT(*) FROM job_info WHERE schedule_state = 'LAUNCHING'",
        [],
        |r| r.get(0),
    )
    .map_err(Into::into)
}

pub fn get_num_alive_jobs(db: &DbHandle) -> Result<i64, StoreError> {
    let conn = db.lock();
    conn.query_row(
        "SELECT COUNT(*) FROM job_info
         WHERE schedule_state IN ('ALIVE_WAITING', 'LAUNCHING', 'ALIVE', 'ALIVE_BACKOFF')",
        [],
        |r| r.get(0),
    )
    .map_err(Into::into)
}

/// Priority-aware admission: the highest-priority WAITING
/// or ALIVE_WAITING job that would not starve a currently
/// LAUNCHING/ALIVE_BACKOFF job of higher priority, tie-broken FIFO by
/// smallest `job_id`.
pub fn get_waiting_job(db: &DbHandle) -> Result<Option<WaitingJob>, StoreError> {
    let conn = db.lock();
    conn.query_row(
        "SELECT job_id, schedule_state, dag_yaml_path, env_file_path FROM job_info
         WHERE schedule_state IN ('WAITING', 'ALIVE_WAITING')
           AND priority >= (
             SELECT COALESCE(MAX(priority), 0) FROM job_info
             WHERE schedule_state IN ('LAUNCHING', 'ALIVE_BACKOFF')
           )
         ORDER BY priority DESC, job_id ASC
         LIMIT 1",
        [],
        |r| {
            Ok(WaitingJob {
                job_id: r.get(0)?,
                schedule_state: r.get(1)?,
                dag_yaml_path: r.get(2)?,
                env_file_path: r.get(3)?,
            })
        },
    )
    .optional()
    .map_err(Into::into)
}

/// Fetches a single task row, for callers that want the full record
/// rather than one column at a time.
pub fn get_task(db: &DbHandle, job_id: i64, task_id: i64) -> Result<Option<TaskRow>, StoreError> {
    let conn = db.lock();
    conn.query_row(
        "SELECT spot_job_id, job_id, task_id, task_name, resources, status,
                submitted_at, start_at, end_at, last_recovered_at, recovery_count,
                job_duration, run_timestamp, failure_reason, specs, metadata, local_log_file
         FROM spot_jobs
         WHERE job_id = ?1 AND task_id = ?2",
        rusqlite::params![job_id, task_id],
        |r| {
            Ok(TaskRow {
                task_row_id: r.get(0)?,
                job_id: r.get(1)?,
                task_id: r.get(2)?,
                task_name: r.get(3)?,
                resources: r.get(4)?,
                status: r.get(5)?,
                submitted_at: r.get(6)?,
                start_at: r.get(7)?,
                end_at: r.get(8)?,
                last_recovered_at: r.get(9)?,
                recovery_count: r.get(10)?,
                job_duration: r.get(11)?,
                run_timestamp: r.get(12)?,
                failure_reason: r.get(13)?,
                specs: parse_json_column(r.get(14)?),
                metadata: parse_json_column(r.get(15)?),
                local_log_file: r.get(16)?,
            })
        },
    )
    .optional()
    .map_err(Into::into)
}

/// Fetches a single job row.
pub fn get_job(db: &DbHandle, job_id: i64) -> Result<Option<JobRow>, StoreError> {
    let conn = db.lock();
    conn.query_row(
        "SELECT job_id, name, schedule_state, controller_pid, dag_yaml_path, env_file_path,
                original_user_yaml_path, user_hash, workspace, priority, entrypoint
         FROM job_info WHERE job_id = ?1",
        rusqlite::params![job_id],
        |r| {
            let raw_state: Option<String> = r.get(2)?;
            Ok(JobRow {
                job_id: r.get(0)?,
                name: r.get(1)?,
                schedule_state: ManagedJobScheduleState::from_db_opt(raw_state.as_deref()),
                controller_pid: r.get(3)?,
                dag_yaml_path: r.get(4)?,
                env_file_path: r.get(5)?,
                original_user_yaml_path: r.get(6)?,
                user_hash: r.get(7)?,
                workspace: r.get(8)?,
                priority: r.get(9)?,
                entrypoint: r.get(10)?,
            })
        },
    )
    .optional()
    .map_err(Into::into)
}
