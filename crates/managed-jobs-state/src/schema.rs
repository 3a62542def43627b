//! Schema creation and forward-only, column-additive migration.
//!
//! The bootstrap statements below intentionally model the *oldest* shape
//! each table ever had (single-task rows, no scheduler, no DAG index) so
//! that [`init`] exercises the same "add column to a table that predates
//! it" path whether it's run against a brand-new file or one that has
//! been migrated many times already. Running `init` twice against an
//! already-migrated database is a no-op.

use rusqlite::Connection;

use crate::error::StoreError;

pub const DEFAULT_WORKSPACE: &str = "default";
/// System default job priority, used both as the schema-migration
/// backfill value and as the default for newly-submitted jobs whose
/// caller does not specify one.
pub const DEFAULT_PRIORITY: i64 = 500;
pub(crate) const DEFAULT_SPECS_JSON_LITERAL: &str = r#"{"max_restarts_on_errors": 0}"#;
pub(crate) const DEFAULT_METADATA_JSON_LITERAL: &str = "{}";

pub const TASK_TABLE: &str = "spot_jobs";
pub const JOB_TABLE: &str = "job_info";

pub(crate) fn init(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS spot_jobs (
            spot_job_id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_name TEXT,
            resources TEXT,
            status TEXT NOT NULL,
            submitted_at REAL,
            start_at REAL,
            end_at REAL,
            run_timestamp TEXT,
            failure_reason TEXT,
            local_log_file TEXT
        );

        CREATE TABLE IF NOT EXISTS job_info (
            job_id INTEGER PRIMARY KEY,
            name TEXT,
            schedule_state TEXT,
            controller_pid INTEGER,
            dag_yaml_path TEXT,
            env_file_path TEXT,
            original_user_yaml_path TEXT,
            user_hash TEXT,
            entrypoint TEXT
        );
        "#,
    )?;

    migrate_task_table(conn)?;
    migrate_job_table(conn)?;

    // Enforces the "row absent" gate on `set_pending`: a second insert
    // for the same (job_id, task_id) pair fails as a uniqueness
    // violation rather than silently creating a duplicate task row.
    conn.execute_batch(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_spot_jobs_job_task ON spot_jobs (job_id, task_id);",
    )?;

    Ok(())
}

fn migrate_task_table(conn: &Connection) -> Result<(), StoreError> {
    add_column_if_absent(conn, TASK_TABLE, "last_recovered_at", "REAL", Some("-1"))?;
    add_column_if_absent(conn, TASK_TABLE, "recovery_count", "INTEGER", Some("0"))?;
    add_column_if_absent(conn, TASK_TABLE, "job_duration", "REAL", Some("0"))?;

    // job_id ← spot_job_id: before multi-task DAGs existed, each row's
    // autoincrement primary key *was* the job id.
    if add_column_if_absent(conn, TASK_TABLE, "job_id", "INTEGER", None)? {
        conn.execute(
            "UPDATE spot_jobs SET job_id = spot_job_id WHERE job_id IS NULL",
            [],
        )?;
    }
    // task_id ← 0: a legacy row is, by definition, the lone task of its job.
    if add_column_if_absent(conn, TASK_TABLE, "task_id", "INTEGER", Some("0"))? {
        conn.execute("UPDATE spot_jobs SET task_id = 0 WHERE task_id IS NULL", [])?;
    }
    // task_name ← job_name.
    if add_column_if_absent(conn, TASK_TABLE, "task_name", "TEXT", None)? {
        conn.execute(
            "UPDATE spot_jobs SET task_name = job_name WHERE task_name IS NULL",
            [],
        )?;
    }
    if add_column_if_absent(conn, TASK_TABLE, "specs", "TEXT", None)? {
        conn.execute(
            "UPDATE spot_jobs SET specs = ?1 WHERE specs IS NULL",
            [DEFAULT_SPECS_JSON_LITERAL],
        )?;
    }
    if add_column_if_absent(conn, TASK_TABLE, "metadata", "TEXT", None)? {
        conn.execute(
            "UPDATE spot_jobs SET metadata = ?1 WHERE metadata IS NULL",
            [DEFAULT_METADATA_JSON_LITERAL],
        )?;
    }

    Ok(())
}

fn migrate_job_table(conn: &Connection) -> Result<(), StoreError> {
    if add_column_if_absent(conn, JOB_TABLE, "workspace", "TEXT", None)? {
        conn.execute(
            "UPDATE job_info SET workspace = ?1 WHERE workspace IS NULL",
            [DEFAULT_WORKSPACE],
        )?;
    }
    if add_column_if_absent(conn, JOB_TABLE, "priority", "INTEGER", None)? {
        conn.execute(
            "UPDATE job_info SET priority = ?1 WHERE priority IS NULL",
            [DEFAULT_PRIORITY],
        )?;
    }
    Ok(())
}

/// Adds `column` to `table` with the given SQLite type/default clause if
/// it is not already present. Returns `true` if the column was just
/// added (so the caller knows whether a backfill `UPDATE` is needed),
/// `false` if it already existed (idempotent no-op).
fn add_column_if_absent(
    conn: &Connection,
    table: &str,
    column: &str,
    sql_type: &str,
    default_clause: Option<&str>,
) -> Result<bool, StoreError> {
    if column_exists(conn, table, column)? {
        return Ok(false);
    }

    let default_sql = match default_clause {
        Some(d) => format!(" DEFAULT {d}"),
        None => String::new(),
    };
    conn.execute_batch(&format!(
        "ALTER TABLE {table} ADD COLUMN {column} {sql_type}{default_sql};"
    ))?;
    tracing::debug!(%table, %column, "added missing column during schema migration");
    Ok(true)
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, StoreError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get("name")?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod test {
    use super::*;

    fn open() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn init_creates_canonical_columns() {
        let conn = open();
        init(&conn).unwrap();

        for col in [
            "spot_job_id",
            "job_id",
            "task_id",
            "task_name",
            "job_name",
            "resources",
            "status",
            "submitted_at",
            "start_at",
            "end_at",
            "last_recovered_at",
            "recovery_count",
            "job_duration",
            "run_timestamp",
            "failure_reason",
            "specs",
            "metadata",
            "local_log_file",
        ] {
            assert!(
                column_exists(&conn, TASK_TABLE, col).unwrap(),
                "missing task column {col}"
            );
        }
        for col in [
            "job_id",
            "name",
            "schedule_state",
            "controller_pid",
            "dag_yaml_path",
            "env_file_path",
            "original_user_yaml_path",
            "user_hash",
            "workspace",
            "priority",
            "entrypoint",
        ] {
            assert!(
                column_exists(&conn, JOB_TABLE, col).unwrap(),
                "missing job column {col}"
            );
        }
    }

    #[test]
    fn init_is_idempotent() {
        let conn = open();
        init(&conn).unwrap();
        init(&conn).unwrap();
        init(&conn).unwrap();
    }

    #[test]
    fn legacy_row_is_backfilled_on_migration() {
        let conn = open();
        conn.execute_batch(
            r#"
            CREATE TABLE spot_jobs (
                spot_job_id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_name TEXT,
                resources TEXT,
                status TEXT NOT NULL,
                submitted_at REAL,
                start_at REAL,
                end_at REAL,
                run_timestamp TEXT,
                failure_reason TEXT,
                local_log_file TEXT
            );
            CREATE TABLE job_info (
                job_id INTEGER PRIMARY KEY,
                name TEXT,
                schedule_state TEXT,
                controller_pid INTEGER,
                dag_yaml_path TEXT,
                env_file_path TEXT,
                original_user_yaml_path TEXT,
                user_hash TEXT,
                entrypoint TEXT
            );
            INSERT INTO spot_jobs (job_name, resources, status) VALUES ('legacy-job', '1x A100', 'SUCCEEDED');
            "#,
        )
        .unwrap();

        init(&conn).unwrap();

        let (job_id, task_id, task_name, specs, metadata): (i64, i64, String, String, String) = conn
            .query_row(
                "SELECT job_id, task_id, task_name, specs, metadata FROM spot_jobs WHERE spot_job_id = 1",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
            )
            .unwrap();
        assert_eq!(job_id, 1);
        assert_eq!(task_id, 0);
        assert_eq!(task_name, "legacy-job");
        assert_eq!(specs, DEFAULT_SPECS_JSON_LITERAL);
        assert_eq!(metadata, DEFAULT_METADATA_JSON_LITERAL);
    }
}
