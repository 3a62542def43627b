use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// The scheduler's view of a job. Stored as `NULL` for legacy rows
/// predating this column, which deserialize as [`None`] rather than
/// [`ManagedJobScheduleState::Invalid`]. `Invalid` exists only so
/// callers that need a total enum can name the legacy case explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManagedJobScheduleState {
    Invalid,
    Inactive,
    Waiting,
    AliveWaiting,
    Launching,
    AliveBackoff,
    Alive,
    Done,
}

impl ManagedJobScheduleState {
    pub(crate) fn as_db_str(self) -> &'static str {
        match self {
            ManagedJobScheduleState::Invalid => {
                unreachable!("Invalid is a read-side sentinel for NULL and is never written")
            }
            ManagedJobScheduleState::Inactive => "INACTIVE",
            ManagedJobScheduleState::Waiting => "WAITING",
            ManagedJobScheduleState::AliveWaiting => "ALIVE_WAITING",
            ManagedJobScheduleState::Launching => "LAUNCHING",
            ManagedJobScheduleState::AliveBackoff => "ALIVE_BACKOFF",
            ManagedJobScheduleState::Alive => "ALIVE",
            ManagedJobScheduleState::Done => "DONE",
        }
    }

    pub(crate) fn from_db_str(s: &str) -> Option<Self> {
        Some(match s {
            "INACTIVE" => ManagedJobScheduleState::Inactive,
            "WAITING" => ManagedJobScheduleState::Waiting,
            "ALIVE_WAITING" => ManagedJobScheduleState::AliveWaiting,
            "LAUNCHING" => ManagedJobScheduleState::Launching,
            "ALIVE_BACKOFF" => ManagedJobScheduleState::AliveBackoff,
            "ALIVE" => ManagedJobScheduleState::Alive,
            "DONE" => ManagedJobScheduleState::Done,
            _ => return None,
        })
    }

    /// Parse a nullable `schedule_state` column, mapping SQL `NULL` to
    /// `None` (legacy row) rather than `Some(Invalid)`.
    pub(crate) fn from_db_opt(s: Option<&str>) -> Option<Self> {
        s.and_then(Self::from_db_str)
    }

    /// States in which a job holds a live controller process, per
    /// `get_schedule_live_jobs` / `get_num_alive_jobs`.
    pub fn is_alive(self) -> bool {
        matches!(
            self,
            ManagedJobScheduleState::AliveWaiting
                | ManagedJobScheduleState::Launching
                | ManagedJobScheduleState::Alive
                | ManagedJobScheduleState::AliveBackoff
        )
    }
}

impl ToSql for ManagedJobScheduleState {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_db_str()))
    }
}

/// Parses a non-null `schedule_state` column. Use [`ManagedJobScheduleState::from_db_opt`]
/// directly when the column may be legacy-`NULL`.
impl FromSql for ManagedJobScheduleState {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        ManagedJobScheduleState::from_db_str(text).ok_or_else(|| {
            FromSqlError::Other(format!("unknown ManagedJobScheduleState {text:?}").into())
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_through_db_string() {
        let all = [
            ManagedJobScheduleState::Inactive,
            ManagedJobScheduleState::Waiting,
            ManagedJobScheduleState::AliveWaiting,
            ManagedJobScheduleState::Launching,
            ManagedJobScheduleState::AliveBackoff,
            ManagedJobScheduleState::Alive,
            ManagedJobScheduleState::Done,
        ];
        for s in all {
            assert_eq!(ManagedJobScheduleState::from_db_str(s.as_db_str()), Some(s));
        }
        assert_eq!(ManagedJobScheduleState::from_db_opt(None), None);
        assert_eq!(ManagedJobScheduleState::from_db_str("bogus"), None);
    }

    #[test]
    fn is_alive_covers_launching_and_backoff_states() {
        assert!(ManagedJobScheduleState::Launching.is_alive());
        assert!(ManagedJobScheduleState::Alive.is_alive());
        assert!(ManagedJobScheduleState::AliveBackoff.is_alive());
        assert!(ManagedJobScheduleState::AliveWaiting.is_alive());
        assert!(!ManagedJobScheduleState::Inactive.is_alive());
        assert!(!ManagedJobScheduleState::Waiting.is_alive());
        assert!(!ManagedJobScheduleState::Done.is_alive());
    }
}
