use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// The managed-job status of a single task row.
///
/// Declaration order defines the total order used by [`ManagedJobStatus::ordinal`];
/// do not reorder variants without checking callers that compare statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManagedJobStatus {
    Pending,
    Starting,
    Running,
    Recovering,
    Cancelling,
    Succeeded,
    Cancelled,
    Failed,
    FailedSetup,
    FailedPrechecks,
    FailedNoResource,
    FailedController,
    /// Deprecated: retained only so legacy rows written before the
    /// Starting/Running split still deserialize.
    Submitted,
}

impl ManagedJobStatus {
    /// All terminal statuses, i.e. those with `end_at` set.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ManagedJobStatus::Succeeded
                | ManagedJobStatus::Cancelled
                | ManagedJobStatus::Failed
                | ManagedJobStatus::FailedSetup
                | ManagedJobStatus::FailedPrechecks
                | ManagedJobStatus::FailedNoResource
                | ManagedJobStatus::FailedController
        )
    }

    /// The subset of terminal statuses that represent a failure.
    pub fn is_failed(self) -> bool {
        matches!(
            self,
            ManagedJobStatus::Failed
                | ManagedJobStatus::FailedSetup
                | ManagedJobStatus::FailedPrechecks
                | ManagedJobStatus::FailedNoResource
                | ManagedJobStatus::FailedController
        )
    }

    /// Non-terminal, non-cancelling statuses: the task is actively being
    /// driven by the controller.
    pub fn is_processing(self) -> bool {
        matches!(
            self,
            ManagedJobStatus::Pending
                | ManagedJobStatus::Starting
                | ManagedJobStatus::Running
                | ManagedJobStatus::Recovering
        )
    }

    /// Total order consistent with declaration order. Used only for
    /// comparisons (e.g. picking a representative status); has no
    /// relation to lifecycle legality.
    pub fn ordinal(self) -> u8 {
        match self {
            ManagedJobStatus::Pending => 0,
            ManagedJobStatus::Starting => 1,
            ManagedJobStatus::Running => 2,
            ManagedJobStatus::Recovering => 3,
            ManagedJobStatus::Cancelling => 4,
            ManagedJobStatus::Succeeded => 5,
            ManagedJobStatus::Cancelled => 6,
            ManagedJobStatus::Failed => 7,
            ManagedJobStatus::FailedSetup => 8,
            ManagedJobStatus::FailedPrechecks => 9,
            ManagedJobStatus::FailedNoResource => 10,
            ManagedJobStatus::FailedController => 11,
            ManagedJobStatus::Submitted => 12,
        }
    }

    pub(crate) fn as_db_str(self) -> &'static str {
        match self {
            ManagedJobStatus::Pending => "PENDING",
            ManagedJobStatus::Starting => "STARTING",
            ManagedJobStatus::Running => "RUNNING",
            ManagedJobStatus::Recovering => "RECOVERING",
            ManagedJobStatus::Cancelling => "CANCELLING",
            ManagedJobStatus::Succeeded => "SUCCEEDED",
            ManagedJobStatus::Cancelled => "CANCELLED",
            ManagedJobStatus::Failed => "FAILED",
            ManagedJobStatus::FailedSetup => "FAILED_SETUP",
            ManagedJobStatus::FailedPrechecks => "FAILED_PRECHECKS",
            ManagedJobStatus::FailedNoResource => "FAILED_NO_RESOURCE",
            ManagedJobStatus::FailedController => "FAILED_CONTROLLER",
            ManagedJobStatus::Submitted => "SUBMITTED",
        }
    }

    pub(crate) fn from_db_str(s: &str) -> Option<Self> {
        Some(match s {
            "PENDING" => ManagedJobStatus::Pending,
            "STARTING" => ManagedJobStatus::Starting,
            "RUNNING" => ManagedJobStatus::Running,
            "RECOVERING" => ManagedJobStatus::Recovering,
            "CANCELLING" => ManagedJobStatus::Cancelling,
            "SUCCEEDED" => ManagedJobStatus::Succeeded,
            "CANCELLED" => ManagedJobStatus::Cancelled,
            "FAILED" => ManagedJobStatus::Failed,
            "FAILED_SETUP" => ManagedJobStatus::FailedSetup,
            "FAILED_PRECHECKS" => ManagedJobStatus::FailedPrechecks,
            "FAILED_NO_RESOURCE" => ManagedJobStatus::FailedNoResource,
            "FAILED_CONTROLLER" => ManagedJobStatus::FailedController,
            "SUBMITTED" => ManagedJobStatus::Submitted,
            _ => return None,
        })
    }
}

impl ToSql for ManagedJobStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_db_str()))
    }
}

impl FromSql for ManagedJobStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        ManagedJobStatus::from_db_str(text)
            .ok_or_else(|| FromSqlError::Other(format!("unknown ManagedJobStatus {text:?}").into()))
    }
}

/// The full set of terminal task statuses that represent a failure; used
/// by `set_failed` to validate its `failure_kind` argument.
pub const FAILURE_STATUSES: &[ManagedJobStatus] = &[
    ManagedJobStatus::Failed,
    ManagedJobStatus::FailedSetup,
    ManagedJobStatus::FailedPrechecks,
    ManagedJobStatus::FailedNoResource,
    ManagedJobStatus::FailedController,
];

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn terminal_classification_matches_table() {
        for s in FAILURE_STATUSES {
            assert!(s.is_terminal());
            assert!(s.is_failed());
        }
        assert!(ManagedJobStatus::Succeeded.is_terminal());
        assert!(!ManagedJobStatus::Succeeded.is_failed());
        assert!(!ManagedJobStatus::Cancelling.is_terminal());
        assert!(!ManagedJobStatus::Pending.is_terminal());
    }

    #[test]
    fn processing_excludes_cancelling_and_terminal() {
        assert!(ManagedJobStatus::Pending.is_processing());
        assert!(ManagedJobStatus::Starting.is_processing());
        assert!(ManagedJobStatus::Running.is_processing());
        assert!(ManagedJobStatus::Recovering.is_processing());
        assert!(!ManagedJobStatus::Cancelling.is_processing());
        assert!(!ManagedJobStatus::Succeeded.is_processing());
    }

    #[test]
    fn round_trips_through_db_string() {
        let all = [
            ManagedJobStatus::Pending,
            ManagedJobStatus::Starting,
            ManagedJobStatus::Running,
            ManagedJobStatus::Recovering,
            ManagedJobStatus::Cancelling,
            ManagedJobStatus::Succeeded,
            ManagedJobStatus::Cancelled,
            ManagedJobStatus::Failed,
            ManagedJobStatus::FailedSetup,
            ManagedJobStatus::FailedPrechecks,
            ManagedJobStatus::FailedNoResource,
            ManagedJobStatus::FailedController,
            ManagedJobStatus::Submitted,
        ];
        for s in all {
            assert_eq!(ManagedJobStatus::from_db_str(s.as_db_str()), Some(s));
        }
        assert_eq!(ManagedJobStatus::from_db_str("bogus"), None);
    }

    #[test]
    fn ordinal_matches_declaration_order() {
        assert!(ManagedJobStatus::Pending.ordinal() < ManagedJobStatus::Starting.ordinal());
        assert!(ManagedJobStatus::Running.ordinal() < ManagedJobStatus::Recovering.ordinal());
        assert!(ManagedJobStatus::Cancelling.ordinal() < ManagedJobStatus::Succeeded.ordinal());
    }
}
