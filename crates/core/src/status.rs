//! The durable job status state machine.
//!
//! Statuses are persisted as fixed strings; [`JobStatus::as_stored`] and
//! [`JobStatus::from_stored`] are the only places that know them.
//! DONE/ERROR/CANCELLED/TIMEOUT are terminal; DELETED is a soft-delete
//! reachable from any state.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a submitted report job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Stub written, worker not yet started.
    Submitted,
    /// Worker picked the job up and is executing it.
    Pending,
    /// Finished successfully; blobs are persisted and immutable.
    Done,
    /// Execution or submission failed; `error_info` holds diagnostics.
    Error,
    /// The service shut down before the worker started.
    Cancelled,
    /// No terminal status arrived within the allotted window.
    Timeout,
    /// Soft-deleted; the row remains for audit but reads behave as not-found.
    Deleted,
}

impl JobStatus {
    /// The string persisted in the `status` column.
    pub fn as_stored(self) -> &'static str {
        match self {
            Self::Submitted => "Submitted to run",
            Self::Pending => "Running...",
            Self::Done => "Checks done!",
            Self::Error => "Error",
            Self::Cancelled => "CANCELLED",
            Self::Timeout => "Report timed out. Please try again!",
            Self::Deleted => "This report has been deleted.",
        }
    }

    /// Exhaustive deserialization from the stored status string.
    pub fn from_stored(s: &str) -> Option<Self> {
        match s {
            "Submitted to run" => Some(Self::Submitted),
            "Running..." => Some(Self::Pending),
            "Checks done!" => Some(Self::Done),
            "Error" => Some(Self::Error),
            "CANCELLED" => Some(Self::Cancelled),
            "Report timed out. Please try again!" => Some(Self::Timeout),
            "This report has been deleted." => Some(Self::Deleted),
            _ => None,
        }
    }

    /// A terminal status is never overwritten except by an explicit delete.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Done | Self::Error | Self::Cancelled | Self::Timeout
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Submitted => "SUBMITTED",
            Self::Pending => "PENDING",
            Self::Done => "DONE",
            Self::Error => "ERROR",
            Self::Cancelled => "CANCELLED",
            Self::Timeout => "TIMEOUT",
            Self::Deleted => "DELETED",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [JobStatus; 7] = [
        JobStatus::Submitted,
        JobStatus::Pending,
        JobStatus::Done,
        JobStatus::Error,
        JobStatus::Cancelled,
        JobStatus::Timeout,
        JobStatus::Deleted,
    ];

    #[test]
    fn stored_strings_round_trip() {
        for status in ALL {
            assert_eq!(JobStatus::from_stored(status.as_stored()), Some(status));
        }
    }

    #[test]
    fn stored_strings_are_stable() {
        // These exact strings live in existing result collections.
        assert_eq!(JobStatus::Done.as_stored(), "Checks done!");
        assert_eq!(JobStatus::Submitted.as_stored(), "Submitted to run");
        assert_eq!(JobStatus::Pending.as_stored(), "Running...");
        assert_eq!(
            JobStatus::Timeout.as_stored(),
            "Report timed out. Please try again!"
        );
    }

    #[test]
    fn unknown_stored_string_is_none() {
        assert_eq!(JobStatus::from_stored("nope"), None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Done.is_terminal());
        assert!(JobStatus::Error.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(JobStatus::Timeout.is_terminal());
        assert!(!JobStatus::Submitted.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Deleted.is_terminal());
    }
}
