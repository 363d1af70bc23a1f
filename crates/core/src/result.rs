//! The [`JobResult`] tagged union.
//!
//! One variant per result family, each carrying only the fields that are
//! valid for it: a job that never completed has no finish time, a failed
//! job has no rendered HTML, and so on. The durable store deserializes
//! rows into this union exhaustively from the stored status string.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{JobId, JobStatus, Parameters, Timestamp};

/// A `(report_name, job_id)` pair as returned by key listings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResultKey {
    pub report_name: String,
    pub job_id: JobId,
}

/// A job that has been submitted but has not reached a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingResult {
    pub job_id: JobId,
    pub report_name: String,
    pub report_title: String,
    /// `Submitted` until the worker picks the job up, then `Pending`.
    pub status: JobStatus,
    pub parameters: Parameters,
    pub mailto: Option<String>,
    pub generate_pdf: bool,
    pub start_time: Timestamp,
    pub update_time: Timestamp,
    /// Live worker output, appended line by line by the monitor task.
    pub stdout: Vec<String>,
}

/// A job that ended without a usable result: ERROR, CANCELLED or TIMEOUT.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResult {
    pub job_id: JobId,
    pub report_name: String,
    pub report_title: String,
    /// `Error`, `Cancelled` or `Timeout`.
    pub status: JobStatus,
    pub parameters: Parameters,
    pub mailto: Option<String>,
    pub generate_pdf: bool,
    pub start_time: Timestamp,
    pub update_time: Timestamp,
    pub stdout: Vec<String>,
    /// Full diagnostic text: error chain, timeout overage, or the fixed
    /// cancellation message.
    pub error_info: String,
}

impl ErrorResult {
    /// HTML fragment shown in place of the report output.
    pub fn raw_html(&self) -> String {
        format!(
            "<p>This job resulted in an error: <br/><code style=\"white-space: pre-wrap;\">{}</code></p>",
            self.error_info
        )
    }
}

/// A successfully completed job (DONE) with its rendered payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteResult {
    pub job_id: JobId,
    pub report_name: String,
    pub report_title: String,
    pub parameters: Parameters,
    pub mailto: Option<String>,
    pub generate_pdf: bool,
    pub start_time: Timestamp,
    pub finish_time: Timestamp,
    pub update_time: Timestamp,
    pub stdout: Vec<String>,
    /// Rendered HTML body of the report.
    pub raw_html: String,
    /// Named HTML resources (figures etc.), blob-backed. Keys are bare
    /// resource names; hydrated values round-trip byte-for-byte.
    pub html_resources: BTreeMap<String, Vec<u8>>,
    /// The raw serialized output document produced by the template engine.
    pub raw_document: String,
    /// Rendered PDF, present when `generate_pdf` was requested.
    pub pdf: Option<Vec<u8>>,
}

/// Current state of one submitted job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum JobResult {
    Pending(PendingResult),
    Error(ErrorResult),
    Complete(CompleteResult),
}

impl JobResult {
    pub fn job_id(&self) -> JobId {
        match self {
            Self::Pending(r) => r.job_id,
            Self::Error(r) => r.job_id,
            Self::Complete(r) => r.job_id,
        }
    }

    pub fn report_name(&self) -> &str {
        match self {
            Self::Pending(r) => &r.report_name,
            Self::Error(r) => &r.report_name,
            Self::Complete(r) => &r.report_name,
        }
    }

    pub fn report_title(&self) -> &str {
        match self {
            Self::Pending(r) => &r.report_title,
            Self::Error(r) => &r.report_title,
            Self::Complete(r) => &r.report_title,
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            Self::Pending(r) => r.status,
            Self::Error(r) => r.status,
            Self::Complete(_) => JobStatus::Done,
        }
    }

    pub fn parameters(&self) -> &Parameters {
        match self {
            Self::Pending(r) => &r.parameters,
            Self::Error(r) => &r.parameters,
            Self::Complete(r) => &r.parameters,
        }
    }

    pub fn mailto(&self) -> Option<&str> {
        match self {
            Self::Pending(r) => r.mailto.as_deref(),
            Self::Error(r) => r.mailto.as_deref(),
            Self::Complete(r) => r.mailto.as_deref(),
        }
    }

    pub fn generate_pdf(&self) -> bool {
        match self {
            Self::Pending(r) => r.generate_pdf,
            Self::Error(r) => r.generate_pdf,
            Self::Complete(r) => r.generate_pdf,
        }
    }

    pub fn start_time(&self) -> Timestamp {
        match self {
            Self::Pending(r) => r.start_time,
            Self::Error(r) => r.start_time,
            Self::Complete(r) => r.start_time,
        }
    }

    pub fn update_time(&self) -> Timestamp {
        match self {
            Self::Pending(r) => r.update_time,
            Self::Error(r) => r.update_time,
            Self::Complete(r) => r.update_time,
        }
    }

    pub fn key(&self) -> ResultKey {
        ResultKey {
            report_name: self.report_name().to_string(),
            job_id: self.job_id(),
        }
    }

    /// Well-formed ERROR-shaped record returned for unknown (or deleted)
    /// job ids instead of a null.
    pub fn not_found(report_name: &str, job_id: JobId) -> Self {
        let now = Utc::now();
        Self::Error(ErrorResult {
            job_id,
            report_name: report_name.to_string(),
            report_title: report_name.to_string(),
            status: JobStatus::Error,
            parameters: Parameters::new(),
            mailto: None,
            generate_pdf: false,
            start_time: now,
            update_time: now,
            stdout: Vec::new(),
            error_info: format!(
                "Job results not found for report name={report_name} / job id={job_id}. \
                 Did you use an invalid job ID?"
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_error_shaped() {
        let id = uuid::Uuid::new_v4();
        let result = JobResult::not_found("demo", id);
        assert_eq!(result.status(), JobStatus::Error);
        assert_eq!(result.report_name(), "demo");
        assert_eq!(result.job_id(), id);
        match result {
            JobResult::Error(err) => {
                assert!(err.error_info.contains("invalid job ID"));
                assert!(err.error_info.contains(&id.to_string()));
            }
            other => panic!("expected error variant, got {other:?}"),
        }
    }

    #[test]
    fn complete_status_is_done() {
        let now = Utc::now();
        let complete = JobResult::Complete(CompleteResult {
            job_id: uuid::Uuid::new_v4(),
            report_name: "demo".into(),
            report_title: "Demo".into(),
            parameters: Parameters::new(),
            mailto: None,
            generate_pdf: false,
            start_time: now,
            finish_time: now,
            update_time: now,
            stdout: vec![],
            raw_html: "<html></html>".into(),
            html_resources: BTreeMap::new(),
            raw_document: "{}".into(),
            pdf: None,
        });
        assert_eq!(complete.status(), JobStatus::Done);
    }

    #[test]
    fn error_raw_html_embeds_diagnostics() {
        let id = uuid::Uuid::new_v4();
        let JobResult::Error(err) = JobResult::not_found("demo", id) else {
            panic!("expected error variant");
        };
        let html = err.raw_html();
        assert!(html.contains("<code"));
        assert!(html.contains("Job results not found"));
    }
}
