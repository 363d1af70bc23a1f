//! Row model for the `report_results` table and its exhaustive
//! conversion into the [`JobResult`] tagged union.

use std::collections::BTreeMap;

use sqlx::FromRow;

use reportd_core::{
    CompleteResult, ErrorResult, JobId, JobResult, JobStatus, Parameters, PendingResult,
    Timestamp,
};

use crate::StoreError;

/// A row from `report_results`. Nullable columns cover the fields that
/// only exist for some variants of [`JobResult`].
#[derive(Debug, Clone, FromRow)]
pub struct ResultRow {
    pub job_id: JobId,
    pub report_name: String,
    pub report_title: String,
    pub status: String,
    pub parameters: serde_json::Value,
    pub mailto: Option<String>,
    pub generate_pdf: bool,
    pub start_time: Timestamp,
    pub finish_time: Option<Timestamp>,
    pub update_time: Timestamp,
    pub stdout: Vec<String>,
    pub error_info: Option<String>,
    pub raw_html: Option<String>,
    pub raw_document: Option<String>,
    /// JSON array of resource names whose bytes live in `report_blobs`.
    pub resource_names: serde_json::Value,
}

impl ResultRow {
    /// Resource names referenced by this row.
    pub fn resource_names(&self) -> Vec<String> {
        self.resource_names
            .as_array()
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| n.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Exhaustive conversion keyed on the stored status string.
    ///
    /// DELETED rows convert to `None`; the record only exists for audit.
    /// Complete results come back unhydrated: resource names are present
    /// with empty bytes and the PDF is absent until blob hydration.
    pub fn into_result(self) -> Result<Option<JobResult>, StoreError> {
        let status = JobStatus::from_stored(&self.status).ok_or_else(|| StoreError::Corrupt {
            job_id: self.job_id,
            detail: format!("unknown stored status {:?}", self.status),
        })?;

        let parameters: Parameters = self
            .parameters
            .as_object()
            .cloned()
            .unwrap_or_default();

        let result = match status {
            JobStatus::Deleted => return Ok(None),
            JobStatus::Submitted | JobStatus::Pending => JobResult::Pending(PendingResult {
                job_id: self.job_id,
                report_name: self.report_name,
                report_title: self.report_title,
                status,
                parameters,
                mailto: self.mailto,
                generate_pdf: self.generate_pdf,
                start_time: self.start_time,
                update_time: self.update_time,
                stdout: self.stdout,
            }),
            JobStatus::Error | JobStatus::Cancelled | JobStatus::Timeout => {
                JobResult::Error(ErrorResult {
                    job_id: self.job_id,
                    report_name: self.report_name,
                    report_title: self.report_title,
                    status,
                    parameters,
                    mailto: self.mailto,
                    generate_pdf: self.generate_pdf,
                    start_time: self.start_time,
                    update_time: self.update_time,
                    stdout: self.stdout,
                    error_info: self.error_info.unwrap_or_default(),
                })
            }
            JobStatus::Done => {
                let finish_time = self.finish_time.ok_or_else(|| StoreError::Corrupt {
                    job_id: self.job_id,
                    detail: "DONE record without finish_time".into(),
                })?;
                let html_resources: BTreeMap<String, Vec<u8>> = self
                    .resource_names()
                    .into_iter()
                    .map(|name| (name, Vec::new()))
                    .collect();
                JobResult::Complete(CompleteResult {
                    job_id: self.job_id,
                    report_name: self.report_name,
                    report_title: self.report_title,
                    parameters,
                    mailto: self.mailto,
                    generate_pdf: self.generate_pdf,
                    start_time: self.start_time,
                    finish_time,
                    update_time: self.update_time,
                    stdout: self.stdout,
                    raw_html: self.raw_html.unwrap_or_default(),
                    html_resources,
                    raw_document: self.raw_document.unwrap_or_default(),
                    pdf: None,
                })
            }
        };
        Ok(Some(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Utc;

    fn row(status: &str) -> ResultRow {
        ResultRow {
            job_id: uuid::Uuid::new_v4(),
            report_name: "demo".into(),
            report_title: "Demo".into(),
            status: status.into(),
            parameters: serde_json::json!({"n": 5}),
            mailto: None,
            generate_pdf: false,
            start_time: Utc::now(),
            finish_time: Some(Utc::now()),
            update_time: Utc::now(),
            stdout: vec!["line".into()],
            error_info: Some("boom".into()),
            raw_html: Some("<html/>".into()),
            raw_document: Some("{}".into()),
            resource_names: serde_json::json!(["output_0.png"]),
        }
    }

    #[test]
    fn deleted_rows_convert_to_none() {
        let converted = row(JobStatus::Deleted.as_stored()).into_result().unwrap();
        assert!(converted.is_none());
    }

    #[test]
    fn unknown_status_is_corrupt() {
        let err = row("who knows").into_result().unwrap_err();
        assert_matches!(err, StoreError::Corrupt { .. });
    }

    #[test]
    fn done_row_converts_unhydrated() {
        let converted = row(JobStatus::Done.as_stored())
            .into_result()
            .unwrap()
            .unwrap();
        assert_matches!(&converted, JobResult::Complete(complete) => {
            assert_eq!(complete.html_resources.len(), 1);
            assert!(complete.html_resources["output_0.png"].is_empty());
            assert!(complete.pdf.is_none());
        });
    }

    #[test]
    fn done_row_without_finish_time_is_corrupt() {
        let mut done = row(JobStatus::Done.as_stored());
        done.finish_time = None;
        assert_matches!(done.into_result().unwrap_err(), StoreError::Corrupt { .. });
    }

    #[test]
    fn error_family_converts_to_error_variant() {
        for status in [JobStatus::Error, JobStatus::Cancelled, JobStatus::Timeout] {
            let converted = row(status.as_stored()).into_result().unwrap().unwrap();
            assert_eq!(converted.status(), status);
            assert_matches!(&converted, JobResult::Error(e) => {
                assert_eq!(e.error_info, "boom");
            });
        }
    }
}
