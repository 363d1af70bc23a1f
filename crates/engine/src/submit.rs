//! The submission boundary.
//!
//! Validation and the initial stub write happen synchronously so callers
//! get a hard error when the job cannot be accepted; everything after
//! the stub is the supervisor's problem.

use uuid::Uuid;

use reportd_core::validation::{
    validate_mailto, validate_parameters, validate_title, ValidationError,
};
use reportd_core::{JobId, Parameters};
use reportd_db::{JobStub, StoreError};

use crate::context::RunnerContext;
use crate::worker;

const RERUN_PREFIX: &str = "Rerun of ";

/// A request to execute one report template.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub report_name: String,
    /// Display title; falls back to the report name when blank.
    pub report_title: String,
    /// Comma-separated recipients, or blank for no notification.
    pub mailto: String,
    pub parameters: Parameters,
    pub generate_pdf: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("failed to record the submission: {0}")]
    Store(#[from] StoreError),

    #[error("job {0} not found")]
    NotFound(JobId),
}

/// Accept a job: validate, persist the SUBMITTED stub, then hand the job
/// to a detached supervisor task. Returns as soon as the stub is durable.
pub async fn submit(ctx: &RunnerContext, request: SubmitRequest) -> Result<JobId, SubmitError> {
    let report_title = validate_title(&request.report_title, &request.report_name)?;
    let mailto = validate_mailto(&request.mailto)?;
    validate_parameters(&request.parameters)?;

    let stub = JobStub {
        job_id: Uuid::new_v4(),
        report_name: request.report_name,
        report_title,
        parameters: request.parameters,
        mailto,
        generate_pdf: request.generate_pdf,
        start_time: chrono::Utc::now(),
    };
    ctx.store.save_stub(stub.clone()).await?;
    tracing::info!(
        job_id = %stub.job_id,
        report_name = %stub.report_name,
        "Job submitted"
    );

    let job_id = stub.job_id;
    tokio::spawn(worker::supervise(ctx.clone(), stub));
    Ok(job_id)
}

/// Resubmit an existing job with the same template and parameters under a
/// fresh job id. The title gains a rerun prefix once, not cumulatively.
pub async fn rerun(ctx: &RunnerContext, job_id: JobId) -> Result<JobId, SubmitError> {
    let existing = ctx
        .store
        .get(job_id)
        .await?
        .ok_or(SubmitError::NotFound(job_id))?;

    let title = existing.report_title();
    let report_title = if title.starts_with(RERUN_PREFIX) {
        title.to_string()
    } else {
        format!("{RERUN_PREFIX}{title}")
    };

    submit(
        ctx,
        SubmitRequest {
            report_name: existing.report_name().to_string(),
            report_title,
            mailto: existing.mailto().unwrap_or_default().to_string(),
            parameters: existing.parameters().clone(),
            generate_pdf: existing.generate_pdf(),
        },
    )
    .await
}
