//! One work order, start to finish.

use chrono::Utc;

use reportd_core::{CompleteResult, ErrorResult, JobResult, JobStatus, WorkOrder};
use reportd_db::{ResultStore, StatusPatch, StoreError};

use crate::pipeline::{PipelineError, RenderPipeline, TemplateEngine};

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Run one work order and persist the outcome. On failure the ERROR
/// record is written before this returns, so the exit code is only a
/// signal to the supervisor; everyone else reads the store.
pub async fn run_order(
    store: &dyn ResultStore,
    engine: &dyn TemplateEngine,
    renderer: &dyn RenderPipeline,
    order: &WorkOrder,
) -> Result<(), ExecError> {
    match execute_order(store, engine, renderer, order).await {
        Ok(result) => {
            store.save_result(&JobResult::Complete(result)).await?;
            tracing::info!(job_id = %order.job_id, "Job complete");
            Ok(())
        }
        Err(error) => {
            tracing::error!(job_id = %order.job_id, %error, "Job failed");
            let now = Utc::now();
            let failed = JobResult::Error(ErrorResult {
                job_id: order.job_id,
                report_name: order.report_name.clone(),
                report_title: order.report_title.clone(),
                status: JobStatus::Error,
                parameters: order.parameters.clone(),
                mailto: order.mailto.clone(),
                generate_pdf: order.generate_pdf,
                start_time: order.start_time,
                update_time: now,
                stdout: Vec::new(),
                error_info: error.to_string(),
            });
            store.save_result(&failed).await?;
            Err(error)
        }
    }
}

async fn execute_order(
    store: &dyn ResultStore,
    engine: &dyn TemplateEngine,
    renderer: &dyn RenderPipeline,
    order: &WorkOrder,
) -> Result<CompleteResult, ExecError> {
    store
        .update_status(order.job_id, JobStatus::Pending, StatusPatch::default())
        .await?;
    tracing::info!(
        job_id = %order.job_id,
        report_name = %order.report_name,
        "Executing template"
    );

    let raw_document = engine.execute(&order.report_name, &order.parameters).await?;

    tracing::info!(job_id = %order.job_id, "Rendering results");
    let rendered = renderer.render_html(&raw_document).await?;
    let pdf = if order.generate_pdf {
        Some(renderer.render_pdf(&raw_document).await?)
    } else {
        None
    };

    let now = Utc::now();
    Ok(CompleteResult {
        job_id: order.job_id,
        report_name: order.report_name.clone(),
        report_title: order.report_title.clone(),
        parameters: order.parameters.clone(),
        mailto: order.mailto.clone(),
        generate_pdf: order.generate_pdf,
        start_time: order.start_time,
        finish_time: now,
        update_time: now,
        stdout: Vec::new(),
        raw_html: rendered.html,
        html_resources: rendered.resources,
        raw_document,
        pdf,
    })
}
