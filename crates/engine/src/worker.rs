//! Worker supervision.
//!
//! One detached supervisor task per submission. Each execution attempt
//! spawns the worker binary with the work order on its stdin, drains its
//! diagnostic stream into the record's output field, and waits for exit.
//! The worker owns all status transitions after PENDING; the supervisor
//! only steps in when the worker never started.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStderr, Command};

use reportd_core::constants::CANCEL_MESSAGE;
use reportd_core::{JobId, JobStatus, WorkOrder};
use reportd_db::{JobStub, ResultStore, StatusPatch};

use crate::context::RunnerContext;

pub(crate) async fn supervise(ctx: RunnerContext, mut stub: JobStub) {
    let max_attempts = ctx.config.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        if !ctx.is_alive().await {
            cancel_queued(&ctx, &stub).await;
            return;
        }

        match run_attempt(&ctx, &stub).await {
            Ok(status) if status.success() => {
                tracing::info!(job_id = %stub.job_id, attempt, "Worker finished");
                notify(&ctx, &stub).await;
                return;
            }
            Ok(status) => {
                tracing::warn!(
                    job_id = %stub.job_id,
                    attempt,
                    code = ?status.code(),
                    "Worker exited with failure"
                );
            }
            Err(error) => {
                // The worker never ran, so nothing else will move this
                // record off SUBMITTED.
                tracing::error!(job_id = %stub.job_id, attempt, %error, "Could not start worker");
                let patch = StatusPatch {
                    error_info: Some(format!("Could not start worker: {error}")),
                };
                if let Err(error) = ctx
                    .store
                    .update_status(stub.job_id, JobStatus::Error, patch)
                    .await
                {
                    tracing::error!(job_id = %stub.job_id, %error, "Failed to record start failure");
                }
            }
        }

        if attempt == max_attempts {
            tracing::warn!(
                job_id = %stub.job_id,
                report_name = %stub.report_name,
                attempts = max_attempts,
                "Giving up on job after repeated failures"
            );
            notify(&ctx, &stub).await;
            return;
        }

        // Every retry runs under a fresh job id so the failed attempt
        // stays visible as its own record.
        stub.job_id = uuid::Uuid::new_v4();
        stub.start_time = chrono::Utc::now();
        if let Err(error) = ctx.store.save_stub(stub.clone()).await {
            tracing::error!(job_id = %stub.job_id, %error, "Failed to record the retry stub");
            return;
        }
        tracing::info!(
            job_id = %stub.job_id,
            attempt = attempt + 1,
            "Retrying under a fresh job id"
        );
    }
}

async fn cancel_queued(ctx: &RunnerContext, stub: &JobStub) {
    tracing::info!(
        job_id = %stub.job_id,
        report_name = %stub.report_name,
        "Shutdown observed before the worker started, cancelling"
    );
    let patch = StatusPatch {
        error_info: Some(CANCEL_MESSAGE.to_string()),
    };
    if let Err(error) = ctx
        .store
        .update_status(stub.job_id, JobStatus::Cancelled, patch)
        .await
    {
        tracing::error!(job_id = %stub.job_id, %error, "Failed to record cancellation");
    }
}

/// Spawn the worker binary for one attempt and wait for it to exit. The
/// child is never killed from here; once execution starts it runs to its
/// own conclusion.
async fn run_attempt(ctx: &RunnerContext, stub: &JobStub) -> std::io::Result<ExitStatus> {
    let order = WorkOrder {
        job_id: stub.job_id,
        report_name: stub.report_name.clone(),
        report_title: stub.report_title.clone(),
        parameters: stub.parameters.clone(),
        mailto: stub.mailto.clone(),
        generate_pdf: stub.generate_pdf,
        start_time: stub.start_time,
    };
    let payload = serde_json::to_vec(&order)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    let mut child = Command::new(&ctx.config.executor_path)
        .env("DATABASE_URL", &ctx.config.database_url)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        if let Err(error) = stdin.write_all(&payload).await {
            tracing::warn!(job_id = %stub.job_id, %error, "Failed to write the work order");
        }
        // Dropping stdin closes the pipe so the worker sees EOF.
    }

    let monitor = child
        .stderr
        .take()
        .map(|stderr| tokio::spawn(monitor_output(ctx.store.clone(), stub.job_id, stderr)));

    let status = child.wait().await?;
    if let Some(monitor) = monitor {
        let _ = monitor.await;
    }
    Ok(status)
}

/// Stream the worker's diagnostics into the record, line by line, while
/// it runs. Append-only writes, so nothing here can clobber the worker's
/// own status transitions.
async fn monitor_output(store: Arc<dyn ResultStore>, job_id: JobId, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Err(error) = store.append_output(job_id, &[line]).await {
                    tracing::warn!(%job_id, %error, "Failed to append worker output");
                }
            }
            Ok(None) => break,
            Err(error) => {
                tracing::warn!(%job_id, %error, "Worker output stream failed");
                break;
            }
        }
    }
}

async fn notify(ctx: &RunnerContext, stub: &JobStub) {
    let Some(notifier) = ctx.notifier.clone() else {
        return;
    };
    let Some(mailto) = stub.mailto.clone() else {
        return;
    };
    let result = match ctx.store.get_record(&stub.report_name, stub.job_id).await {
        Ok(result) => result,
        Err(error) => {
            tracing::warn!(job_id = %stub.job_id, %error, "Could not load the result to notify on");
            return;
        }
    };
    // Fire and forget; a mail failure never affects the job outcome.
    tokio::spawn(async move {
        if let Err(error) = notifier.send_result(&mailto, &result).await {
            tracing::warn!(job_id = %result.job_id(), %error, "Failed to send result notification");
        }
    });
}
