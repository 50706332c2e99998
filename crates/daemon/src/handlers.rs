// Built-in job handlers

use tracing::debug;
use workq_core::domain::Job;
use workq_core::port::{HandlerResult, JobContext};

/// Job type of [`echo`]
pub const ECHO_JOB_TYPE: &str = "echo";

/// Completes with the job's own payload as the result; a smoke test for a
/// deployment.
pub async fn echo(ctx: JobContext, job: Job) -> HandlerResult {
    debug!(
        job_id = %job.id,
        worker_id = %ctx.worker_id(),
        bytes = job.payload.len(),
        "echo"
    );
    Ok(Some(job.payload))
}
