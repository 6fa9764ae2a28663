use anyhow::Result;
use log::{error, info, warn};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use crate::background::registry::{Job, JobRegistry};
use crate::background::workspace::Workspace;

/// Registers a job and runs `op` on its own task, recording the outcome in `registry`.
///
/// `op` owns the workspace, so the directory is gone by the time the job turns
/// `DONE` or `FAILED`. A panic inside `op` fails the job.
pub fn spawn_job<F, Fut>(registry: Arc<JobRegistry>, workspace: Workspace, op: F) -> Job
where
    F: FnOnce(Workspace) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    let job = registry.create();
    let id = job.id.clone();

    tokio::spawn(async move {
        if let Err(e) = registry.mark_running(&id) {
            warn!("Task {} could not start: {}", id, e);
            return;
        }
        info!("Task {} running in {:?}", id, workspace.path());
        let start_time = Instant::now();

        let recorded = match tokio::spawn(op(workspace)).await {
            Ok(Ok(data)) => {
                info!(duration = &*format!("{:?}", start_time.elapsed()); "Task {} done", id);
                registry.complete(&id, data)
            }
            Ok(Err(e)) => {
                error!(duration = &*format!("{:?}", start_time.elapsed()); "Task {} failed: {:#}", id, e);
                registry.fail(&id, format!("{:#}", e))
            }
            Err(e) => {
                error!("Task {} aborted: {}", id, e);
                registry.fail(&id, format!("task aborted: {}", e))
            }
        };
        if let Err(e) = recorded {
            warn!("{}", e);
        }
    });

    job
}
