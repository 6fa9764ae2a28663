use log::warn;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

// ────────────────────────────────────────────────────────────────
// Types
// ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Started,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

/// Snapshot of a tracked long-running operation, as returned to polling clients.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub data: Option<Value>,
    pub error: Option<String>,
    #[serde(skip)]
    updated_at: Instant,
}

impl Job {
    fn new(id: String) -> Self {
        Self {
            id,
            status: JobStatus::Started,
            data: None,
            error: None,
            updated_at: Instant::now(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("task not found: {0}")]
    NotFound(String),
    #[error("task {id} is already {status:?}")]
    Terminal { id: String, status: JobStatus },
    #[error("task {id} is {status:?}, not running")]
    NotRunning { id: String, status: JobStatus },
}

// ────────────────────────────────────────────────────────────────
// Registry
// ────────────────────────────────────────────────────────────────

/// Job table shared by every request. All access goes through one lock.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<String, Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Job>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a new job in the `Started` state.
    pub fn create(&self) -> Job {
        let job = Job::new(Uuid::new_v4().to_string());
        self.table().insert(job.id.clone(), job.clone());
        job
    }

    pub fn get(&self, id: &str) -> Result<Job, JobError> {
        self.table()
            .get(id)
            .cloned()
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    pub fn mark_running(&self, id: &str) -> Result<Job, JobError> {
        self.transition(id, |job| match job.status {
            JobStatus::Started => {
                job.status = JobStatus::Running;
                Ok(())
            }
            JobStatus::Running => Ok(()),
            status => Err(JobError::Terminal {
                id: job.id.clone(),
                status,
            }),
        })
    }

    /// `Running -> Done`.
    pub fn complete(&self, id: &str, data: Value) -> Result<Job, JobError> {
        self.transition(id, |job| {
            require_running(job)?;
            job.status = JobStatus::Done;
            job.data = Some(data);
            Ok(())
        })
    }

    /// `Running -> Failed`.
    pub fn fail(&self, id: &str, message: impl Into<String>) -> Result<Job, JobError> {
        let message = message.into();
        self.transition(id, |job| {
            require_running(job)?;
            job.status = JobStatus::Failed;
            job.error = Some(message);
            Ok(())
        })
    }

    pub fn remove(&self, id: &str) -> Result<Job, JobError> {
        self.table()
            .remove(id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    /// Drops terminal jobs that finished more than `max_age` ago. Returns how many went.
    pub fn evict_finished(&self, max_age: Duration) -> usize {
        let mut table = self.table();
        let before = table.len();
        table.retain(|_, job| !(job.status.is_terminal() && job.updated_at.elapsed() >= max_age));
        before - table.len()
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }

    /// Applies `update` unless the job is already terminal.
    fn transition<F>(&self, id: &str, update: F) -> Result<Job, JobError>
    where
        F: FnOnce(&mut Job) -> Result<(), JobError>,
    {
        let mut table = self.table();
        let job = table
            .get_mut(id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;

        if job.status.is_terminal() {
            warn!("Ignoring update to finished task {} ({:?})", id, job.status);
            return Err(JobError::Terminal {
                id: id.to_string(),
                status: job.status,
            });
        }
        update(job)?;
        job.updated_at = Instant::now();
        Ok(job.clone())
    }
}

fn require_running(job: &Job) -> Result<(), JobError> {
    if job.status != JobStatus::Running {
        return Err(JobError::NotRunning {
            id: job.id.clone(),
            status: job.status,
        });
    }
    Ok(())
}
