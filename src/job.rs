//! Job handles and the status state machine.
//!
//! A `Job` is only a backend reference plus an id. Every query goes back to
//! the store, so two handles for the same id always agree and a handle never
//! goes stale.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::Result;
use crate::store::{JobBackend, JobId};

/// Lifecycle status of a job, derived from liveness and the recorded exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// The job's process is alive.
    Running,
    /// Finished with exit status 0.
    Success,
    /// Finished with a non-zero exit status.
    Error,
    /// Not running and never recorded an exit status (killed or crashed).
    Dead,
}

impl JobStatus {
    /// Status for a liveness result and an optional exit status.
    pub fn from_parts(running: bool, retcode: Option<i32>) -> Self {
        match (running, retcode) {
            (true, _) => Self::Running,
            (false, None) => Self::Dead,
            (false, Some(0)) => Self::Success,
            (false, Some(_)) => Self::Error,
        }
    }

    /// Everything but `Running` is terminal and never changes again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
            Self::Dead => "dead",
        };
        write!(f, "{s}")
    }
}

/// Point-in-time view of a job, for display.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub id: JobId,
    pub label: Option<String>,
    pub status: JobStatus,
    pub retcode: Option<i32>,
    pub path: PathBuf,
    /// When the job recorded its pid.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job recorded its exit status.
    pub finished_at: Option<DateTime<Utc>>,
}

/// Handle to one job in a workplace.
#[derive(Clone)]
pub struct Job {
    backend: Arc<dyn JobBackend>,
    id: JobId,
}

impl Job {
    pub(crate) fn new(backend: Arc<dyn JobBackend>, id: JobId) -> Self {
        Self { backend, id }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// The job's directory, also its working directory.
    pub fn path(&self) -> PathBuf {
        self.backend.job_path(self.id)
    }

    pub fn stdout_path(&self) -> PathBuf {
        self.backend.stdout_path(self.id)
    }

    pub fn stderr_path(&self) -> PathBuf {
        self.backend.stderr_path(self.id)
    }

    /// Whether the job's process is still alive. Reads process metadata on
    /// every call.
    pub async fn is_running(&self) -> Result<bool> {
        self.backend.is_job_running(self.id).await
    }

    pub async fn status(&self) -> Result<JobStatus> {
        Ok(self.observe().await?.0)
    }

    /// Status plus the exit status it was derived from, from one liveness
    /// check and at most one read of the exit status. A running job reports
    /// no exit status even if the wrapper has just written one.
    async fn observe(&self) -> Result<(JobStatus, Option<i32>)> {
        if self.backend.is_job_running(self.id).await? {
            return Ok((JobStatus::Running, None));
        }
        let retcode = self.backend.job_retcode(self.id).await?;
        Ok((JobStatus::from_parts(false, retcode), retcode))
    }

    /// Exit status, or `None` while running or if the job died without one.
    pub async fn retcode(&self) -> Result<Option<i32>> {
        self.backend.job_retcode(self.id).await
    }

    pub async fn label(&self) -> Result<Option<String>> {
        self.backend.job_label(self.id).await
    }

    /// Signal the job's process group. Returns without waiting for it to
    /// exit; poll `status` to observe the result.
    pub async fn kill(&self) -> Result<()> {
        self.backend.kill_job(self.id).await
    }

    /// Captured standard output so far.
    pub async fn read_stdout(&self) -> Result<Vec<u8>> {
        Ok(fs::read(self.stdout_path()).await?)
    }

    /// Captured standard error so far.
    pub async fn read_stderr(&self) -> Result<Vec<u8>> {
        Ok(fs::read(self.stderr_path()).await?)
    }

    pub async fn summary(&self) -> Result<JobSummary> {
        let (status, retcode) = self.observe().await?;
        let times = self.backend.job_times(self.id).await?;
        Ok(JobSummary {
            id: self.id,
            label: self.label().await?,
            status,
            retcode,
            path: self.path(),
            started_at: times.started_at,
            finished_at: times.finished_at,
        })
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("path", &self.path())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryBackend;

    fn stub_job(running: bool, retcode: Option<i32>) -> (Job, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let id = JobId::new(1);
        backend.set(id, running, retcode);
        (Job::new(backend.clone(), id), backend)
    }

    #[test]
    fn status_table() {
        assert_eq!(JobStatus::from_parts(true, None), JobStatus::Running);
        assert_eq!(JobStatus::from_parts(true, Some(0)), JobStatus::Running);
        assert_eq!(JobStatus::from_parts(false, None), JobStatus::Dead);
        assert_eq!(JobStatus::from_parts(false, Some(0)), JobStatus::Success);
        assert_eq!(JobStatus::from_parts(false, Some(7)), JobStatus::Error);
        assert_eq!(JobStatus::from_parts(false, Some(-1)), JobStatus::Error);
    }

    #[test]
    fn terminal_states() {
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Success.is_terminal());
        assert!(JobStatus::Error.is_terminal());
        assert!(JobStatus::Dead.is_terminal());
    }

    #[test]
    fn status_display_and_serde() {
        assert_eq!(JobStatus::Dead.to_string(), "dead");
        let json = serde_json::to_string(&JobStatus::Success).unwrap();
        assert_eq!(json, "\"success\"");
        let parsed: JobStatus = serde_json::from_str("\"running\"").unwrap();
        assert_eq!(parsed, JobStatus::Running);
    }

    #[tokio::test]
    async fn status_rederived_on_every_call() {
        let (job, backend) = stub_job(true, None);
        assert_eq!(job.status().await.unwrap(), JobStatus::Running);

        backend.set(job.id(), false, Some(3));
        assert_eq!(job.status().await.unwrap(), JobStatus::Error);
        assert_eq!(job.retcode().await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn running_wins_over_retcode() {
        // The wrapper writes the exit status just before exiting.
        let (job, _backend) = stub_job(true, Some(0));
        assert_eq!(job.status().await.unwrap(), JobStatus::Running);
    }

    #[tokio::test]
    async fn kill_makes_status_terminal() {
        let (job, _backend) = stub_job(true, None);
        job.kill().await.unwrap();
        assert_eq!(job.status().await.unwrap(), JobStatus::Dead);
    }

    #[tokio::test]
    async fn paths_follow_backend_layout() {
        let (job, _backend) = stub_job(false, Some(0));
        assert_eq!(job.path(), PathBuf::from("/stub/jobs/1"));
        assert_eq!(job.stdout_path(), PathBuf::from("/stub/jobs/1/job_out"));
        assert_eq!(job.stderr_path(), PathBuf::from("/stub/jobs/1/job_err"));
    }

    #[tokio::test]
    async fn summary_of_running_job_has_no_retcode() {
        // The exit status lands just before the wrapper exits.
        let (job, _backend) = stub_job(true, Some(0));
        let summary = job.summary().await.unwrap();
        assert_eq!(summary.status, JobStatus::Running);
        assert_eq!(summary.retcode, None);
    }

    #[tokio::test]
    async fn summary_serializes() {
        let (job, _backend) = stub_job(false, Some(0));
        let summary = job.summary().await.unwrap();
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["id"], 1);
        assert_eq!(json["status"], "success");
        assert_eq!(json["retcode"], 0);
        assert!(json["started_at"].is_null());
    }
}
