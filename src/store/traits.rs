//! `JobBackend` trait: the async interface to job persistence.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::command::JobCommand;
use crate::error::Result;
use crate::store::files;

/// Numeric job id, unique within a workplace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(u64);

impl JobId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for JobId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A string that is not a plain decimal job id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid job id: {0:?}")]
pub struct ParseJobIdError(String);

impl FromStr for JobId {
    type Err = ParseJobIdError;

    /// Accepts canonical decimal only, so directory names like `+1`, ` 1` or
    /// `01` are not ids. Parsing and `Display` round-trip.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let canonical = !s.is_empty()
            && s.bytes().all(|b| b.is_ascii_digit())
            && (s == "0" || !s.starts_with('0'));
        if !canonical {
            return Err(ParseJobIdError(s.to_string()));
        }
        s.parse::<u64>()
            .map(Self)
            .map_err(|_| ParseJobIdError(s.to_string()))
    }
}

/// Lazily enumerated job ids, in no particular order.
pub type JobIdStream = BoxStream<'static, Result<JobId>>;

/// When a job recorded its pid and its exit status, if it has.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobTimes {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Backend-agnostic job store.
///
/// Every query re-reads the store; implementations must not cache liveness
/// or exit status.
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Workplace root.
    fn path(&self) -> &Path;

    /// Directory holding a job's files.
    fn job_path(&self, id: JobId) -> PathBuf {
        self.path().join(id.to_string())
    }

    /// Captured standard output of a job.
    fn stdout_path(&self, id: JobId) -> PathBuf {
        self.job_path(id).join(files::OUT)
    }

    /// Captured standard error of a job.
    fn stderr_path(&self, id: JobId) -> PathBuf {
        self.job_path(id).join(files::ERR)
    }

    /// Whether the store has been initialized.
    async fn exists(&self) -> Result<bool>;

    /// Create the root and the id counter. Fails if jobs are already present.
    async fn init(&self) -> Result<()>;

    /// Allocate the next job id under an exclusive lock.
    async fn next_job_id(&self) -> Result<JobId>;

    /// Create the (empty) directory for a freshly allocated id.
    async fn init_job_dir(&self, id: JobId) -> Result<()>;

    /// Allocate an id and create its directory.
    async fn init_job(&self) -> Result<JobId> {
        let id = self.next_job_id().await?;
        self.init_job_dir(id).await?;
        Ok(id)
    }

    /// Whether a job directory exists for `id`.
    async fn job_exists(&self, id: JobId) -> Result<bool>;

    /// Write the job's label and wrapper script, then launch it detached.
    /// Returns once the job has recorded its pid.
    async fn start_job(
        &self,
        id: JobId,
        command: &JobCommand,
        merge_stderr: bool,
        label: &str,
    ) -> Result<()>;

    /// Whether the job's recorded process is alive and still runs this job.
    async fn is_job_running(&self, id: JobId) -> Result<bool>;

    /// Exit status, or `None` if the job has not recorded one.
    async fn job_retcode(&self, id: JobId) -> Result<Option<i32>>;

    /// Display label, or `None` if none was recorded.
    async fn job_label(&self, id: JobId) -> Result<Option<String>>;

    /// When the job started and finished, as far as the store can tell.
    async fn job_times(&self, id: JobId) -> Result<JobTimes>;

    /// Signal the job's whole process group if it is running. Does not wait.
    async fn kill_job(&self, id: JobId) -> Result<()>;

    /// Remove the job directory. Does not check whether the job is running.
    async fn destroy_job(&self, id: JobId) -> Result<()>;

    /// Enumerate all job ids.
    async fn iter_all_jobs(&self) -> Result<JobIdStream>;
}
