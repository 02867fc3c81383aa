//! Workplace — a directory of detached jobs.
//!
//! Opening a workplace initializes the store when needed. Jobs are started
//! through it, looked up by id, listed, and cleaned up once they have
//! finished.

use std::path::Path;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::fs;
use tracing::{debug, info};

use crate::command::JobCommand;
use crate::config::LaunchConfig;
use crate::error::{JobError, Result, WorkplaceError};
use crate::job::Job;
use crate::store::{FsBackend, JobBackend, JobId};

/// How `Workplace::open` treats an existing or missing workplace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// The workplace must not exist yet; it is created.
    Create,
    /// The workplace must already exist.
    Open,
    /// Open it if it exists, create it otherwise.
    #[default]
    OpenOrCreate,
}

/// Per-job launch options.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    /// Send standard error to the standard output file.
    pub merge_stderr: bool,
    /// Display label. Defaults to a shell rendering of the command.
    pub label: Option<String>,
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_merge_stderr(mut self, merge: bool) -> Self {
        self.merge_stderr = merge;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// A collection of jobs rooted at one directory.
pub struct Workplace {
    backend: Arc<dyn JobBackend>,
}

impl Workplace {
    /// Open or create a workplace with the default launch settings.
    pub async fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self> {
        Self::open_with_config(path, mode, LaunchConfig::default()).await
    }

    /// Open or create a workplace.
    ///
    /// A directory without a job counter does not count as a workplace, so an
    /// empty pre-existing directory is accepted by `Create` and rejected by
    /// `Open`. Reopening never touches the counter or the job directories.
    pub async fn open_with_config(
        path: impl AsRef<Path>,
        mode: OpenMode,
        config: LaunchConfig,
    ) -> Result<Self> {
        let path = path.as_ref();
        let backend = FsBackend::new(path, config.clone());

        if backend.exists().await? {
            if mode == OpenMode::Create {
                return Err(WorkplaceError::AlreadyExists {
                    path: path.to_path_buf(),
                }
                .into());
            }
        } else {
            if mode == OpenMode::Open {
                return Err(WorkplaceError::NotFound {
                    path: path.to_path_buf(),
                }
                .into());
            }
            match backend.init().await {
                Ok(()) => info!(path = %path.display(), "Created workplace"),
                Err(e) => {
                    // Another opener may have initialized it between our check
                    // and init.
                    if mode == OpenMode::Create || !backend.exists().await? {
                        return Err(e);
                    }
                    debug!(path = %path.display(), error = %e, "Workplace created concurrently");
                }
            }
        }

        // Jobs run inside their own directory and are identified by the
        // absolute path of their wrapper script.
        let root = fs::canonicalize(path).await?;
        Ok(Self::with_backend(Arc::new(FsBackend::new(root, config))))
    }

    /// Wrap an already-initialized backend.
    pub fn with_backend(backend: Arc<dyn JobBackend>) -> Self {
        Self { backend }
    }

    pub fn path(&self) -> &Path {
        self.backend.path()
    }

    /// Start a detached job. Returns once the job has recorded its pid.
    ///
    /// If the launch fails after the id was allocated, the job directory is
    /// left behind for inspection.
    pub async fn start_job(
        &self,
        command: impl Into<JobCommand>,
        options: JobOptions,
    ) -> Result<Job> {
        let command = command.into();
        command.validate()?;
        let label = match options.label {
            Some(label) => label,
            None => command.default_label()?,
        };

        let id = self.backend.init_job().await?;
        self.backend
            .start_job(id, &command, options.merge_stderr, &label)
            .await?;
        info!(job_id = %id, label = %label, merge_stderr = options.merge_stderr, "Started job");
        Ok(Job::new(Arc::clone(&self.backend), id))
    }

    /// Handle for an existing job.
    pub async fn get_job(&self, id: JobId) -> Result<Job> {
        if self.backend.job_exists(id).await? {
            Ok(Job::new(Arc::clone(&self.backend), id))
        } else {
            Err(JobError::NotFound { id }.into())
        }
    }

    /// All jobs, lazily and in no particular order.
    pub async fn iter_jobs(&self) -> Result<BoxStream<'static, Result<Job>>> {
        let backend = Arc::clone(&self.backend);
        let ids = self.backend.iter_all_jobs().await?;
        Ok(ids
            .map(move |id| id.map(|id| Job::new(Arc::clone(&backend), id)))
            .boxed())
    }

    /// All jobs in ascending id order.
    pub async fn jobs(&self) -> Result<Vec<Job>> {
        let mut ids = self.collect_ids().await?;
        ids.sort_unstable();
        Ok(ids
            .into_iter()
            .map(|id| Job::new(Arc::clone(&self.backend), id))
            .collect())
    }

    /// Destroy every job that is not running. Returns how many were removed.
    pub async fn clean(&self) -> Result<usize> {
        let mut removed = 0;
        for id in self.collect_ids().await? {
            if self.backend.is_job_running(id).await? {
                continue;
            }
            self.backend.destroy_job(id).await?;
            removed += 1;
        }
        info!(path = %self.path().display(), removed, "Cleaned workplace");
        Ok(removed)
    }

    async fn collect_ids(&self) -> Result<Vec<JobId>> {
        let mut stream = self.backend.iter_all_jobs().await?;
        let mut ids = Vec::new();
        while let Some(id) = stream.next().await {
            ids.push(id?);
        }
        Ok(ids)
    }
}
