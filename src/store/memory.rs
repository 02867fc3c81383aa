//! In-memory `JobBackend` for unit tests that don't need real processes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;

use crate::command::JobCommand;
use crate::error::{JobError, Result};
use crate::store::traits::{JobBackend, JobId, JobIdStream, JobTimes};

#[derive(Debug, Clone, Default)]
pub(crate) struct StubJob {
    pub running: bool,
    pub retcode: Option<i32>,
    pub label: Option<String>,
    pub command: Option<JobCommand>,
    pub merge_stderr: bool,
}

/// Jobs live in a map; "running" and "retcode" are whatever the test sets.
#[derive(Debug)]
pub(crate) struct MemoryBackend {
    root: PathBuf,
    next_id: Mutex<u64>,
    jobs: Mutex<BTreeMap<JobId, StubJob>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            root: PathBuf::from("/stub/jobs"),
            next_id: Mutex::new(1),
            jobs: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn set(&self, id: JobId, running: bool, retcode: Option<i32>) {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.entry(id).or_default();
        job.running = running;
        job.retcode = retcode;
    }

    pub fn get(&self, id: JobId) -> Option<StubJob> {
        self.jobs.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl JobBackend for MemoryBackend {
    fn path(&self) -> &Path {
        &self.root
    }

    async fn exists(&self) -> Result<bool> {
        Ok(true)
    }

    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn next_job_id(&self) -> Result<JobId> {
        let mut next = self.next_id.lock().unwrap();
        let id = JobId::new(*next);
        *next += 1;
        Ok(id)
    }

    async fn init_job_dir(&self, id: JobId) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if jobs.contains_key(&id) {
            return Err(JobError::DirectoryExists { id }.into());
        }
        jobs.insert(id, StubJob::default());
        Ok(())
    }

    async fn job_exists(&self, id: JobId) -> Result<bool> {
        Ok(self.jobs.lock().unwrap().contains_key(&id))
    }

    async fn start_job(
        &self,
        id: JobId,
        command: &JobCommand,
        merge_stderr: bool,
        label: &str,
    ) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(&id).ok_or(JobError::NotFound { id })?;
        job.running = true;
        job.label = Some(label.to_string());
        job.command = Some(command.clone());
        job.merge_stderr = merge_stderr;
        Ok(())
    }

    async fn is_job_running(&self, id: JobId) -> Result<bool> {
        Ok(self.get(id).is_some_and(|job| job.running))
    }

    async fn job_retcode(&self, id: JobId) -> Result<Option<i32>> {
        Ok(self.get(id).and_then(|job| job.retcode))
    }

    async fn job_label(&self, id: JobId) -> Result<Option<String>> {
        Ok(self.get(id).and_then(|job| job.label))
    }

    async fn job_times(&self, _id: JobId) -> Result<JobTimes> {
        Ok(JobTimes::default())
    }

    async fn kill_job(&self, id: JobId) -> Result<()> {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&id) {
            job.running = false;
        }
        Ok(())
    }

    async fn destroy_job(&self, id: JobId) -> Result<()> {
        self.jobs.lock().unwrap().remove(&id);
        Ok(())
    }

    async fn iter_all_jobs(&self) -> Result<JobIdStream> {
        // Reverse order, so callers can't rely on enumeration order.
        let ids: Vec<Result<JobId>> =
            self.jobs.lock().unwrap().keys().rev().copied().map(Ok).collect();
        Ok(futures::stream::iter(ids).boxed())
    }
}
