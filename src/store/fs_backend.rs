//! Filesystem backend — `JobBackend` implementation over a plain directory.
//!
//! The root holds the id counter and one directory per job:
//! - `.counter`: next id, read-modify-written under an exclusive `flock`
//! - `<id>/job_cmd`: wrapper script exec'd by the detached worker
//! - `<id>/job_pid`, `<id>/job_retcode`: one short write each by the wrapper;
//!   an empty file is a write that has not landed yet
//! - `<id>/job_out`, `<id>/job_err`: captured output
//! - `<id>/job_label`: display label

use std::ffi::OsString;
use std::fs::OpenOptions;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use nix::errno::Errno;
use nix::sys::signal::killpg;
use nix::unistd::{Pid, getpgid};
use tokio::fs;
use tokio_stream::wrappers::ReadDirStream;
use tracing::{debug, info, warn};

use crate::command::JobCommand;
use crate::config::LaunchConfig;
use crate::error::{Error, JobError, Result, WorkplaceError};
use crate::launcher::{self, LaunchRequest};
use crate::store::files;
use crate::store::traits::{JobBackend, JobId, JobIdStream, JobTimes};

/// Job store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsBackend {
    root: PathBuf,
    config: LaunchConfig,
}

impl FsBackend {
    /// Create a backend for `root`. Nothing is touched on disk until `init`.
    pub fn new(root: impl Into<PathBuf>, config: LaunchConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    /// Launch settings used by this backend.
    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }

    fn counter_path(&self) -> PathBuf {
        self.root.join(files::COUNTER)
    }

    fn job_file(&self, id: JobId, name: &str) -> PathBuf {
        self.job_path(id).join(name)
    }

    /// Argv the worker is exec'd with: `[shell, <job dir>/job_cmd]`.
    fn run_args(&self, id: JobId) -> Vec<OsString> {
        vec![
            OsString::from(&self.config.shell),
            self.job_file(id, files::CMD).into_os_string(),
        ]
    }

    /// `/proc/<pid>/cmdline` contents of a live worker for `id`.
    fn expected_cmdline(&self, id: JobId) -> Vec<u8> {
        let mut cmdline = Vec::new();
        for arg in self.run_args(id) {
            cmdline.extend_from_slice(arg.as_bytes());
            cmdline.push(0);
        }
        cmdline
    }

    async fn read_pid(&self, id: JobId) -> Result<Option<Pid>> {
        let Some(raw) = read_record(&self.job_file(id, files::PID)).await? else {
            return Ok(None);
        };
        let pid: i32 = parse_record(id, files::PID, &raw)?;
        if pid <= 0 {
            return Err(JobError::CorruptFile {
                id,
                file: files::PID,
                reason: format!("invalid pid {pid}"),
            }
            .into());
        }
        Ok(Some(Pid::from_raw(pid)))
    }

    /// Compare the live process's argv with the job's wrapper argv. A pid that
    /// now belongs to some other program does not count.
    async fn is_running_by_pid(&self, id: JobId, pid: Pid) -> Result<bool> {
        let cmdline = match fs::read(format!("/proc/{pid}/cmdline")).await {
            Ok(cmdline) => cmdline,
            Err(e) if process_gone(&e) => {
                debug!(job_id = %id, pid = %pid, "Job process is gone");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };
        let running = cmdline == self.expected_cmdline(id);
        debug!(job_id = %id, pid = %pid, running, "Checked job liveness");
        Ok(running)
    }
}

#[async_trait]
impl JobBackend for FsBackend {
    fn path(&self) -> &Path {
        &self.root
    }

    async fn exists(&self) -> Result<bool> {
        Ok(fs::try_exists(self.counter_path()).await?)
    }

    async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        if self.exists().await? {
            return Err(WorkplaceError::AlreadyExists {
                path: self.root.clone(),
            }
            .into());
        }

        let mut jobs = self.iter_all_jobs().await?;
        if let Some(job_id) = jobs.next().await {
            return Err(WorkplaceError::NotEmpty {
                path: self.root.clone(),
                job_id: job_id?,
            }
            .into());
        }

        // Write the initial value aside and hard-link it into place. The link
        // fails if another opener got there first, and nobody ever sees an
        // empty counter.
        let staged = self.root.join(format!(
            "{}.{}.{}",
            files::COUNTER,
            std::process::id(),
            STAGE_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&staged, "1\n").await?;
        let linked = fs::hard_link(&staged, self.counter_path()).await;
        fs::remove_file(&staged).await?;
        match linked {
            Ok(()) => {
                info!(path = %self.root.display(), "Workplace initialized");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(WorkplaceError::AlreadyExists {
                    path: self.root.clone(),
                }
                .into())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn next_job_id(&self) -> Result<JobId> {
        let path = self.counter_path();
        let id = tokio::task::spawn_blocking(move || bump_counter(&path))
            .await
            .map_err(io::Error::other)??;
        debug!(job_id = %id, "Allocated job id");
        Ok(id)
    }

    async fn init_job_dir(&self, id: JobId) -> Result<()> {
        match fs::create_dir(self.job_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(JobError::DirectoryExists { id }.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn job_exists(&self, id: JobId) -> Result<bool> {
        match fs::metadata(self.job_path(id)).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn start_job(
        &self,
        id: JobId,
        command: &JobCommand,
        merge_stderr: bool,
        label: &str,
    ) -> Result<()> {
        let job_path = self.job_path(id);
        let script = command.wrapper_script(&self.config.shell)?;
        fs::write(job_path.join(files::LABEL), label).await?;
        fs::write(job_path.join(files::CMD), script).await?;

        let argv = self.run_args(id);
        let request = LaunchRequest {
            id,
            argv: &argv,
            workdir: &job_path,
            merge_stderr,
        };
        launcher::launch(&request, &self.config).await
    }

    async fn is_job_running(&self, id: JobId) -> Result<bool> {
        match self.read_pid(id).await? {
            Some(pid) => self.is_running_by_pid(id, pid).await,
            // The launcher only returns once the pid is recorded, so a job
            // without one never got going.
            None => Ok(false),
        }
    }

    async fn job_retcode(&self, id: JobId) -> Result<Option<i32>> {
        match read_record(&self.job_file(id, files::RETCODE)).await? {
            Some(raw) => Ok(Some(parse_record(id, files::RETCODE, &raw)?)),
            None => Ok(None),
        }
    }

    async fn job_label(&self, id: JobId) -> Result<Option<String>> {
        read_optional(&self.job_file(id, files::LABEL)).await
    }

    async fn job_times(&self, id: JobId) -> Result<JobTimes> {
        Ok(JobTimes {
            started_at: modified_at(&self.job_file(id, files::PID)).await?,
            finished_at: modified_at(&self.job_file(id, files::RETCODE)).await?,
        })
    }

    async fn kill_job(&self, id: JobId) -> Result<()> {
        let Some(pid) = self.read_pid(id).await? else {
            return Ok(());
        };
        if !self.is_running_by_pid(id, pid).await? {
            return Ok(());
        }

        let pgid = match getpgid(Some(pid)) {
            Ok(pgid) => pgid,
            Err(Errno::ESRCH) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        match killpg(pgid, self.config.kill_signal) {
            Ok(()) => {
                warn!(job_id = %id, pid = %pid, pgid = %pgid, signal = %self.config.kill_signal, "Signalled job process group");
                Ok(())
            }
            Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn destroy_job(&self, id: JobId) -> Result<()> {
        fs::remove_dir_all(self.job_path(id)).await?;
        debug!(job_id = %id, "Destroyed job directory");
        Ok(())
    }

    async fn iter_all_jobs(&self) -> Result<JobIdStream> {
        let entries = ReadDirStream::new(fs::read_dir(&self.root).await?);
        let ids = entries.filter_map(|entry| async move {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => return Some(Err(Error::from(e))),
            };
            let id: JobId = entry.file_name().to_str()?.parse().ok()?;
            match entry.file_type().await {
                Ok(file_type) if file_type.is_dir() => Some(Ok(id)),
                Ok(_) => None,
                Err(e) => Some(Err(e.into())),
            }
        });
        Ok(ids.boxed())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Uniquifies staged counter files between openers in one process.
static STAGE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Read-modify-write the counter under an exclusive advisory lock and return
/// the pre-increment value. Blocking; run on the blocking pool.
fn bump_counter(path: &Path) -> Result<JobId> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    fs2::FileExt::lock_exclusive(&file)?;

    let bumped = increment(&mut file, path);
    fs2::FileExt::unlock(&file)?;
    bumped
}

fn increment(file: &mut std::fs::File, path: &Path) -> Result<JobId> {
    let mut raw = String::new();
    file.read_to_string(&mut raw)?;
    let current: u64 = raw
        .trim()
        .parse()
        .map_err(|e: std::num::ParseIntError| WorkplaceError::CorruptCounter {
            path: path.to_path_buf(),
            reason: format!("{e}: {raw:?}"),
        })?;

    // The new value is never shorter than the old one, so overwrite in place
    // and then trim to length.
    let next = format!("{}\n", current + 1);
    file.seek(SeekFrom::Start(0))?;
    file.write_all(next.as_bytes())?;
    file.set_len(next.len() as u64)?;
    file.sync_data()?;
    Ok(JobId::new(current))
}

/// Read a file, treating "not found" as `None`.
async fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Read a pid or exit-status record. The wrapper creates the file before it
/// writes the value, so an empty file counts as absent.
async fn read_record(path: &Path) -> Result<Option<String>> {
    Ok(read_optional(path)
        .await?
        .filter(|raw| !raw.trim().is_empty()))
}

async fn modified_at(path: &Path) -> Result<Option<DateTime<Utc>>> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(Some(DateTime::<Utc>::from(meta.modified()?))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn parse_record<T>(id: JobId, file: &'static str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| {
        JobError::CorruptFile {
            id,
            file,
            reason: format!("{e}: {raw:?}"),
        }
        .into()
    })
}

/// Reading `/proc/<pid>/*` of an exited process fails with ENOENT, or ESRCH
/// if it exits between open and read.
fn process_gone(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::NotFound || e.raw_os_error() == Some(Errno::ESRCH as i32)
}
