//! Process launcher — starts a job fully detached from the caller.
//!
//! Protocol:
//! 1. The spawned process calls `setsid` to leave the caller's session and
//!    process group.
//! 2. It forks again and the intermediate process exits at once, so the worker
//!    is re-parented away from the caller.
//! 3. The worker resets its umask and execs the wrapper script with stdin on
//!    `/dev/null`, stdout on `job_out` and stderr on `job_err` (or the stdout
//!    descriptor when merged), inside the job directory.
//! 4. The wrapper records its pid in `job_pid` before running the command; the
//!    launcher polls for that file with a fixed interval and attempt budget.

use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::process::Stdio;

use nix::sys::stat::{Mode, umask};
use nix::unistd::{ForkResult, fork, setsid};
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::LaunchConfig;
use crate::error::{JobError, Result};
use crate::store::{JobId, files};

/// Everything needed to launch one job.
#[derive(Debug)]
pub struct LaunchRequest<'a> {
    pub id: JobId,
    /// Exact argv exec'd by the worker; liveness checks compare against it.
    pub argv: &'a [OsString],
    /// Job directory: working directory and home of the output files.
    pub workdir: &'a Path,
    /// Send stderr to the stdout file. `job_err` is still created.
    pub merge_stderr: bool,
}

/// Launch a job and wait until it has recorded its pid.
pub async fn launch(request: &LaunchRequest<'_>, config: &LaunchConfig) -> Result<()> {
    let id = request.id;
    let (program, args) = request
        .argv
        .split_first()
        .ok_or_else(|| JobError::LaunchFailed {
            id,
            reason: "empty argv".to_string(),
        })?;

    let stdout = create_std(&request.workdir.join(files::OUT)).await?;
    let stderr_file = create_std(&request.workdir.join(files::ERR)).await?;
    let stderr = if request.merge_stderr {
        stdout.try_clone()?
    } else {
        stderr_file
    };

    let mask = config.umask;
    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(request.workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr));

    // SAFETY: `detach` runs in the forked child before exec and only makes
    // async-signal-safe calls (setsid, fork, _exit, umask).
    unsafe {
        command.pre_exec(move || detach(mask));
    }

    let status = command.status().await?;
    if !status.success() {
        return Err(JobError::LaunchFailed {
            id,
            reason: format!("detaching process exited with {status}"),
        }
        .into());
    }

    wait_for_pid_file(id, &request.workdir.join(files::PID), config).await
}

/// Create (or truncate) an output file, handed to the child as a std handle.
async fn create_std(path: &Path) -> io::Result<std::fs::File> {
    Ok(fs::File::create(path).await?.into_std().await)
}

/// Runs between fork and exec. Only the grandchild returns.
fn detach(mask: Mode) -> io::Result<()> {
    setsid()?;

    // SAFETY: single-threaded child between fork and exec; the parent branch
    // leaves immediately through `_exit` without running destructors.
    match unsafe { fork() }? {
        ForkResult::Parent { .. } => unsafe { nix::libc::_exit(0) },
        ForkResult::Child => {}
    }

    umask(mask);
    Ok(())
}

/// Bounded wait for the worker's pid file.
async fn wait_for_pid_file(id: JobId, pid_path: &Path, config: &LaunchConfig) -> Result<()> {
    for attempt in 0..config.poll_attempts {
        if fs::try_exists(pid_path).await? {
            debug!(job_id = %id, attempts = attempt + 1, "Job recorded its pid");
            return Ok(());
        }
        tokio::time::sleep(config.poll_interval).await;
    }

    let waited = config.launch_budget();
    warn!(job_id = %id, waited = ?waited, "Job never recorded its pid");
    Err(JobError::LaunchTimeout { id, waited }.into())
}
