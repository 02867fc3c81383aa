//! Error types for bgjobs.

use std::path::PathBuf;
use std::time::Duration;

use crate::store::JobId;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Workplace error: {0}")]
    Workplace(#[from] WorkplaceError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error is a configuration conflict the caller can recover
    /// from by choosing a different open mode or job id.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::Workplace(WorkplaceError::AlreadyExists { .. })
                | Self::Workplace(WorkplaceError::NotFound { .. })
                | Self::Job(JobError::NotFound { .. })
        )
    }
}

impl From<nix::errno::Errno> for Error {
    fn from(errno: nix::errno::Errno) -> Self {
        Self::Io(errno.into())
    }
}

/// Workplace-level errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkplaceError {
    #[error("Workplace already exists: {}", path.display())]
    AlreadyExists { path: PathBuf },

    #[error("Workplace does not exist: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Refusing to initialize {}: job {job_id} is already present", path.display())]
    NotEmpty { path: PathBuf, job_id: JobId },

    #[error("Corrupt job counter at {}: {reason}", path.display())]
    CorruptCounter { path: PathBuf, reason: String },
}

/// Job-level errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {id} does not exist")]
    NotFound { id: JobId },

    #[error("Job directory for {id} already exists")]
    DirectoryExists { id: JobId },

    #[error("Job {id} did not record its pid within {waited:?}")]
    LaunchTimeout { id: JobId, waited: Duration },

    #[error("Job {id} failed to launch: {reason}")]
    LaunchFailed { id: JobId, reason: String },

    #[error("Invalid command: {reason}")]
    InvalidCommand { reason: String },

    #[error("Job {id} has a corrupt {file} file: {reason}")]
    CorruptFile {
        id: JobId,
        file: &'static str,
        reason: String,
    },
}

/// Result type alias for bgjobs.
pub type Result<T> = std::result::Result<T, Error>;
