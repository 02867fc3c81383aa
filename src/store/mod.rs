//! Job store: on-disk layout, id allocation and liveness checks.

pub mod fs_backend;
pub mod traits;

#[cfg(test)]
pub(crate) mod memory;

pub use fs_backend::FsBackend;
pub use traits::{JobBackend, JobId, JobIdStream, JobTimes, ParseJobIdError};

/// Well-known file names in a workplace.
pub mod files {
    /// Next job id, at the workplace root.
    pub const COUNTER: &str = ".counter";
    /// Generated wrapper script.
    pub const CMD: &str = "job_cmd";
    /// Pid of the wrapper shell, written by the job itself.
    pub const PID: &str = "job_pid";
    /// Captured standard output.
    pub const OUT: &str = "job_out";
    /// Captured standard error.
    pub const ERR: &str = "job_err";
    /// Exit status of the command, written when it finishes.
    pub const RETCODE: &str = "job_retcode";
    /// Display label.
    pub const LABEL: &str = "job_label";
}
