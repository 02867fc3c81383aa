//! bgjobs — run and monitor detached background jobs.
//!
//! Jobs are started fully detached from the caller and recorded in a
//! directory on disk, so any process can later ask whether a job is still
//! running and what it produced.

pub mod command;
pub mod config;
pub mod error;
pub mod job;
pub mod launcher;
pub mod store;
pub mod workplace;

pub use command::JobCommand;
pub use config::LaunchConfig;
pub use error::{Error, JobError, Result, WorkplaceError};
pub use job::{Job, JobStatus, JobSummary};
pub use store::{FsBackend, JobBackend, JobId};
pub use workplace::{JobOptions, OpenMode, Workplace};
