//! Jobs launched by a caller without a usable `PATH`.
//!
//! Lives in its own test binary because it changes `PATH` for the whole
//! process.

use std::time::Duration;

use tempfile::TempDir;
use tokio::time::{sleep, timeout};

use bgjobs::{JobOptions, JobStatus, OpenMode, Workplace};

const TEST_TIMEOUT: Duration = Duration::from_secs(20);

#[tokio::test]
async fn job_records_pid_and_retcode_without_path() {
    // SAFETY: this is the only test in this binary, so nothing else reads the
    // environment concurrently.
    unsafe { std::env::set_var("PATH", "/nonexistent") };

    timeout(TEST_TIMEOUT, async {
        let dir = TempDir::new().unwrap();
        let wp = Workplace::open(dir.path().join("jobs"), OpenMode::Create)
            .await
            .unwrap();

        let job = wp.start_job("/bin/sleep 1", JobOptions::new()).await.unwrap();
        assert!(job.path().join("job_pid").exists());
        assert_eq!(job.status().await.unwrap(), JobStatus::Running);

        while job.is_running().await.unwrap() {
            sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(job.status().await.unwrap(), JobStatus::Success);
        assert_eq!(job.retcode().await.unwrap(), Some(0));
    })
    .await
    .expect("test timed out");
}
