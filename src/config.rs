//! Configuration types.

use std::str::FromStr;
use std::time::Duration;

use nix::sys::signal::Signal;
use nix::sys::stat::Mode;
use tracing::warn;

/// Environment variable overriding the wrapper shell.
pub const ENV_SHELL: &str = "BGJOBS_SHELL";
/// Environment variable overriding the pid-file poll interval, in milliseconds.
pub const ENV_POLL_MS: &str = "BGJOBS_LAUNCH_POLL_MS";
/// Environment variable overriding the number of pid-file polls.
pub const ENV_ATTEMPTS: &str = "BGJOBS_LAUNCH_ATTEMPTS";

/// Settings for launching and signalling detached jobs.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Shell used to run the wrapper script and to lower shell command lines.
    pub shell: String,
    /// Delay between checks for the job's pid file.
    pub poll_interval: Duration,
    /// Number of pid-file checks before the launch is declared failed.
    pub poll_attempts: u32,
    /// File-creation mask applied in the detached worker before exec.
    pub umask: Mode,
    /// Signal sent to a job's process group by `kill`.
    pub kill_signal: Signal,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            shell: "/bin/sh".to_string(),
            poll_interval: Duration::from_millis(10),
            poll_attempts: 1000, // 10 seconds total
            umask: Mode::from_bits_truncate(0o022),
            kill_signal: Signal::SIGKILL,
        }
    }
}

impl LaunchConfig {
    /// Defaults, overridden by `BGJOBS_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults, overridden by whatever `lookup` returns for each known key.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let shell = match lookup(ENV_SHELL) {
            Some(shell) if !shell.trim().is_empty() => shell,
            Some(_) => {
                warn!(key = ENV_SHELL, "Ignoring empty shell override");
                defaults.shell
            }
            None => defaults.shell,
        };

        let poll_ms = parse_or(
            &lookup,
            ENV_POLL_MS,
            defaults.poll_interval.as_millis() as u64,
        );

        let mut poll_attempts = parse_or(&lookup, ENV_ATTEMPTS, defaults.poll_attempts);
        if poll_attempts == 0 {
            warn!(key = ENV_ATTEMPTS, "Launch attempts must be positive, using default");
            poll_attempts = defaults.poll_attempts;
        }

        Self {
            shell,
            poll_interval: Duration::from_millis(poll_ms),
            poll_attempts,
            ..defaults
        }
    }

    /// Set the wrapper shell.
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Set the pid-file polling bound.
    pub fn with_poll(mut self, interval: Duration, attempts: u32) -> Self {
        self.poll_interval = interval;
        self.poll_attempts = attempts;
        self
    }

    /// Total time the launcher waits for a job to record its pid.
    pub fn launch_budget(&self) -> Duration {
        self.poll_interval
            .checked_mul(self.poll_attempts)
            .unwrap_or(Duration::MAX)
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key = key, value = %raw, "Invalid configuration value, using default");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = LaunchConfig::default();
        assert_eq!(config.shell, "/bin/sh");
        assert_eq!(config.launch_budget(), Duration::from_secs(10));
        assert_eq!(config.kill_signal, Signal::SIGKILL);
        assert_eq!(config.umask.bits(), 0o022);
    }

    #[test]
    fn lookup_overrides() {
        let config = LaunchConfig::from_lookup(lookup_from(&[
            (ENV_SHELL, "/usr/bin/bash"),
            (ENV_POLL_MS, "25"),
            (ENV_ATTEMPTS, "40"),
        ]));
        assert_eq!(config.shell, "/usr/bin/bash");
        assert_eq!(config.poll_interval, Duration::from_millis(25));
        assert_eq!(config.poll_attempts, 40);
        assert_eq!(config.launch_budget(), Duration::from_secs(1));
    }

    #[test]
    fn invalid_values_fall_back() {
        let config = LaunchConfig::from_lookup(lookup_from(&[
            (ENV_SHELL, "  "),
            (ENV_POLL_MS, "soon"),
            (ENV_ATTEMPTS, "0"),
        ]));
        let defaults = LaunchConfig::default();
        assert_eq!(config.shell, defaults.shell);
        assert_eq!(config.poll_interval, defaults.poll_interval);
        assert_eq!(config.poll_attempts, defaults.poll_attempts);
    }

    #[test]
    fn huge_budget_saturates() {
        let config = LaunchConfig::from_lookup(lookup_from(&[
            (ENV_POLL_MS, u64::MAX.to_string().as_str()),
            (ENV_ATTEMPTS, "1000"),
        ]));
        assert_eq!(config.launch_budget(), Duration::MAX);
    }

    #[test]
    fn builders() {
        let config = LaunchConfig::default()
            .with_shell("/bin/bash")
            .with_poll(Duration::from_millis(5), 3);
        assert_eq!(config.shell, "/bin/bash");
        assert_eq!(config.launch_budget(), Duration::from_millis(15));
    }
}
