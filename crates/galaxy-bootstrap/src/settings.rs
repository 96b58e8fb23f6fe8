use std::{collections::BTreeMap, path::PathBuf, time::Duration};

pub const DEFAULT_ARCHIVE_BASE_URL: &str = "https://codeload.github.com/galaxyproject/galaxy/zip/";

const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_MAX_POLLS: u32 = 600;
const DEFAULT_HTTP_TIMEOUT_SEC: u64 = 30 * 60;

pub(crate) fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.trim().parse::<u64>().ok())
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Fixed-interval, bounded polling used to observe the instance port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub interval: Duration,
    pub max_polls: u32,
}

impl PollSchedule {
    pub fn new(interval: Duration, max_polls: u32) -> Self {
        Self {
            interval,
            max_polls: max_polls.max(1),
        }
    }

    pub fn budget(&self) -> Duration {
        self.interval.saturating_mul(self.max_polls)
    }
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            DEFAULT_MAX_POLLS,
        )
    }
}

/// Everything the bootstrapper would otherwise read from process-wide state.
///
/// Built once (usually via [`BootstrapSettings::from_env`]) and handed to the
/// cache, the command runner and the daemon at construction time.
#[derive(Debug, Clone)]
pub struct BootstrapSettings {
    pub home: PathBuf,
    pub poll: PollSchedule,
    pub archive_base_url: String,
    pub http_timeout: Duration,
    /// Extra environment applied to every external command.
    pub command_env: BTreeMap<String, String>,
}

impl BootstrapSettings {
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            poll: PollSchedule::default(),
            archive_base_url: DEFAULT_ARCHIVE_BASE_URL.to_string(),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SEC),
            command_env: BTreeMap::new(),
        }
    }

    pub fn from_env() -> Self {
        let home = env_string("GALAXY_BOOTSTRAP_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(default_home);

        let interval = env_u64("GALAXY_BOOTSTRAP_POLL_INTERVAL_MS")
            .map(|v| v.clamp(10, 60_000))
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS);
        let max_polls = env_u64("GALAXY_BOOTSTRAP_MAX_POLLS")
            .map(|v| v.clamp(1, 100_000) as u32)
            .unwrap_or(DEFAULT_MAX_POLLS);
        let http_timeout = env_u64("GALAXY_BOOTSTRAP_HTTP_TIMEOUT_SEC")
            .map(|v| v.clamp(10, 6 * 60 * 60))
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_SEC);

        let mut settings = Self::with_home(home);
        settings.poll = PollSchedule::new(Duration::from_millis(interval), max_polls);
        settings.http_timeout = Duration::from_secs(http_timeout);
        if let Some(url) = env_string("GALAXY_BOOTSTRAP_ARCHIVE_URL") {
            settings.archive_base_url = url;
        }
        settings
    }

    pub fn cache_root(&self) -> PathBuf {
        self.home.join("cache")
    }

    pub fn with_command_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.command_env.insert(key.into(), value.into());
        self
    }
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self::with_home(default_home())
    }
}

fn default_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".galaxy-bootstrap")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_is_ten_minutes_of_one_second_polls() {
        let poll = PollSchedule::default();
        assert_eq!(poll.interval, Duration::from_secs(1));
        assert_eq!(poll.max_polls, 600);
        assert_eq!(poll.budget(), Duration::from_secs(600));
    }

    #[test]
    fn schedule_polls_at_least_once() {
        let poll = PollSchedule::new(Duration::from_millis(5), 0);
        assert_eq!(poll.max_polls, 1);
    }

    #[test]
    fn cache_root_lives_under_home() {
        let settings = BootstrapSettings::with_home("/srv/gx");
        assert_eq!(settings.cache_root(), PathBuf::from("/srv/gx/cache"));
        assert_eq!(settings.archive_base_url, DEFAULT_ARCHIVE_BASE_URL);
    }

    #[test]
    fn command_env_accumulates() {
        let settings = BootstrapSettings::with_home("/srv/gx")
            .with_command_env("GIT_TERMINAL_PROMPT", "0")
            .with_command_env("GIT_TERMINAL_PROMPT", "1");
        assert_eq!(settings.command_env.len(), 1);
        assert_eq!(settings.command_env["GIT_TERMINAL_PROMPT"], "1");
    }
}
