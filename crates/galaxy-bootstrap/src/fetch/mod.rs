use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::cache::RepositoryCache;
use crate::command::CommandRunner;
use crate::error::Result;

mod archive;
mod git;

pub use archive::ArchiveSource;
pub use git::GitSource;

pub const GALAXY_GITHUB_REPOSITORY_URL: &str = "https://github.com/galaxyproject/galaxy.git";

pub const BRANCH_MASTER: &str = "master";
pub const BRANCH_DEV: &str = "dev";
pub const BRANCH_RELEASE_17_01: &str = "release_17.01";
pub const BRANCH_RELEASE_17_05: &str = "release_17.05";
pub const BRANCH_RELEASE_17_09: &str = "release_17.09";
pub const BRANCH_RELEASE_LATEST: &str = BRANCH_RELEASE_17_09;

pub const TAG_RELEASE_17_01: &str = "v17.01";
pub const TAG_RELEASE_17_05: &str = "v17.05";
pub const TAG_RELEASE_17_09: &str = "v17.09";
pub const TAG_RELEASE_LATEST: &str = TAG_RELEASE_17_09;

/// Commit sentinel meaning "whatever the branch tip is at fetch time".
pub const LATEST_COMMIT: &str = "";

/// Collaborators a strategy may use. Strategies never branch on each other.
pub struct FetchContext<'a> {
    pub runner: &'a CommandRunner,
    pub cache: &'a RepositoryCache,
    pub archive_base_url: &'a str,
    pub http_timeout: Duration,
}

/// How a Galaxy tree gets materialized at the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStrategy {
    Git(GitSource),
    Archive(ArchiveSource),
}

impl FetchStrategy {
    /// Leaves `destination` holding a complete tree on success. On failure no
    /// later step runs and whatever the failing step produced is left behind.
    pub async fn fetch_to(
        &self,
        destination: &Path,
        use_cache: bool,
        ctx: &FetchContext<'_>,
    ) -> Result<()> {
        match self {
            FetchStrategy::Git(src) => src.fetch_to(destination, use_cache, ctx).await,
            FetchStrategy::Archive(src) => src.fetch_to(destination, use_cache, ctx).await,
        }
    }
}

impl fmt::Display for FetchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchStrategy::Git(src) => fmt::Display::fmt(src, f),
            FetchStrategy::Archive(src) => fmt::Display::fmt(src, f),
        }
    }
}

/// What to download and where to put it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSpec {
    strategy: FetchStrategy,
    destination: PathBuf,
    use_cache: bool,
}

fn auto_destination() -> PathBuf {
    std::env::temp_dir().join(format!("gxbootstrap-{}", uuid::Uuid::new_v4()))
}

impl DownloadSpec {
    pub fn new(strategy: FetchStrategy) -> Self {
        Self {
            strategy,
            destination: auto_destination(),
            use_cache: true,
        }
    }

    /// Git clone of `repository_url`. `commit` may be [`LATEST_COMMIT`].
    pub fn git(
        repository_url: impl Into<String>,
        branch: Option<&str>,
        commit: impl Into<String>,
    ) -> Self {
        Self::new(FetchStrategy::Git(GitSource::new(
            repository_url,
            branch,
            commit,
        )))
    }

    pub fn archive(branch: impl Into<String>) -> Self {
        Self::new(FetchStrategy::Archive(ArchiveSource::new(branch)))
    }

    pub fn for_latest_release() -> Self {
        Self::git(
            GALAXY_GITHUB_REPOSITORY_URL,
            Some(BRANCH_RELEASE_LATEST),
            LATEST_COMMIT,
        )
    }

    pub fn for_latest_release_at_commit(commit: impl Into<String>) -> Self {
        Self::git(GALAXY_GITHUB_REPOSITORY_URL, Some(BRANCH_RELEASE_LATEST), commit)
    }

    pub fn git_github(branch: &str) -> Self {
        Self::git(GALAXY_GITHUB_REPOSITORY_URL, Some(branch), LATEST_COMMIT)
    }

    pub fn git_github_master() -> Self {
        Self::git_github(BRANCH_MASTER)
    }

    pub fn archive_github(branch: impl Into<String>) -> Self {
        Self::archive(branch)
    }

    pub fn archive_github_master() -> Self {
        Self::archive(BRANCH_MASTER)
    }

    pub fn archive_github_dev() -> Self {
        Self::archive(BRANCH_DEV)
    }

    pub fn destination(mut self, destination: impl Into<PathBuf>) -> Self {
        self.destination = destination.into();
        self
    }

    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn strategy(&self) -> &FetchStrategy {
        &self.strategy
    }

    pub fn location(&self) -> &Path {
        &self.destination
    }

    pub fn caches(&self) -> bool {
        self.use_cache
    }

    pub async fn download(&self, ctx: &FetchContext<'_>) -> Result<()> {
        tracing::info!(
            source = %self.strategy,
            destination = %self.destination.display(),
            use_cache = self.use_cache,
            "downloading galaxy"
        );
        self.strategy
            .fetch_to(&self.destination, self.use_cache, ctx)
            .await?;
        tracing::info!(destination = %self.destination.display(), "finished downloading galaxy");
        Ok(())
    }
}

impl Default for DownloadSpec {
    fn default() -> Self {
        Self::for_latest_release()
    }
}

impl fmt::Display for DownloadSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Galaxy download: {}, location={}, use cache={}",
            self.strategy,
            self.destination.display(),
            self.use_cache
        )
    }
}
