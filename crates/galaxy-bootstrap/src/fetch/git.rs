use std::{fmt, path::Path};

use super::{FetchContext, LATEST_COMMIT};
use crate::cache::git_in;
use crate::command::CommandLine;
use crate::error::{Error, IoContext, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSource {
    repository_url: String,
    branch: Option<String>,
    commit: String,
}

impl GitSource {
    pub fn new(
        repository_url: impl Into<String>,
        branch: Option<&str>,
        commit: impl Into<String>,
    ) -> Self {
        Self {
            repository_url: repository_url.into(),
            branch: branch.map(str::to_string),
            commit: commit.into(),
        }
    }

    pub fn repository_url(&self) -> &str {
        &self.repository_url
    }

    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }

    pub fn commit(&self) -> &str {
        &self.commit
    }

    pub fn is_latest(&self) -> bool {
        self.commit == LATEST_COMMIT
    }

    fn clone_command(&self, source: &str, destination: &Path) -> CommandLine {
        let mut cmd = CommandLine::new("git").arg("clone").arg("-q");
        if let Some(branch) = &self.branch {
            cmd = cmd.arg("-b").arg(branch);
        }
        cmd.arg(source).path_arg(destination)
    }

    pub(super) async fn fetch_to(
        &self,
        destination: &Path,
        use_cache: bool,
        ctx: &FetchContext<'_>,
    ) -> Result<()> {
        ensure_clone_target(destination)?;
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .io_context(|| format!("create {}", parent.display()))?;
        }

        if use_cache {
            let mirror = ctx.cache.resolve(&self.repository_url).await?;
            mirror.checkout(self.branch()).await?;
            let source = mirror.path().to_string_lossy().into_owned();
            // Mirror lock is held until the clone completes.
            ctx.runner
                .run(&self.clone_command(&source, destination))
                .await?;
        } else {
            ctx.runner
                .run(&self.clone_command(&self.repository_url, destination))
                .await?;
        }

        if !self.is_latest() {
            ctx.runner
                .run(&git_in(destination).args(["reset", "-q", "--hard"]).arg(&self.commit))
                .await?;
        }
        Ok(())
    }
}

fn ensure_clone_target(destination: &Path) -> Result<()> {
    if !destination.exists() {
        return Ok(());
    }
    let mut entries = std::fs::read_dir(destination)
        .io_context(|| format!("read {}", destination.display()))?;
    if entries.next().is_some() {
        return Err(Error::WorkspaceNotEmpty(destination.to_path_buf()));
    }
    Ok(())
}

impl fmt::Display for GitSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let commit = if self.is_latest() {
            "latest"
        } else {
            self.commit.as_str()
        };
        write!(
            f,
            "git [repositoryUrl={}, branch={}, commit={}]",
            self.repository_url,
            self.branch.as_deref().unwrap_or("<default>"),
            commit
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RepositoryCache;
    use crate::command::CommandRunner;
    use crate::settings::DEFAULT_ARCHIVE_BASE_URL;
    use crate::testutil::{commit, git, git_available, init_origin, rev_parse};

    struct Fixture {
        tmp: tempfile::TempDir,
        runner: CommandRunner,
        cache: RepositoryCache,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let runner = CommandRunner::default();
            let cache = RepositoryCache::new(tmp.path().join("cache"), runner.clone());
            Self { tmp, runner, cache }
        }

        fn ctx(&self) -> FetchContext<'_> {
            FetchContext {
                runner: &self.runner,
                cache: &self.cache,
                archive_base_url: DEFAULT_ARCHIVE_BASE_URL,
                http_timeout: std::time::Duration::from_secs(5),
            }
        }
    }

    #[test]
    fn clone_command_omits_branch_when_unset() {
        let src = GitSource::new("https://example.org/g.git", None, LATEST_COMMIT);
        let cmd = src.clone_command("https://example.org/g.git", Path::new("/tmp/d"));
        assert_eq!(cmd.to_string(), "git clone -q https://example.org/g.git /tmp/d");

        let src = GitSource::new("https://example.org/g.git", Some("dev"), LATEST_COMMIT);
        let cmd = src.clone_command("/cache/abc", Path::new("/tmp/d"));
        assert_eq!(cmd.to_string(), "git clone -q -b dev /cache/abc /tmp/d");
    }

    #[test]
    fn non_empty_destination_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(ensure_clone_target(&tmp.path().join("missing")).is_ok());
        assert!(ensure_clone_target(tmp.path()).is_ok());
        std::fs::write(tmp.path().join("x"), b"x").unwrap();
        assert!(matches!(
            ensure_clone_target(tmp.path()),
            Err(Error::WorkspaceNotEmpty(_))
        ));
    }

    #[tokio::test]
    async fn latest_fetch_checks_out_branch_tip() {
        if !git_available() {
            return;
        }
        let fx = Fixture::new();
        let origin = init_origin(&fx.tmp.path().join("origin"));
        let url = origin.to_string_lossy().into_owned();

        for (idx, use_cache) in [true, false].into_iter().enumerate() {
            let tip = commit(&origin, &format!("change {idx}"));
            let dest = fx.tmp.path().join(format!("galaxy-{idx}"));
            GitSource::new(&url, Some("main"), LATEST_COMMIT)
                .fetch_to(&dest, use_cache, &fx.ctx())
                .await
                .unwrap();
            assert_eq!(rev_parse(&dest, "HEAD"), tip);
        }
    }

    #[tokio::test]
    async fn cached_fetch_without_branch_uses_remote_default() {
        if !git_available() {
            return;
        }
        let fx = Fixture::new();
        let origin = init_origin(&fx.tmp.path().join("origin"));
        let url = origin.to_string_lossy().into_owned();

        // Leave a different branch checked out in the mirror first.
        git(&origin, &["branch", "feature"]);
        let feature_dest = fx.tmp.path().join("feature");
        GitSource::new(&url, Some("feature"), LATEST_COMMIT)
            .fetch_to(&feature_dest, true, &fx.ctx())
            .await
            .unwrap();

        let tip = commit(&origin, "main moves on");
        let dest = fx.tmp.path().join("default");
        GitSource::new(&url, None, LATEST_COMMIT)
            .fetch_to(&dest, true, &fx.ctx())
            .await
            .unwrap();
        assert_eq!(rev_parse(&dest, "HEAD"), tip);
    }

    #[tokio::test]
    async fn explicit_commit_is_checked_out_exactly() {
        if !git_available() {
            return;
        }
        let fx = Fixture::new();
        let origin = init_origin(&fx.tmp.path().join("origin"));
        let pinned = commit(&origin, "pinned");
        commit(&origin, "later");
        let url = origin.to_string_lossy().into_owned();

        let dest = fx.tmp.path().join("galaxy");
        GitSource::new(&url, Some("main"), pinned.clone())
            .fetch_to(&dest, true, &fx.ctx())
            .await
            .unwrap();
        assert_eq!(rev_parse(&dest, "HEAD"), pinned);
    }

    #[tokio::test]
    async fn unreachable_origin_fails_before_cloning_into_destination() {
        if !git_available() {
            return;
        }
        let fx = Fixture::new();
        let dest = fx.tmp.path().join("galaxy");
        let missing = fx.tmp.path().join("no-such-repo");
        let url = missing.to_string_lossy().into_owned();

        let err = GitSource::new(&url, Some("main"), LATEST_COMMIT)
            .fetch_to(&dest, true, &fx.ctx())
            .await
            .unwrap_err();
        match err {
            Error::CommandFailed { command, .. } => {
                let mirror = fx.cache.mirror_dir(&url);
                assert!(command.starts_with("git clone"));
                assert!(command.ends_with(&mirror.display().to_string()));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn failed_clone_skips_reset() {
        if !git_available() {
            return;
        }
        let fx = Fixture::new();
        let dest = fx.tmp.path().join("galaxy");
        let missing = fx.tmp.path().join("no-such-repo");
        let err = GitSource::new(missing.to_string_lossy(), Some("main"), "deadbeef")
            .fetch_to(&dest, false, &fx.ctx())
            .await
            .unwrap_err();
        match err {
            Error::CommandFailed { command, .. } => assert!(command.starts_with("git clone")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!dest.join(".git").exists());
    }
}
