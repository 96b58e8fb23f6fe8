use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

use sha1::Digest;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::command::{CommandLine, CommandRunner};
use crate::error::{IoContext, Result};

fn mirror_locks() -> &'static std::sync::Mutex<HashMap<PathBuf, Arc<Mutex<()>>>> {
    static LOCKS: OnceLock<std::sync::Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();
    LOCKS.get_or_init(|| std::sync::Mutex::new(HashMap::new()))
}

fn lock_for(key: &Path) -> Arc<Mutex<()>> {
    let mut map = mirror_locks().lock().unwrap_or_else(|e| e.into_inner());
    map.entry(key.to_path_buf())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

fn mark_last_used(entry_dir: &Path) {
    let now_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    // Best-effort.
    let _ = std::fs::write(entry_dir.join(".git").join("last_used"), format!("{now_ms}\n"));
}

/// Shared on-disk git mirrors, one per repository URL.
///
/// Mirrors are created lazily and never deleted. Concurrent resolves of the
/// same URL are serialized within this process only; two processes creating
/// the same mirror for the first time can still race.
#[derive(Debug, Clone)]
pub struct RepositoryCache {
    root: PathBuf,
    runner: CommandRunner,
}

impl RepositoryCache {
    pub fn new(root: impl Into<PathBuf>, runner: CommandRunner) -> Self {
        Self {
            root: root.into(),
            runner,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic mirror location for `url`.
    pub fn mirror_dir(&self, url: &str) -> PathBuf {
        let hash = sha1::Sha1::digest(url.as_bytes());
        self.root.join(hex::encode(hash))
    }

    /// Clones the mirror if needed, then fetches everything from the remote.
    ///
    /// The returned [`Mirror`] holds the per-URL lock until dropped.
    pub async fn resolve(&self, url: &str) -> Result<Mirror> {
        let dir = self.mirror_dir(url);
        let guard = lock_for(&dir).lock_owned().await;

        if !dir.exists() {
            tokio::fs::create_dir_all(&self.root)
                .await
                .io_context(|| format!("create cache root {}", self.root.display()))?;
            tracing::info!(%url, mirror = %dir.display(), "creating repository mirror");
            self.runner
                .run(&CommandLine::new("git").arg("clone").arg(url).path_arg(&dir))
                .await?;
        }

        self.runner
            .run(&git_in(&dir).args(["fetch", "--all", "--tags", "--prune"]))
            .await?;
        mark_last_used(&dir);

        Ok(Mirror {
            dir,
            runner: self.runner.clone(),
            _guard: guard,
        })
    }
}

pub(crate) fn git_in(dir: &Path) -> CommandLine {
    CommandLine::new("git").arg("-C").path_arg(dir)
}

/// A freshly fetched mirror, locked for the caller.
pub struct Mirror {
    dir: PathBuf,
    runner: CommandRunner,
    _guard: OwnedMutexGuard<()>,
}

impl Mirror {
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Points the mirror's local `branch` at the fetched remote tip and checks
    /// it out. With no branch, the remote's default branch is used.
    ///
    /// Returns the branch that was checked out.
    pub async fn checkout(&self, branch: Option<&str>) -> Result<String> {
        let branch = match branch {
            Some(b) => b.to_string(),
            None => self.default_branch().await?,
        };
        self.runner
            .run(
                &git_in(&self.dir)
                    .args(["checkout", "-q", "-f", "-B"])
                    .arg(&branch)
                    .arg(format!("origin/{branch}")),
            )
            .await?;
        Ok(branch)
    }

    async fn default_branch(&self) -> Result<String> {
        let head = self
            .runner
            .output(&git_in(&self.dir).args(["symbolic-ref", "--short", "refs/remotes/origin/HEAD"]))
            .await?;
        Ok(head
            .strip_prefix("origin/")
            .unwrap_or(head.as_str())
            .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{commit, git_available, init_origin, rev_parse};

    #[test]
    fn same_url_maps_to_same_mirror() {
        let cache = RepositoryCache::new("/cache", CommandRunner::default());
        let a = cache.mirror_dir("https://github.com/galaxyproject/galaxy.git");
        let b = cache.mirror_dir("https://github.com/galaxyproject/galaxy.git");
        assert_eq!(a, b);
        assert!(a.starts_with("/cache"));
        assert_eq!(a.file_name().unwrap().len(), 40);
    }

    #[test]
    fn different_urls_map_to_different_mirrors() {
        let cache = RepositoryCache::new("/cache", CommandRunner::default());
        assert_ne!(
            cache.mirror_dir("https://github.com/galaxyproject/galaxy.git"),
            cache.mirror_dir("https://github.com/galaxyproject/galaxy")
        );
    }

    #[tokio::test]
    async fn resolve_creates_mirror_once_and_tracks_new_commits() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let origin = init_origin(&tmp.path().join("origin"));
        let url = origin.to_string_lossy().into_owned();
        let cache = RepositoryCache::new(tmp.path().join("cache"), CommandRunner::default());

        let first = {
            let mirror = cache.resolve(&url).await.unwrap();
            assert_eq!(mirror.checkout(None).await.unwrap(), "main");
            mirror.path().to_path_buf()
        };
        assert_eq!(first, cache.mirror_dir(&url));

        let tip = commit(&origin, "second");
        let mirror = cache.resolve(&url).await.unwrap();
        assert_eq!(mirror.path(), first.as_path());
        mirror.checkout(Some("main")).await.unwrap();
        assert_eq!(rev_parse(mirror.path(), "HEAD"), tip);
    }
}
