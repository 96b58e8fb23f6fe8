use std::{
    fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

use super::FetchContext;
use crate::error::{Error, IoContext, Result};

/// Zip snapshot of a branch tip. Cannot be pinned to a revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSource {
    branch: String,
}

impl ArchiveSource {
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
        }
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn url(&self, base_url: &str) -> String {
        format!("{base_url}{}", self.branch)
    }

    pub(super) async fn fetch_to(
        &self,
        destination: &Path,
        use_cache: bool,
        ctx: &FetchContext<'_>,
    ) -> Result<()> {
        if use_cache {
            tracing::debug!(branch = %self.branch, "archive downloads are never cached");
        }

        let url = self.url(ctx.archive_base_url);
        let zip_path =
            std::env::temp_dir().join(format!("gxdownload-{}.zip", uuid::Uuid::new_v4()));
        download_to_path(&url, &zip_path, ctx.http_timeout).await?;
        install_from_zip(&zip_path, destination).await?;
        tokio::fs::remove_file(&zip_path)
            .await
            .io_context(|| format!("remove {}", zip_path.display()))?;
        Ok(())
    }
}

impl fmt::Display for ArchiveSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "archive [branch={}]", self.branch)
    }
}

async fn download_to_path(url: &str, path: &Path, timeout: Duration) -> Result<()> {
    let http_err = |source| Error::Http {
        url: url.to_string(),
        source,
    };
    let client = reqwest::Client::builder()
        .user_agent(concat!("galaxy-bootstrap/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()
        .map_err(http_err)?;

    tracing::info!(%url, "downloading archive");
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(http_err)?
        .error_for_status()
        .map_err(http_err)?;

    let tmp = path.with_extension("tmp");
    let mut f = tokio::fs::File::create(&tmp)
        .await
        .io_context(|| format!("create {}", tmp.display()))?;
    let mut total: u64 = 0;
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(http_err)?;
        total = total.saturating_add(chunk.len() as u64);
        f.write_all(&chunk)
            .await
            .io_context(|| format!("write {}", tmp.display()))?;
    }
    f.flush().await.ok();
    tokio::fs::rename(&tmp, path)
        .await
        .io_context(|| format!("persist {}", path.display()))?;
    tracing::debug!(%url, bytes = total, "archive downloaded");
    Ok(())
}

/// Unzips next to `destination`, then swaps the single top-level directory
/// into place and removes the extraction directory.
pub(crate) async fn install_from_zip(zip_path: &Path, destination: &Path) -> Result<()> {
    let parent = destination
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    tokio::fs::create_dir_all(&parent)
        .await
        .io_context(|| format!("create {}", parent.display()))?;

    // Same filesystem as the destination so the final move is a rename.
    let unzip_dir = parent.join(format!(".gxdownload-{}", uuid::Uuid::new_v4()));
    let zip = zip_path.to_path_buf();
    let out = unzip_dir.clone();
    let staged = tokio::task::spawn_blocking(move || {
        extract_zip(&zip, &out)?;
        single_top_level_dir(&out, &zip)
    })
    .await
    .map_err(|e| Error::Io {
        context: "join zip extraction".to_string(),
        source: std::io::Error::other(e),
    })
    .and_then(|res| res);
    let top = match staged {
        Ok(top) => top,
        Err(e) => {
            let _ = tokio::fs::remove_dir_all(&unzip_dir).await;
            return Err(e);
        }
    };

    if let Ok(meta) = tokio::fs::symlink_metadata(destination).await {
        let removed = if meta.is_dir() {
            tokio::fs::remove_dir_all(destination).await
        } else {
            tokio::fs::remove_file(destination).await
        };
        removed.io_context(|| format!("replace {}", destination.display()))?;
    }

    tokio::fs::rename(&top, destination)
        .await
        .io_context(|| format!("move {} to {}", top.display(), destination.display()))?;
    tokio::fs::remove_dir_all(&unzip_dir)
        .await
        .io_context(|| format!("remove {}", unzip_dir.display()))?;
    Ok(())
}

fn single_top_level_dir(unzip_dir: &Path, zip_path: &Path) -> Result<PathBuf> {
    let entries: Vec<PathBuf> = fs::read_dir(unzip_dir)
        .io_context(|| format!("read {}", unzip_dir.display()))?
        .flatten()
        .map(|e| e.path())
        .collect();
    match entries.as_slice() {
        [only] if only.is_dir() => Ok(only.clone()),
        _ => Err(Error::InvalidArchive {
            path: zip_path.to_path_buf(),
            reason: format!(
                "expected a single top-level directory, found {} entries",
                entries.len()
            ),
        }),
    }
}

fn extract_zip(zip_path: &Path, out_dir: &Path) -> Result<()> {
    fs::create_dir_all(out_dir).io_context(|| format!("create {}", out_dir.display()))?;
    let f = fs::File::open(zip_path).io_context(|| format!("open {}", zip_path.display()))?;
    let mut archive = zip::ZipArchive::new(f)?;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let Some(rel) = file.enclosed_name() else {
            tracing::warn!(name = file.name(), "skipping zip entry outside archive root");
            continue;
        };
        let out_path = out_dir.join(&rel);

        if file.is_dir() {
            fs::create_dir_all(&out_path)
                .io_context(|| format!("create {}", out_path.display()))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).io_context(|| format!("create {}", parent.display()))?;
        }

        #[cfg(unix)]
        {
            if file.is_symlink() {
                let mut target = String::new();
                std::io::Read::read_to_string(&mut file, &mut target)
                    .io_context(|| format!("read link target of {}", rel.display()))?;
                if !link_stays_inside(&rel, Path::new(&target)) {
                    return Err(Error::InvalidArchive {
                        path: zip_path.to_path_buf(),
                        reason: format!(
                            "link {} points outside the archive: {target}",
                            rel.display()
                        ),
                    });
                }
                std::os::unix::fs::symlink(&target, &out_path)
                    .io_context(|| format!("link {} -> {target}", out_path.display()))?;
                continue;
            }
        }

        let mut out =
            fs::File::create(&out_path).io_context(|| format!("create {}", out_path.display()))?;
        std::io::copy(&mut file, &mut out)
            .io_context(|| format!("extract {}", out_path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = file.unix_mode() {
                fs::set_permissions(&out_path, fs::Permissions::from_mode(mode & 0o7777))
                    .io_context(|| format!("chmod {}", out_path.display()))?;
            }
        }
    }
    Ok(())
}

/// Whether a relative link stored at `link` resolves to somewhere inside the
/// extraction root, judged lexically.
#[cfg(unix)]
fn link_stays_inside(link: &Path, target: &Path) -> bool {
    use std::path::Component;

    let mut depth = link
        .parent()
        .map(|p| {
            p.components()
                .filter(|c| matches!(c, Component::Normal(_)))
                .count()
        })
        .unwrap_or(0);
    for component in target.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir if depth > 0 => depth -= 1,
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    true
}
