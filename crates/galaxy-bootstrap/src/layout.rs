use std::path::{Path, PathBuf};

use crate::error::{Error, IoContext, Result};

const CONFIG_DIR_NAME: &str = "config";

/// On-disk arrangement of a Galaxy tree. Releases from 2014.10.06 onwards
/// keep their configuration under `config/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GalaxyLayout {
    /// Pre-2014.10.06: `universe_wsgi.ini` at the root.
    Legacy,
    ConfigDir,
}

impl GalaxyLayout {
    pub fn detect(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(Error::InvalidWorkspace {
                path: root.to_path_buf(),
                reason: "galaxy root does not exist".to_string(),
            });
        }
        let sample = root.join(CONFIG_DIR_NAME).join("galaxy.ini.sample");
        Ok(if sample.is_file() {
            GalaxyLayout::ConfigDir
        } else {
            GalaxyLayout::Legacy
        })
    }

    pub fn is_legacy(self) -> bool {
        self == GalaxyLayout::Legacy
    }

    pub fn sample_ini(self, root: &Path) -> PathBuf {
        match self {
            GalaxyLayout::Legacy => root.join("universe_wsgi.ini.sample"),
            GalaxyLayout::ConfigDir => root.join(CONFIG_DIR_NAME).join("galaxy.ini.sample"),
        }
    }

    pub fn config_ini(self, root: &Path) -> PathBuf {
        match self {
            GalaxyLayout::Legacy => root.join("universe_wsgi.ini"),
            GalaxyLayout::ConfigDir => root.join(CONFIG_DIR_NAME).join("galaxy.ini"),
        }
    }

    /// Root-relative path Galaxy should use to reference config file `name`.
    ///
    /// With the `config/` layout the file is first copied from its `.sample`
    /// sibling when it does not exist yet.
    pub fn config_path_from_root(self, root: &Path, name: &str) -> Result<String> {
        match self {
            GalaxyLayout::Legacy => Ok(name.to_string()),
            GalaxyLayout::ConfigDir => {
                let dir = root.join(CONFIG_DIR_NAME);
                let target = dir.join(name);
                if !target.exists() {
                    let sample = dir.join(format!("{name}.sample"));
                    if !sample.is_file() {
                        return Err(Error::InvalidWorkspace {
                            path: root.to_path_buf(),
                            reason: format!("missing {}", sample.display()),
                        });
                    }
                    std::fs::copy(&sample, &target).io_context(|| {
                        format!("copy {} to {}", sample.display(), target.display())
                    })?;
                }
                Ok(format!("{CONFIG_DIR_NAME}/{name}"))
            }
        }
    }
}
