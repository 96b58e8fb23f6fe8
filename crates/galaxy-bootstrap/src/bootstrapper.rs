use std::path::{Path, PathBuf};

use crate::cache::RepositoryCache;
use crate::command::{CommandLine, CommandRunner, shell_quote};
use crate::daemon::Daemon;
use crate::error::{IoContext, Result};
use crate::fetch::{DownloadSpec, FetchContext};
use crate::layout::GalaxyLayout;
use crate::properties::GalaxyConfig;
use crate::run_record::{self, RunRecord};
use crate::seed::GalaxyData;
use crate::settings::BootstrapSettings;

pub const LOG_DIR_NAME: &str = "bootstrap-log";

/// Fetches, configures and launches one Galaxy tree.
#[derive(Debug, Clone)]
pub struct Bootstrapper {
    spec: DownloadSpec,
    root: PathBuf,
    settings: BootstrapSettings,
    runner: CommandRunner,
    cache: RepositoryCache,
}

impl Bootstrapper {
    pub fn new(spec: DownloadSpec, settings: BootstrapSettings) -> Self {
        let root = std::path::absolute(spec.location())
            .unwrap_or_else(|_| spec.location().to_path_buf());
        let runner = CommandRunner::new(settings.command_env.clone());
        let cache = RepositoryCache::new(settings.cache_root(), runner.clone());
        Self {
            spec,
            root,
            settings,
            runner,
            cache,
        }
    }

    /// Absolute Galaxy root as a string.
    pub fn path(&self) -> String {
        self.root.display().to_string()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join(LOG_DIR_NAME)
    }

    pub fn spec(&self) -> &DownloadSpec {
        &self.spec
    }

    pub fn settings(&self) -> &BootstrapSettings {
        &self.settings
    }

    pub fn runner(&self) -> &CommandRunner {
        &self.runner
    }

    pub fn cache(&self) -> &RepositoryCache {
        &self.cache
    }

    /// Downloads Galaxy into [`Bootstrapper::root`].
    pub async fn setup(&self) -> Result<()> {
        let ctx = FetchContext {
            runner: &self.runner,
            cache: &self.cache,
            archive_base_url: &self.settings.archive_base_url,
            http_timeout: self.settings.http_timeout,
        };
        self.spec.download(&ctx).await
    }

    /// Configures the fetched tree, runs its setup scripts and starts it in
    /// the background. Returns as soon as `run.sh --daemon` is spawned.
    ///
    /// The first failing step aborts the call and leaves the tree as is.
    pub async fn run(&self, config: &GalaxyConfig, data: Option<&GalaxyData>) -> Result<Daemon> {
        GalaxyLayout::detect(&self.root)?;
        let log_dir = self.log_dir();
        tokio::fs::create_dir_all(&log_dir)
            .await
            .io_context(|| format!("create log directory {}", log_dir.display()))?;
        tracing::info!(log_dir = %log_dir.display(), "starting galaxy setup");

        let layout = config.materialize(&self.root)?;

        if config.should_configure_virtualenv() {
            self.run_galaxy_script("virtualenv .venv").await?;
        }

        if !layout.is_legacy() {
            self.run_logged_script("sh scripts/common_startup.sh", "common_startup.log")
                .await?;
        }

        if config.is_create_database_required() {
            self.run_logged_script("sh create_db.sh", "create_db.log").await?;
        }

        if let Some(data) = data {
            data.write_seed_script(&self.root.join("seed.py"))?;
            self.run_logged_script("python seed.py", "seed.log").await?;
        }
        tracing::info!("galaxy setup complete");

        tracing::info!(url = %config.galaxy_url(), "running galaxy");
        let launch = CommandLine::new("sh")
            .path_arg(&self.root.join("run.sh"))
            .arg("--daemon");
        let launcher = self.runner.start(&launch)?;

        let record = RunRecord {
            port: config.port(),
            url: config.galaxy_url().to_string(),
            root: self.path(),
            started_at_unix_ms: run_record::now_unix_ms(),
            bootstrap_version: env!("CARGO_PKG_VERSION").to_string(),
            launcher_pid: launcher.id(),
            exec: launch.program().to_string(),
            args: launch.get_args().to_vec(),
        };
        if let Err(e) = run_record::write_run_record(&log_dir, &record).await {
            tracing::warn!(error = %e, "failed to write launch record");
        }

        Ok(Daemon::launched(self.clone(), config.port(), launcher))
    }

    /// Removes the Galaxy root. A missing root is not an error.
    pub async fn delete_root(&self) -> Result<()> {
        tracing::info!(root = %self.root.display(), "deleting galaxy directory");
        match tokio::fs::remove_dir_all(&self.root).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            res => res.io_context(|| format!("delete {}", self.root.display())),
        }
    }

    async fn run_logged_script(&self, script: &str, log_name: &str) -> Result<()> {
        let log = self.log_dir().join(log_name);
        let log = shell_quote(&log.to_string_lossy());
        self.run_galaxy_script(&format!("{script} 1> {log} 2>&1")).await
    }

    /// Runs `script` from the Galaxy root, inside `.venv` when present.
    async fn run_galaxy_script(&self, script: &str) -> Result<()> {
        let root = shell_quote(&self.root.to_string_lossy());
        let wrapped =
            format!("cd {root}; if [ -d .venv ]; then . .venv/bin/activate; fi; {script}");
        self.runner.run(&CommandLine::shell(wrapped)).await
    }
}
