use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use galaxy_bootstrap::fetch::{GALAXY_GITHUB_REPOSITORY_URL, LATEST_COMMIT};
use galaxy_bootstrap::run_record::read_run_record;
use galaxy_bootstrap::{
    BootstrapSettings, Bootstrapper, ConfigureVirtualenv, Daemon, DownloadSpec, GalaxyData,
    GalaxyProperties, SeedUser,
};

#[derive(Parser)]
#[command(name = "galaxy-bootstrap", version)]
#[command(about = "Fetch, configure and run throwaway Galaxy instances")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a Galaxy tree
    Fetch {
        /// Target directory (default: a fresh temp directory)
        #[arg(long)]
        dest: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = Source::Git)]
        source: Source,
        /// Repository to clone (git only)
        #[arg(long, default_value = GALAXY_GITHUB_REPOSITORY_URL)]
        repository: String,
        /// Branch (default: latest release for git, master for archives)
        #[arg(long)]
        branch: Option<String>,
        /// Pin to this commit (git only)
        #[arg(long)]
        commit: Option<String>,
        /// Clone straight from the remote instead of the local mirror
        #[arg(long)]
        no_cache: bool,
    },
    /// Configure a fetched tree and start it in the background
    Run {
        root: PathBuf,
        #[arg(long, conflicts_with = "free_port")]
        port: Option<u16>,
        #[arg(long)]
        free_port: bool,
        /// Admin user email (repeatable)
        #[arg(long = "admin")]
        admins: Vec<String>,
        /// `[app:main]` override KEY=VALUE (repeatable)
        #[arg(long = "app", value_parser = parse_key_value)]
        app: Vec<(String, String)>,
        /// `[server:main]` override KEY=VALUE (repeatable)
        #[arg(long = "server", value_parser = parse_key_value)]
        server: Vec<(String, String)>,
        #[arg(long)]
        nested_shed_tools: bool,
        #[arg(long, value_enum, default_value_t = Virtualenv::Auto)]
        virtualenv: Virtualenv,
        /// Pre-populated SQLite database to install
        #[arg(long)]
        database: Option<PathBuf>,
        /// User to seed with the default password (repeatable)
        #[arg(long = "seed-user")]
        seed_users: Vec<String>,
        /// Block until the port accepts connections
        #[arg(long)]
        wait: bool,
    },
    /// Stop an instance started by `run`
    Stop {
        root: PathBuf,
        /// Block until the port is released
        #[arg(long)]
        wait: bool,
    },
    /// Print the state of an instance as JSON
    Status { root: PathBuf },
    /// Delete a Galaxy tree
    Delete { root: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum Source {
    Git,
    Archive,
}

#[derive(Clone, Copy, ValueEnum)]
enum Virtualenv {
    Yes,
    No,
    Auto,
}

impl From<Virtualenv> for ConfigureVirtualenv {
    fn from(v: Virtualenv) -> Self {
        match v {
            Virtualenv::Yes => ConfigureVirtualenv::Yes,
            Virtualenv::No => ConfigureVirtualenv::No,
            Virtualenv::Auto => ConfigureVirtualenv::Auto,
        }
    }
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{s}`")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let settings = BootstrapSettings::from_env();
    let cli = Cli::parse();
    match cli.command {
        Commands::Fetch {
            dest,
            source,
            repository,
            branch,
            commit,
            no_cache,
        } => {
            let mut spec = match source {
                Source::Git => match (&branch, &commit) {
                    (None, None) if repository == GALAXY_GITHUB_REPOSITORY_URL => {
                        DownloadSpec::for_latest_release()
                    }
                    (None, Some(commit)) if repository == GALAXY_GITHUB_REPOSITORY_URL => {
                        DownloadSpec::for_latest_release_at_commit(commit)
                    }
                    _ => DownloadSpec::git(
                        &repository,
                        branch.as_deref(),
                        commit.as_deref().unwrap_or(LATEST_COMMIT),
                    ),
                },
                Source::Archive => {
                    if commit.is_some() {
                        bail!("archive downloads cannot be pinned to a commit");
                    }
                    match branch {
                        Some(branch) => DownloadSpec::archive_github(branch),
                        None => DownloadSpec::archive_github_master(),
                    }
                }
            };
            if let Some(dest) = dest {
                spec = spec.destination(dest);
            }
            let bootstrapper = Bootstrapper::new(spec.use_cache(!no_cache), settings);
            bootstrapper
                .setup()
                .await
                .with_context(|| format!("fetch galaxy into {}", bootstrapper.path()))?;
            println!("{}", bootstrapper.path());
        }
        Commands::Run {
            root,
            port,
            free_port,
            admins,
            app,
            server,
            nested_shed_tools,
            virtualenv,
            database,
            seed_users,
            wait,
        } => {
            let mut props = GalaxyProperties::new().configure_virtualenv(virtualenv.into());
            if let Some(port) = port {
                props = props.port(port);
            }
            if free_port {
                props = props.assign_free_port()?;
            }
            if !admins.is_empty() {
                props = props.admin_users(&admins);
            }
            for (k, v) in app {
                props = props.set_app_property(k, v);
            }
            for (k, v) in server {
                props = props.set_server_property(k, v);
            }
            if nested_shed_tools {
                props = props.configure_nested_shed_tools();
            }
            if let Some(database) = database {
                props = props.prepopulate_sqlite_database(database);
            }
            let config = props.build();

            let data = (!seed_users.is_empty()).then(|| {
                seed_users
                    .into_iter()
                    .fold(GalaxyData::new(), |data, u| data.add_user(SeedUser::new(u)))
            });

            let bootstrapper = open(&root, settings);
            let mut daemon = bootstrapper
                .run(&config, data.as_ref())
                .await
                .with_context(|| format!("run galaxy in {}", bootstrapper.path()))?;
            if wait && !daemon.wait_for_up().await {
                bail!(
                    "galaxy did not come up on {} (logs in {})",
                    daemon.galaxy_url(),
                    bootstrapper.log_dir().display()
                );
            }
            print_status(&mut daemon).await?;
        }
        Commands::Stop { root, wait } => {
            let mut daemon = attach(&root, settings).await?;
            daemon.stop().await.context("stop galaxy")?;
            if wait && !daemon.wait_for_down().await {
                bail!("galaxy is still listening on {}", daemon.galaxy_url());
            }
            print_status(&mut daemon).await?;
        }
        Commands::Status { root } => {
            let mut daemon = attach(&root, settings).await?;
            print_status(&mut daemon).await?;
        }
        Commands::Delete { root } => {
            open(&root, settings).delete_root().await?;
        }
    }

    Ok(())
}

fn open(root: &Path, settings: BootstrapSettings) -> Bootstrapper {
    Bootstrapper::new(DownloadSpec::default().destination(root), settings)
}

async fn attach(root: &Path, settings: BootstrapSettings) -> Result<Daemon> {
    let bootstrapper = open(root, settings);
    let record = read_run_record(&bootstrapper.log_dir())
        .await?
        .with_context(|| format!("no galaxy was started from {}", root.display()))?;
    Ok(Daemon::attach(bootstrapper, record.port))
}

async fn print_status(daemon: &mut Daemon) -> Result<()> {
    let status = daemon.status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
