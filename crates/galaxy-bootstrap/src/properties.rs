use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use crate::error::{IoContext, Result};
use crate::ini::IniDocument;
use crate::layout::GalaxyLayout;
use crate::port_probe;

pub const DEFAULT_PORT: u16 = 8080;

const APP_SECTION: &str = "app:main";
const SERVER_SECTION: &str = "server:main";

const SHED_TOOL_CONF_TEMPLATE: &str = include_str!("../assets/shed_tool_conf.xml");

fn galaxy_url_for(port: u16) -> String {
    format!("http://localhost:{port}/")
}

/// Whether `run` creates a `.venv` before the setup scripts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigureVirtualenv {
    Yes,
    No,
    /// Only when a `virtualenv` executable is on `PATH`.
    #[default]
    Auto,
}

/// Builder for [`GalaxyConfig`]. Later `set_*` calls for the same key win.
#[derive(Debug, Clone)]
pub struct GalaxyProperties {
    app: BTreeMap<String, String>,
    server: BTreeMap<String, String>,
    port: u16,
    nested_shed_tools: bool,
    virtualenv: ConfigureVirtualenv,
    database: Option<PathBuf>,
}

impl Default for GalaxyProperties {
    fn default() -> Self {
        Self::new()
    }
}

impl GalaxyProperties {
    pub fn new() -> Self {
        Self {
            app: BTreeMap::new(),
            server: BTreeMap::new(),
            port: DEFAULT_PORT,
            nested_shed_tools: false,
            virtualenv: ConfigureVirtualenv::Auto,
            database: None,
        }
    }

    pub fn set_app_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.app.insert(name.into(), value.into());
        self
    }

    pub fn set_server_property(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.server.insert(name.into(), value.into());
        self
    }

    /// Serve on `port` instead of the template's.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self.set_server_property("port", port.to_string())
    }

    pub fn assign_free_port(self) -> Result<Self> {
        let port = port_probe::find_free_port()?;
        Ok(self.port(port))
    }

    pub fn admin_user(self, username: impl Into<String>) -> Self {
        self.admin_users([username.into()])
    }

    pub fn admin_users<I, S>(self, usernames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = usernames
            .into_iter()
            .map(|u| u.as_ref().to_string())
            .collect::<Vec<_>>()
            .join(",");
        tracing::debug!(admin_users = %joined, "setting admin users");
        self.set_app_property("admin_users", joined)
    }

    pub fn configure_nested_shed_tools(mut self) -> Self {
        self.nested_shed_tools = true;
        self
    }

    pub fn configure_virtualenv(mut self, mode: ConfigureVirtualenv) -> Self {
        self.virtualenv = mode;
        self
    }

    /// Installs `database` as the instance's SQLite database. Migration is
    /// switched on since the file may predate the fetched release.
    pub fn prepopulate_sqlite_database(mut self, database: impl Into<PathBuf>) -> Self {
        self.database = Some(database.into());
        self.set_app_property("database_auto_migrate", "true")
    }

    pub fn build(self) -> GalaxyConfig {
        GalaxyConfig {
            galaxy_url: galaxy_url_for(self.port),
            app: self.app,
            server: self.server,
            port: self.port,
            nested_shed_tools: self.nested_shed_tools,
            virtualenv: self.virtualenv,
            database: self.database,
        }
    }
}

/// Frozen overrides for one Galaxy instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalaxyConfig {
    app: BTreeMap<String, String>,
    server: BTreeMap<String, String>,
    port: u16,
    galaxy_url: String,
    nested_shed_tools: bool,
    virtualenv: ConfigureVirtualenv,
    database: Option<PathBuf>,
}

impl Default for GalaxyConfig {
    fn default() -> Self {
        GalaxyProperties::new().build()
    }
}

impl GalaxyConfig {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn galaxy_url(&self) -> &str {
        &self.galaxy_url
    }

    pub fn app_properties(&self) -> &BTreeMap<String, String> {
        &self.app
    }

    pub fn server_properties(&self) -> &BTreeMap<String, String> {
        &self.server
    }

    pub fn database(&self) -> Option<&Path> {
        self.database.as_deref()
    }

    pub fn configures_nested_shed_tools(&self) -> bool {
        self.nested_shed_tools
    }

    /// True when no database was supplied, so `create_db.sh` has to run.
    ///
    /// A `database_connection` pointing at an existing database is not
    /// taken into account.
    pub fn is_create_database_required(&self) -> bool {
        self.database.is_none()
    }

    pub fn should_configure_virtualenv(&self) -> bool {
        match self.virtualenv {
            ConfigureVirtualenv::Yes => true,
            ConfigureVirtualenv::No => false,
            ConfigureVirtualenv::Auto => which::which("virtualenv").is_ok(),
        }
    }

    /// Writes the merged configuration into the Galaxy tree at `root`.
    pub fn materialize(&self, root: &Path) -> Result<GalaxyLayout> {
        let layout = GalaxyLayout::detect(root)?;

        if self.nested_shed_tools {
            let shed_conf = root.join("shed_tool_conf.xml");
            std::fs::write(&shed_conf, SHED_TOOL_CONF_TEMPLATE)
                .io_context(|| format!("write {}", shed_conf.display()))?;
            let shed_tools = root.join("shed_tools");
            std::fs::create_dir_all(&shed_tools)
                .io_context(|| format!("create {}", shed_tools.display()))?;
        }

        let sample = layout.sample_ini(root);
        let text = std::fs::read_to_string(&sample)
            .io_context(|| format!("read {}", sample.display()))?;
        let mut ini = IniDocument::parse(&text);

        let mut app = self.app.clone();
        if self.nested_shed_tools && !app.contains_key("tool_config_file") {
            let tool_conf = layout.config_path_from_root(root, "tool_conf.xml")?;
            let shed_tool_conf = layout.config_path_from_root(root, "shed_tool_conf.xml")?;
            app.insert(
                "tool_config_file".to_string(),
                format!("{tool_conf},{shed_tool_conf}"),
            );
        }
        // Galaxy refuses to start under the tool migration check otherwise.
        app.entry("running_functional_tests".to_string())
            .or_insert_with(|| "true".to_string());

        ini.apply(APP_SECTION, &app);
        ini.apply(SERVER_SECTION, &self.server);

        let target = layout.config_ini(root);
        std::fs::write(&target, ini.render())
            .io_context(|| format!("write {}", target.display()))?;
        tracing::debug!(config = %target.display(), "wrote galaxy configuration");

        if let Some(database) = &self.database {
            let db_dir = root.join("database");
            std::fs::create_dir_all(&db_dir)
                .io_context(|| format!("create {}", db_dir.display()))?;
            let db_path = db_dir.join("universe.sqlite");
            std::fs::copy(database, &db_path).io_context(|| {
                format!("copy {} to {}", database.display(), db_path.display())
            })?;
        }

        Ok(layout)
    }
}
