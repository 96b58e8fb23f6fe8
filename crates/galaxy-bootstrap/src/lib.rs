//! Fetches a Galaxy tree, configures it and runs it as a background test
//! fixture.

pub mod bootstrapper;
pub mod cache;
pub mod command;
pub mod daemon;
pub mod error;
pub mod fetch;
pub mod ini;
pub mod layout;
pub mod port_probe;
pub mod properties;
pub mod run_record;
pub mod seed;
pub mod settings;

#[cfg(test)]
pub(crate) mod testutil;

pub use bootstrapper::Bootstrapper;
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use fetch::{DownloadSpec, FetchStrategy};
pub use galaxy_process::{DaemonState, DaemonStatus};
pub use properties::{ConfigureVirtualenv, GalaxyConfig, GalaxyProperties};
pub use seed::{GalaxyData, SeedUser};
pub use settings::{BootstrapSettings, PollSchedule};
