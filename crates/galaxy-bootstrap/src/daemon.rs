use std::path::Path;

use galaxy_process::{DaemonState, DaemonStatus};
use tokio::process::Child;

use crate::bootstrapper::Bootstrapper;
use crate::command::CommandLine;
use crate::error::Result;
use crate::port_probe;
use crate::settings::PollSchedule;

/// Handle to a Galaxy instance started by [`Bootstrapper::run`].
///
/// State is never pushed by Galaxy. Everything here is inferred from whether
/// the instance port accepts connections.
#[derive(Debug)]
pub struct Daemon {
    launcher: Option<Child>,
    port: u16,
    galaxy_url: String,
    bootstrapper: Bootstrapper,
    poll: PollSchedule,
    requested: DaemonState,
}

impl Daemon {
    pub(crate) fn launched(bootstrapper: Bootstrapper, port: u16, launcher: Child) -> Self {
        let mut daemon = Self::attach(bootstrapper, port);
        daemon.launcher = Some(launcher);
        daemon.requested = DaemonState::Starting;
        daemon
    }

    /// Takes control of an instance launched earlier, e.g. by another
    /// process. Its state is whatever the port says.
    pub fn attach(bootstrapper: Bootstrapper, port: u16) -> Self {
        Self {
            launcher: None,
            port,
            galaxy_url: format!("http://localhost:{port}/"),
            poll: bootstrapper.settings().poll,
            bootstrapper,
            requested: DaemonState::Down,
        }
    }

    pub fn with_poll_schedule(mut self, poll: PollSchedule) -> Self {
        self.poll = poll;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn galaxy_url(&self) -> &str {
        &self.galaxy_url
    }

    pub fn root(&self) -> &Path {
        self.bootstrapper.root()
    }

    /// The bootstrapper that fetched this instance's tree.
    pub fn bootstrapper(&self) -> &Bootstrapper {
        &self.bootstrapper
    }

    /// PID of the `run.sh --daemon` launcher, not of Galaxy itself.
    pub fn launcher_pid(&self) -> Option<u32> {
        self.launcher.as_ref().and_then(Child::id)
    }

    pub async fn is_up(&self) -> bool {
        !port_probe::is_available_async(self.port).await
    }

    /// Polls until something listens on the port. `false` once the whole
    /// [`PollSchedule::budget`] has passed without a listener.
    pub async fn wait_for_up(&mut self) -> bool {
        let up = self.wait(true).await;
        if up {
            self.requested = DaemonState::Up;
        }
        up
    }

    /// Polls until nothing listens on the port. `false` on timeout.
    pub async fn wait_for_down(&mut self) -> bool {
        let down = self.wait(false).await;
        if down {
            self.requested = DaemonState::Down;
        }
        down
    }

    async fn wait(&self, up: bool) -> bool {
        let target = if up { "up" } else { "down" };
        for attempt in 1..=self.poll.max_polls {
            if self.is_up().await == up {
                tracing::debug!(url = %self.galaxy_url, attempt, "galaxy is {target}");
                return true;
            }
            tracing::trace!(url = %self.galaxy_url, attempt, "galaxy is not yet {target}");
            tokio::time::sleep(self.poll.interval).await;
        }
        tracing::warn!(
            url = %self.galaxy_url,
            polls = self.poll.max_polls,
            "timed out waiting for galaxy to be {target}"
        );
        false
    }

    /// Runs `run.sh --stop-daemon` to completion. Does not wait for the
    /// port to close; use [`Daemon::wait_for_down`] for that.
    pub async fn stop(&mut self) -> Result<()> {
        tracing::info!(url = %self.galaxy_url, "stopping galaxy");
        self.requested = DaemonState::Stopping;
        let run_sh = self.root().join("run.sh");
        self.bootstrapper
            .runner()
            .run(&CommandLine::new("sh").path_arg(&run_sh).arg("--stop-daemon"))
            .await?;
        if let Some(launcher) = self.launcher.as_mut() {
            // Reap the launcher if it has already exited.
            let _ = launcher.try_wait();
        }
        Ok(())
    }

    pub async fn state(&self) -> DaemonState {
        DaemonState::observe(self.requested, self.is_up().await)
    }

    pub async fn status(&mut self) -> DaemonStatus {
        let state = self.state().await;
        let message = match self.launcher.as_mut().map(Child::try_wait) {
            Some(Ok(Some(exit))) if !exit.success() => {
                Some(format!("launcher exited with {exit}"))
            }
            Some(Err(e)) => Some(format!("launcher status unknown: {e}")),
            _ => None,
        };
        DaemonStatus {
            state,
            port: self.port,
            url: self.galaxy_url.clone(),
            root: self.root().display().to_string(),
            pid: self.launcher_pid(),
            message,
        }
    }
}
