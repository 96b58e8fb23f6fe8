/// Lifecycle of a supervised Galaxy instance.
///
/// NOTE: Transitions are inferred from the instance port, not pushed by the
/// process. `Up` only means "something accepts connections on the port".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonState {
    Down,
    Starting,
    Up,
    Stopping,
}

impl DaemonState {
    /// Combines the last requested transition with the observed port state.
    pub fn observe(requested: DaemonState, listening: bool) -> DaemonState {
        match (requested, listening) {
            (_, true) if requested != DaemonState::Stopping => DaemonState::Up,
            (DaemonState::Stopping, true) => DaemonState::Stopping,
            (DaemonState::Starting, false) => DaemonState::Starting,
            _ => DaemonState::Down,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DaemonState::Down => "down",
            DaemonState::Starting => "starting",
            DaemonState::Up => "up",
            DaemonState::Stopping => "stopping",
        }
    }
}

impl std::fmt::Display for DaemonState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DaemonStatus {
    pub state: DaemonState,
    pub port: u16,
    pub url: String,
    pub root: String,
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listening_port_means_up_unless_stopping() {
        assert_eq!(DaemonState::observe(DaemonState::Starting, true), DaemonState::Up);
        assert_eq!(DaemonState::observe(DaemonState::Down, true), DaemonState::Up);
        assert_eq!(
            DaemonState::observe(DaemonState::Stopping, true),
            DaemonState::Stopping
        );
    }

    #[test]
    fn closed_port_is_starting_only_while_launching() {
        assert_eq!(
            DaemonState::observe(DaemonState::Starting, false),
            DaemonState::Starting
        );
        assert_eq!(DaemonState::observe(DaemonState::Up, false), DaemonState::Down);
        assert_eq!(DaemonState::observe(DaemonState::Stopping, false), DaemonState::Down);
    }

    #[test]
    fn status_serializes_state_in_snake_case() {
        let status = DaemonStatus {
            state: DaemonState::Starting,
            port: 8080,
            url: "http://localhost:8080/".to_string(),
            root: "/tmp/galaxy".to_string(),
            pid: None,
            message: None,
        };
        let v = serde_json::to_value(&status).unwrap();
        assert_eq!(v["state"], "starting");
        assert!(v.get("message").is_none());
    }
}
