use std::path::PathBuf;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("command `{command}` failed ({})", describe_exit(.exit_code))]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
        stderr_tail: String,
    },

    #[error("failed to spawn `{command}`")]
    CommandSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for `{command}`")]
    CommandWait {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not find a free TCP port to start Galaxy on")]
    NoFreePort(#[source] std::io::Error),

    #[error("invalid workspace {}: {reason}", .path.display())]
    InvalidWorkspace { path: PathBuf, reason: String },

    #[error("refusing to fetch into non-empty directory {}", .0.display())]
    WorkspaceNotEmpty(PathBuf),

    #[error("invalid archive {}: {reason}", .path.display())]
    InvalidArchive { path: PathBuf, reason: String },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("download {url}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("read zip archive")]
    Zip(#[from] zip::result::ZipError),

    #[error("serialize {what}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit {code}"),
        None => "terminated by signal".to_string(),
    }
}

/// Attaches a human-readable context to `std::io` failures.
pub(crate) trait IoContext<T> {
    fn io_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|source| Error::Io {
            context: f().into(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_failed_message_names_command_and_code() {
        let err = Error::CommandFailed {
            command: "git clone a b".to_string(),
            exit_code: Some(128),
            stderr_tail: String::new(),
        };
        assert_eq!(err.to_string(), "command `git clone a b` failed (exit 128)");

        let err = Error::CommandFailed {
            command: "sh run.sh".to_string(),
            exit_code: None,
            stderr_tail: String::new(),
        };
        assert!(err.to_string().contains("terminated by signal"));
    }

    #[test]
    fn io_context_wraps_source() {
        let res: std::io::Result<()> = Err(std::io::Error::other("boom"));
        let err = res.io_context(|| "create log dir").unwrap_err();
        assert_eq!(err.to_string(), "create log dir");
        assert!(std::error::Error::source(&err).is_some());
    }
}
