use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    process::Stdio,
};

use tokio::{io::AsyncReadExt, process::Child, process::Command};

use crate::error::{Error, Result};

const TAIL_BYTES: usize = 64 * 1024;

/// A fully described external command. Arguments are passed verbatim; no
/// shell is involved unless the program itself is a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    cwd: Option<PathBuf>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    /// `bash -c "<script>"`. The caller owns quoting inside `script`.
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("bash").arg("-c").arg(script)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for a in &self.args {
            write!(f, " {a}")?;
        }
        Ok(())
    }
}

/// Single-quotes `s` for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | ':' | '='))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

struct TailBuffer {
    buf: Vec<u8>,
    cap: usize,
}

impl TailBuffer {
    fn new(cap: usize) -> Self {
        Self {
            buf: Vec::new(),
            cap: cap.max(1),
        }
    }

    fn push(&mut self, data: &[u8]) {
        if data.len() >= self.cap {
            self.buf.clear();
            self.buf.extend_from_slice(&data[data.len() - self.cap..]);
            return;
        }
        let overflow = (self.buf.len() + data.len()).saturating_sub(self.cap);
        if overflow > 0 {
            self.buf.drain(..overflow);
        }
        self.buf.extend_from_slice(data);
    }

    fn into_string(self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }
}

async fn read_tail<R: tokio::io::AsyncRead + Unpin>(mut reader: R, limit: usize) -> String {
    let mut tail = TailBuffer::new(limit);
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => tail.push(&buf[..n]),
        }
    }
    tail.into_string()
}

async fn read_all<R: tokio::io::AsyncRead + Unpin>(mut reader: R) -> String {
    let mut out = Vec::new();
    let _ = reader.read_to_end(&mut out).await;
    String::from_utf8_lossy(&out).into_owned()
}

/// Runs external tools (git, sh, python, ...) on behalf of the bootstrapper.
///
/// Awaited calls are fatal on a nonzero exit; there is no partial-success
/// reporting and no retry.
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    base_env: BTreeMap<String, String>,
}

impl CommandRunner {
    pub fn new(base_env: BTreeMap<String, String>) -> Self {
        Self { base_env }
    }

    fn build(&self, cmd: &CommandLine) -> Command {
        let mut c = Command::new(&cmd.program);
        c.args(&cmd.args)
            .envs(&self.base_env)
            .envs(&cmd.env)
            .stdin(Stdio::null());
        if let Some(dir) = &cmd.cwd {
            c.current_dir(dir);
        }
        c
    }

    fn spawn(&self, cmd: &CommandLine, mut c: Command) -> Result<Child> {
        tracing::debug!(command = %cmd, "executing command");
        c.spawn().map_err(|source| Error::CommandSpawn {
            command: cmd.to_string(),
            source,
        })
    }

    /// Runs `cmd` to completion.
    pub async fn run(&self, cmd: &CommandLine) -> Result<()> {
        let mut c = self.build(cmd);
        c.stdout(Stdio::piped()).stderr(Stdio::piped());
        let mut child = self.spawn(cmd, c)?;

        let stdout_task = child
            .stdout
            .take()
            .map(|s| tokio::spawn(read_tail(s, TAIL_BYTES)));
        let stderr_task = child
            .stderr
            .take()
            .map(|s| tokio::spawn(read_tail(s, TAIL_BYTES)));

        let status = child.wait().await.map_err(|source| Error::CommandWait {
            command: cmd.to_string(),
            source,
        })?;

        let stdout_tail = match stdout_task {
            Some(h) => h.await.unwrap_or_default(),
            None => String::new(),
        };
        let stderr_tail = match stderr_task {
            Some(h) => h.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            tracing::debug!(command = %cmd, stdout = %stdout_tail, stderr = %stderr_tail, "command failed");
            return Err(Error::CommandFailed {
                command: cmd.to_string(),
                exit_code: status.code(),
                stderr_tail,
            });
        }
        Ok(())
    }

    /// Runs `cmd` to completion and returns its trimmed stdout.
    pub async fn output(&self, cmd: &CommandLine) -> Result<String> {
        let mut c = self.build(cmd);
        c.stdout(Stdio::piped()).stderr(Stdio::piped());
        let mut child = self.spawn(cmd, c)?;

        let stdout_task = child.stdout.take().map(|s| tokio::spawn(read_all(s)));
        let stderr_task = child
            .stderr
            .take()
            .map(|s| tokio::spawn(read_tail(s, TAIL_BYTES)));

        let status = child.wait().await.map_err(|source| Error::CommandWait {
            command: cmd.to_string(),
            source,
        })?;
        let stdout = match stdout_task {
            Some(h) => h.await.unwrap_or_default(),
            None => String::new(),
        };
        let stderr_tail = match stderr_task {
            Some(h) => h.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            return Err(Error::CommandFailed {
                command: cmd.to_string(),
                exit_code: status.code(),
                stderr_tail,
            });
        }
        Ok(stdout.trim().to_string())
    }

    /// Spawns `cmd` without waiting for it. Output is discarded.
    pub fn start(&self, cmd: &CommandLine) -> Result<Child> {
        let mut c = self.build(cmd);
        c.stdout(Stdio::null()).stderr(Stdio::null());
        self.spawn(cmd, c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_buffer_keeps_last_bytes() {
        let mut t = TailBuffer::new(5);
        t.push(b"hello");
        t.push(b"world");
        t.push(b"!!!");
        assert_eq!(t.into_string(), "ld!!!");

        let mut t = TailBuffer::new(5);
        t.push(b"1234567");
        assert_eq!(t.into_string(), "34567");
    }

    #[test]
    fn display_joins_program_and_args() {
        let cmd = CommandLine::new("git").args(["clone", "-b", "dev"]).arg("x");
        assert_eq!(cmd.to_string(), "git clone -b dev x");
        assert_eq!(cmd.program(), "git");
        assert_eq!(cmd.get_args().len(), 4);
    }

    #[test]
    fn shell_quote_leaves_plain_paths_alone() {
        assert_eq!(shell_quote("/tmp/gx-1/run.sh"), "/tmp/gx-1/run.sh");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[tokio::test]
    async fn run_succeeds_on_zero_exit() {
        let runner = CommandRunner::default();
        runner.run(&CommandLine::shell("exit 0")).await.unwrap();
    }

    #[tokio::test]
    async fn run_fails_with_exit_code_and_stderr() {
        let runner = CommandRunner::default();
        let err = runner
            .run(&CommandLine::shell("echo nope >&2; exit 3"))
            .await
            .unwrap_err();
        match err {
            Error::CommandFailed {
                exit_code,
                stderr_tail,
                command,
            } => {
                assert_eq!(exit_code, Some(3));
                assert!(stderr_tail.contains("nope"));
                assert!(command.starts_with("bash -c"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let runner = CommandRunner::default();
        let err = runner
            .run(&CommandLine::new("definitely-not-a-real-binary-gx"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommandSpawn { .. }));
    }

    #[tokio::test]
    async fn env_overlays_base_env() {
        let mut base = BTreeMap::new();
        base.insert("GX_A".to_string(), "base".to_string());
        base.insert("GX_B".to_string(), "base".to_string());
        let runner = CommandRunner::new(base);
        let out = runner
            .output(&CommandLine::shell("echo \"$GX_A $GX_B\"").env("GX_B", "cmd"))
            .await
            .unwrap();
        assert_eq!(out, "base cmd");
    }

    #[tokio::test]
    async fn output_respects_current_dir() {
        let dir = tempfile::tempdir().unwrap();
        let runner = CommandRunner::default();
        let out = runner
            .output(&CommandLine::new("pwd").current_dir(dir.path()))
            .await
            .unwrap();
        let expected = std::fs::canonicalize(dir.path()).unwrap();
        assert_eq!(std::fs::canonicalize(out).unwrap(), expected);
    }
}
