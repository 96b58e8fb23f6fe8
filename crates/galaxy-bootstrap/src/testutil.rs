use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
};

pub(crate) fn git_available() -> bool {
    which::which("git").is_ok()
}

pub(crate) fn git(repo: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .arg("-C")
        .arg(repo)
        .args(["-c", "user.name=gx", "-c", "user.email=gx@example.org"])
        .args(["-c", "init.defaultBranch=main", "-c", "commit.gpgsign=false"])
        .args(args)
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

pub(crate) fn commit(repo: &Path, message: &str) -> String {
    git(repo, &["commit", "--allow-empty", "-q", "-m", message]);
    rev_parse(repo, "HEAD")
}

pub(crate) fn rev_parse(repo: &Path, rev: &str) -> String {
    git(repo, &["rev-parse", rev])
}

/// Creates a repository on branch `main` with one commit.
pub(crate) fn init_origin(path: &Path) -> PathBuf {
    fs::create_dir_all(path).unwrap();
    git(path, &["init", "-q"]);
    git(path, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    fs::write(path.join("README"), "galaxy\n").unwrap();
    git(path, &["add", "README"]);
    commit(path, "initial");
    path.to_path_buf()
}

pub(crate) const SAMPLE_INI: &str = "\
# Galaxy sample configuration
[server:main]
use = egg:Paste#http
port = 8080
host = 127.0.0.1

[app:main]
paste.app_factory = galaxy.web.buildapp:app_factory
# database_connection = sqlite:///./database/universe.sqlite
tool_config_file = config/tool_conf.xml
";

/// Writes a minimal Galaxy tree with the 2014.10 layout. Every control script
/// appends its name to `calls.log` so tests can see what ran.
pub(crate) fn fake_galaxy(root: &Path) {
    let config = root.join("config");
    fs::create_dir_all(&config).unwrap();
    fs::create_dir_all(root.join("scripts")).unwrap();
    fs::write(config.join("galaxy.ini.sample"), SAMPLE_INI).unwrap();
    fs::write(config.join("tool_conf.xml.sample"), "<toolbox/>\n").unwrap();
    fs::write(config.join("shed_tool_conf.xml.sample"), "<toolbox/>\n").unwrap();
    let log = root.join("calls.log");
    for script in ["scripts/common_startup.sh", "create_db.sh", "run.sh"] {
        fs::write(
            root.join(script),
            format!("#!/bin/sh\necho \"{script} $*\" >> '{}'\n", log.display()),
        )
        .unwrap();
    }
}

pub(crate) fn calls(root: &Path) -> String {
    fs::read_to_string(root.join("calls.log")).unwrap_or_default()
}
