use std::{collections::BTreeMap, path::Path};

use crate::error::{IoContext, Result};

pub const DEFAULT_PASSWORD: &str = "123456";

const SEED_SCRIPT_PREAMBLE: &str = include_str!("../assets/seed_script.py");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedUser {
    username: String,
    password: String,
    api_key: String,
}

impl SeedUser {
    /// A user with the default password and a fresh random API key.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: DEFAULT_PASSWORD.to_string(),
            api_key: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

/// Users to create in a fresh instance, unique by username.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GalaxyData {
    users: BTreeMap<String, SeedUser>,
}

impl GalaxyData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `user`, replacing any earlier user with the same name.
    pub fn add_user(mut self, user: SeedUser) -> Self {
        self.users.insert(user.username.clone(), user);
        self
    }

    pub fn users(&self) -> impl Iterator<Item = &SeedUser> {
        self.users.values()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn write_seed_script(&self, target: &Path) -> Result<()> {
        std::fs::write(target, render_seed_script(self.users()))
            .io_context(|| format!("write {}", target.display()))
    }
}

/// Single-quoted Python string literal. Control characters are written as
/// escapes so every statement stays on one line.
fn py_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str(r"\\"),
            '\'' => out.push_str(r"\'"),
            '\n' => out.push_str(r"\n"),
            '\r' => out.push_str(r"\r"),
            '\t' => out.push_str(r"\t"),
            c if c.is_control() => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

pub fn render_seed_script<'a>(users: impl IntoIterator<Item = &'a SeedUser>) -> String {
    let mut script = String::from(SEED_SCRIPT_PREAMBLE);
    if !script.ends_with('\n') {
        script.push('\n');
    }
    for user in users {
        script.push_str(&format!(
            "add_user({}, {}, {})\n",
            py_literal(&user.username),
            py_literal(&user.password),
            py_literal(&user.api_key)
        ));
    }
    script
}
