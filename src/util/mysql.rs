//! Connection settings for the replication client.
//!
//! Values come from a MySQL-style option file (`.my.cnf` format) and are
//! overridden by command-line flags. Only the `[client]` and
//! `[drizzlebinlog]` groups are read; later groups override earlier ones.

use std::path::{Path, PathBuf};

/// Option file groups read for the dump tool, in order.
pub const DEFAULT_GROUPS: [&str; 2] = ["client", "drizzlebinlog"];

/// Server connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            host: "localhost".to_string(),
            port: 3306,
            user: String::new(),
            password: None,
        }
    }
}

impl ConnectionConfig {
    /// Apply `key = value` pairs found in `content` under any of `groups`.
    pub fn apply_option_text(&mut self, content: &str, groups: &[&str]) {
        let mut in_group = false;
        for line in content.lines() {
            let line = line.trim();
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                let name = name.trim();
                in_group = groups.iter().any(|g| g.eq_ignore_ascii_case(name));
                continue;
            }
            if !in_group || line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            let (key, value) = match line.split_once('=') {
                Some((k, v)) => (k.trim(), v.trim().trim_matches('"').trim_matches('\'')),
                None => (line, ""),
            };
            match key.to_lowercase().replace('_', "-").as_str() {
                "host" => self.host = value.to_string(),
                "port" => {
                    if let Ok(p) = value.parse() {
                        self.port = p;
                    }
                }
                "user" => self.user = value.to_string(),
                "password" => self.password = Some(value.to_string()),
                _ => {}
            }
        }
    }
}

/// Read `path` into a config built on the defaults. `None` if the file
/// cannot be read.
pub fn parse_defaults_file(path: &Path) -> Option<ConnectionConfig> {
    let content = std::fs::read_to_string(path).ok()?;
    let mut config = ConnectionConfig::default();
    config.apply_option_text(&content, &DEFAULT_GROUPS);
    Some(config)
}

/// Find the default option file: `$HOME/.my.cnf`, then `/etc/my.cnf`.
pub fn find_defaults_file() -> Option<PathBuf> {
    if let Some(home) = std::env::var_os("HOME") {
        let path = Path::new(&home).join(".my.cnf");
        if path.exists() {
            return Some(path);
        }
    }
    let etc = Path::new("/etc/my.cnf");
    if etc.exists() {
        return Some(etc.to_path_buf());
    }
    None
}
