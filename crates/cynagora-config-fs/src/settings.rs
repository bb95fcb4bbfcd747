// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Daemon bootstrap settings: defaults, the `KEY VALUE # comment` config
//! file format, and socket path resolution (env var overrides).

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_CONFIG_FILE: &str = "/etc/cynagora.conf";
const DEFAULT_INIT_DIR: &str = "/etc/cynagora.d";
const DEFAULT_DB_DIR: &str = "/var/lib/cynagora";
const DEFAULT_SOCKET_DIR: &str = "/var/run/cynagora";

/// Knobs read from the daemon's settings file, mirroring the upstream
/// `settings_t` layout: directories to initialize/store rules in, the
/// socket directory, and the user/group to drop privileges to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonSettings {
    /// Directory of `.drop`/initial rule files applied at first startup.
    pub init: String,
    /// Directory holding the rule database files.
    pub dbdir: String,
    /// Directory holding the check/admin/agent sockets.
    pub socketdir: String,
    /// User to switch to after binding privileged resources, if any.
    pub user: Option<String>,
    /// Group to switch to after binding privileged resources, if any.
    pub group: Option<String>,
    /// Re-apply `init` rules even if the database already exists.
    pub force_init: bool,
    /// Create `dbdir` if it does not exist.
    pub make_db_dir: bool,
    /// Create `socketdir` if it does not exist.
    pub make_socket_dir: bool,
    /// chown `dbdir` to the daemon user/group after creating it.
    pub own_db_dir: bool,
    /// chown `socketdir` to the daemon user/group after creating it.
    pub own_socket_dir: bool,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            init: DEFAULT_INIT_DIR.to_string(),
            dbdir: DEFAULT_DB_DIR.to_string(),
            socketdir: DEFAULT_SOCKET_DIR.to_string(),
            user: None,
            group: None,
            force_init: false,
            make_db_dir: false,
            make_socket_dir: false,
            own_db_dir: false,
            own_socket_dir: false,
        }
    }
}

/// Error while reading or parsing a settings file.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// I/O failure reading the file.
    #[error("io error reading {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A line named a key that is not recognized.
    #[error("invalid key {key:?} at line {line}")]
    InvalidKey {
        /// Offending key text.
        key: String,
        /// 1-based line number.
        line: usize,
    },
    /// A line had a key with no value.
    #[error("no value for key {key:?} at line {line}")]
    MissingValue {
        /// Offending key text.
        key: String,
        /// 1-based line number.
        line: usize,
    },
    /// A boolean key's value was not `yes` or `no`.
    #[error("bad boolean {value:?} for key {key:?} at line {line} (expected yes or no)")]
    BadBoolean {
        /// Offending key text.
        key: String,
        /// Offending value text.
        value: String,
        /// 1-based line number.
        line: usize,
    },
}

/// Load settings starting from defaults, optionally overridden by the
/// config file at `path`. When `path` is `None`, falls back to
/// [`DEFAULT_CONFIG_FILE`] and silently skips loading if it is absent
/// (matching the reference daemon's "use default file if existing"
/// behavior).
pub fn load_settings(path: Option<&Path>) -> Result<DaemonSettings, SettingsError> {
    let mut settings = DaemonSettings::default();
    let resolved = match path {
        Some(p) => Some(p.to_path_buf()),
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_FILE);
            if default_path.exists() {
                Some(default_path.to_path_buf())
            } else {
                None
            }
        }
    };
    let Some(resolved) = resolved else {
        return Ok(settings);
    };
    let text = fs::read_to_string(&resolved).map_err(|source| SettingsError::Io {
        path: resolved.clone(),
        source,
    })?;
    apply_settings_text(&mut settings, &text)?;
    Ok(settings)
}

fn apply_settings_text(settings: &mut DaemonSettings, text: &str) -> Result<(), SettingsError> {
    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim_start_matches([' ', '\t']);
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.splitn(2, [' ', '\t']);
        let key = parts.next().unwrap_or("").trim();
        let rest = parts.next().unwrap_or("").trim_start_matches([' ', '\t']);
        let value_end = rest.find(['#']).unwrap_or(rest.len());
        let value = rest[..value_end].trim_end();
        if value.is_empty() {
            return Err(SettingsError::MissingValue {
                key: key.to_string(),
                line: line_no,
            });
        }
        set_field(settings, key, value, line_no)?;
    }
    Ok(())
}

fn set_field(
    settings: &mut DaemonSettings,
    key: &str,
    value: &str,
    line: usize,
) -> Result<(), SettingsError> {
    match key {
        "init" => settings.init = value.to_string(),
        "dbdir" => settings.dbdir = value.to_string(),
        "socketdir" => settings.socketdir = value.to_string(),
        "user" => settings.user = Some(value.to_string()),
        "group" => settings.group = Some(value.to_string()),
        "force-init" => settings.force_init = parse_bool(key, value, line)?,
        "make-db-dir" => settings.make_db_dir = parse_bool(key, value, line)?,
        "make-socket-dir" => settings.make_socket_dir = parse_bool(key, value, line)?,
        "own-db-dir" => settings.own_db_dir = parse_bool(key, value, line)?,
        "own-socket-dir" => settings.own_socket_dir = parse_bool(key, value, line)?,
        _ => {
            return Err(SettingsError::InvalidKey {
                key: key.to_string(),
                line,
            })
        }
    }
    Ok(())
}

fn parse_bool(key: &str, value: &str, line: usize) -> Result<bool, SettingsError> {
    match value {
        "yes" => Ok(true),
        "no" => Ok(false),
        _ => Err(SettingsError::BadBoolean {
            key: key.to_string(),
            value: value.to_string(),
            line,
        }),
    }
}

/// The three socket kinds the daemon listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    /// Answers `check`/`test` queries from unprivileged clients.
    Check,
    /// Accepts rule set/get/commit/cancel from administrators.
    Admin,
    /// Accepts agent registration and reply traffic.
    Agent,
}

impl SocketKind {
    fn env_var(self) -> &'static str {
        match self {
            SocketKind::Check => "CYNAGORA_SOCKET_CHECK",
            SocketKind::Admin => "CYNAGORA_SOCKET_ADMIN",
            SocketKind::Agent => "CYNAGORA_SOCKET_AGENT",
        }
    }

    fn default_name(self) -> &'static str {
        match self {
            SocketKind::Check => "check",
            SocketKind::Admin => "admin",
            SocketKind::Agent => "agent",
        }
    }
}

/// Resolve the socket path for `kind`: an env var override if set,
/// otherwise `{socketdir}/{kind}`.
pub fn resolve_socket_path(settings: &DaemonSettings, kind: SocketKind) -> PathBuf {
    if let Ok(over) = std::env::var(kind.env_var()) {
        if !over.is_empty() {
            return PathBuf::from(over);
        }
    }
    Path::new(&settings.socketdir).join(kind.default_name())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_upstream_paths() {
        let settings = DaemonSettings::default();
        assert_eq!(settings.init, DEFAULT_INIT_DIR);
        assert_eq!(settings.dbdir, DEFAULT_DB_DIR);
        assert_eq!(settings.socketdir, DEFAULT_SOCKET_DIR);
        assert!(!settings.force_init);
    }

    #[test]
    fn parses_keys_and_comments() {
        let mut settings = DaemonSettings::default();
        let text = "\
# comment line
dbdir /srv/cynagora   # trailing comment
force-init yes
user cynagora
";
        apply_settings_text(&mut settings, text).unwrap();
        assert_eq!(settings.dbdir, "/srv/cynagora");
        assert!(settings.force_init);
        assert_eq!(settings.user.as_deref(), Some("cynagora"));
    }

    #[test]
    fn rejects_unknown_key() {
        let mut settings = DaemonSettings::default();
        let err = apply_settings_text(&mut settings, "bogus value\n").unwrap_err();
        assert!(matches!(err, SettingsError::InvalidKey { .. }));
    }

    #[test]
    fn rejects_bad_boolean() {
        let mut settings = DaemonSettings::default();
        let err = apply_settings_text(&mut settings, "force-init maybe\n").unwrap_err();
        assert!(matches!(err, SettingsError::BadBoolean { .. }));
    }

    #[test]
    fn env_override_wins_over_socketdir() {
        let settings = DaemonSettings::default();
        std::env::set_var("CYNAGORA_SOCKET_ADMIN", "/tmp/custom-admin");
        let path = resolve_socket_path(&settings, SocketKind::Admin);
        std::env::remove_var("CYNAGORA_SOCKET_ADMIN");
        assert_eq!(path, PathBuf::from("/tmp/custom-admin"));
    }

    #[test]
    fn default_socket_path_is_under_socketdir() {
        let settings = DaemonSettings::default();
        std::env::remove_var("CYNAGORA_SOCKET_CHECK");
        let path = resolve_socket_path(&settings, SocketKind::Check);
        assert_eq!(path, Path::new(DEFAULT_SOCKET_DIR).join("check"));
    }
}
