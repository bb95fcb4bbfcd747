// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Filesystem-backed `ConfigStore` and daemon bootstrap glue for cynagora.
//!
//! Out of scope per the specification (trivial glue): this crate only
//! loads knobs and resolves paths, it does not implement privilege drop
//! or socket binding itself — that lives in `cynagora-server`'s `main`.

pub mod settings;

use cynagora_app_core::config::{ConfigError, ConfigStore};
use directories::ProjectDirs;
use std::fs;
use std::path::PathBuf;

/// Store configs as JSON files under the platform config directory, or
/// under an explicit directory when one is supplied.
pub struct FsConfigStore {
    base: PathBuf,
}

impl FsConfigStore {
    /// Create a store rooted at the user config directory (e.g. `~/.config/cynagora`).
    pub fn new() -> Result<Self, ConfigError> {
        let proj = ProjectDirs::from("org", "cynagora", "cynagora")
            .ok_or_else(|| ConfigError::Other("could not resolve config dir".into()))?;
        Self::at(proj.config_dir().to_path_buf())
    }

    /// Create a store rooted at an explicit directory (used by the daemon,
    /// which resolves its config directory from settings rather than the
    /// user's platform config dir).
    pub fn at(base: PathBuf) -> Result<Self, ConfigError> {
        fs::create_dir_all(&base)?;
        Ok(Self { base })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let filename = format!("{key}.json");
        self.base.join(filename)
    }
}

impl ConfigStore for FsConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        let path = self.path_for(key);
        match fs::read(path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(ConfigError::NotFound),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, data)?;
        Ok(())
    }
}
