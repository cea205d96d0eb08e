//! CLI configuration.

use kiln_base::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// CLI configuration loaded from file and environment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CliConfig {
    /// Path to the sanitizer runtime shared library.
    pub asan_runtime: Option<PathBuf>,
    /// Shared libraries to preload for every run.
    #[serde(default)]
    pub preload: Vec<PathBuf>,
}

impl CliConfig {
    /// Loads configuration: `$KILN_CONFIG` or `~/.kiln/config.toml` if
    /// present, then environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match config_path() {
            Some(path) if path.exists() => Self::load_from_path(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Loads configuration from a TOML file.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Applies environment overrides through the given lookup.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("KILN_ASAN_RUNTIME") {
            self.asan_runtime = Some(PathBuf::from(path));
        }
        if let Some(paths) = lookup("KILN_PRELOAD") {
            self.preload.extend(std::env::split_paths(&paths));
        }
    }
}

fn config_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os("KILN_CONFIG") {
        return Some(PathBuf::from(path));
    }
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".kiln").join("config.toml"))
}
