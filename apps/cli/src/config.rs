//! CLI configuration.
//!
//! Defaults come from `~/.config/coldpush/config.json` (or `--config PATH`);
//! command line flags override them.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use coldpush_transfer::DEFAULT_CHUNK_SIZE;

/// Region used when neither the config file nor a flag names one.
pub const DEFAULT_REGION: &str = "eu-central-1";

// ---------------------------------------------------------------------------
// On-disk format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    chunk_size: Option<usize>,
    #[serde(default)]
    vault_root: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliConfig {
    pub region: String,
    pub chunk_size: usize,
    /// Root directory of the directory vault backend.
    pub vault_root: PathBuf,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            vault_root: default_vault_root(),
        }
    }
}

impl CliConfig {
    /// Loads configuration.
    ///
    /// An explicit path must exist and parse. The default file is optional,
    /// and a broken default file only produces a warning.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = CliConfig::default();

        if let Some(path) = explicit {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            let file: ConfigFile = serde_json::from_str(&content)
                .with_context(|| format!("parsing config file {}", path.display()))?;
            config.apply(file);
            return Ok(config);
        }

        let path = default_config_path();
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<ConfigFile>(&content) {
                Ok(file) => config.apply(file),
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config, using defaults"
                ),
            }
        }

        Ok(config)
    }

    fn apply(&mut self, file: ConfigFile) {
        if let Some(region) = file.region.filter(|r| !r.is_empty()) {
            self.region = region;
        }
        if let Some(chunk_size) = file.chunk_size {
            self.chunk_size = chunk_size;
        }
        if let Some(root) = file.vault_root {
            self.vault_root = root;
        }
    }
}

/// `~/.config/coldpush/config.json`
pub fn default_config_path() -> PathBuf {
    home_dir().join(".config").join("coldpush").join("config.json")
}

fn default_vault_root() -> PathBuf {
    home_dir()
        .join(".local")
        .join("share")
        .join("coldpush")
        .join("vaults")
}

fn home_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"region":"us-west-2","chunkSize":1048576,"vaultRoot":"/srv/vaults"}"#,
        )
        .unwrap();

        let config = CliConfig::load(Some(&path)).unwrap();
        assert_eq!(config.region, "us-west-2");
        assert_eq!(config.chunk_size, 1024 * 1024);
        assert_eq!(config.vault_root, PathBuf::from("/srv/vaults"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"region":"ap-south-1"}"#).unwrap();

        let config = CliConfig::load(Some(&path)).unwrap();
        assert_eq!(config.region, "ap-south-1");
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CliConfig::load(Some(&dir.path().join("absent.json"))).is_err());
    }

    #[test]
    fn malformed_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(CliConfig::load(Some(&path)).is_err());
    }

    #[test]
    fn defaults() {
        let config = CliConfig::default();
        assert_eq!(config.region, DEFAULT_REGION);
        assert_eq!(config.chunk_size, 16 * 1024 * 1024);
    }
}
