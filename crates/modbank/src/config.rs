use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use modbank_db::CachePolicy;

use crate::error::ConfigError;

/// Environment variable holding extra plugin roots.
pub const PLUGIN_PATH_ENV: &str = "MODBANK_PLUGIN_PATH";

pub const DEFAULT_MAX_DEPTH: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BankConfig {
    /// Directories scanned for plugin files, in order.
    pub plugin_dirs: Vec<PathBuf>,
    /// How many directory levels below a root are searched.
    pub max_depth: usize,
    pub cache_policy: CachePolicy,
    /// Variable listing extra roots, separated like `PATH`. `None` disables it.
    pub env_var: Option<String>,
}

impl Default for BankConfig {
    fn default() -> Self {
        let mut plugin_dirs = vec![PathBuf::from("plugins")];
        if let Some(data) = dirs::data_dir() {
            plugin_dirs.push(data.join("modbank").join("plugins"));
        }
        Self {
            plugin_dirs,
            max_depth: DEFAULT_MAX_DEPTH,
            cache_policy: CachePolicy::default(),
            env_var: Some(PLUGIN_PATH_ENV.to_string()),
        }
    }
}

impl BankConfig {
    /// Configuration with the given roots and nothing else.
    pub fn with_dirs(dirs: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            plugin_dirs: dirs.into_iter().map(Into::into).collect(),
            env_var: None,
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Configured directories followed by those from the environment,
    /// without duplicates.
    pub fn search_roots(&self) -> Vec<PathBuf> {
        let from_env = self
            .env_var
            .as_deref()
            .and_then(env::var_os)
            .map(|value| env::split_paths(&value).collect::<Vec<_>>())
            .unwrap_or_default();

        let mut roots: Vec<PathBuf> = Vec::new();
        for root in self.plugin_dirs.iter().cloned().chain(from_env) {
            if root.as_os_str().is_empty() || roots.contains(&root) {
                continue;
            }
            roots.push(root);
        }
        roots
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bank.json");
        fs::write(&path, r#"{ "plugin_dirs": ["/opt/mods"], "cache_policy": "reset-cache" }"#)
            .unwrap();
        let config = BankConfig::load(&path).unwrap();
        assert_eq!(config.plugin_dirs, vec![PathBuf::from("/opt/mods")]);
        assert_eq!(config.cache_policy, CachePolicy::ResetCache);
        assert_eq!(config.max_depth, DEFAULT_MAX_DEPTH);
        assert_eq!(config.env_var.as_deref(), Some(PLUGIN_PATH_ENV));
    }

    #[test]
    fn malformed_file_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bank.json");
        fs::write(&path, "{ nope").unwrap();
        assert!(matches!(BankConfig::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn environment_roots_follow_configured_ones() {
        let var = "MODBANK_TEST_ROOTS_ORDER";
        let joined = env::join_paths(["/b", "/a", "/c"]).unwrap();
        env::set_var(var, joined);
        let config = BankConfig {
            plugin_dirs: vec![PathBuf::from("/a")],
            env_var: Some(var.to_string()),
            ..BankConfig::default()
        };
        assert_eq!(
            config.search_roots(),
            vec![PathBuf::from("/a"), PathBuf::from("/b"), PathBuf::from("/c")]
        );
        env::remove_var(var);
    }
}
