//! Configuration file support.
//!
//! Looked up at `--config PATH`, otherwise at
//! `<config dir>/bdtransfer/config.toml`. Every key is optional:
//!
//! ```toml
//! connect = "127.0.0.1:50051"
//! listen = "0.0.0.0:50051"
//! dest_dir = "~/incoming"
//! metadata_once = false
//! log_filter = "info"
//! ```

use crate::error::{TransferError, TransferResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_ADDR: &str = "127.0.0.1:50051";

/// Settings shared by the `send` and `serve` commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Peer address dialed by `send`
    pub connect: String,
    /// Address the reference peer binds
    pub listen: String,
    /// Where the reference peer stores received files
    pub dest_dir: PathBuf,
    /// Send metadata with the first chunk only
    pub metadata_once: bool,
    /// Default tracing filter when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect: DEFAULT_ADDR.to_string(),
            listen: DEFAULT_ADDR.to_string(),
            dest_dir: PathBuf::from("."),
            metadata_once: false,
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    /// `<config dir>/bdtransfer/config.toml`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("bdtransfer").join("config.toml"))
    }

    /// Load from `explicit` (must exist) or the default path (may be absent).
    pub fn load(explicit: Option<&Path>) -> TransferResult<Self> {
        let (path, required) = match explicit {
            Some(p) => (expand_tilde(p), true),
            None => match Self::default_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default()),
            },
        };

        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                return Ok(Self::default())
            }
            Err(e) => {
                return Err(TransferError::Config(format!("{}: {e}", path.display())));
            }
        };

        let mut config = Self::from_toml(&text)
            .map_err(|e| TransferError::Config(format!("{}: {e}", path.display())))?;
        config.dest_dir = expand_tilde(&config.dest_dir);
        Ok(config)
    }

    pub fn from_toml(text: &str) -> TransferResult<Self> {
        toml::from_str(text).map_err(|e| TransferError::Config(e.to_string()))
    }
}

/// Expand tilde (~) in paths to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if path_str == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
    } else if let Some(rest) = path_str.strip_prefix("~/") {
        match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        }
    } else {
        path.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml("connect = \"10.0.0.2:9000\"\nmetadata_once = true\n").unwrap();
        assert_eq!(config.connect, "10.0.0.2:9000");
        assert!(config.metadata_once);
        assert_eq!(config.listen, DEFAULT_ADDR);
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn test_unknown_key_is_config_error() {
        let result = Config::from_toml("chunk_size = 65536\n");
        assert!(matches!(result, Err(TransferError::Config(_))));
    }

    #[test]
    fn test_explicit_missing_file_fails() {
        let tmp = TempDir::new().unwrap();
        let result = Config::load(Some(&tmp.path().join("nope.toml")));
        assert!(matches!(result, Err(TransferError::Config(_))));
    }

    #[test]
    fn test_load_explicit_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "listen = \"0.0.0.0:7000\"\ndest_dir = \"/srv/in\"\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.listen, "0.0.0.0:7000");
        assert_eq!(config.dest_dir, PathBuf::from("/srv/in"));
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde(Path::new("/abs/path")), PathBuf::from("/abs/path"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~/in")), home.join("in"));
        }
    }
}
