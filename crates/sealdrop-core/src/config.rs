use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{SealdropError, SealdropResult};

/// Upper bound on a single transfer (2 GiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// Top-level configuration (loaded from sealdrop.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SealdropConfig {
    pub log: LogConfig,
    pub keys: KeysConfig,
    pub transfer: TransferConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// Directory holding private_key.pem / public_key.pem
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Largest plaintext file accepted for encryption, in bytes
    pub max_file_size: u64,
    /// Where decrypted/encrypted outputs land when no explicit path is given
    pub output_dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("~/.config/sealdrop/keys"),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            output_dir: None,
        }
    }
}

impl SealdropConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> SealdropResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| SealdropError::Config(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> SealdropResult<()> {
        if self.transfer.max_file_size == 0 {
            return Err(SealdropError::Config(
                "transfer.max_file_size must be greater than zero".into(),
            ));
        }
        match self.log.format.as_str() {
            "json" | "text" => Ok(()),
            other => Err(SealdropError::Config(format!(
                "log.format must be \"json\" or \"text\", got {other:?}"
            ))),
        }
    }
}

/// Expand `~` in path to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_default();
        PathBuf::from(home).join(rest)
    } else {
        path.to_path_buf()
    }
}
