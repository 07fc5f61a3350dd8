use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VfsError};

/// Path to the global password file, `krypto/pwfile` in the configuration
/// tree. The `VDB_PWFILE` environment variable overrides it at use sites.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct KryptoConfig {
    #[serde(default)]
    pub pwfile: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub krypto: KryptoConfig,
}

impl Config {
    /// Load from an explicit file, or from the per-user default location.
    /// A missing explicit file is an error; a missing default file yields
    /// the default configuration.
    pub fn load(path: Option<&Utf8Path>) -> Result<Config> {
        match path {
            Some(path) => {
                if !path.as_std_path().exists() {
                    return Err(VfsError::Config(format!("missing config file {path}")));
                }
                Self::read_file(path)
            }
            None => match Self::default_path() {
                Some(path) if path.as_std_path().exists() => Self::read_file(&path),
                _ => Ok(Config::default()),
            },
        }
    }

    pub fn default_path() -> Option<Utf8PathBuf> {
        let dirs = BaseDirs::new()?;
        let base = Utf8PathBuf::from_path_buf(dirs.config_dir().to_path_buf()).ok()?;
        Some(base.join("biodata-vfs").join("config.json"))
    }

    fn read_file(path: &Utf8Path) -> Result<Config> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|_| VfsError::Config(format!("failed to read config file {path}")))?;
        serde_json::from_str(&content)
            .map_err(|err| VfsError::Config(format!("failed to parse config: {err}")))
    }

    pub fn krypto_pwfile(&self) -> Option<&Utf8Path> {
        self.krypto.pwfile.as_deref()
    }
}
