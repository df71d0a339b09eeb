use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Overrides the configuration directory; the startup task relies on it.
pub const CONFIG_DIR_ENV: &str = "NVTUNE_CONFIG_DIR";

const APP_DIR: &str = "nvtune";
const PROFILES_FILE: &str = "profiles.json";
const LOG_FILE: &str = "nvtune.log";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot determine the user config directory")]
    NoConfigDir,
    #[error("cannot create {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Where nvtune keeps its files.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Paths {
    pub config_dir: PathBuf,
    pub profiles: PathBuf,
    pub log_file: PathBuf,
}

impl Paths {
    pub fn in_dir(config_dir: impl Into<PathBuf>) -> Self {
        let config_dir = config_dir.into();
        Self {
            profiles: config_dir.join(PROFILES_FILE),
            log_file: config_dir.join(LOG_FILE),
            config_dir,
        }
    }

    /// `--config-dir`, else `$NVTUNE_CONFIG_DIR`, else `<user config dir>/nvtune`.
    pub fn resolve(cli_dir: Option<PathBuf>) -> Result<Self, ConfigError> {
        let override_dir = cli_dir
            .filter(|p| !p.as_os_str().is_empty())
            .or_else(|| std::env::var_os(CONFIG_DIR_ENV).map(PathBuf::from));
        Self::resolve_from(override_dir, dirs::config_dir())
    }

    fn resolve_from(
        override_dir: Option<PathBuf>,
        user_config: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        match override_dir.filter(|p| !p.as_os_str().is_empty()) {
            Some(dir) => Ok(Self::in_dir(dir)),
            None => user_config
                .map(|dir| Self::in_dir(dir.join(APP_DIR)))
                .ok_or(ConfigError::NoConfigDir),
        }
    }

    pub fn ensure_dir(&self) -> Result<(), ConfigError> {
        create_dir(&self.config_dir)
    }
}

fn create_dir(path: &Path) -> Result<(), ConfigError> {
    fs::create_dir_all(path).map_err(|source| ConfigError::CreateDir {
        path: path.display().to_string(),
        source,
    })
}
