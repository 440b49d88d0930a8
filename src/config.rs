//! Pipeline configuration loaded from TOML.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::vm::Profiler;
use crate::{RuntimeConfig, TierError, TierResult};

/// File name looked up under `<config dir>/tiervm/`.
const CONFIG_FILE: &str = "tiervm.toml";

/// Default cache file, relative to the working directory.
pub const DEFAULT_CACHE_PATH: &str = "optimized_code.txt";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TierConfig {
    /// A program counter is hot once it runs strictly more often than this.
    pub hot_threshold: u64,
    /// Interpreter step limit. Absent means unbounded.
    pub step_limit: Option<u64>,
    pub cache_path: PathBuf,
    /// Read and write the optimized-program cache.
    pub use_cache: bool,
    /// Attempt native execution of the optimized program.
    pub native: bool,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            hot_threshold: Profiler::DEFAULT_HOT_THRESHOLD,
            step_limit: None,
            cache_path: PathBuf::from(DEFAULT_CACHE_PATH),
            use_cache: true,
            native: true,
        }
    }
}

impl TierConfig {
    /// `<config dir>/tiervm/tiervm.toml`, when the platform has a config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("tiervm").join(CONFIG_FILE))
    }

    /// Loads the user configuration, falling back to defaults when no file exists.
    pub fn load() -> TierResult<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> TierResult<Self> {
        let data = fs::read_to_string(path).map_err(|err| {
            TierError::Config(format!("reading {}: {err}", path.display()))
        })?;
        let config: Self = toml::from_str(&data)
            .map_err(|err| TierError::Config(format!("parsing {}: {err}", path.display())))?;
        config.runtime()?;
        debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> TierResult<()> {
        let serialized = toml::to_string_pretty(self)
            .map_err(|err| TierError::Config(format!("serializing configuration: {err}")))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                TierError::Config(format!("creating {}: {err}", parent.display()))
            })?;
        }
        fs::write(path, serialized)
            .map_err(|err| TierError::Config(format!("writing {}: {err}", path.display())))?;
        Ok(())
    }

    /// Interpreter limits described by this configuration.
    pub fn runtime(&self) -> TierResult<RuntimeConfig> {
        match self.step_limit {
            Some(limit) => RuntimeConfig::default().with_step_limit(limit),
            None => Ok(RuntimeConfig::default()),
        }
    }

    pub fn profiler(&self) -> Profiler {
        Profiler::with_threshold(self.hot_threshold)
    }
}
