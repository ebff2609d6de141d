//=====================================================
// File: config.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: MibScript toolchain configuration
// Objective: Load compiler, runtime and logging settings from mib.toml with
//            defaults for every key
//=====================================================

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::diagnostics::DEFAULT_TRACEBACK_DEPTH;
use crate::vm::RuntimeOptions;
use crate::vm::runtime::DEFAULT_MAX_CALL_DEPTH;

/// File name searched in the working directory, then the user config dir.
pub const CONFIG_FILE: &str = "mib.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading configuration from {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing configuration {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("serializing configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("writing configuration to {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Depth of the compile-time traceback ring buffer.
    pub traceback_depth: usize,
    /// Prepend the bundled standard library to every program.
    pub include_stdlib: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            traceback_depth: DEFAULT_TRACEBACK_DEPTH,
            include_stdlib: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub traceback_depth: usize,
    pub max_call_depth: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            traceback_depth: DEFAULT_TRACEBACK_DEPTH,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

impl RuntimeConfig {
    pub fn options(&self) -> RuntimeOptions {
        RuntimeOptions {
            traceback_depth: self.traceback_depth,
            max_call_depth: self.max_call_depth,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub compiler: CompilerConfig,
    pub runtime: RuntimeConfig,
    pub log: LogConfig,
}

impl Config {
    /// `./mib.toml`, else `<config dir>/mibscript/mib.toml`, else defaults.
    pub fn load() -> Result<(Self, Option<PathBuf>), ConfigError> {
        let candidates = [
            Some(PathBuf::from(CONFIG_FILE)),
            dirs::config_dir().map(|dir| dir.join("mibscript").join(CONFIG_FILE)),
        ];
        for path in candidates.into_iter().flatten() {
            if path.is_file() {
                let config = Self::load_from(&path)?;
                tracing::debug!(path = %path.display(), "loaded configuration");
                return Ok((config, Some(path)));
            }
        }
        Ok((Self::default(), None))
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(data: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(data)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let serialized = toml::to_string_pretty(self)?;
        fs::write(path, serialized).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let config = Config::parse("[runtime]\nmax_call_depth = 64\n").expect("parse");
        assert_eq!(config.runtime.max_call_depth, 64);
        assert_eq!(config.runtime.traceback_depth, DEFAULT_TRACEBACK_DEPTH);
        assert!(config.compiler.include_stdlib);
        assert_eq!(config.log.level, "warn");
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        let mut config = Config::default();
        config.compiler.include_stdlib = false;
        config.log.level = "debug".into();
        config.save(&path).expect("save");
        assert_eq!(Config::load_from(&path).expect("load"), config);
    }

    #[test]
    fn malformed_file_reports_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[runtime\n").expect("write");
        let err = Config::load_from(&path).expect_err("malformed");
        assert!(err.to_string().contains(CONFIG_FILE));
    }
}

//=====================================================
// End of file
//=====================================================
