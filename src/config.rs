use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};

pub const DEFAULT_TAG: &str = "output";
pub const REPO_ENV: &str = "TESTGRAFT_REPO";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Repository working copy all file ids are relative to.
    pub repo_root: Option<PathBuf>,
    /// Tag wrapping the payload in model output.
    pub tag: String,
    pub runner: RunnerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repo_root: None,
            tag: DEFAULT_TAG.to_string(),
            runner: RunnerConfig::default(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            program: "python".to_string(),
            args: vec!["-m".into(), "pytest".into(), "-v".into()],
        }
    }
}

impl Config {
    /// `<config_dir>/testgraft/config.toml`
    pub fn default_path() -> PathBuf {
        let mut dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        dir.push("testgraft");
        dir.push("config.toml");
        dir
    }

    /// Load from an explicit file. Missing or malformed files are errors.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml(raw: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Load the default file if present. A broken file is reported and
    /// ignored.
    pub fn load_default() -> Self {
        let path = Self::default_path();
        let Ok(raw) = fs::read_to_string(&path) else {
            debug!(path = %path.display(), "no config file, using defaults");
            return Self::default();
        };

        match Self::from_toml(&raw) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring malformed config file");
                Self::default()
            }
        }
    }

    /// `--config` if given, otherwise the default location.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => Ok(Self::load_default()),
        }
    }

    /// Repository root: flag, then `TESTGRAFT_REPO`, then the config file,
    /// then `../repo` next to the working directory.
    pub fn resolve_repo_root(&self, flag: Option<&Path>) -> PathBuf {
        if let Some(p) = flag {
            return p.to_path_buf();
        }
        if let Some(p) = env::var_os(REPO_ENV).filter(|v| !v.is_empty()) {
            return PathBuf::from(p);
        }
        if let Some(p) = &self.repo_root {
            return p.clone();
        }
        default_repo_root()
    }
}

fn default_repo_root() -> PathBuf {
    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    cwd.parent().unwrap_or(&cwd).join("repo")
}
