//! Config file discovery and layered merging.
//!
//! Two layers are read, later overriding earlier section by section:
//!
//! 1. the user file, `config.toml` in [`user_config_dir`]
//! 2. the project file, `recollect.toml` in the working (or given) directory
//!
//! Command-line flags are applied by the binary on top of the result.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::{ConfigError, RecollectConfig, Result};

const PROJECT_FILE: &str = "recollect.toml";
const USER_FILE: &str = "config.toml";
const APP_DIR: &str = "recollect";

/// Overrides the user config directory.
pub const CONFIG_DIR_ENV: &str = "RECOLLECT_CONFIG_DIR";

// ─────────────────────────────────────────────────────────────────────────────
// Layers
// ─────────────────────────────────────────────────────────────────────────────

/// Which layer a config file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    User,
    Project,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Project => f.write_str("project"),
        }
    }
}

/// What happened when a layer was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerStatus {
    Loaded,
    Missing,
    /// The file exists but could not be used; the layer was skipped.
    Invalid(String),
}

/// One candidate config file.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub layer: Layer,
    pub path: PathBuf,
    pub status: LayerStatus,
}

/// Merged configuration plus the files it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: RecollectConfig,
    /// Every candidate, lowest precedence first.
    pub sources: Vec<ConfigSource>,
}

impl LoadedConfig {
    /// Paths of the layers that were merged.
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter(|s| s.status == LayerStatus::Loaded)
            .map(|s| s.path.as_path())
            .collect()
    }

    /// One message per skipped, unreadable layer.
    pub fn warnings(&self) -> Vec<String> {
        self.sources
            .iter()
            .filter_map(|s| match &s.status {
                LayerStatus::Invalid(reason) => Some(format!(
                    "ignoring {} config {}: {}",
                    s.layer,
                    s.path.display(),
                    reason
                )),
                _ => None,
            })
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Discovery
// ─────────────────────────────────────────────────────────────────────────────

/// Where to look for config layers.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    project_dir: Option<PathBuf>,
    user_dir: Option<PathBuf>,
}

impl Discovery {
    /// Look in the default locations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the project layer from `dir` instead of the working directory.
    pub fn with_project_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project_dir = Some(dir.into());
        self
    }

    /// Read the user layer from `dir`, ignoring `RECOLLECT_CONFIG_DIR`.
    pub fn with_user_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.user_dir = Some(dir.into());
        self
    }

    fn candidates(&self) -> Vec<(Layer, PathBuf)> {
        let mut candidates = Vec::with_capacity(2);

        let user_dir = self.user_dir.clone().or_else(user_config_dir);
        if let Some(dir) = user_dir {
            candidates.push((Layer::User, dir.join(USER_FILE)));
        }

        let project = match &self.project_dir {
            Some(dir) => dir.join(PROJECT_FILE),
            None => PathBuf::from(PROJECT_FILE),
        };
        candidates.push((Layer::Project, project));

        candidates
    }

    /// Read and merge every layer. Unreadable layers are skipped and
    /// reported through [`LoadedConfig::warnings`].
    pub fn load(&self) -> LoadedConfig {
        let mut config = RecollectConfig::new();
        let sources = self
            .candidates()
            .into_iter()
            .map(|(layer, path)| {
                let status = if !path.is_file() {
                    LayerStatus::Missing
                } else {
                    match load_config_file(&path) {
                        Ok(overlay) => {
                            config.merge(overlay);
                            LayerStatus::Loaded
                        }
                        Err(e) => LayerStatus::Invalid(e.to_string()),
                    }
                };
                ConfigSource {
                    layer,
                    path,
                    status,
                }
            })
            .collect();

        LoadedConfig { config, sources }
    }
}

/// Discover and merge config layers, taking the project layer from
/// `project_dir` (or the working directory).
pub fn load_config(project_dir: Option<&Path>) -> LoadedConfig {
    let discovery = Discovery::new();
    match project_dir {
        Some(dir) => discovery.with_project_dir(dir),
        None => discovery,
    }
    .load()
}

// ─────────────────────────────────────────────────────────────────────────────
// Files
// ─────────────────────────────────────────────────────────────────────────────

/// Read one config file, with no discovery or merging.
pub fn load_config_file(path: &Path) -> Result<RecollectConfig> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    RecollectConfig::from_toml(&contents)
}

/// Write `config` to `path`, creating parent directories.
///
/// The file is written next to its destination and renamed into place, so a
/// reader never sees half a file.
pub fn save_config(config: &RecollectConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| write_error(parent, e))?;
    }

    let staging = path.with_extension("toml.tmp");
    std::fs::write(&staging, config.to_toml()?).map_err(|e| write_error(&staging, e))?;
    std::fs::rename(&staging, path).map_err(|e| write_error(path, e))
}

fn write_error(path: &Path, source: std::io::Error) -> ConfigError {
    ConfigError::Write {
        path: path.to_path_buf(),
        source,
    }
}

/// The user config directory: `$RECOLLECT_CONFIG_DIR`, else
/// `<platform config dir>/recollect`.
pub fn user_config_dir() -> Option<PathBuf> {
    match std::env::var_os(CONFIG_DIR_ENV) {
        Some(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => dirs::config_dir().map(|d| d.join(APP_DIR)),
    }
}

/// The user config file.
pub fn user_config_path() -> Option<PathBuf> {
    user_config_dir().map(|d| d.join(USER_FILE))
}
