use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the config directory path
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("converge"))
}

/// Default location of the audit store
pub fn default_state_path() -> Result<PathBuf> {
    let base = dirs::data_local_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("share")))
        .context("Could not determine local data directory")?;
    Ok(base.join("converge").join("state.json"))
}

/// Expand `~` and environment variables in a configured path
pub fn expand_path(path: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(path)
        .with_context(|| format!("Could not expand path '{path}'"))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

// ============================================================================
// Settings
// ============================================================================

/// Settings read from `~/.config/converge/config.toml`
///
/// Every field can be overridden on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Where audited values are kept between runs
    pub state: Option<String>,
    /// Only apply resources carrying one of these tags
    pub tags: Vec<String>,
    /// Never apply resources carrying one of these tags
    pub skip_tags: Vec<String>,
    /// Skip resources whose dependencies failed
    pub skip_failed_deps: bool,
    /// Apply resources even outside their schedules
    pub ignore_schedules: bool,
    /// Report what would change without changing anything
    pub noop: bool,
}

impl Settings {
    /// Load config.toml, falling back to defaults when it does not exist
    pub fn load() -> Result<Self> {
        let path = config_dir()?.join("config.toml");
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config in {}", path.display()))
    }

    /// Resolve the store location: CLI flag, then config, then default
    pub fn state_path(&self, flag: Option<&str>) -> Result<PathBuf> {
        match flag.or(self.state.as_deref()) {
            Some(path) => expand_path(path),
            None => default_state_path(),
        }
    }
}
