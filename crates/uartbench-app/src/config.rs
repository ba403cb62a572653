use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use uartbench_core::HarnessConfig;

pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("uartbench").join("config.json"))
}

/// Reads `explicit` if given, else the per-user config if it exists, else
/// falls back to the built-in defaults.
pub fn load(explicit: Option<&Path>) -> Result<HarnessConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match default_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(HarnessConfig::default()),
        },
    };

    let text = fs::read_to_string(&path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config = serde_json::from_str(&text)
        .with_context(|| format!("parsing config {}", path.display()))?;
    log::debug!("loaded config from {}", path.display());
    Ok(config)
}

pub fn save(path: &Path, config: &HarnessConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let text = serde_json::to_string_pretty(config)?;
    fs::write(path, text).with_context(|| format!("writing config {}", path.display()))
}
