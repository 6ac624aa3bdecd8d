//! Configuration loading and root folder resolution

use crate::{Error, Result};
use std::path::PathBuf;

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file (`root_folder` key)
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&str>, env_var_name: &str) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Ok(config_path) = default_config_file() {
        if let Ok(toml_content) = std::fs::read_to_string(&config_path) {
            if let Ok(config) = toml::from_str::<toml::Value>(&toml_content) {
                if let Some(root_folder) = config.get("root_folder").and_then(|v| v.as_str()) {
                    return PathBuf::from(root_folder);
                }
            }
        }
    }

    // Priority 4: OS-dependent compiled default
    default_root_folder()
}

/// Default configuration file path for the platform
pub fn default_config_file() -> Result<PathBuf> {
    let home = std::env::var("HOME")
        .map_err(|_| Error::Config("HOME environment variable not set".to_string()))?;

    if cfg!(target_os = "macos") {
        Ok(PathBuf::from(home)
            .join("Library")
            .join("Application Support")
            .join("tdap")
            .join("config.toml"))
    } else {
        // Linux and other Unix: XDG-style user config
        Ok(PathBuf::from(home).join(".config").join("tdap").join("config.toml"))
    }
}

/// Default root data folder for the platform
pub fn default_root_folder() -> PathBuf {
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(".local").join("share").join("tdap"),
        Err(_) => PathBuf::from("/var/lib/tdap"),
    }
}

/// Ensure the root folder exists, creating it (and parents) if missing
pub fn ensure_root_folder(root: &std::path::Path) -> Result<()> {
    if !root.exists() {
        std::fs::create_dir_all(root)?;
        tracing::info!(root = %root.display(), "Created root folder");
    } else if !root.is_dir() {
        return Err(Error::Config(format!(
            "Root folder path exists but is not a directory: {}",
            root.display()
        )));
    }
    Ok(())
}
