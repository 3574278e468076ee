pub mod settings;

pub use settings::{
    parse_settings, parse_settings_yaml, strip_jsonc_comments, validate_settings, KmsSettings,
    ServerOptions, SettingsError,
};

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors for file I/O operations (separate from pure parsing errors)
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Settings error: {0}")]
    SettingsError(#[from] SettingsError),
}

// ============================================================================
// SBIO: I/O wrapper - thin layer over pure functions
// ============================================================================

/// Load and validate a settings file from disk.
///
/// `~` and environment variables in the path are expanded. Files ending in
/// `.yaml`/`.yml` are read as YAML, everything else as JSON with comments.
pub fn load_settings_file(path: &Path) -> Result<KmsSettings, ConfigError> {
    let path = expand_path(path);
    let content = std::fs::read_to_string(&path)?;

    let settings = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => KmsSettings::from_yaml(&content)?,
        _ => KmsSettings::from_str(&content)?,
    };
    Ok(settings)
}

fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match shellexpand::full(&raw) {
        Ok(expanded) => PathBuf::from(expanded.into_owned()),
        Err(_) => path.to_path_buf(),
    }
}
