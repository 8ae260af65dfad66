use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::RunError;

/// Process-wide settings stored next to the scripts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub version: u32,
    /// Log level for the tracing subscriber (`error`..`trace`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Localized function-name table: canonical name → script-visible alias.
    /// Function-call resolution applies the inverse of this mapping, so a
    /// localized script can call canonical device/internal methods under the
    /// alias.
    #[serde(default)]
    pub mapping: HashMap<String, String>,
    /// Timeout in seconds for the Lua HTTP facade.
    #[serde(default = "default_http_timeout")]
    pub http_timeout: u64,
    /// Device name selected automatically when a run starts. Scripts can
    /// still swap with `select_device`.
    #[serde(default)]
    pub default_device: Option<String>,
}

const SETTINGS_VERSION: u32 = 1;

fn default_log_level() -> String {
    "info".to_string()
}

fn default_http_timeout() -> u64 {
    60
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            log_level: default_log_level(),
            mapping: HashMap::new(),
            http_timeout: default_http_timeout(),
            default_device: None,
        }
    }
}

impl Settings {
    /// The alias → canonical view used during function-call resolution.
    pub fn inverse_mapping(&self) -> HashMap<String, String> {
        self.mapping
            .iter()
            .map(|(canonical, alias)| (alias.clone(), canonical.clone()))
            .collect()
    }
}

/// Load settings from the config directory. Returns defaults if no settings
/// file exists or it cannot be parsed.
pub fn load_settings(config_dir: &Path) -> Settings {
    let path = crate::paths::settings_path(config_dir);
    let Ok(raw) = std::fs::read_to_string(&path) else {
        return Settings::default();
    };
    match serde_json::from_str(&raw) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "invalid settings file, using defaults");
            Settings::default()
        }
    }
}

/// Save settings to the config directory.
pub fn save_settings(config_dir: &Path, settings: &Settings) -> Result<(), RunError> {
    std::fs::create_dir_all(config_dir)?;
    let json = serde_json::to_string_pretty(settings).map_err(|e| RunError::Io {
        message: e.to_string(),
    })?;
    std::fs::write(crate::paths::settings_path(config_dir), json)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn settings_round_trip() {
        let dir = std::env::temp_dir().join("actuate_test_settings");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();

        let mut settings = Settings::default();
        settings.mapping.insert("click".into(), "点击".into());
        settings.default_device = Some("loopback".into());
        save_settings(&dir, &settings).unwrap();

        let loaded = load_settings(&dir);
        assert_eq!(loaded.mapping.get("click").map(String::as_str), Some("点击"));
        assert_eq!(loaded.default_device.as_deref(), Some("loopback"));
        assert_eq!(loaded.http_timeout, 60);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = std::env::temp_dir().join("actuate_test_no_settings");
        let _ = std::fs::remove_dir_all(&dir);
        let settings = load_settings(&dir);
        assert_eq!(settings.version, 1);
        assert!(settings.mapping.is_empty());
    }

    #[test]
    fn inverse_mapping_swaps_alias_and_canonical() {
        let mut settings = Settings::default();
        settings.mapping.insert("click".into(), "tap".into());
        let inverse = settings.inverse_mapping();
        assert_eq!(inverse.get("tap").map(String::as_str), Some("click"));
    }
}
