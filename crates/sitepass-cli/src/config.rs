use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::fs;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub default_vault: Option<String>,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
        }
    }
}

pub fn load_config(config_override: Option<PathBuf>) -> Result<(AppConfig, PathBuf), String> {
    let config_path = match config_override {
        Some(path) => path,
        None => {
            let project_dirs = ProjectDirs::from("", "", "sitepass")
                .ok_or_else(|| "unable to resolve config path".to_owned())?;
            project_dirs.config_dir().join("config.toml")
        }
    };

    if !config_path.exists() {
        return Ok((AppConfig::default(), config_path));
    }

    let raw = fs::read_to_string(&config_path)
        .map_err(|error| format!("failed to read config {}: {error}", config_path.display()))?;
    let config = toml::from_str::<AppConfig>(&raw)
        .map_err(|error| format!("failed to parse config {}: {error}", config_path.display()))?;
    Ok((config, config_path))
}

pub fn save_config(config: &AppConfig, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|error| {
            format!("failed to create config dir {}: {error}", parent.display())
        })?;
    }
    let data = toml::to_string_pretty(config)
        .map_err(|error| format!("failed to serialize config: {error}"))?;
    fs::write(path, data)
        .map_err(|error| format!("failed to write config {}: {error}", path.display()))
}

pub fn config_set(config: &mut AppConfig, key: &str, value: &str) -> Result<(), String> {
    match key {
        "default_vault" => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Err("default_vault cannot be empty".to_owned());
            }
            config.default_vault = Some(trimmed.to_owned());
        }
        "logging.level" => match value.trim() {
            "error" | "warn" | "info" | "debug" => config.logging.level = value.trim().to_owned(),
            _ => return Err("logging.level must be error|warn|info|debug".to_owned()),
        },
        _ => return Err("unknown config key".to_owned()),
    }

    Ok(())
}

pub fn config_get(config: &AppConfig, key: &str) -> Result<String, String> {
    match key {
        "default_vault" => Ok(config.default_vault.clone().unwrap_or_default()),
        "logging.level" => Ok(config.logging.level.clone()),
        _ => Err("unknown config key".to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::{AppConfig, config_get, config_set};

    #[test]
    fn set_and_get_known_keys() {
        let mut config = AppConfig::default();
        config_set(&mut config, "default_vault", "/tmp/v.spv").expect("set should succeed");
        config_set(&mut config, "logging.level", "debug").expect("set should succeed");

        assert_eq!(
            config_get(&config, "default_vault").expect("get should succeed"),
            "/tmp/v.spv"
        );
        assert_eq!(
            config_get(&config, "logging.level").expect("get should succeed"),
            "debug"
        );
    }

    #[test]
    fn rejects_unknown_key_and_bad_level() {
        let mut config = AppConfig::default();
        assert!(config_set(&mut config, "nope", "x").is_err());
        assert!(config_set(&mut config, "logging.level", "loud").is_err());
        assert!(config_get(&config, "nope").is_err());
    }
}
