use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Context, Result};

const CONFIG_DIR_NAME: &str = ".tickdump";
const CONFIG_FILE_NAME: &str = "config.json";

/// Credentials and other configurable variables stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub apikey: String,
}

fn home_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME")
        .map_err(|_| AppError::message("HOME environment variable is not set"))?;
    Ok(PathBuf::from(home))
}

pub fn config_dir() -> Result<PathBuf> {
    Ok(home_dir()?.join(CONFIG_DIR_NAME))
}

impl Config {
    /// Loads the config, failing with a setup hint when it does not exist.
    pub fn load() -> Result<Self> {
        let path = config_dir()?.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Err(AppError::message(
                "config has not yet been set up, please run 'tickdump configure'",
            ));
        }
        Self::load_from(&path)
    }

    /// Loads the config if the file exists, used to pre-fill the configure prompt.
    pub fn load_if_present() -> Result<Option<Self>> {
        let path = config_dir()?.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from(&path).map(Some)
    }

    pub fn save(&self) -> Result<PathBuf> {
        self.save_to(&config_dir()?)
    }

    fn load_from(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config: Config = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        Ok(config)
    }

    fn save_to(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir).context("Failed to create config directory")?;
        let path = dir.join(CONFIG_FILE_NAME);
        let json = serde_json::to_string(self).context("Failed to serialize config")?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write config file {:?}", path))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))
                .with_context(|| format!("Failed to restrict permissions on {:?}", path))?;
        }
        Ok(path)
    }
}

/// Shortens an API key for display, keeping only a recognizable prefix.
pub fn mask_apikey(apikey: &str) -> String {
    if apikey.len() > 10 {
        format!("{}...", &apikey[..7])
    } else {
        apikey.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saves_and_reloads_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            apikey: "k1.a_very_secret_key".to_string(),
        };

        let path = config.save_to(dir.path()).unwrap();
        let reloaded = Config::load_from(&path).unwrap();

        assert_eq!(reloaded.apikey, config.apikey);
    }

    #[test]
    fn masks_long_keys_only() {
        assert_eq!(mask_apikey("k1.abcdefghijkl"), "k1.abcd...");
        assert_eq!(mask_apikey("short"), "short");
    }
}
