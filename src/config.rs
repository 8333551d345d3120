use anyhow::{anyhow, Result};
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Keys accepted by `ssage config set`.
pub const CONFIG_KEYS: [&str; 3] = ["model", "lang", "provider"];

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl Config {
    /// Load configuration from the default file, or defaults when there is none
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Invalid config file {}: {}", path.display(), e))?;
        info!("Loaded config from: {}", path.display());
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        info!("Saved config to: {}", path.display());
        Ok(())
    }

    pub fn get_config_path() -> Result<PathBuf> {
        Ok(Self::get_config_dir()?.join("config.toml"))
    }

    pub fn get_config_dir() -> Result<PathBuf> {
        let home = home_dir().ok_or_else(|| anyhow!("Could not find home directory"))?;
        Ok(home.join(".ssage"))
    }

    /// Update a single key. Empty values clear the key.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let value = if value.is_empty() { None } else { Some(value.to_string()) };
        match key {
            "model" => self.model = value,
            "lang" => self.lang = value,
            "provider" => self.provider = value,
            _ => {
                return Err(anyhow!(
                    "Unknown config key: {} (available: {})",
                    key,
                    CONFIG_KEYS.join(", ")
                ))
            }
        }
        Ok(())
    }

    /// Response language, `English` unless configured
    pub fn lang_or_default(&self) -> &str {
        self.lang.as_deref().filter(|l| !l.is_empty()).unwrap_or("English")
    }

    pub fn show_config_info<W: Write>(&self, path: &Path, output: &mut W) -> Result<()> {
        writeln!(output, "Config file: {}", path.display())?;
        writeln!(output, "Status: {}", if path.exists() { "Found" } else { "Not found (using defaults)" })?;
        writeln!(output, "Model: {}", self.model.as_deref().unwrap_or(""))?;
        writeln!(output, "Language: {}", self.lang.as_deref().unwrap_or(""))?;
        writeln!(output, "Provider: {}", self.provider.as_deref().unwrap_or(""))?;
        writeln!(output, "\nTo change a value:")?;
        writeln!(output, "  ssage config set <{}> <value>", CONFIG_KEYS.join("|"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.lang_or_default(), "English");
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.set("model", "mistral").unwrap();
        config.set("lang", "es").unwrap();
        config.set("provider", "ollama").unwrap();

        config.save_to(&path).unwrap();
        let loaded = Config::load_from(&path).unwrap();

        assert_eq!(loaded, config);
        assert_eq!(loaded.lang_or_default(), "es");
    }

    #[test]
    fn test_partial_file_parses() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "provider = \"llamacpp\"\n").unwrap();

        let config = Config::load_from(&path).unwrap();

        assert_eq!(config.provider.as_deref(), Some("llamacpp"));
        assert!(config.model.is_none());
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "model = [unterminated").unwrap();

        let err = Config::load_from(&path).unwrap_err();

        assert!(err.to_string().contains("Invalid config file"));
    }

    #[test]
    fn test_set_unknown_key_lists_available() {
        let mut config = Config::default();
        let err = config.set("colour", "blue").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unknown config key: colour (available: model, lang, provider)"
        );
    }

    #[test]
    fn test_set_empty_value_clears_key() {
        let mut config = Config::default();
        config.set("model", "llama3").unwrap();
        config.set("model", "").unwrap();
        assert!(config.model.is_none());
    }

    #[test]
    fn test_show_config_info_lists_values() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.set("model", "phi3").unwrap();
        let mut output = Vec::new();

        config
            .show_config_info(&dir.path().join("config.toml"), &mut output)
            .unwrap();

        let output = String::from_utf8(output).unwrap();
        assert!(output.contains("Model: phi3"));
        assert!(output.contains("Not found (using defaults)"));
        assert!(output.contains("ssage config set"));
    }
}
