use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

const APP_DIR: &str = "flashdeck";
const SETTINGS_FILE: &str = "cli.toml";
const DEFAULT_COLLECTION: &str = "collection.anki2";

/// Contents of `<config_dir>/flashdeck/cli.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Collection opened when `--collection` is not given.
    pub collection: Option<PathBuf>,
    /// Keep the first card of cloze notes that have no markers.
    pub cloze_lenient: bool,
}

impl Settings {
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(SETTINGS_FILE))
    }

    /// Read the settings file; a missing file yields the defaults.
    pub fn load() -> Result<Self> {
        let Some(path) = Self::path() else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("Invalid settings in {}", path.display()))
    }

    pub fn collection_path(&self) -> Result<PathBuf> {
        match &self.collection {
            Some(path) => Ok(path.clone()),
            None => dirs::data_dir()
                .map(|dir| dir.join(APP_DIR).join(DEFAULT_COLLECTION))
                .context("Failed to get data directory"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_settings() {
        let settings: Settings =
            toml::from_str("collection = \"/tmp/cards.anki2\"\ncloze_lenient = true\n").unwrap();
        assert_eq!(settings.collection, Some(PathBuf::from("/tmp/cards.anki2")));
        assert!(settings.cloze_lenient);

        let empty: Settings = toml::from_str("").unwrap();
        assert!(empty.collection.is_none());
        assert!(!empty.cloze_lenient);
    }
}
