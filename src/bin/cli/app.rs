use std::path::Path;

use anyhow::{bail, Context, Result};

use flashdeck_lib::{ClozeLenient, Collection, Model};

use crate::settings::Settings;

/// Shared application state for CLI commands
pub struct App {
    pub col: Collection,
}

impl App {
    /// Open `collection`, or the one named in the settings file.
    pub fn open(collection: Option<&Path>) -> Result<Self> {
        let settings = Settings::load()?;
        let path = match collection {
            Some(path) => path.to_path_buf(),
            None => settings.collection_path()?,
        };

        let mut col = Collection::open(&path, false)
            .with_context(|| format!("Failed to open collection {}", path.display()))?;
        if settings.cloze_lenient {
            col.set_empty_card_policy(Box::new(ClozeLenient));
        }
        Ok(Self { col })
    }

    /// Find a note type by name (case-insensitive, exact match before prefix)
    pub fn find_model(&mut self, name: &str) -> Result<Model> {
        let models: Vec<Model> = self
            .col
            .models()
            .context("Failed to load note types")?
            .all()
            .into_iter()
            .cloned()
            .collect();
        let name_lower = name.to_lowercase();

        if let Some(model) = models.iter().find(|m| m.name.to_lowercase() == name_lower) {
            return Ok(model.clone());
        }

        let matches: Vec<&Model> = models
            .iter()
            .filter(|m| m.name.to_lowercase().starts_with(&name_lower))
            .collect();

        match matches.len() {
            0 => bail!(
                "No note type matching '{}'. Available note types:\n{}",
                name,
                models
                    .iter()
                    .map(|m| format!("  - {}", m.name))
                    .collect::<Vec<_>>()
                    .join("\n")
            ),
            1 => Ok(matches[0].clone()),
            _ => bail!(
                "Ambiguous note type name '{}'. Matches:\n{}",
                name,
                matches
                    .iter()
                    .map(|m| format!("  - {}", m.name))
                    .collect::<Vec<_>>()
                    .join("\n")
            ),
        }
    }

    /// Save and close the collection.
    pub fn close(mut self) -> Result<()> {
        self.col.close(true).context("Failed to close collection")
    }
}
