use std::collections::HashMap;

use crate::config::{ConfigStore, KEY_CUR_MODEL};
use crate::storage::{Db, Result};

use super::models::Model;

/// Every note type in the collection, keyed by id.
///
/// Created lazily by the collection the first time a model is needed.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: HashMap<i64, Model>,
    changed: bool,
}

impl ModelRegistry {
    pub fn load(json: &str) -> serde_json::Result<Self> {
        let models: HashMap<String, Model> = if json.trim().is_empty() {
            HashMap::new()
        } else {
            serde_json::from_str(json)?
        };
        Ok(Self {
            models: models.into_values().map(|m| (m.id, m)).collect(),
            changed: false,
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        let models: HashMap<String, &Model> = self
            .models
            .iter()
            .map(|(id, m)| (id.to_string(), m))
            .collect();
        serde_json::to_string(&models)
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn mark_flushed(&mut self) {
        self.changed = false;
    }

    pub(crate) fn before_upload(&mut self) {
        for model in self.models.values_mut() {
            model.usn = 0;
        }
        self.changed = true;
    }

    pub fn get(&self, mid: i64) -> Option<&Model> {
        self.models.get(&mid)
    }

    pub fn have(&self, mid: i64) -> bool {
        self.models.contains_key(&mid)
    }

    pub fn by_name(&self, name: &str) -> Option<&Model> {
        self.models.values().find(|m| m.name == name)
    }

    /// Every model sorted by name.
    pub fn all(&self) -> Vec<&Model> {
        let mut models: Vec<&Model> = self.models.values().collect();
        models.sort_by(|a, b| a.name.cmp(&b.name));
        models
    }

    pub fn all_names(&self) -> Vec<String> {
        self.all().into_iter().map(|m| m.name.clone()).collect()
    }

    pub fn ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.models.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn count(&self) -> usize {
        self.models.len()
    }

    /// Insert a new model, assigning it a fresh id. Returns the id.
    pub fn add(&mut self, mut model: Model, usn: i32, now: i64) -> i64 {
        let mut id = chrono::Utc::now().timestamp_millis();
        while self.models.contains_key(&id) {
            id += 1;
        }
        model.id = id;
        self.save(model, usn, now);
        id
    }

    /// Store a model, stamping its modification time and usn.
    pub fn save(&mut self, mut model: Model, usn: i32, now: i64) {
        model.mtime = now;
        model.usn = usn;
        self.models.insert(model.id, model);
        self.changed = true;
    }

    pub(crate) fn remove_entry(&mut self, mid: i64) -> Option<Model> {
        let removed = self.models.remove(&mid);
        if removed.is_some() {
            self.changed = true;
        }
        removed
    }

    /// The model selected for new notes, falling back to any model.
    pub fn current(&self, conf: &ConfigStore) -> Option<&Model> {
        conf.get::<i64>(KEY_CUR_MODEL)
            .and_then(|mid| self.models.get(&mid))
            .or_else(|| self.all().into_iter().next())
    }

    pub fn set_current(&self, conf: &mut ConfigStore, mid: i64) -> serde_json::Result<()> {
        conf.set(KEY_CUR_MODEL, mid)
    }

    /// Ids of notes using model `mid`.
    pub fn nids(&self, db: &Db, mid: i64) -> Result<Vec<i64>> {
        db.list("SELECT id FROM notes WHERE mid = ?1", [mid])
    }

    /// Number of notes using model `mid`.
    pub fn use_count(&self, db: &Db, mid: i64) -> Result<i64> {
        db.scalar("SELECT count() FROM notes WHERE mid = ?1", [mid])
    }

    /// Number of cards generated from template `ord` of model `mid`.
    pub fn tmpl_use_count(&self, db: &Db, mid: i64, ord: usize) -> Result<i64> {
        db.scalar(
            "SELECT count() FROM cards, notes WHERE cards.nid = notes.id AND notes.mid = ?1 AND cards.ord = ?2",
            rusqlite::params![mid, ord as i64],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notetypes::stock;

    #[test]
    fn test_add_assigns_unique_ids() {
        let mut models = ModelRegistry::default();
        let a = models.add(stock::basic(), -1, 1);
        let b = models.add(stock::cloze(), -1, 1);
        assert_ne!(a, b);
        assert_eq!(models.count(), 2);
        assert_eq!(models.get(b).unwrap().name, "Cloze");
        assert!(models.is_changed());
    }

    #[test]
    fn test_current_falls_back() {
        let mut models = ModelRegistry::default();
        let mut conf = ConfigStore::with_defaults();
        assert!(models.current(&conf).is_none());

        let basic = models.add(stock::basic(), -1, 1);
        let cloze = models.add(stock::cloze(), -1, 1);
        assert_eq!(models.current(&conf).unwrap().id, basic);

        models.set_current(&mut conf, cloze).unwrap();
        assert_eq!(models.current(&conf).unwrap().id, cloze);
    }

    #[test]
    fn test_json_round_trip() {
        let mut models = ModelRegistry::default();
        let mid = models.add(stock::basic_and_reversed(), -1, 1);
        let loaded = ModelRegistry::load(&models.to_json().unwrap()).unwrap();
        assert_eq!(loaded.get(mid), models.get(mid));
        assert!(!loaded.is_changed());
    }
}
