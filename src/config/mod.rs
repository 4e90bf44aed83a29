//! Collection-wide settings.
//!
//! Stored as a JSON object in the `col.conf` column. Getters take the value
//! to fall back on when a key is missing or holds a value of another type.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};

pub const KEY_ACTIVE_DECKS: &str = "activeDecks";
pub const KEY_CUR_DECK: &str = "curDeck";
pub const KEY_CUR_MODEL: &str = "curModel";
pub const KEY_NEXT_POS: &str = "nextPos";
pub const KEY_SCHED_VER: &str = "schedVer";
pub const KEY_TIME_LIMIT: &str = "timeLim";
pub const KEY_ROLLOVER: &str = "rollover";
pub const KEY_DEBUG_LOG: &str = "debugLog";

/// Key/value settings persisted with the collection row.
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    values: Map<String, Value>,
    changed: bool,
}

impl ConfigStore {
    /// Settings for a freshly created collection.
    pub fn with_defaults() -> Self {
        let defaults: [(&str, Value); 15] = [
            (KEY_ACTIVE_DECKS, json!([1])),
            (KEY_CUR_DECK, json!(1)),
            ("newSpread", json!(0)),
            ("collapseTime", json!(1200)),
            (KEY_TIME_LIMIT, json!(0)),
            ("estTimes", json!(true)),
            ("dueCounts", json!(true)),
            (KEY_CUR_MODEL, Value::Null),
            (KEY_NEXT_POS, json!(1)),
            ("sortType", json!("noteFld")),
            ("sortBackwards", json!(false)),
            ("addToCur", json!(true)),
            (KEY_SCHED_VER, json!(2)),
            (KEY_ROLLOVER, json!(4)),
            (KEY_DEBUG_LOG, json!(false)),
        ];
        let values: Map<String, Value> = defaults
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Self {
            values,
            changed: true,
        }
    }

    /// Parse the stored blob. An empty or non-object blob yields an empty store.
    pub fn load(json: &str) -> serde_json::Result<Self> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        let values = match serde_json::from_str::<Value>(json)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Ok(Self {
            values,
            changed: false,
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.values)
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.values
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }

    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        self.values
            .get(key)
            .and_then(Value::as_i64)
            .unwrap_or(default)
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        self.values
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    }

    /// Deserialize a stored value. `None` when absent, null or mistyped.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .filter(|v| !v.is_null())
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> serde_json::Result<()> {
        let value = serde_json::to_value(value)?;
        self.values.insert(key.to_string(), value);
        self.changed = true;
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> bool {
        let removed = self.values.remove(key).is_some();
        if removed {
            self.changed = true;
        }
        removed
    }

    /// Whether anything changed since the last load or flush.
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn mark_flushed(&mut self) {
        self.changed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let conf = ConfigStore::with_defaults();
        assert_eq!(conf.get_i64(KEY_CUR_DECK, 0), 1);
        assert_eq!(conf.get_i64(KEY_SCHED_VER, 0), 2);
        assert!(!conf.get_bool(KEY_DEBUG_LOG, true));
        assert_eq!(conf.get::<i64>(KEY_CUR_MODEL), None);
        assert_eq!(conf.get::<Vec<i64>>(KEY_ACTIVE_DECKS), Some(vec![1]));
    }

    #[test]
    fn test_default_on_missing_or_mistyped() {
        let mut conf = ConfigStore::load(r#"{"sortType": 3}"#).unwrap();
        assert_eq!(conf.get_string("sortType", "noteFld"), "noteFld");
        assert_eq!(conf.get_i64("sortType", 0), 3);
        assert_eq!(conf.get_i64("missing", 42), 42);

        conf.set("sortType", "cardMod").unwrap();
        assert_eq!(conf.get_string("sortType", "noteFld"), "cardMod");
    }

    #[test]
    fn test_round_trip_and_change_tracking() {
        let mut conf = ConfigStore::load("").unwrap();
        assert!(!conf.is_changed());

        conf.set(KEY_TIME_LIMIT, 300).unwrap();
        assert!(conf.is_changed());

        let reloaded = ConfigStore::load(&conf.to_json().unwrap()).unwrap();
        assert_eq!(reloaded.get_i64(KEY_TIME_LIMIT, 0), 300);
        assert!(!reloaded.is_changed());

        assert!(conf.remove(KEY_TIME_LIMIT));
        assert!(!conf.remove(KEY_TIME_LIMIT));
        assert!(!conf.has(KEY_TIME_LIMIT));
    }
}
