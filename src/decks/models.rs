//! Deck and deck-options records as stored in the `col.decks` / `col.dconf`
//! JSON blobs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Id of the deck that can never be removed.
pub const DEFAULT_DECK_ID: i64 = 1;

/// Id of the options group every normal deck falls back to.
pub const DEFAULT_CONF_ID: i64 = 1;

/// A named container for cards.
///
/// Dynamic (filtered) decks borrow cards from their home decks and carry no
/// options group; normal decks always reference one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deck {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub desc: String,
    /// 1 for dynamic decks, 0 for normal ones.
    #[serde(rename = "dyn", default)]
    pub dynamic: u8,
    /// Options group, normal decks only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conf: Option<i64>,
    #[serde(rename = "mod", default)]
    pub mtime: i64,
    #[serde(default)]
    pub usn: i32,
    #[serde(default)]
    pub collapsed: bool,
    /// Keys this crate doesn't interpret, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Deck {
    pub fn new_normal(id: i64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            desc: String::new(),
            dynamic: 0,
            conf: Some(DEFAULT_CONF_ID),
            mtime: 0,
            usn: 0,
            collapsed: false,
            extra: Map::new(),
        }
    }

    pub fn new_dynamic(id: i64, name: &str) -> Self {
        let mut deck = Self::new_normal(id, name);
        deck.dynamic = 1;
        deck.conf = None;
        deck.extra.insert("resched".to_string(), Value::Bool(true));
        deck.extra.insert("terms".to_string(), Value::Array(Vec::new()));
        deck
    }

    pub fn is_dyn(&self) -> bool {
        self.dynamic != 0
    }

    /// Name components split on `::`.
    pub fn path(&self) -> Vec<&str> {
        self.name.split("::").collect()
    }
}

/// Daily limits and scheduling options shared by normal decks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeckConfig {
    pub id: i64,
    pub name: String,
    #[serde(rename = "new", default)]
    pub new_cards: NewCardOptions,
    #[serde(rename = "rev", default)]
    pub reviews: ReviewOptions,
    #[serde(default)]
    pub timer: i32,
    #[serde(rename = "maxTaken", default = "default_max_taken")]
    pub max_taken: i32,
    #[serde(rename = "mod", default)]
    pub mtime: i64,
    #[serde(default)]
    pub usn: i32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_max_taken() -> i32 {
    60
}

impl DeckConfig {
    pub fn new(id: i64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            new_cards: NewCardOptions::default(),
            reviews: ReviewOptions::default(),
            timer: 0,
            max_taken: default_max_taken(),
            mtime: 0,
            usn: 0,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCardOptions {
    #[serde(default = "default_new_per_day")]
    pub per_day: i32,
    #[serde(default)]
    pub bury: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_new_per_day() -> i32 {
    20
}

impl Default for NewCardOptions {
    fn default() -> Self {
        Self {
            per_day: default_new_per_day(),
            bury: false,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewOptions {
    #[serde(default = "default_reviews_per_day")]
    pub per_day: i32,
    #[serde(default = "default_max_ivl")]
    pub max_ivl: i32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_reviews_per_day() -> i32 {
    200
}

fn default_max_ivl() -> i32 {
    36500
}

impl Default for ReviewOptions {
    fn default() -> Self {
        Self {
            per_day: default_reviews_per_day(),
            max_ivl: default_max_ivl(),
            extra: Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dynamic_deck_has_no_conf() {
        let deck = Deck::new_dynamic(5, "Filtered Deck 1");
        assert!(deck.is_dyn());
        let json = serde_json::to_value(&deck).unwrap();
        assert_eq!(json["dyn"], 1);
        assert!(json.get("conf").is_none());
    }

    #[test]
    fn test_unknown_keys_survive() {
        let raw = r#"{"id": 1, "name": "Default", "dyn": 0, "conf": 1, "newToday": [0, 3]}"#;
        let deck: Deck = serde_json::from_str(raw).unwrap();
        assert_eq!(deck.extra["newToday"], serde_json::json!([0, 3]));
        let back = serde_json::to_value(&deck).unwrap();
        assert_eq!(back["newToday"], serde_json::json!([0, 3]));
    }

    #[test]
    fn test_path() {
        let deck = Deck::new_normal(2, "Lang::Spanish::Verbs");
        assert_eq!(deck.path(), vec!["Lang", "Spanish", "Verbs"]);
    }
}
