use std::collections::{HashMap, HashSet};

use super::models::{Deck, DeckConfig, DEFAULT_CONF_ID, DEFAULT_DECK_ID};

/// In-memory view of every deck and deck-options group.
///
/// Mutations only mark the registry changed; the collection writes the JSON
/// blobs back when it saves. Operations that touch cards live on the
/// collection.
#[derive(Debug, Clone, Default)]
pub struct DeckRegistry {
    decks: HashMap<i64, Deck>,
    dconf: HashMap<i64, DeckConfig>,
    changed: bool,
}

impl DeckRegistry {
    pub fn load(decks_json: &str, dconf_json: &str) -> serde_json::Result<Self> {
        let decks: HashMap<String, Deck> = parse_map(decks_json)?;
        let dconf: HashMap<String, DeckConfig> = parse_map(dconf_json)?;
        Ok(Self {
            decks: decks.into_values().map(|d| (d.id, d)).collect(),
            dconf: dconf.into_values().map(|c| (c.id, c)).collect(),
            changed: false,
        })
    }

    /// Add the default deck and options group if absent.
    pub fn seed_defaults(&mut self) {
        if !self.dconf.contains_key(&DEFAULT_CONF_ID) {
            self.dconf
                .insert(DEFAULT_CONF_ID, DeckConfig::new(DEFAULT_CONF_ID, "Default"));
            self.changed = true;
        }
        if !self.decks.contains_key(&DEFAULT_DECK_ID) {
            self.decks
                .insert(DEFAULT_DECK_ID, Deck::new_normal(DEFAULT_DECK_ID, "Default"));
            self.changed = true;
        }
    }

    /// Serialize as `(decks, dconf)` blobs keyed by stringified id.
    pub fn to_json(&self) -> serde_json::Result<(String, String)> {
        let decks: HashMap<String, &Deck> =
            self.decks.iter().map(|(id, d)| (id.to_string(), d)).collect();
        let dconf: HashMap<String, &DeckConfig> =
            self.dconf.iter().map(|(id, c)| (id.to_string(), c)).collect();
        Ok((serde_json::to_string(&decks)?, serde_json::to_string(&dconf)?))
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn mark_flushed(&mut self) {
        self.changed = false;
    }

    /// Mark every locally changed deck and options group as synced.
    pub(crate) fn before_upload(&mut self) {
        for deck in self.decks.values_mut() {
            deck.usn = 0;
        }
        for conf in self.dconf.values_mut() {
            conf.usn = 0;
        }
        self.changed = true;
    }

    // ==================== Decks ====================

    /// Id of the deck called `name`, creating it (and missing parents) when
    /// `create` is set.
    pub fn id(&mut self, name: &str, create: bool, usn: i32, now: i64) -> Option<i64> {
        let name = normalize_name(name);
        if let Some(deck) = self.by_name(&name) {
            return Some(deck.id);
        }
        if !create {
            return None;
        }
        self.ensure_parents(&name, usn, now);
        let id = self.unique_id();
        let mut deck = Deck::new_normal(id, &name);
        deck.mtime = now;
        deck.usn = usn;
        self.decks.insert(id, deck);
        self.changed = true;
        Some(id)
    }

    /// Create a dynamic deck. `None` if a deck with that name already exists.
    pub fn new_dyn(&mut self, name: &str, usn: i32, now: i64) -> Option<i64> {
        let name = normalize_name(name);
        if self.by_name(&name).is_some() {
            return None;
        }
        self.ensure_parents(&name, usn, now);
        let id = self.unique_id();
        let mut deck = Deck::new_dynamic(id, &name);
        deck.mtime = now;
        deck.usn = usn;
        self.decks.insert(id, deck);
        self.changed = true;
        Some(id)
    }

    fn ensure_parents(&mut self, name: &str, usn: i32, now: i64) {
        let parts: Vec<&str> = name.split("::").collect();
        for depth in 1..parts.len() {
            let parent = parts[..depth].join("::");
            if self.by_name(&parent).is_none() {
                let id = self.unique_id();
                let mut deck = Deck::new_normal(id, &parent);
                deck.mtime = now;
                deck.usn = usn;
                self.decks.insert(id, deck);
                self.changed = true;
            }
        }
    }

    fn unique_id(&self) -> i64 {
        let mut id = chrono::Utc::now().timestamp_millis();
        while self.decks.contains_key(&id) {
            id += 1;
        }
        id
    }

    pub fn get(&self, did: i64) -> Option<&Deck> {
        self.decks.get(&did)
    }

    pub fn by_name(&self, name: &str) -> Option<&Deck> {
        self.decks
            .values()
            .find(|d| d.name.eq_ignore_ascii_case(name))
    }

    /// Store changes to an existing deck.
    pub fn update(&mut self, mut deck: Deck, usn: i32, now: i64) {
        deck.mtime = now;
        deck.usn = usn;
        self.decks.insert(deck.id, deck);
        self.changed = true;
    }

    /// Every deck sorted by name.
    pub fn all(&self) -> Vec<&Deck> {
        let mut decks: Vec<&Deck> = self.decks.values().collect();
        decks.sort_by(|a, b| a.name.cmp(&b.name));
        decks
    }

    pub fn all_names(&self, include_dyn: bool) -> Vec<String> {
        self.all()
            .into_iter()
            .filter(|d| include_dyn || !d.is_dyn())
            .map(|d| d.name.clone())
            .collect()
    }

    pub fn all_ids(&self) -> Vec<i64> {
        self.decks.keys().copied().collect()
    }

    pub fn all_dynamic_ids(&self) -> Vec<i64> {
        self.decks
            .values()
            .filter(|d| d.is_dyn())
            .map(|d| d.id)
            .collect()
    }

    pub fn all_normal_ids(&self) -> Vec<i64> {
        self.decks
            .values()
            .filter(|d| !d.is_dyn())
            .map(|d| d.id)
            .collect()
    }

    pub fn count(&self) -> usize {
        self.decks.len()
    }

    /// Missing decks count as normal.
    pub fn is_dyn(&self, did: i64) -> bool {
        self.decks.get(&did).map_or(false, Deck::is_dyn)
    }

    /// All descendants of `did` as `(name, id)`, sorted by name.
    pub fn children(&self, did: i64) -> Vec<(String, i64)> {
        let Some(deck) = self.decks.get(&did) else {
            return Vec::new();
        };
        let prefix = format!("{}::", deck.name);
        let mut out: Vec<(String, i64)> = self
            .decks
            .values()
            .filter(|d| d.name.starts_with(&prefix))
            .map(|d| (d.name.clone(), d.id))
            .collect();
        out.sort();
        out
    }

    /// Ancestors of `did`, closest last.
    pub fn parents(&self, did: i64) -> Vec<&Deck> {
        let Some(deck) = self.decks.get(&did) else {
            return Vec::new();
        };
        let parts = deck.path();
        (1..parts.len())
            .filter_map(|depth| self.by_name(&parts[..depth].join("::")))
            .collect()
    }

    /// Rename a deck and all its children. False when the target name is taken.
    pub fn rename(&mut self, did: i64, new_name: &str, usn: i32, now: i64) -> bool {
        let new_name = normalize_name(new_name);
        if self.by_name(&new_name).map_or(false, |d| d.id != did) {
            return false;
        }
        let Some(old_name) = self.decks.get(&did).map(|d| d.name.clone()) else {
            return false;
        };
        let old_prefix = format!("{}::", old_name);
        for deck in self.decks.values_mut() {
            if deck.id == did {
                deck.name = new_name.clone();
            } else if let Some(rest) = deck.name.strip_prefix(&old_prefix) {
                deck.name = format!("{}::{}", new_name, rest);
            } else {
                continue;
            }
            deck.mtime = now;
            deck.usn = usn;
        }
        self.ensure_parents(&new_name, usn, now);
        self.changed = true;
        true
    }

    /// Drop a deck record. Card handling is the caller's job.
    pub(crate) fn remove_entry(&mut self, did: i64) -> Option<Deck> {
        let removed = self.decks.remove(&did);
        if removed.is_some() {
            self.changed = true;
        }
        removed
    }

    // ==================== Options groups ====================

    /// Options for a normal deck; `None` for dynamic or missing decks.
    pub fn conf_for_did(&self, did: i64) -> Option<&DeckConfig> {
        let deck = self.decks.get(&did)?;
        let conf_id = deck.conf?;
        self.dconf
            .get(&conf_id)
            .or_else(|| self.dconf.get(&DEFAULT_CONF_ID))
    }

    pub fn get_conf(&self, conf_id: i64) -> Option<&DeckConfig> {
        self.dconf.get(&conf_id)
    }

    pub fn all_conf(&self) -> Vec<&DeckConfig> {
        let mut confs: Vec<&DeckConfig> = self.dconf.values().collect();
        confs.sort_by_key(|c| c.id);
        confs
    }

    /// Create an options group, copying `clone_from` if given.
    pub fn add_conf(&mut self, name: &str, clone_from: Option<i64>, usn: i32, now: i64) -> i64 {
        let mut id = now.max(DEFAULT_CONF_ID + 1);
        while self.dconf.contains_key(&id) {
            id += 1;
        }
        let mut conf = clone_from
            .and_then(|src| self.dconf.get(&src).cloned())
            .unwrap_or_else(|| DeckConfig::new(id, name));
        conf.id = id;
        conf.name = name.to_string();
        conf.mtime = now;
        conf.usn = usn;
        self.dconf.insert(id, conf);
        self.changed = true;
        id
    }

    /// Remove an options group; decks using it fall back to the default.
    /// Returns the decks that were reset. The default group cannot be removed.
    pub fn rem_conf(&mut self, conf_id: i64, usn: i32, now: i64) -> Vec<i64> {
        if conf_id == DEFAULT_CONF_ID || self.dconf.remove(&conf_id).is_none() {
            return Vec::new();
        }
        let mut reset = Vec::new();
        for deck in self.decks.values_mut() {
            if deck.conf == Some(conf_id) {
                deck.conf = Some(DEFAULT_CONF_ID);
                deck.mtime = now;
                deck.usn = usn;
                reset.push(deck.id);
            }
        }
        self.changed = true;
        reset
    }

    /// Point a normal deck at an options group. Ignored for dynamic decks.
    pub fn set_conf(&mut self, did: i64, conf_id: i64, usn: i32, now: i64) -> bool {
        if !self.dconf.contains_key(&conf_id) {
            return false;
        }
        match self.decks.get_mut(&did) {
            Some(deck) if !deck.is_dyn() => {
                deck.conf = Some(conf_id);
                deck.mtime = now;
                deck.usn = usn;
                self.changed = true;
                true
            }
            _ => false,
        }
    }

    // ==================== Repairs ====================

    /// Remove options references from dynamic decks. Returns how many changed.
    pub(crate) fn strip_conf_from_dynamic(&mut self, usn: i32, now: i64) -> usize {
        let mut fixed = 0;
        for deck in self.decks.values_mut() {
            if deck.is_dyn() && deck.conf.is_some() {
                deck.conf = None;
                deck.mtime = now;
                deck.usn = usn;
                fixed += 1;
            }
        }
        if fixed > 0 {
            self.changed = true;
        }
        fixed
    }

    /// Point normal decks with missing or dangling options at the default group.
    pub(crate) fn reset_dangling_conf(&mut self, usn: i32, now: i64) -> usize {
        if !self.dconf.contains_key(&DEFAULT_CONF_ID) {
            self.dconf
                .insert(DEFAULT_CONF_ID, DeckConfig::new(DEFAULT_CONF_ID, "Default"));
            self.changed = true;
        }
        let mut fixed = 0;
        for deck in self.decks.values_mut() {
            if deck.is_dyn() {
                continue;
            }
            let dangling = match deck.conf {
                Some(conf_id) => !self.dconf.contains_key(&conf_id),
                None => true,
            };
            if dangling {
                deck.conf = Some(DEFAULT_CONF_ID);
                deck.mtime = now;
                deck.usn = usn;
                fixed += 1;
            }
        }
        if fixed > 0 {
            self.changed = true;
        }
        fixed
    }

    /// Fix malformed names, duplicate names and missing parents.
    pub fn check_integrity(&mut self, usn: i32, now: i64) -> Vec<String> {
        let mut problems = Vec::new();

        if !self.decks.contains_key(&DEFAULT_DECK_ID) {
            self.decks
                .insert(DEFAULT_DECK_ID, Deck::new_normal(DEFAULT_DECK_ID, "Default"));
            self.changed = true;
            problems.push("Recreated missing default deck.".to_string());
        }

        let mut ids: Vec<i64> = self.decks.keys().copied().collect();
        ids.sort();

        let mut seen: HashSet<String> = HashSet::new();
        for did in ids {
            let Some(deck) = self.decks.get_mut(&did) else {
                continue;
            };
            let mut name = normalize_name(&deck.name);
            if name.is_empty() {
                name = format!("Deck {}", did);
            }
            if name != deck.name {
                problems.push(format!("Fixed invalid deck name \"{}\".", deck.name));
            }
            if seen.contains(&name.to_lowercase()) {
                let renamed = format!("{}+{}", name, did);
                problems.push(format!("Renamed duplicate deck \"{}\" to \"{}\".", name, renamed));
                name = renamed;
            }
            seen.insert(name.to_lowercase());
            if name != deck.name {
                deck.name = name;
                deck.mtime = now;
                deck.usn = usn;
                self.changed = true;
            }
        }

        let names: Vec<String> = self.decks.values().map(|d| d.name.clone()).collect();
        for name in names {
            let parts: Vec<&str> = name.split("::").collect();
            for depth in 1..parts.len() {
                let parent = parts[..depth].join("::");
                if self.by_name(&parent).is_none() {
                    problems.push(format!("Created missing parent deck \"{}\".", parent));
                    self.ensure_parents(&name, usn, now);
                    break;
                }
            }
        }

        problems
    }
}

/// Trim each `::` component and drop empty ones.
pub fn normalize_name(name: &str) -> String {
    name.split("::")
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("::")
}

fn parse_map<T: serde::de::DeserializeOwned>(json: &str) -> serde_json::Result<HashMap<String, T>> {
    if json.trim().is_empty() {
        return Ok(HashMap::new());
    }
    serde_json::from_str(json)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> DeckRegistry {
        let mut decks = DeckRegistry::default();
        decks.seed_defaults();
        decks
    }

    #[test]
    fn test_id_creates_parents() {
        let mut decks = seeded();
        let did = decks.id("Lang::Spanish::Verbs", true, -1, 100).unwrap();
        assert!(decks.by_name("Lang").is_some());
        assert!(decks.by_name("lang::spanish").is_some());
        assert_eq!(decks.get(did).unwrap().name, "Lang::Spanish::Verbs");
        assert_eq!(decks.parents(did).len(), 2);
        assert_eq!(decks.id("Missing", false, -1, 100), None);
    }

    #[test]
    fn test_dynamic_deck_flags() {
        let mut decks = seeded();
        let dyn_id = decks.new_dyn("Filtered", -1, 100).unwrap();
        assert!(decks.is_dyn(dyn_id));
        assert!(decks.conf_for_did(dyn_id).is_none());
        assert_eq!(decks.all_dynamic_ids(), vec![dyn_id]);
        assert!(decks.new_dyn("filtered", -1, 100).is_none());
        assert_eq!(decks.all_names(false), vec!["Default".to_string()]);
    }

    #[test]
    fn test_rename_moves_children() {
        let mut decks = seeded();
        let parent = decks.id("A", true, -1, 1).unwrap();
        let child = decks.id("A::B", true, -1, 1).unwrap();
        assert!(decks.rename(parent, "Z", -1, 2));
        assert_eq!(decks.get(child).unwrap().name, "Z::B");
        assert_eq!(decks.children(parent), vec![("Z::B".to_string(), child)]);
    }

    #[test]
    fn test_rem_conf_resets_decks() {
        let mut decks = seeded();
        let did = decks.id("Other", true, -1, 1).unwrap();
        let conf = decks.add_conf("Hard", Some(DEFAULT_CONF_ID), -1, 5);
        assert!(decks.set_conf(did, conf, -1, 6));
        assert_eq!(decks.conf_for_did(did).unwrap().name, "Hard");

        assert_eq!(decks.rem_conf(conf, -1, 7), vec![did]);
        assert_eq!(decks.conf_for_did(did).unwrap().id, DEFAULT_CONF_ID);
        assert!(decks.rem_conf(DEFAULT_CONF_ID, -1, 8).is_empty());
    }

    #[test]
    fn test_repairs() {
        let mut decks = seeded();
        let dyn_id = decks.new_dyn("Filtered", -1, 1).unwrap();
        let mut broken = decks.get(dyn_id).unwrap().clone();
        broken.conf = Some(DEFAULT_CONF_ID);
        decks.update(broken, -1, 2);
        let normal = decks.id("Normal", true, -1, 1).unwrap();
        let mut dangling = decks.get(normal).unwrap().clone();
        dangling.conf = Some(999);
        decks.update(dangling, -1, 2);

        assert_eq!(decks.strip_conf_from_dynamic(-1, 3), 1);
        assert_eq!(decks.reset_dangling_conf(-1, 3), 1);
        assert_eq!(decks.strip_conf_from_dynamic(-1, 4), 0);
        assert_eq!(decks.reset_dangling_conf(-1, 4), 0);
    }

    #[test]
    fn test_check_integrity_fixes_names() {
        let mut decks = seeded();
        let did = decks.id("Parent::Child", true, -1, 1).unwrap();
        let parent = decks.by_name("Parent").unwrap().id;
        decks.remove_entry(parent);
        let dup = decks.id("Other", true, -1, 1).unwrap();
        let mut renamed = decks.get(dup).unwrap().clone();
        renamed.name = "default".to_string();
        decks.update(renamed, -1, 2);

        let problems = decks.check_integrity(-1, 3);
        assert_eq!(problems.len(), 2);
        assert!(decks.by_name("Parent").is_some());
        assert_eq!(decks.get(did).unwrap().name, "Parent::Child");
        assert!(decks.check_integrity(-1, 4).is_empty());
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name(" A :: ::B "), "A::B");
        assert_eq!(normalize_name("::"), "");
    }
}
