//! Tag registry.
//!
//! A deduplicated cache of every tag string used by notes, kept for
//! autocompletion. Tags are added as notes are saved and only pruned by a
//! full rebuild (`register_notes(db, None, ..)`).

use std::collections::BTreeMap;

use rusqlite::params;

use crate::storage::{ids2str, Db, Result};

/// Deduplicated set of known tags, mapped to the usn they were registered at.
#[derive(Debug, Clone, Default)]
pub struct TagRegistry {
    tags: BTreeMap<String, i32>,
    changed: bool,
}

impl TagRegistry {
    pub fn load(json: &str) -> serde_json::Result<Self> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(Self {
            tags: serde_json::from_str(json)?,
            changed: false,
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.tags)
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn mark_flushed(&mut self) {
        self.changed = false;
    }

    pub(crate) fn before_upload(&mut self) {
        for usn in self.tags.values_mut() {
            *usn = 0;
        }
        self.changed = true;
    }

    /// Add any tags not already known (case-insensitive). Returns true if new
    /// tags were found.
    pub fn register(&mut self, tags: &[String], usn: i32) -> bool {
        let mut found = false;
        for tag in tags {
            if tag.is_empty() || self.contains(tag) {
                continue;
            }
            self.tags.insert(tag.clone(), usn);
            found = true;
        }
        if found {
            self.changed = true;
        }
        found
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.tags.keys().any(|t| t.eq_ignore_ascii_case(tag))
    }

    pub fn all(&self) -> Vec<String> {
        self.tags.keys().cloned().collect()
    }

    /// Known tags starting with `prefix`, ignoring case.
    pub fn completions(&self, prefix: &str) -> Vec<String> {
        let prefix = prefix.to_lowercase();
        self.tags
            .keys()
            .filter(|t| t.to_lowercase().starts_with(&prefix))
            .cloned()
            .collect()
    }

    /// Scan notes and register their tags. With `nids == None` the registry is
    /// cleared first and rebuilt from every note.
    pub fn register_notes(&mut self, db: &Db, nids: Option<&[i64]>, usn: i32) -> Result<()> {
        let rows: Vec<String> = match nids {
            Some(ids) => db.list(
                &format!("SELECT DISTINCT tags FROM notes WHERE id IN {}", ids2str(ids)),
                [],
            )?,
            None => {
                self.tags.clear();
                self.changed = true;
                db.list("SELECT DISTINCT tags FROM notes", [])?
            }
        };

        let mut found = Vec::new();
        for row in rows {
            found.extend(split(&row));
        }
        self.register(&canonify(&found), usn);
        Ok(())
    }

    /// Add or remove `tags` on the given notes. Returns the number of notes
    /// touched.
    pub fn bulk_update(
        &mut self,
        db: &Db,
        nids: &[i64],
        tags: &[String],
        add: bool,
        usn: i32,
        now: i64,
    ) -> Result<usize> {
        if tags.is_empty() || nids.is_empty() {
            return Ok(0);
        }
        if add {
            self.register(tags, usn);
        }

        let rows: Vec<(i64, String)> = db.query_map(
            &format!("SELECT id, tags FROM notes WHERE id IN {}", ids2str(nids)),
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let mut stmt = db
            .conn()
            .prepare("UPDATE notes SET tags = ?1, mod = ?2, usn = ?3 WHERE id = ?4")?;
        let mut touched = 0;
        for (nid, current) in rows {
            let before = split(&current);
            let after = if add {
                add_to_list(&before, tags)
            } else {
                remove_from_list(&before, tags)
            };
            if after == before {
                continue;
            }
            stmt.execute(params![join(&after), now, usn, nid])?;
            touched += 1;
        }
        Ok(touched)
    }
}

/// Split a stored tag string into tags.
pub fn split(tags: &str) -> Vec<String> {
    tags.split_whitespace().map(str::to_string).collect()
}

/// Join tags into the stored, space-padded form (`" a b "`).
pub fn join(tags: &[String]) -> String {
    if tags.is_empty() {
        return String::new();
    }
    format!(" {} ", tags.join(" "))
}

/// Strip duplicates (case-insensitive), drop empties and sort.
pub fn canonify(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.trim().replace('\u{3000}', " ");
        if tag.is_empty() || tag.contains(' ') {
            continue;
        }
        if !in_list(&tag, &out) {
            out.push(tag);
        }
    }
    out.sort_by_key(|t| t.to_lowercase());
    out
}

pub fn in_list(tag: &str, list: &[String]) -> bool {
    list.iter().any(|t| t.eq_ignore_ascii_case(tag))
}

fn add_to_list(current: &[String], add: &[String]) -> Vec<String> {
    let mut out = current.to_vec();
    out.extend(add.iter().cloned());
    canonify(&out)
}

fn remove_from_list(current: &[String], remove: &[String]) -> Vec<String> {
    current
        .iter()
        .filter(|t| !in_list(t, remove))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_split_and_join() {
        assert_eq!(split("  one two  three "), tags(&["one", "two", "three"]));
        assert_eq!(join(&tags(&["a", "b"])), " a b ");
        assert_eq!(join(&[]), "");
    }

    #[test]
    fn test_canonify_dedupes_case_insensitively() {
        let result = canonify(&tags(&["Verb", "noun", "verb", ""]));
        assert_eq!(result, tags(&["noun", "Verb"]));
    }

    #[test]
    fn test_register_and_complete() {
        let mut registry = TagRegistry::default();
        assert!(registry.register(&tags(&["spanish", "Spain"]), -1));
        assert!(!registry.register(&tags(&["SPANISH"]), -1));

        let completions = registry.completions("sp");
        assert_eq!(completions, tags(&["Spain", "spanish"]));
        assert!(registry.completions("x").is_empty());
    }

    #[test]
    fn test_json_round_trip() {
        let mut registry = TagRegistry::default();
        registry.register(&tags(&["leech"]), 3);
        let loaded = TagRegistry::load(&registry.to_json().unwrap()).unwrap();
        assert_eq!(loaded.all(), tags(&["leech"]));
        assert!(!loaded.is_changed());
    }

    #[test]
    fn test_list_updates() {
        let current = tags(&["a", "b"]);
        assert_eq!(add_to_list(&current, &tags(&["B", "c"])), tags(&["a", "b", "c"]));
        assert_eq!(remove_from_list(&current, &tags(&["A"])), tags(&["b"]));
    }
}
