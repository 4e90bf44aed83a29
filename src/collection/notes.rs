use std::collections::HashMap;

use regex::{NoExpand, Regex, RegexBuilder};
use rusqlite::params;
use rusqlite::types::Value;

use super::{now_secs, Collection, CollectionError, Result};
use crate::notes::{join_fields, split_fields, DupeOrEmpty, Note, NOTE_COLUMNS};
use crate::notetypes::Model;
use crate::storage::ids2str;
use crate::template::html::{field_checksum, strip_html_media};
use crate::undo::UndoAction;

/// Grave type tags.
pub(crate) const GRAVE_CARD: i64 = 0;
pub(crate) const GRAVE_NOTE: i64 = 1;
pub(crate) const GRAVE_DECK: i64 = 2;

const MARKED_TAG: &str = "marked";

/// Sort value and checksum for a note's sort field.
fn sort_cache(fields: &[String], sort_idx: usize) -> (String, i64) {
    let value = fields.get(sort_idx).map(String::as_str).unwrap_or("");
    (strip_html_media(value), field_checksum(value))
}

fn check_field_count(note: &Note, model: &Model) -> Result<()> {
    if note.fields.len() != model.flds.len() {
        return Err(CollectionError::InvalidOperation(format!(
            "note has {} fields, note type expects {}",
            note.fields.len(),
            model.flds.len()
        )));
    }
    Ok(())
}

impl Collection {
    /// A blank note of model `mid`.
    pub fn new_note(&mut self, mid: i64) -> Result<Note> {
        let model = self.model(mid)?;
        Ok(Note::new(&model))
    }

    pub fn get_note(&self, nid: i64) -> Result<Note> {
        self.db()?
            .query_map(
                &format!("SELECT {} FROM notes WHERE id = ?1", NOTE_COLUMNS),
                [nid],
                Note::from_row,
            )?
            .into_iter()
            .next()
            .ok_or(CollectionError::NoteNotFound(nid))
    }

    /// Write a note row, assigning an id if it has none. `mtime` defaults to
    /// now. Registers the note's tags.
    pub(crate) fn flush_note(&mut self, note: &mut Note, mtime: Option<i64>) -> Result<()> {
        let model = self.model(note.mid)?;
        let (sfld, csum) = sort_cache(&note.fields, model.sort_idx());
        if note.id == 0 {
            note.id = self.timestamp_id("notes")?;
        }
        note.mtime = mtime.unwrap_or_else(now_secs);
        note.usn = self.usn();

        self.db()?.execute(
            "INSERT OR REPLACE INTO notes VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                note.id,
                note.guid,
                note.mid,
                note.mtime,
                note.usn,
                note.string_tags(),
                note.joined_fields(),
                sfld,
                csum,
                note.flags,
                note.data
            ],
        )?;
        let usn = self.usn();
        self.tags.register(&note.tags, usn);
        Ok(())
    }

    /// Add a note and generate its cards. Returns the number of cards
    /// created; a note that would have no cards is not added and `0` is
    /// returned.
    pub fn add_note(&mut self, note: &mut Note) -> Result<usize> {
        let model = self.model(note.mid)?;
        check_field_count(note, &model)?;
        let (required, _) =
            crate::cardgen::required_ords(&model, &note.fields, self.empty_policy.as_ref());
        if required.is_empty() {
            return Ok(0);
        }

        self.transact(|col| {
            col.flush_note(note, None)?;
            let added = col
                .generate_cards(&[note.id], note.mid, None)?
                .map_or(0, |generation| generation.added);
            col.log(&format!("added note {} with {} cards", note.id, added));
            Ok(added)
        })
    }

    /// Save edits to an existing note and generate any newly required cards.
    /// Returns the ids of cards that are no longer required; they are left in
    /// place for the caller to inspect and remove.
    pub fn update_note(&mut self, note: &mut Note) -> Result<Vec<i64>> {
        self.get_note(note.id)?;
        check_field_count(note, &self.model(note.mid)?)?;
        self.transact(|col| {
            col.flush_note(note, None)?;
            Ok(col
                .generate_cards(&[note.id], note.mid, None)?
                .map(|generation| generation.to_remove)
                .unwrap_or_default())
        })
    }

    /// Delete notes and their cards, logging graves for both.
    pub fn rem_notes(&mut self, nids: &[i64]) -> Result<()> {
        if nids.is_empty() {
            return Ok(());
        }
        self.transact(|col| {
            let cids: Vec<i64> = col.db()?.list(
                &format!("SELECT id FROM cards WHERE nid IN {}", ids2str(nids)),
                [],
            )?;
            col.rem_cards(&cids, false)?;
            col.rem_notes_raw(nids)
        })
    }

    /// Delete note rows only. Graves are written before the rows go.
    pub(crate) fn rem_notes_raw(&mut self, nids: &[i64]) -> Result<()> {
        if nids.is_empty() {
            return Ok(());
        }
        self.add_graves(nids, GRAVE_NOTE)?;
        self.db()?.execute(
            &format!("DELETE FROM notes WHERE id IN {}", ids2str(nids)),
            [],
        )?;
        self.log(&format!("removed {} notes", nids.len()));
        Ok(())
    }

    pub(crate) fn add_graves(&self, oids: &[i64], kind: i64) -> Result<()> {
        let usn = self.usn() as i64;
        let rows: Vec<Vec<Value>> = oids
            .iter()
            .map(|oid| vec![Value::Integer(usn), Value::Integer(*oid), Value::Integer(kind)])
            .collect();
        self.db()?.insert_rows("graves", 3, &rows)?;
        Ok(())
    }

    /// Delete one note, recording it for undo.
    pub fn delete_note(&mut self, nid: i64) -> Result<()> {
        let note = self.get_note(nid)?;
        let cards = self.cards_of_note(nid)?;
        self.rem_notes(&[nid])?;
        self.mark_undo(UndoAction::DeleteNote { note, cards });
        Ok(())
    }

    /// Toggle the `marked` tag, recording the previous state for undo.
    pub fn toggle_mark(&mut self, nid: i64) -> Result<bool> {
        let mut note = self.get_note(nid)?;
        self.mark_undo(UndoAction::NoteEdit {
            label: "Mark Note".to_string(),
            note: note.clone(),
        });
        let marked = !note.has_tag(MARKED_TAG);
        if marked {
            note.add_tag(MARKED_TAG);
        } else {
            note.remove_tag(MARKED_TAG);
        }
        self.flush_note(&mut note, None)?;
        Ok(marked)
    }

    /// Whether `note`'s sort field is blank or already used by another note
    /// of the same model.
    pub fn note_dupe_or_empty(&mut self, note: &Note) -> Result<DupeOrEmpty> {
        let model = self.model(note.mid)?;
        let sort_idx = model.sort_idx();
        let value = note.fields.get(sort_idx).map(String::as_str).unwrap_or("");
        let stripped = strip_html_media(value);
        if stripped.trim().is_empty() {
            return Ok(DupeOrEmpty::Empty);
        }

        let candidates: Vec<String> = self.db()?.list(
            "SELECT flds FROM notes WHERE csum = ?1 AND id != ?2 AND mid = ?3",
            params![field_checksum(value), note.id, note.mid],
        )?;
        for flds in candidates {
            let fields = split_fields(&flds);
            let other = fields.get(sort_idx).map(String::as_str).unwrap_or("");
            if strip_html_media(other) == stripped {
                return Ok(DupeOrEmpty::Duplicate);
            }
        }
        Ok(DupeOrEmpty::Normal)
    }

    /// Replace `search` with `replacement` in the given notes. `search` is a
    /// literal unless `regex` is set; `field` restricts the change to one
    /// field by name. Returns the number of notes changed.
    pub fn find_replace(
        &mut self,
        nids: &[i64],
        search: &str,
        replacement: &str,
        regex: bool,
        field: Option<&str>,
        ignore_case: bool,
    ) -> Result<usize> {
        if nids.is_empty() {
            return Ok(0);
        }
        let pattern = if regex {
            search.to_string()
        } else {
            regex::escape(search)
        };
        let re: Regex = RegexBuilder::new(&pattern)
            .case_insensitive(ignore_case)
            .build()
            .map_err(|e| CollectionError::InvalidOperation(e.to_string()))?;

        let mut rows: Vec<(i64, i64, String)> = Vec::new();
        for chunk in nids.chunks(self.read_chunk) {
            rows.extend(self.db()?.query_map(
                &format!("SELECT id, mid, flds FROM notes WHERE id IN {}", ids2str(chunk)),
                [],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, String>(2)?)),
            )?);
        }

        // mid -> index of the restricted field, None when the model lacks it
        let mut field_index: HashMap<i64, Option<usize>> = HashMap::new();
        let mut changed: Vec<(i64, String)> = Vec::new();
        for (nid, mid, flds) in rows {
            let target = match field {
                Some(name) => {
                    if !field_index.contains_key(&mid) {
                        let idx = self
                            .models()?
                            .get(mid)
                            .and_then(|m| m.field_map().get(name).copied());
                        field_index.insert(mid, idx);
                    }
                    match field_index.get(&mid).copied().flatten() {
                        Some(idx) => Some(idx),
                        None => continue,
                    }
                }
                None => None,
            };

            let mut fields = split_fields(&flds);
            for (idx, value) in fields.iter_mut().enumerate() {
                if target.map_or(true, |t| t == idx) {
                    let replaced = if regex {
                        re.replace_all(value, replacement).into_owned()
                    } else {
                        re.replace_all(value, NoExpand(replacement)).into_owned()
                    };
                    *value = replaced;
                }
            }
            let joined = join_fields(&fields);
            if joined != flds {
                changed.push((nid, joined));
            }
        }

        if changed.is_empty() {
            return Ok(0);
        }
        let usn = self.usn();
        let count = changed.len();
        self.transact(|col| {
            {
                let mut stmt = col
                    .db()?
                    .conn()
                    .prepare("UPDATE notes SET flds = ?1, mod = ?2, usn = ?3 WHERE id = ?4")?;
                for (nid, flds) in &changed {
                    stmt.execute(params![flds, now_secs(), usn, nid])?;
                }
            }
            let ids: Vec<i64> = changed.iter().map(|(nid, _)| *nid).collect();
            col.update_field_cache(&ids)
        })?;
        Ok(count)
    }

    /// Recompute the cached sort field and checksum for `nids`.
    pub fn update_field_cache(&mut self, nids: &[i64]) -> Result<()> {
        let sort_idx: HashMap<i64, usize> = self
            .models()?
            .all()
            .into_iter()
            .map(|m| (m.id, m.sort_idx()))
            .collect();

        let db = self.db()?;
        let mut stmt = db
            .conn()
            .prepare("UPDATE notes SET sfld = ?1, csum = ?2 WHERE id = ?3")?;
        for chunk in nids.chunks(self.read_chunk) {
            let rows: Vec<(i64, i64, String)> = db.query_map(
                &format!("SELECT id, mid, flds FROM notes WHERE id IN {}", ids2str(chunk)),
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;
            for (nid, mid, flds) in rows {
                let Some(idx) = sort_idx.get(&mid) else {
                    continue;
                };
                let (sfld, csum) = sort_cache(&split_fields(&flds), *idx);
                stmt.execute(params![sfld, csum, nid])?;
            }
        }
        Ok(())
    }

    /// Add tags to notes. Returns how many notes changed.
    pub fn add_tags(&mut self, nids: &[i64], tags: &[String]) -> Result<usize> {
        let usn = self.usn();
        let db = self.db.as_ref().ok_or(CollectionError::Closed)?;
        Ok(self.tags.bulk_update(db, nids, tags, true, usn, now_secs())?)
    }

    /// Remove tags from notes. Returns how many notes changed.
    pub fn rem_tags(&mut self, nids: &[i64], tags: &[String]) -> Result<usize> {
        let usn = self.usn();
        let db = self.db.as_ref().ok_or(CollectionError::Closed)?;
        Ok(self.tags.bulk_update(db, nids, tags, false, usn, now_secs())?)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::open_test_collection;
    use super::*;

    fn basic_mid(col: &mut Collection) -> i64 {
        col.models().unwrap().by_name("Basic").unwrap().id
    }

    fn add(col: &mut Collection, front: &str, back: &str) -> Note {
        let mid = basic_mid(col);
        let mut note = col.new_note(mid).unwrap();
        note.fields = vec![front.to_string(), back.to_string()];
        assert_eq!(col.add_note(&mut note).unwrap(), 1);
        note
    }

    #[test]
    fn test_add_note_writes_cache_and_tags() {
        let (mut col, _temp) = open_test_collection();
        let mid = basic_mid(&mut col);
        let mut note = col.new_note(mid).unwrap();
        note.fields = vec!["<i>Hello</i>".to_string(), "World".to_string()];
        note.tags = vec!["greeting".to_string()];
        assert_eq!(col.add_note(&mut note).unwrap(), 1);

        let (sfld, csum): (String, i64) = col
            .db()
            .unwrap()
            .conn()
            .query_row("SELECT sfld, csum FROM notes WHERE id = ?1", [note.id], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(sfld, "Hello");
        assert_eq!(csum, field_checksum("Hello"));
        assert!(col.tags().contains("greeting"));

        let loaded = col.get_note(note.id).unwrap();
        assert_eq!(loaded.fields, note.fields);
        assert_eq!(loaded.tags, vec!["greeting".to_string()]);
    }

    #[test]
    fn test_note_without_cards_is_not_added() {
        let (mut col, _temp) = open_test_collection();
        let mid = basic_mid(&mut col);
        let mut note = col.new_note(mid).unwrap();
        assert_eq!(col.add_note(&mut note).unwrap(), 0);
        assert_eq!(col.note_count().unwrap(), 0);
    }

    #[test]
    fn test_wrong_field_count_rejected() {
        let (mut col, _temp) = open_test_collection();
        let mid = basic_mid(&mut col);
        let mut note = col.new_note(mid).unwrap();
        note.fields = vec!["only one".to_string()];
        assert!(matches!(
            col.add_note(&mut note),
            Err(CollectionError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_update_rejects_wrong_field_count() {
        let (mut col, _temp) = open_test_collection();
        let mut note = add(&mut col, "front", "back");
        note.fields = vec!["only".to_string()];
        assert!(matches!(
            col.update_note(&mut note),
            Err(CollectionError::InvalidOperation(_))
        ));
        let stored = col.get_note(note.id).unwrap();
        assert_eq!(stored.fields, vec!["front".to_string(), "back".to_string()]);
    }

    #[test]
    fn test_dupe_or_empty() {
        let (mut col, _temp) = open_test_collection();
        add(&mut col, "capital of France", "Paris");
        let mid = basic_mid(&mut col);

        let mut candidate = col.new_note(mid).unwrap();
        assert_eq!(col.note_dupe_or_empty(&candidate).unwrap(), DupeOrEmpty::Empty);
        candidate.fields[0] = "<b>capital of France</b>".to_string();
        assert_eq!(col.note_dupe_or_empty(&candidate).unwrap(), DupeOrEmpty::Duplicate);
        candidate.fields[0] = "capital of Spain".to_string();
        assert_eq!(col.note_dupe_or_empty(&candidate).unwrap(), DupeOrEmpty::Normal);
    }

    #[test]
    fn test_rem_notes_logs_graves_first() {
        let (mut col, _temp) = open_test_collection();
        let note = add(&mut col, "q", "a");
        let cids = col.card_ids_of_note(note.id).unwrap();

        col.rem_notes(&[note.id]).unwrap();
        assert_eq!(col.note_count().unwrap(), 0);
        assert_eq!(col.card_count().unwrap(), 0);

        let graves: Vec<(i64, i64)> = col
            .db()
            .unwrap()
            .query_map("SELECT oid, type FROM graves ORDER BY type", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(graves, vec![(cids[0], GRAVE_CARD), (note.id, GRAVE_NOTE)]);
    }

    #[test]
    fn test_rem_notes_leaves_other_cards() {
        let (mut col, _temp) = open_test_collection();
        let doomed = add(&mut col, "q1", "a1");
        let kept = add(&mut col, "q2", "a2");
        col.rem_notes(&[doomed.id]).unwrap();
        assert_eq!(col.card_ids_of_note(kept.id).unwrap().len(), 1);
    }

    #[test]
    fn test_find_replace() {
        let (mut col, _temp) = open_test_collection();
        let a = add(&mut col, "cat", "a small cat");
        let b = add(&mut col, "dog", "not a Cat");

        let changed = col
            .find_replace(&[a.id, b.id], "cat", "lion", false, Some("Back"), true)
            .unwrap();
        assert_eq!(changed, 2);
        assert_eq!(col.get_note(a.id).unwrap().fields, vec!["cat", "a small lion"]);
        assert_eq!(col.get_note(b.id).unwrap().fields, vec!["dog", "not a lion"]);

        let changed = col
            .find_replace(&[a.id], r"^(\w+)$", "big $1", true, None, false)
            .unwrap();
        assert_eq!(changed, 1);
        let note = col.get_note(a.id).unwrap();
        assert_eq!(note.fields[0], "big cat");
        let sfld: String = col
            .db()
            .unwrap()
            .scalar("SELECT sfld FROM notes WHERE id = ?1", [a.id])
            .unwrap();
        assert_eq!(sfld, "big cat");
    }

    #[test]
    fn test_find_replace_across_chunks() {
        let (mut col, _temp) = open_test_collection();
        col.set_read_chunk(2);
        let nids: Vec<i64> = (0..5).map(|i| add(&mut col, &format!("q{}", i), "old").id).collect();

        let changed = col.find_replace(&nids, "old", "new", false, None, false).unwrap();
        assert_eq!(changed, 5);
        for nid in nids {
            assert_eq!(col.get_note(nid).unwrap().fields[1], "new");
        }
    }

    #[test]
    fn test_find_replace_bad_regex() {
        let (mut col, _temp) = open_test_collection();
        let a = add(&mut col, "x", "y");
        assert!(matches!(
            col.find_replace(&[a.id], "(", "", true, None, false),
            Err(CollectionError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_bulk_tags() {
        let (mut col, _temp) = open_test_collection();
        let a = add(&mut col, "x", "y");
        let tags = vec!["verb".to_string()];
        assert_eq!(col.add_tags(&[a.id], &tags).unwrap(), 1);
        assert!(col.get_note(a.id).unwrap().has_tag("verb"));
        assert_eq!(col.rem_tags(&[a.id], &tags).unwrap(), 1);
        assert!(!col.get_note(a.id).unwrap().has_tag("verb"));
    }

    #[test]
    fn test_delete_note_undo() {
        let (mut col, _temp) = open_test_collection();
        let note = add(&mut col, "q", "a");
        col.delete_note(note.id).unwrap();
        assert_eq!(col.note_count().unwrap(), 0);
        assert_eq!(col.undo_type(), Some("Delete Note"));

        let card = col.undo().unwrap().unwrap();
        assert_eq!(card.nid, note.id);
        assert_eq!(col.get_note(note.id).unwrap().fields, note.fields);
        assert_eq!(col.card_count().unwrap(), 1);
        let graves: i64 = col.db().unwrap().scalar("SELECT count() FROM graves", []).unwrap();
        assert_eq!(graves, 0);
    }

    #[test]
    fn test_toggle_mark_undo() {
        let (mut col, _temp) = open_test_collection();
        let note = add(&mut col, "q", "a");
        assert!(col.toggle_mark(note.id).unwrap());
        assert!(col.get_note(note.id).unwrap().has_tag("marked"));
        col.undo().unwrap();
        assert!(!col.get_note(note.id).unwrap().has_tag("marked"));
    }
}
