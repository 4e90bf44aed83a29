use rusqlite::params;

use super::notes::GRAVE_DECK;
use super::{now_secs, Collection, CollectionError, Result};
use crate::config::{KEY_ACTIVE_DECKS, KEY_CUR_DECK};
use crate::decks::{DeckRegistry, DEFAULT_DECK_ID};

impl Collection {
    pub fn decks(&self) -> &DeckRegistry {
        &self.decks
    }

    pub fn decks_mut(&mut self) -> &mut DeckRegistry {
        &mut self.decks
    }

    /// Id of deck `name`, creating it and any missing parents if `create`.
    pub fn deck_id(&mut self, name: &str, create: bool) -> Option<i64> {
        let usn = self.usn();
        self.decks.id(name, create, usn, now_secs())
    }

    /// Create a filtered deck. Fails if the name is taken.
    pub fn add_filtered_deck(&mut self, name: &str) -> Result<i64> {
        let usn = self.usn();
        self.decks.new_dyn(name, usn, now_secs()).ok_or_else(|| {
            CollectionError::InvalidOperation(format!("deck \"{}\" already exists", name))
        })
    }

    pub fn rename_deck(&mut self, did: i64, name: &str) -> Result<()> {
        if self.decks.get(did).is_none() {
            return Err(CollectionError::DeckNotFound(did));
        }
        let usn = self.usn();
        if self.decks.rename(did, name, usn, now_secs()) {
            Ok(())
        } else {
            Err(CollectionError::InvalidOperation(format!(
                "deck \"{}\" already exists",
                name
            )))
        }
    }

    pub fn current_deck_id(&self) -> i64 {
        let did = self.conf.get_i64(KEY_CUR_DECK, DEFAULT_DECK_ID);
        if self.decks.get(did).is_some() {
            did
        } else {
            DEFAULT_DECK_ID
        }
    }

    /// Make `did` the current deck; it and its children become active.
    pub fn select_deck(&mut self, did: i64) -> Result<()> {
        if self.decks.get(did).is_none() {
            return Err(CollectionError::DeckNotFound(did));
        }
        let mut active = vec![did];
        active.extend(self.decks.children(did).into_iter().map(|(_, id)| id));
        self.conf.set(KEY_CUR_DECK, did)?;
        self.conf.set(KEY_ACTIVE_DECKS, active)?;
        Ok(())
    }

    /// Delete a deck and its children. Filtered decks hand their cards back
    /// first. Cards of a normal deck are deleted with `cards_too`, otherwise
    /// moved to the default deck. The default deck itself cannot be removed.
    pub fn rem_deck(&mut self, did: i64, cards_too: bool) -> Result<()> {
        if did == DEFAULT_DECK_ID {
            return Err(CollectionError::InvalidOperation(
                "the default deck cannot be removed".to_string(),
            ));
        }
        if self.decks.get(did).is_none() {
            return Err(CollectionError::DeckNotFound(did));
        }

        let children: Vec<i64> = self.decks.children(did).into_iter().map(|(_, id)| id).collect();
        self.transact(|col| {
            // deepest first so every child still has its parent while removed
            for child in children.iter().rev() {
                col.rem_single_deck(*child, cards_too)?;
            }
            col.rem_single_deck(did, cards_too)
        })?;

        let current = self.conf.get_i64(KEY_CUR_DECK, DEFAULT_DECK_ID);
        if current == did || children.contains(&current) {
            self.select_deck(DEFAULT_DECK_ID)?;
        }
        Ok(())
    }

    fn rem_single_deck(&mut self, did: i64, cards_too: bool) -> Result<()> {
        let Some(deck) = self.decks.get(did).cloned() else {
            return Ok(());
        };
        self.add_graves(&[did], GRAVE_DECK)?;

        if deck.is_dyn() {
            self.empty_filtered(did)?;
        } else {
            let cids: Vec<i64> = self
                .db()?
                .list("SELECT id FROM cards WHERE did = ?1 OR odid = ?1", [did])?;
            if cards_too {
                self.rem_cards(&cids, true)?;
            } else {
                let usn = self.usn();
                let db = self.db()?;
                db.execute(
                    "UPDATE cards SET did = ?1, mod = ?2, usn = ?3 WHERE did = ?4",
                    params![DEFAULT_DECK_ID, now_secs(), usn, did],
                )?;
                db.execute(
                    "UPDATE cards SET odid = ?1, mod = ?2, usn = ?3 WHERE odid = ?4",
                    params![DEFAULT_DECK_ID, now_secs(), usn, did],
                )?;
            }
        }

        self.decks.remove_entry(did);
        log::info!("Removed deck \"{}\"", deck.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::open_test_collection;
    use super::*;

    fn add_card_in(col: &mut Collection, did: i64) -> (i64, i64) {
        let mid = col.models().unwrap().by_name("Basic").unwrap().id;
        let mut note = col.new_note(mid).unwrap();
        note.fields = vec!["q".to_string(), "a".to_string()];
        col.add_note(&mut note).unwrap();
        let cids = col.card_ids_of_note(note.id).unwrap();
        col.set_deck(&cids, did).unwrap();
        (note.id, cids[0])
    }

    #[test]
    fn test_default_deck_is_protected() {
        let (mut col, _temp) = open_test_collection();
        assert!(matches!(
            col.rem_deck(DEFAULT_DECK_ID, false),
            Err(CollectionError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_rem_deck_moves_cards_to_default() {
        let (mut col, _temp) = open_test_collection();
        let did = col.deck_id("Spanish", true).unwrap();
        let (_, cid) = add_card_in(&mut col, did);

        col.rem_deck(did, false).unwrap();
        assert!(col.decks().get(did).is_none());
        assert_eq!(col.get_card(cid).unwrap().did, DEFAULT_DECK_ID);

        let grave: i64 = col
            .db()
            .unwrap()
            .scalar("SELECT count() FROM graves WHERE oid = ?1 AND type = 2", [did])
            .unwrap();
        assert_eq!(grave, 1);
    }

    #[test]
    fn test_rem_deck_with_cards_and_children() {
        let (mut col, _temp) = open_test_collection();
        let parent = col.deck_id("Spanish", true).unwrap();
        let child = col.deck_id("Spanish::Verbs", true).unwrap();
        let (nid, _) = add_card_in(&mut col, child);
        col.select_deck(child).unwrap();

        col.rem_deck(parent, true).unwrap();
        assert!(col.decks().get(child).is_none());
        assert!(col.get_note(nid).is_err());
        assert_eq!(col.current_deck_id(), DEFAULT_DECK_ID);
    }

    #[test]
    fn test_rem_filtered_deck_returns_cards() {
        let (mut col, _temp) = open_test_collection();
        let home = col.deck_id("Home", true).unwrap();
        let (_, cid) = add_card_in(&mut col, home);
        let dyn_did = col.add_filtered_deck("Cram").unwrap();
        col.move_to_filtered(&[cid], dyn_did).unwrap();

        col.rem_deck(dyn_did, true).unwrap();
        let card = col.get_card(cid).unwrap();
        assert_eq!(card.did, home);
        assert_eq!(card.odid, 0);
    }

    #[test]
    fn test_select_deck_activates_children() {
        let (mut col, _temp) = open_test_collection();
        let parent = col.deck_id("A", true).unwrap();
        let child = col.deck_id("A::B", true).unwrap();
        col.select_deck(parent).unwrap();
        assert_eq!(col.current_deck_id(), parent);
        let active: Vec<i64> = col.conf().get(KEY_ACTIVE_DECKS).unwrap();
        assert_eq!(active, vec![parent, child]);
    }

    #[test]
    fn test_rename_conflict() {
        let (mut col, _temp) = open_test_collection();
        let a = col.deck_id("A", true).unwrap();
        col.deck_id("B", true).unwrap();
        assert!(col.rename_deck(a, "B").is_err());
        col.rename_deck(a, "C").unwrap();
        assert_eq!(col.decks().get(a).unwrap().name, "C");
    }
}
