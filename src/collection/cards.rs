use rusqlite::params;

use super::notes::GRAVE_CARD;
use super::{now_secs, Collection, CollectionError, Result};
use crate::cards::{
    Card, CARD_COLUMNS, CARD_TYPE_LRN, CARD_TYPE_NEW, CARD_TYPE_RELEARNING, QUEUE_NEW, QUEUE_REV,
};
use crate::scheduler::SchedulerOps;
use crate::storage::ids2str;
use crate::undo::UndoAction;

/// Due offset given to cards while they sit in a dynamic deck, so they sort
/// before anything else.
const FILTERED_DUE_BASE: i64 = -100_000;

const LEECH_TAG: &str = "leech";

impl Collection {
    pub fn get_card(&self, cid: i64) -> Result<Card> {
        self.db()?
            .query_map(
                &format!("SELECT {} FROM cards WHERE id = ?1", CARD_COLUMNS),
                [cid],
                Card::from_row,
            )?
            .into_iter()
            .next()
            .ok_or(CollectionError::CardNotFound(cid))
    }

    pub fn cards_of_note(&self, nid: i64) -> Result<Vec<Card>> {
        Ok(self.db()?.query_map(
            &format!("SELECT {} FROM cards WHERE nid = ?1 ORDER BY ord", CARD_COLUMNS),
            [nid],
            Card::from_row,
        )?)
    }

    pub fn card_ids_of_note(&self, nid: i64) -> Result<Vec<i64>> {
        Ok(self
            .db()?
            .list("SELECT id FROM cards WHERE nid = ?1 ORDER BY ord", [nid])?)
    }

    fn cards_by_id(&self, cids: &[i64]) -> Result<Vec<Card>> {
        Ok(self.db()?.query_map(
            &format!("SELECT {} FROM cards WHERE id IN {}", CARD_COLUMNS, ids2str(cids)),
            [],
            Card::from_row,
        )?)
    }

    /// Write a card row exactly as given.
    pub(crate) fn flush_card(&self, card: &Card) -> Result<()> {
        self.db()?.execute(
            &format!(
                "INSERT OR REPLACE INTO cards ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
                CARD_COLUMNS
            ),
            rusqlite::params_from_iter(card.to_values()),
        )?;
        Ok(())
    }

    /// Save a modified card, stamping its modification time and usn.
    pub fn update_card(&mut self, card: &mut Card) -> Result<()> {
        card.mtime = now_secs();
        card.usn = self.usn();
        self.flush_card(card)
    }

    /// Delete cards, logging a grave for each first. With `notes`, notes left
    /// without any card are deleted too.
    pub fn rem_cards(&mut self, cids: &[i64], notes: bool) -> Result<()> {
        if cids.is_empty() {
            return Ok(());
        }
        self.transact(|col| {
            let nids: Vec<i64> = col.db()?.list(
                &format!("SELECT DISTINCT nid FROM cards WHERE id IN {}", ids2str(cids)),
                [],
            )?;
            col.add_graves(cids, GRAVE_CARD)?;
            col.db()?.execute(
                &format!("DELETE FROM cards WHERE id IN {}", ids2str(cids)),
                [],
            )?;
            if notes && !nids.is_empty() {
                let orphaned: Vec<i64> = col.db()?.list(
                    &format!(
                        "SELECT id FROM notes WHERE id IN {} AND id NOT IN (SELECT nid FROM cards)",
                        ids2str(&nids)
                    ),
                    [],
                )?;
                col.rem_notes_raw(&orphaned)?;
            }
            col.log(&format!("removed {} cards", cids.len()));
            Ok(())
        })
    }

    /// Set the colour flag (0-7; 0 clears) on cards. Undoable.
    pub fn set_user_flag(&mut self, cids: &[i64], flag: u8) -> Result<()> {
        if flag > 7 {
            return Err(CollectionError::InvalidOperation(format!("invalid flag {}", flag)));
        }
        let before = self.cards_by_id(cids)?;
        self.db()?.execute(
            &format!(
                "UPDATE cards SET flags = (flags & ~7) | ?1, mod = ?2, usn = ?3 WHERE id IN {}",
                ids2str(cids)
            ),
            params![flag as i64, now_secs(), self.usn()],
        )?;
        self.mark_undo(UndoAction::CardStates {
            label: "Flag Card".to_string(),
            cards: before,
        });
        Ok(())
    }

    /// Move cards to normal deck `did`, returning any from dynamic decks
    /// first. Undoable.
    pub fn set_deck(&mut self, cids: &[i64], did: i64) -> Result<()> {
        match self.decks.get(did) {
            None => return Err(CollectionError::DeckNotFound(did)),
            Some(deck) if deck.is_dyn() => {
                return Err(CollectionError::InvalidOperation(
                    "cards cannot be moved into a filtered deck directly".to_string(),
                ))
            }
            Some(_) => {}
        }
        let before = self.cards_by_id(cids)?;
        self.transact(|col| {
            col.rem_from_filtered(cids)?;
            col.db()?.execute(
                &format!(
                    "UPDATE cards SET did = ?1, mod = ?2, usn = ?3 WHERE id IN {}",
                    ids2str(cids)
                ),
                params![did, now_secs(), col.usn()],
            )?;
            Ok(())
        })?;
        self.mark_undo(UndoAction::CardStates {
            label: "Change Deck".to_string(),
            cards: before,
        });
        Ok(())
    }

    /// Borrow cards into dynamic deck `did`, remembering their home deck and
    /// due. Only new and review cards not already borrowed are moved.
    /// Returns how many moved.
    pub fn move_to_filtered(&mut self, cids: &[i64], did: i64) -> Result<usize> {
        if !self.decks.get(did).ok_or(CollectionError::DeckNotFound(did))?.is_dyn() {
            return Err(CollectionError::InvalidOperation(
                "target deck is not a filtered deck".to_string(),
            ));
        }
        let usn = self.usn();
        self.transact(|col| {
            let movable: Vec<i64> = col.db()?.list(
                &format!(
                    "SELECT id FROM cards WHERE id IN {} AND odid = 0 AND queue IN (?1, ?2) ORDER BY id",
                    ids2str(cids)
                ),
                params![QUEUE_NEW, QUEUE_REV],
            )?;
            let db = col.db()?;
            let mut stmt = db.conn().prepare(
                "UPDATE cards SET odid = did, odue = due, did = ?1, due = ?2, mod = ?3, usn = ?4
                 WHERE id = ?5",
            )?;
            for (i, cid) in movable.iter().enumerate() {
                stmt.execute(params![did, FILTERED_DUE_BASE + i as i64, now_secs(), usn, cid])?;
            }
            Ok(movable.len())
        })
    }

    /// Return every card in dynamic deck `did` to its home deck.
    pub fn empty_filtered(&mut self, did: i64) -> Result<usize> {
        let cids: Vec<i64> = self
            .db()?
            .list("SELECT id FROM cards WHERE did = ?1", [did])?;
        self.rem_from_filtered(&cids)?;
        Ok(cids.len())
    }

    /// Return borrowed cards among `cids` to their home decks.
    pub(crate) fn rem_from_filtered(&mut self, cids: &[i64]) -> Result<()> {
        if cids.is_empty() {
            return Ok(());
        }
        self.db()?.execute(
            &format!(
                "UPDATE cards SET did = odid,
                 due = (CASE WHEN odue != 0 THEN odue ELSE due END),
                 queue = (CASE WHEN queue = 4 THEN type ELSE queue END),
                 odue = 0, odid = 0, mod = ?1, usn = ?2
                 WHERE odid != 0 AND id IN {}",
                ids2str(cids)
            ),
            params![now_secs(), self.usn()],
        )?;
        Ok(())
    }

    /// Record an answer: `before` is the card as it was shown, `after` its
    /// new scheduling state. Saves the card, writes a review log row and
    /// pushes an undo entry. Returns the review log id.
    pub fn record_review(
        &mut self,
        before: &Card,
        after: &mut Card,
        ease: i32,
        time_ms: i64,
    ) -> Result<i64> {
        let was_leech = self.get_note(before.nid)?.has_tag(LEECH_TAG);
        self.sched.record_answer(before);
        let id = self.transact(|col| {
            col.update_card(after)?;
            col.log_review(after, ease, before.ivl, time_ms, review_kind(before))
        })?;
        self.mark_undo(UndoAction::Review {
            card: before.clone(),
            was_leech,
        });
        Ok(id)
    }

    /// Append a review log row for `card`.
    pub fn log_review(
        &mut self,
        card: &Card,
        ease: i32,
        last_ivl: i64,
        time_ms: i64,
        kind: i32,
    ) -> Result<i64> {
        let id = self.timestamp_id("revlog")?;
        self.db()?.execute(
            "INSERT INTO revlog VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![id, card.id, self.usn(), ease, card.ivl, last_ivl, card.factor, time_ms, kind],
        )?;
        Ok(id)
    }
}

/// Review log kind for an answer given to `card`: 0 learn, 1 review,
/// 2 relearn, 3 filtered-deck.
fn review_kind(card: &Card) -> i32 {
    match card.ctype {
        CARD_TYPE_NEW | CARD_TYPE_LRN => 0,
        CARD_TYPE_RELEARNING => 2,
        _ if card.odid != 0 => 3,
        _ => 1,
    }
}
