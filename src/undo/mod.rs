//! Bounded undo log.
//!
//! Each entry carries just the snapshot needed to reverse one operation.
//! Reversal is a match over the closed set of action kinds.

use std::collections::VecDeque;

use rusqlite::params;

use crate::cards::{Card, QUEUE_SCHED_BURIED, QUEUE_USER_BURIED};
use crate::collection::{Collection, Result};
use crate::notes::Note;
use crate::scheduler::SchedulerOps;
use crate::storage::ids2str;

/// Entries beyond this are dropped, oldest first.
pub const MAX_UNDO_SIZE: usize = 20;

const LEECH_TAG: &str = "leech";

#[derive(Debug, Clone, PartialEq)]
pub enum UndoAction {
    /// A card was answered. `card` is its state before the answer;
    /// `was_leech` is whether its note was already tagged as a leech.
    Review { card: Card, was_leech: bool },
    /// Card rows changed in place (flag, deck, bury, suspend).
    CardStates { label: String, cards: Vec<Card> },
    /// A note's fields or tags changed.
    NoteEdit { label: String, note: Note },
    DeleteNote { note: Note, cards: Vec<Card> },
    /// Marker with nothing to reverse.
    Checkpoint { label: String },
}

impl UndoAction {
    pub fn label(&self) -> &str {
        match self {
            UndoAction::Review { .. } => "Review",
            UndoAction::DeleteNote { .. } => "Delete Note",
            UndoAction::CardStates { label, .. }
            | UndoAction::NoteEdit { label, .. }
            | UndoAction::Checkpoint { label } => label,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UndoLog {
    stack: VecDeque<UndoAction>,
}

impl UndoLog {
    pub fn push(&mut self, action: UndoAction) {
        self.stack.push_back(action);
        while self.stack.len() > MAX_UNDO_SIZE {
            self.stack.pop_front();
        }
    }

    pub fn pop(&mut self) -> Option<UndoAction> {
        self.stack.pop_back()
    }

    pub fn peek(&self) -> Option<&UndoAction> {
        self.stack.back()
    }

    pub fn clear(&mut self) {
        self.stack.clear();
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}

impl Collection {
    pub fn mark_undo(&mut self, action: UndoAction) {
        self.undo.push(action);
    }

    /// Push a label-only entry.
    pub fn checkpoint(&mut self, label: &str) {
        self.mark_undo(UndoAction::Checkpoint {
            label: label.to_string(),
        });
    }

    pub fn undo_available(&self) -> bool {
        !self.undo.is_empty()
    }

    /// Label of the action `undo` would reverse.
    pub fn undo_type(&self) -> Option<&str> {
        self.undo.peek().map(UndoAction::label)
    }

    pub fn clear_undo(&mut self) {
        self.undo.clear();
    }

    /// Reverse the most recent action. Returns the card to show again, if
    /// the action concerned one.
    pub fn undo(&mut self) -> Result<Option<Card>> {
        let Some(action) = self.undo.pop() else {
            return Ok(None);
        };
        log::debug!("Undoing {}", action.label());
        self.transact(|col| col.reverse(action))
    }

    fn reverse(&mut self, action: UndoAction) -> Result<Option<Card>> {
        match action {
            UndoAction::Review { card, was_leech } => self.undo_review(card, was_leech).map(Some),
            UndoAction::CardStates { cards, .. } => {
                for card in &cards {
                    self.flush_card(card)?;
                }
                Ok(cards.into_iter().next())
            }
            UndoAction::NoteEdit { mut note, .. } => {
                let mtime = note.mtime;
                self.flush_note(&mut note, Some(mtime))?;
                Ok(None)
            }
            UndoAction::DeleteNote { mut note, cards } => {
                let mtime = note.mtime;
                self.flush_note(&mut note, Some(mtime))?;
                let mut oids: Vec<i64> = cards.iter().map(|c| c.id).collect();
                for card in &cards {
                    self.flush_card(card)?;
                }
                oids.push(note.id);
                self.db()?.execute(
                    &format!("DELETE FROM graves WHERE oid IN {}", ids2str(&oids)),
                    [],
                )?;
                Ok(cards.into_iter().next())
            }
            UndoAction::Checkpoint { .. } => Ok(None),
        }
    }

    fn undo_review(&mut self, card: Card, was_leech: bool) -> Result<Card> {
        let mut note = self.get_note(card.nid)?;
        if !was_leech && note.has_tag(LEECH_TAG) {
            note.remove_tag(LEECH_TAG);
            self.flush_note(&mut note, None)?;
        }

        let mut restored = card;
        self.update_card(&mut restored)?;

        let db = self.db()?;
        let last: Option<i64> = db.scalar_opt(
            "SELECT id FROM revlog WHERE cid = ?1 ORDER BY id DESC LIMIT 1",
            [restored.id],
        )?;
        if let Some(id) = last {
            db.execute("DELETE FROM revlog WHERE id = ?1", [id])?;
        }

        let sibling_buried = if self.sched.version() == 1 {
            QUEUE_USER_BURIED
        } else {
            QUEUE_SCHED_BURIED
        };
        db.execute(
            "UPDATE cards SET queue = type, mod = ?1, usn = ?2 WHERE queue = ?3 AND nid = ?4",
            params![crate::collection::now_secs(), self.usn(), sibling_buried, restored.nid],
        )?;

        self.sched.undo_review(&restored, was_leech);
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint(i: usize) -> UndoAction {
        UndoAction::Checkpoint {
            label: format!("step {}", i),
        }
    }

    #[test]
    fn test_cap_evicts_oldest() {
        let mut log = UndoLog::default();
        for i in 0..MAX_UNDO_SIZE {
            log.push(checkpoint(i));
        }
        assert_eq!(log.len(), MAX_UNDO_SIZE);

        log.push(checkpoint(MAX_UNDO_SIZE));
        assert_eq!(log.len(), MAX_UNDO_SIZE);
        assert_eq!(log.peek().map(UndoAction::label), Some("step 20"));

        let mut labels = Vec::new();
        while let Some(action) = log.pop() {
            labels.push(action.label().to_string());
        }
        assert_eq!(labels.last().map(String::as_str), Some("step 1"));
        assert!(log.is_empty());
    }

    #[test]
    fn test_labels() {
        let card = Card::new(1, 1, 1, 0, 0);
        let review = UndoAction::Review {
            card: card.clone(),
            was_leech: false,
        };
        assert_eq!(review.label(), "Review");
        let flag = UndoAction::CardStates {
            label: "Flag Card".to_string(),
            cards: vec![card],
        };
        assert_eq!(flag.label(), "Flag Card");
    }
}
