//! Card records (`cards` table) and review log rows.

use rusqlite::types::Value;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

pub const CARD_TYPE_NEW: i32 = 0;
pub const CARD_TYPE_LRN: i32 = 1;
pub const CARD_TYPE_REV: i32 = 2;
pub const CARD_TYPE_RELEARNING: i32 = 3;

pub const QUEUE_SCHED_BURIED: i32 = -3;
pub const QUEUE_USER_BURIED: i32 = -2;
pub const QUEUE_SUSPENDED: i32 = -1;
pub const QUEUE_NEW: i32 = 0;
pub const QUEUE_LRN: i32 = 1;
pub const QUEUE_REV: i32 = 2;
pub const QUEUE_DAY_LRN: i32 = 3;
pub const QUEUE_PREVIEW: i32 = 4;

/// Bits of `flags` holding the user's colour flag.
pub const USER_FLAG_MASK: i32 = 0b111;

/// Number of columns in the `cards` table.
pub const CARD_COLUMN_COUNT: usize = 18;

/// Columns selected by [`Card::from_row`], in table order.
pub const CARD_COLUMNS: &str =
    "id, nid, did, ord, mod, usn, type, queue, due, ivl, factor, reps, lapses, left, odue, odid, flags, data";

/// One reviewable instance of a note at a template ordinal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: i64,
    pub nid: i64,
    pub did: i64,
    pub ord: usize,
    pub mtime: i64,
    pub usn: i32,
    pub ctype: i32,
    pub queue: i32,
    /// Position for new cards, day number for reviews, timestamp for learning.
    pub due: i64,
    pub ivl: i64,
    pub factor: i32,
    pub reps: i32,
    pub lapses: i32,
    pub left: i32,
    /// Due value before the card was moved into a dynamic deck.
    pub odue: i64,
    /// Home deck while the card sits in a dynamic deck; 0 otherwise.
    pub odid: i64,
    pub flags: i32,
    pub data: String,
}

impl Card {
    /// A new-queue card, not yet saved.
    pub fn new(id: i64, nid: i64, did: i64, ord: usize, due: i64) -> Self {
        Self {
            id,
            nid,
            did,
            ord,
            mtime: 0,
            usn: 0,
            ctype: CARD_TYPE_NEW,
            queue: QUEUE_NEW,
            due,
            ivl: 0,
            factor: 0,
            reps: 0,
            lapses: 0,
            left: 0,
            odue: 0,
            odid: 0,
            flags: 0,
            data: String::new(),
        }
    }

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            nid: row.get(1)?,
            did: row.get(2)?,
            ord: row.get::<_, i64>(3)?.max(0) as usize,
            mtime: row.get(4)?,
            usn: row.get(5)?,
            ctype: row.get(6)?,
            queue: row.get(7)?,
            due: row.get(8)?,
            ivl: row.get(9)?,
            factor: row.get(10)?,
            reps: row.get(11)?,
            lapses: row.get(12)?,
            left: row.get(13)?,
            odue: row.get(14)?,
            odid: row.get(15)?,
            flags: row.get(16)?,
            data: row.get(17)?,
        })
    }

    /// Column values in table order, for multi-row inserts.
    pub fn to_values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.id),
            Value::Integer(self.nid),
            Value::Integer(self.did),
            Value::Integer(self.ord as i64),
            Value::Integer(self.mtime),
            Value::Integer(self.usn as i64),
            Value::Integer(self.ctype as i64),
            Value::Integer(self.queue as i64),
            Value::Integer(self.due),
            Value::Integer(self.ivl),
            Value::Integer(self.factor as i64),
            Value::Integer(self.reps as i64),
            Value::Integer(self.lapses as i64),
            Value::Integer(self.left as i64),
            Value::Integer(self.odue),
            Value::Integer(self.odid),
            Value::Integer(self.flags as i64),
            Value::Text(self.data.clone()),
        ]
    }

    pub fn user_flag(&self) -> u8 {
        (self.flags & USER_FLAG_MASK) as u8
    }

    /// Set the colour flag (0 clears it), leaving the other bits alone.
    pub fn set_user_flag(&mut self, flag: u8) {
        self.flags = (self.flags & !USER_FLAG_MASK) | (flag as i32 & USER_FLAG_MASK);
    }

    /// Deck the card belongs to once any dynamic-deck borrowing is undone.
    pub fn home_deck(&self) -> i64 {
        if self.odid != 0 {
            self.odid
        } else {
            self.did
        }
    }
}

/// One row of the review log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewLogEntry {
    pub id: i64,
    pub cid: i64,
    pub usn: i32,
    pub ease: i32,
    pub ivl: i64,
    pub last_ivl: i64,
    pub factor: i32,
    /// Milliseconds spent answering.
    pub time: i64,
    pub kind: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_flag_keeps_other_bits() {
        let mut card = Card::new(1, 2, 1, 0, 5);
        card.flags = 0b1000;
        card.set_user_flag(3);
        assert_eq!(card.user_flag(), 3);
        assert_eq!(card.flags, 0b1011);
        card.set_user_flag(0);
        assert_eq!(card.flags, 0b1000);
        card.set_user_flag(9);
        assert_eq!(card.user_flag(), 1);
    }

    #[test]
    fn test_home_deck() {
        let mut card = Card::new(1, 2, 5, 0, 0);
        assert_eq!(card.home_deck(), 5);
        card.odid = 3;
        assert_eq!(card.home_deck(), 3);
    }

    #[test]
    fn test_values_match_column_count() {
        assert_eq!(Card::new(1, 2, 1, 0, 0).to_values().len(), CARD_COLUMN_COUNT);
        assert_eq!(CARD_COLUMNS.split(',').count(), CARD_COLUMN_COUNT);
    }
}
