//! Scheduler collaborator.
//!
//! Interval computation is not implemented here. The collection only needs
//! the day counter, a review counter, undo hooks and the migrations between
//! the two stored scheduler versions.

mod v1;
mod v2;

pub use v1::SchedulerV1;
pub use v2::SchedulerV2;

use crate::cards::{
    Card, QUEUE_DAY_LRN, QUEUE_LRN, QUEUE_NEW, QUEUE_PREVIEW, QUEUE_REV,
};
use crate::storage::{Db, Result};
use rusqlite::params;

pub const SECONDS_PER_DAY: i64 = 86_400;

/// What the collection needs from a scheduler.
pub trait SchedulerOps {
    fn version(&self) -> u8;

    /// Answers recorded since the scheduler was created.
    fn reps(&self) -> u32;

    /// Days elapsed since the collection was created.
    fn today(&self) -> i64;

    /// Timestamp at which `today` next advances.
    fn day_cutoff(&self) -> i64;

    /// Ask for queues to be rebuilt before the next card is fetched.
    fn defer_reset(&mut self);

    fn reset_pending(&self) -> bool;

    /// Count an answer on `card` (called before its queue changes).
    fn record_answer(&mut self, card: &Card);

    /// Reverse the counters touched when `card` was answered.
    fn undo_review(&mut self, card: &Card, was_leech: bool);

    /// Minutes west of UTC for the local timezone.
    fn timezone_offset_minutes(&self) -> i32;

    /// Rewrite card states written by a v2 scheduler so v1 can read them.
    fn move_to_v1(&self, db: &Db, usn: i32, now: i64) -> Result<()>;

    /// Rewrite card states written by a v1 scheduler so v2 can read them.
    fn move_to_v2(&self, db: &Db, usn: i32, now: i64) -> Result<()>;
}

/// Daily counters shared by both scheduler versions.
#[derive(Debug, Clone, Default)]
pub(crate) struct Counters {
    pub reps: u32,
    /// Answers today by kind: new, learning, review.
    pub today: [u32; 3],
    pub reset_pending: bool,
}

impl Counters {
    fn bump(&mut self, kind: Option<usize>) {
        self.reps += 1;
        if let Some(idx) = kind {
            self.today[idx] += 1;
        }
        self.reset_pending = true;
    }

    fn unbump(&mut self, kind: Option<usize>) {
        self.reps = self.reps.saturating_sub(1);
        if let Some(idx) = kind {
            self.today[idx] = self.today[idx].saturating_sub(1);
        }
        self.reset_pending = true;
    }
}

/// Counter slot for a queue. `preview_is_learning` is true for v2, which
/// counts its preview queue with learning cards.
fn counter_kind(queue: i32, preview_is_learning: bool) -> Option<usize> {
    match queue {
        QUEUE_NEW => Some(0),
        QUEUE_LRN | QUEUE_DAY_LRN => Some(1),
        QUEUE_PREVIEW if preview_is_learning => Some(1),
        QUEUE_REV => Some(2),
        _ => None,
    }
}

/// v2 -> v1: fold relearning into review, sibling-buried into buried and
/// drop the preview queue.
fn downgrade_cards(db: &Db, today: i64, usn: i32, now: i64) -> Result<()> {
    db.execute(
        "UPDATE cards SET queue = -2, mod = ?1, usn = ?2 WHERE queue = -3",
        params![now, usn],
    )?;
    db.execute(
        "UPDATE cards SET type = 2, queue = 2, due = ?1, mod = ?2, usn = ?3
         WHERE type = 3 AND queue IN (1, 3)",
        params![today, now, usn],
    )?;
    db.execute(
        "UPDATE cards SET type = 2, mod = ?1, usn = ?2 WHERE type = 3",
        params![now, usn],
    )?;
    db.execute(
        "UPDATE cards SET queue = type, mod = ?1, usn = ?2 WHERE queue = 4",
        params![now, usn],
    )?;
    Ok(())
}

/// v1 -> v2: buried cards become sibling-buried and review cards in
/// learning become relearning.
fn upgrade_cards(db: &Db, usn: i32, now: i64) -> Result<()> {
    db.execute(
        "UPDATE cards SET queue = -3, mod = ?1, usn = ?2 WHERE queue = -2",
        params![now, usn],
    )?;
    db.execute(
        "UPDATE cards SET type = 3, mod = ?1, usn = ?2 WHERE type = 2 AND queue IN (1, 3)",
        params![now, usn],
    )?;
    Ok(())
}

/// Minutes west of UTC, as stored by older clients.
fn local_offset_minutes() -> i32 {
    -chrono::Local::now().offset().local_minus_utc() / 60
}

/// The selected scheduler, chosen from the stored version number.
#[derive(Debug, Clone)]
pub enum Scheduler {
    V1(SchedulerV1),
    V2(SchedulerV2),
}

impl Scheduler {
    /// Build the scheduler for stored version `ver`. Returns the rejected
    /// version for anything other than 1 or 2.
    pub fn for_version(ver: i64, crt: i64, rollover_hour: i64) -> std::result::Result<Self, i64> {
        match ver {
            1 => Ok(Scheduler::V1(SchedulerV1::new(crt))),
            2 => Ok(Scheduler::V2(SchedulerV2::new(crt, rollover_hour))),
            other => Err(other),
        }
    }

    fn ops(&self) -> &dyn SchedulerOps {
        match self {
            Scheduler::V1(s) => s,
            Scheduler::V2(s) => s,
        }
    }

    fn ops_mut(&mut self) -> &mut dyn SchedulerOps {
        match self {
            Scheduler::V1(s) => s,
            Scheduler::V2(s) => s,
        }
    }
}

impl SchedulerOps for Scheduler {
    fn version(&self) -> u8 {
        self.ops().version()
    }

    fn reps(&self) -> u32 {
        self.ops().reps()
    }

    fn today(&self) -> i64 {
        self.ops().today()
    }

    fn day_cutoff(&self) -> i64 {
        self.ops().day_cutoff()
    }

    fn defer_reset(&mut self) {
        self.ops_mut().defer_reset()
    }

    fn reset_pending(&self) -> bool {
        self.ops().reset_pending()
    }

    fn record_answer(&mut self, card: &Card) {
        self.ops_mut().record_answer(card)
    }

    fn undo_review(&mut self, card: &Card, was_leech: bool) {
        self.ops_mut().undo_review(card, was_leech)
    }

    fn timezone_offset_minutes(&self) -> i32 {
        self.ops().timezone_offset_minutes()
    }

    fn move_to_v1(&self, db: &Db, usn: i32, now: i64) -> Result<()> {
        self.ops().move_to_v1(db, usn, now)
    }

    fn move_to_v2(&self, db: &Db, usn: i32, now: i64) -> Result<()> {
        self.ops().move_to_v2(db, usn, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards::{CARD_TYPE_RELEARNING, CARD_TYPE_REV, QUEUE_SCHED_BURIED, QUEUE_USER_BURIED};
    use tempfile::TempDir;

    fn insert_card(db: &Db, id: i64, ctype: i32, queue: i32) {
        db.execute(
            "INSERT INTO cards VALUES (?1, 1, 1, 0, 0, 0, ?2, ?3, 0, 0, 0, 0, 0, 0, 0, 0, 0, '')",
            params![id, ctype, queue],
        )
        .unwrap();
    }

    fn state(db: &Db, id: i64) -> (i32, i32) {
        db.conn()
            .query_row("SELECT type, queue FROM cards WHERE id = ?1", [id], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap()
    }

    #[test]
    fn test_unknown_version_rejected() {
        assert!(matches!(Scheduler::for_version(1, 0, 4), Ok(Scheduler::V1(_))));
        assert!(matches!(Scheduler::for_version(2, 0, 4), Ok(Scheduler::V2(_))));
        assert_eq!(Scheduler::for_version(3, 0, 4).unwrap_err(), 3);
    }

    #[test]
    fn test_counters_round_trip() {
        let mut sched = Scheduler::for_version(2, 0, 4).unwrap();
        let mut card = Card::new(1, 1, 1, 0, 0);
        card.queue = QUEUE_REV;
        sched.record_answer(&card);
        assert_eq!(sched.reps(), 1);
        sched.undo_review(&card, false);
        assert_eq!(sched.reps(), 0);
        sched.undo_review(&card, false);
        assert_eq!(sched.reps(), 0);
    }

    #[test]
    fn test_version_migrations() {
        let temp_dir = TempDir::new().unwrap();
        let (db, _) = Db::open(&temp_dir.path().join("col.anki2"), 0, 0).unwrap();
        insert_card(&db, 1, CARD_TYPE_REV, QUEUE_USER_BURIED);
        insert_card(&db, 2, CARD_TYPE_REV, QUEUE_LRN);

        let v1 = Scheduler::for_version(1, 0, 4).unwrap();
        v1.move_to_v2(&db, -1, 0).unwrap();
        assert_eq!(state(&db, 1), (CARD_TYPE_REV, QUEUE_SCHED_BURIED));
        assert_eq!(state(&db, 2), (CARD_TYPE_RELEARNING, QUEUE_LRN));

        let v2 = Scheduler::for_version(2, 0, 4).unwrap();
        v2.move_to_v1(&db, -1, 0).unwrap();
        assert_eq!(state(&db, 1), (CARD_TYPE_REV, QUEUE_USER_BURIED));
        assert_eq!(state(&db, 2), (CARD_TYPE_REV, QUEUE_REV));
    }
}
