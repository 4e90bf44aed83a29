use chrono::Utc;

use super::{
    counter_kind, downgrade_cards, local_offset_minutes, upgrade_cards, Counters, SchedulerOps,
    SECONDS_PER_DAY,
};
use crate::cards::Card;
use crate::storage::{Db, Result};

/// Original scheduler: days roll over at the creation time of day.
#[derive(Debug, Clone)]
pub struct SchedulerV1 {
    crt: i64,
    counters: Counters,
}

impl SchedulerV1 {
    pub fn new(crt: i64) -> Self {
        Self {
            crt,
            counters: Counters::default(),
        }
    }
}

impl SchedulerOps for SchedulerV1 {
    fn version(&self) -> u8 {
        1
    }

    fn reps(&self) -> u32 {
        self.counters.reps
    }

    fn today(&self) -> i64 {
        (Utc::now().timestamp() - self.crt).div_euclid(SECONDS_PER_DAY)
    }

    fn day_cutoff(&self) -> i64 {
        self.crt + (self.today() + 1) * SECONDS_PER_DAY
    }

    fn defer_reset(&mut self) {
        self.counters.reset_pending = true;
    }

    fn reset_pending(&self) -> bool {
        self.counters.reset_pending
    }

    fn record_answer(&mut self, card: &Card) {
        self.counters.bump(counter_kind(card.queue, false));
    }

    fn undo_review(&mut self, card: &Card, _was_leech: bool) {
        self.counters.unbump(counter_kind(card.queue, false));
    }

    fn timezone_offset_minutes(&self) -> i32 {
        local_offset_minutes()
    }

    fn move_to_v1(&self, db: &Db, usn: i32, now: i64) -> Result<()> {
        downgrade_cards(db, self.today(), usn, now)
    }

    fn move_to_v2(&self, db: &Db, usn: i32, now: i64) -> Result<()> {
        upgrade_cards(db, usn, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_today_counts_whole_days() {
        let now = Utc::now().timestamp();
        let sched = SchedulerV1::new(now - 3 * SECONDS_PER_DAY - 10);
        assert_eq!(sched.today(), 3);
        assert!(sched.day_cutoff() > now);
    }
}
