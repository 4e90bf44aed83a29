use chrono::{Local, NaiveTime, TimeZone, Utc};

use super::{
    counter_kind, downgrade_cards, local_offset_minutes, upgrade_cards, Counters, SchedulerOps,
    SECONDS_PER_DAY,
};
use crate::cards::Card;
use crate::storage::{Db, Result};

/// Current scheduler: days roll over at a configurable local hour.
#[derive(Debug, Clone)]
pub struct SchedulerV2 {
    crt: i64,
    rollover_hour: u32,
    counters: Counters,
}

impl SchedulerV2 {
    pub fn new(crt: i64, rollover_hour: i64) -> Self {
        Self {
            crt,
            rollover_hour: rollover_hour.clamp(0, 23) as u32,
            counters: Counters::default(),
        }
    }

    /// The rollover instant on the local calendar day the collection was
    /// created.
    fn day_zero(&self) -> i64 {
        let Some(created) = Local.timestamp_opt(self.crt, 0).earliest() else {
            return self.crt;
        };
        let Some(rollover) = NaiveTime::from_hms_opt(self.rollover_hour, 0, 0) else {
            return self.crt;
        };
        created
            .date_naive()
            .and_time(rollover)
            .and_local_timezone(Local)
            .earliest()
            .map_or(self.crt, |start| start.timestamp())
    }
}

impl SchedulerOps for SchedulerV2 {
    fn version(&self) -> u8 {
        2
    }

    fn reps(&self) -> u32 {
        self.counters.reps
    }

    fn today(&self) -> i64 {
        (Utc::now().timestamp() - self.day_zero()).div_euclid(SECONDS_PER_DAY)
    }

    fn day_cutoff(&self) -> i64 {
        self.day_zero() + (self.today() + 1) * SECONDS_PER_DAY
    }

    fn defer_reset(&mut self) {
        self.counters.reset_pending = true;
    }

    fn reset_pending(&self) -> bool {
        self.counters.reset_pending
    }

    fn record_answer(&mut self, card: &Card) {
        self.counters.bump(counter_kind(card.queue, true));
    }

    fn undo_review(&mut self, card: &Card, _was_leech: bool) {
        self.counters.unbump(counter_kind(card.queue, true));
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
    fn test_cutoff_is_in_the_future() {
        let now = Utc::now().timestamp();
        let sched = SchedulerV2::new(now - 10 * SECONDS_PER_DAY, 4);
        assert!(sched.day_cutoff() > now);
        assert!(sched.day_cutoff() - now <= SECONDS_PER_DAY + 3600);
        assert!((9..=11).contains(&sched.today()));
    }
}
