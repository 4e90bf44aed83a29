//! Self-repairing consistency check.
//!
//! The check runs a fixed sequence of detect-and-fix passes. Each pass gets
//! its own transaction and is saved before the next one starts, so an error
//! or a cancellation leaves earlier repairs committed. Every pass is safe to
//! run again; a second run over a repaired collection finds nothing.

mod passes;

use crate::cancel::{cancelled, CancelToken};
use crate::collection::{Collection, CollectionError, Result};

/// Problems shown to the user; the full list stays in the report.
pub const MAX_REPORTED_PROBLEMS: usize = 10;

/// Steps that do not depend on the number of note types.
const FIXED_STEPS: usize = 27;
const STEPS_PER_MODEL: usize = 4;

/// How a check run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityOutcome {
    Completed(IntegrityReport),
    /// The database was busy or locked; try again later.
    Locked,
    /// The file is corrupt or a pass failed.
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub problems: Vec<String>,
    /// File size in bytes before and after compaction.
    pub size_before: u64,
    pub size_after: u64,
}

impl IntegrityReport {
    /// At most [`MAX_REPORTED_PROBLEMS`] problems, in the order found.
    pub fn reported(&self) -> &[String] {
        let end = self.problems.len().min(MAX_REPORTED_PROBLEMS);
        &self.problems[..end]
    }

    /// Bytes reclaimed by compaction; negative if the file grew.
    pub fn size_saved(&self) -> i64 {
        self.size_before as i64 - self.size_after as i64
    }
}

/// Shared state threaded through the passes.
pub(crate) struct Pipeline<'a> {
    problems: Vec<String>,
    step: usize,
    total: usize,
    progress: &'a mut dyn FnMut(usize, usize),
    cancel: Option<&'a CancelToken>,
}

impl<'a> Pipeline<'a> {
    fn new(
        total: usize,
        progress: &'a mut dyn FnMut(usize, usize),
        cancel: Option<&'a CancelToken>,
    ) -> Self {
        Self {
            problems: Vec::new(),
            step: 0,
            total,
            progress,
            cancel,
        }
    }

    pub(crate) fn tick(&mut self) {
        self.step = (self.step + 1).min(self.total);
        (self.progress)(self.step, self.total);
    }

    pub(crate) fn problem(&mut self, problem: String) {
        self.problems.push(problem);
    }

    fn is_cancelled(&self) -> bool {
        cancelled(self.cancel)
    }
}

type Pass = fn(&mut Collection, &mut Pipeline<'_>) -> Result<()>;

impl Collection {
    /// Run every repair pass, reporting `(step, total)` after each step.
    ///
    /// Storage trouble is reported through the outcome rather than as an
    /// error; only a closed collection fails outright.
    pub fn check_integrity(
        &mut self,
        progress: &mut dyn FnMut(usize, usize),
        cancel: Option<&CancelToken>,
    ) -> Result<IntegrityOutcome> {
        let total = STEPS_PER_MODEL * self.models()?.count() + FIXED_STEPS;
        let mut pipe = Pipeline::new(total, progress, cancel);

        let result = self.run_checks(&mut pipe);
        if !pipe.problems.is_empty() {
            // earlier passes committed their repairs before the run stopped
            self.force_full_sync_after_partial_run(&pipe.problems);
        }

        match result {
            Ok(outcome) => Ok(outcome),
            Err(CollectionError::Closed) => Err(CollectionError::Closed),
            Err(err) if err.is_locked() => {
                log::warn!("Integrity check stopped, database locked: {}", err);
                Ok(IntegrityOutcome::Locked)
            }
            Err(err) => {
                log::error!("Integrity check failed: {}", err);
                Ok(IntegrityOutcome::Failed(err.to_string()))
            }
        }
    }

    fn force_full_sync_after_partial_run(&mut self, problems: &[String]) {
        log::warn!(
            "Integrity check stopped after {} repairs; forcing a full sync",
            problems.len()
        );
        self.mod_schema_no_check();
        if let Err(err) = self.save() {
            log::error!("Could not save the full sync marker: {}", err);
        }
    }

    fn run_checks(&mut self, pipe: &mut Pipeline<'_>) -> Result<IntegrityOutcome> {
        self.save()?;
        let size_before = self.db()?.file_size()?;
        pipe.tick();
        if !self.db()?.integrity_check()? {
            log::error!("SQLite reports {:?} as corrupt", self.path());
            return Ok(IntegrityOutcome::Failed("database file is corrupt".to_string()));
        }
        pipe.tick();

        let passes: [(&str, Pass); 13] = [
            ("notes of missing note types", Collection::check_missing_models),
            ("note type layout", Collection::check_model_layout),
            ("orphans", Collection::check_orphans),
            ("original due", Collection::check_original_due),
            ("decks", Collection::check_decks),
            ("tags", Collection::rebuild_tags),
            ("field cache", Collection::rebuild_field_cache),
            ("new positions", Collection::check_new_positions),
            ("review due", Collection::check_review_due),
            ("fractional values", Collection::check_fractional_values),
            ("indices", Collection::check_indices),
            ("note types", Collection::check_have_model),
            ("home decks", Collection::check_home_decks),
        ];

        for (name, pass) in passes {
            if pipe.is_cancelled() {
                log::info!("Integrity check cancelled before \"{}\"", name);
                return Ok(IntegrityOutcome::Cancelled);
            }
            let found = pipe.problems.len();
            self.transact(|col| pass(col, pipe))?;
            self.save()?;

            let new = &pipe.problems[found..];
            if new.is_empty() {
                log::debug!("Integrity pass \"{}\": ok", name);
            }
            for problem in new {
                log::warn!("Integrity pass \"{}\": {}", name, problem);
            }
        }

        if pipe.is_cancelled() {
            return Ok(IntegrityOutcome::Cancelled);
        }
        if !pipe.problems.is_empty() {
            self.mod_schema_no_check();
        }
        self.save()?;
        pipe.tick();
        self.db()?.optimize()?;
        pipe.tick();
        let size_after = self.db()?.file_size()?;
        pipe.tick();

        log::info!(
            "Integrity check found {} problems, {} -> {} bytes",
            pipe.problems.len(),
            size_before,
            size_after
        );
        self.log(&format!("integrity check: {} problems", pipe.problems.len()));
        Ok(IntegrityOutcome::Completed(IntegrityReport {
            problems: std::mem::take(&mut pipe.problems),
            size_before,
            size_after,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards::{Card, CARD_TYPE_REV, QUEUE_REV};
    use crate::collection::tests::open_test_collection;
    use crate::scheduler::SchedulerOps;

    fn run(col: &mut Collection) -> IntegrityReport {
        match col.check_integrity(&mut |_, _| {}, None).unwrap() {
            IntegrityOutcome::Completed(report) => report,
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    fn add_basic(col: &mut Collection, front: &str) -> (i64, i64) {
        let mid = col.models().unwrap().by_name("Basic").unwrap().id;
        let mut note = col.new_note(mid).unwrap();
        note.fields = vec![front.to_string(), "back".to_string()];
        col.add_note(&mut note).unwrap();
        let cid = col.card_ids_of_note(note.id).unwrap()[0];
        (note.id, cid)
    }

    #[test]
    fn test_clean_collection_has_no_problems() {
        let (mut col, _temp) = open_test_collection();
        add_basic(&mut col, "front");
        let report = run(&mut col);
        assert!(report.problems.is_empty(), "{:?}", report.problems);
        assert!(report.size_after > 0);
    }

    #[test]
    fn test_repairs_are_idempotent() {
        let (mut col, _temp) = open_test_collection();
        let (nid, cid) = add_basic(&mut col, "front");
        {
            let db = col.db().unwrap();
            db.execute("UPDATE cards SET ivl = 2.5, odue = 7 WHERE id = ?1", [cid])
                .unwrap();
            db.execute("DROP INDEX ix_cards_sched", []).unwrap();
        }
        // card without a note, note of a missing model
        col.flush_card(&Card::new(cid + 100, nid + 100, 1, 0, 1)).unwrap();
        col.db()
            .unwrap()
            .execute(
                "INSERT INTO notes VALUES (?1, 'g', 42, 0, -1, '', 'x', 'x', 0, 0, '')",
                [nid + 200],
            )
            .unwrap();
        let scm = col.scm();

        let first = run(&mut col);
        assert!(first.problems.len() >= 4, "{:?}", first.problems);
        assert!(col.scm() >= scm);
        assert_eq!(col.db().unwrap().index_count().unwrap(), 7);
        let ivl: i64 = col
            .db()
            .unwrap()
            .scalar("SELECT ivl FROM cards WHERE id = ?1", [cid])
            .unwrap();
        assert_eq!(ivl, 3);

        let second = run(&mut col);
        assert!(second.problems.is_empty(), "{:?}", second.problems);
    }

    #[test]
    fn test_review_due_reset_to_today() {
        let (mut col, _temp) = open_test_collection();
        let (_, cid) = add_basic(&mut col, "front");
        let mut card = col.get_card(cid).unwrap();
        card.ctype = CARD_TYPE_REV;
        card.queue = QUEUE_REV;
        card.due = 500_000;
        card.ivl = 30;
        col.update_card(&mut card).unwrap();

        let report = run(&mut col);
        assert_eq!(report.problems.len(), 1);
        let card = col.get_card(cid).unwrap();
        assert_eq!(card.due, col.sched().today());
        assert_eq!(card.ivl, 1);
    }

    #[test]
    fn test_homeless_dynamic_card_recovered() {
        let (mut col, _temp) = open_test_collection();
        let (_, cid) = add_basic(&mut col, "front");
        let dyn_did = col.add_filtered_deck("Cram").unwrap();
        col.db()
            .unwrap()
            .execute("UPDATE cards SET did = ?1, odid = 0 WHERE id = ?2", [dyn_did, cid])
            .unwrap();

        run(&mut col);
        let card = col.get_card(cid).unwrap();
        assert_ne!(card.did, dyn_did);
        assert_eq!(card.odid, 0);
        let deck = col.decks().get(card.did).unwrap();
        assert!(!deck.is_dyn());
        assert!(deck.name.starts_with("Recovered Cards"));
    }

    #[test]
    fn test_bad_ordinal_and_field_count() {
        let (mut col, _temp) = open_test_collection();
        let (nid, cid) = add_basic(&mut col, "one");
        let (other_nid, _) = add_basic(&mut col, "two");
        {
            let db = col.db().unwrap();
            db.execute("UPDATE cards SET ord = 5 WHERE id = ?1", [cid]).unwrap();
            db.execute("UPDATE notes SET flds = 'only one' WHERE id = ?1", [other_nid])
                .unwrap();
        }

        run(&mut col);
        assert!(col.get_card(cid).is_err());
        assert!(col.get_note(nid).is_err());
        assert!(col.get_note(other_nid).is_err());
        assert_eq!(col.note_count().unwrap(), 0);
    }

    #[test]
    fn test_missing_model_recreated() {
        let (mut col, _temp) = open_test_collection();
        let mids = col.models().unwrap().ids();
        col.mod_schema(false).unwrap();
        for mid in mids {
            col.rem_model(mid).unwrap();
        }
        let report = run(&mut col);
        assert_eq!(report.problems.len(), 1);
        assert_eq!(col.models().unwrap().count(), 1);
    }

    #[test]
    fn test_progress_reaches_total() {
        let (mut col, _temp) = open_test_collection();
        let expected = STEPS_PER_MODEL * col.models().unwrap().count() + FIXED_STEPS;
        let mut seen = Vec::new();
        col.check_integrity(&mut |step, total| seen.push((step, total)), None)
            .unwrap();
        assert_eq!(seen.last(), Some(&(expected, expected)));
        assert!(seen.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[test]
    fn test_cancelled_before_passes() {
        let (mut col, _temp) = open_test_collection();
        let token = CancelToken::new();
        token.cancel();
        let outcome = col.check_integrity(&mut |_, _| {}, Some(&token)).unwrap();
        assert_eq!(outcome, IntegrityOutcome::Cancelled);
    }

    #[test]
    fn test_cancelled_run_still_forces_full_sync() {
        let (mut col, _temp) = open_test_collection();
        add_basic(&mut col, "front");
        col.before_upload().unwrap();
        col.reopen().unwrap();
        assert!(!col.schema_changed());
        col.db()
            .unwrap()
            .execute(
                "INSERT INTO notes VALUES (?1, 'g', 42, 0, -1, '', 'x', 'x', 0, 0, '')",
                [col.timestamp_id("notes").unwrap()],
            )
            .unwrap();

        // stop right after the missing note type pass
        let token = CancelToken::new();
        let outcome = col
            .check_integrity(
                &mut |step, _| {
                    if step == 3 {
                        token.cancel();
                    }
                },
                Some(&token),
            )
            .unwrap();
        assert_eq!(outcome, IntegrityOutcome::Cancelled);

        let orphans: i64 = col
            .db()
            .unwrap()
            .scalar("SELECT count() FROM notes WHERE mid = 42", [])
            .unwrap();
        assert_eq!(orphans, 0);
        assert!(col.schema_changed());
    }

    #[test]
    fn test_locked_database_reported_as_locked() {
        let (mut col, _temp) = open_test_collection();
        col.save().unwrap();
        let other = rusqlite::Connection::open(col.path()).unwrap();
        other.execute_batch("BEGIN EXCLUSIVE").unwrap();

        let outcome = col.check_integrity(&mut |_, _| {}, None).unwrap();
        assert_eq!(outcome, IntegrityOutcome::Locked);
        other.execute_batch("ROLLBACK").unwrap();
    }

    #[test]
    fn test_new_positions_clamped() {
        let (mut col, _temp) = open_test_collection();
        let (_, cid) = add_basic(&mut col, "front");
        col.db()
            .unwrap()
            .execute("UPDATE cards SET due = 2000000 WHERE id = ?1", [cid])
            .unwrap();

        let report = run(&mut col);
        assert_eq!(report.problems.len(), 1);
        assert_eq!(col.get_card(cid).unwrap().due, 1_000_000);
        assert_eq!(col.next_pos(), 1_000_001);
    }

    #[test]
    fn test_stale_original_deck_cleared() {
        let (mut col, _temp) = open_test_collection();
        let (_, own) = add_basic(&mut col, "one");
        let (_, foreign) = add_basic(&mut col, "two");
        let other = col.deck_id("Other", true).unwrap();
        {
            let db = col.db().unwrap();
            db.execute("UPDATE cards SET odid = did, odue = 5 WHERE id = ?1", [own])
                .unwrap();
            db.execute(
                "UPDATE cards SET odid = ?1, odue = 9 WHERE id = ?2",
                [other, foreign],
            )
            .unwrap();
        }

        let report = run(&mut col);
        assert_eq!(report.problems.len(), 2, "{:?}", report.problems);
        for cid in [own, foreign] {
            let card = col.get_card(cid).unwrap();
            assert_eq!((card.odid, card.odue), (0, 0));
        }
    }

    #[test]
    fn test_recovery_deck_name_taken() {
        let (mut col, _temp) = open_test_collection();
        let taken = col.deck_id("Recovered Cards", true).unwrap();
        let (_, cid) = add_basic(&mut col, "front");
        let dyn_did = col.add_filtered_deck("Cram").unwrap();
        col.db()
            .unwrap()
            .execute("UPDATE cards SET did = ?1, odid = 0 WHERE id = ?2", [dyn_did, cid])
            .unwrap();

        run(&mut col);
        let card = col.get_card(cid).unwrap();
        assert_ne!(card.did, taken);
        assert_eq!(col.decks().get(card.did).unwrap().name, "Recovered Cards 2");
    }

    #[test]
    fn test_failed_recovery_leaves_no_deck() {
        let (mut col, _temp) = open_test_collection();
        let (_, cid) = add_basic(&mut col, "front");
        let dyn_did = col.add_filtered_deck("Cram").unwrap();
        {
            let db = col.db().unwrap();
            db.execute("UPDATE cards SET did = ?1, odid = 0 WHERE id = ?2", [dyn_did, cid])
                .unwrap();
            db.execute_batch(
                "CREATE TRIGGER frozen BEFORE UPDATE ON cards BEGIN SELECT RAISE(ABORT, 'frozen'); END;",
            )
            .unwrap();
        }

        let outcome = col.check_integrity(&mut |_, _| {}, None).unwrap();
        assert!(matches!(outcome, IntegrityOutcome::Failed(_)), "{:?}", outcome);
        assert!(col.decks().by_name("Recovered Cards").is_none());
        assert_eq!(col.get_card(cid).unwrap().did, dyn_did);
    }

    #[test]
    fn test_reported_problems_capped() {
        let report = IntegrityReport {
            problems: (0..15).map(|i| i.to_string()).collect(),
            size_before: 10,
            size_after: 4,
        };
        assert_eq!(report.reported().len(), MAX_REPORTED_PROBLEMS);
        assert_eq!(report.size_saved(), 6);
    }
}
