use rusqlite::params;

use super::Pipeline;
use crate::cards::{CARD_TYPE_NEW, QUEUE_REV};
use crate::collection::{now_secs, Collection, CollectionError, Result};
use crate::notes::split_fields;
use crate::notetypes::{stock, Model};
use crate::scheduler::SchedulerOps;
use crate::storage::ids2str;

/// Highest position a new card may hold.
const NEW_DUE_CEILING: i64 = 1_000_000;
/// Review due days beyond this are treated as garbage.
const REVIEW_DUE_CEILING: i64 = 100_000;
const EXPECTED_INDEX_COUNT: i64 = 7;
const RECOVERY_DECK: &str = "Recovered Cards";

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("1 {}", word)
    } else {
        format!("{} {}s", n, word)
    }
}

impl Collection {
    pub(super) fn check_missing_models(&mut self, pipe: &mut Pipeline<'_>) -> Result<()> {
        let mids = self.models()?.ids();
        let nids: Vec<i64> = self.db()?.list(
            &format!("SELECT id FROM notes WHERE mid NOT IN {}", ids2str(&mids)),
            [],
        )?;
        if !nids.is_empty() {
            self.rem_notes(&nids)?;
            pipe.problem(format!(
                "Deleted {} with a missing note type.",
                plural(nids.len(), "note")
            ));
        }
        pipe.tick();
        Ok(())
    }

    /// Per note type: cards with an ordinal the type has no template for, and
    /// notes whose field count disagrees with it.
    pub(super) fn check_model_layout(&mut self, pipe: &mut Pipeline<'_>) -> Result<()> {
        let models: Vec<Model> = self.models()?.all().into_iter().cloned().collect();
        for model in models {
            pipe.tick();

            if !model.is_cloze() {
                let ords: Vec<i64> = model.template_ords().into_iter().map(|o| o as i64).collect();
                let cids: Vec<i64> = self.db()?.list(
                    &format!(
                        "SELECT id FROM cards WHERE ord NOT IN {}
                         AND nid IN (SELECT id FROM notes WHERE mid = ?1)",
                        ids2str(&ords)
                    ),
                    [model.id],
                )?;
                if !cids.is_empty() {
                    self.rem_cards(&cids, false)?;
                    pipe.problem(format!(
                        "Deleted {} with missing template in \"{}\".",
                        plural(cids.len(), "card"),
                        model.name
                    ));
                }
            }
            pipe.tick();

            let notes: Vec<(i64, String)> = self.db()?.query_map(
                "SELECT id, flds FROM notes WHERE mid = ?1",
                [model.id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            let bad: Vec<i64> = notes
                .into_iter()
                .filter(|(_, flds)| split_fields(flds).len() != model.flds.len())
                .map(|(nid, _)| nid)
                .collect();
            if !bad.is_empty() {
                self.rem_notes(&bad)?;
                pipe.problem(format!(
                    "Deleted {} with wrong field count in \"{}\".",
                    plural(bad.len(), "note"),
                    model.name
                ));
            }
            pipe.tick();
        }
        Ok(())
    }

    pub(super) fn check_orphans(&mut self, pipe: &mut Pipeline<'_>) -> Result<()> {
        let nids: Vec<i64> = self.db()?.list(
            "SELECT id FROM notes WHERE id NOT IN (SELECT DISTINCT nid FROM cards)",
            [],
        )?;
        if !nids.is_empty() {
            self.rem_notes_raw(&nids)?;
            pipe.problem(format!("Deleted {} with no cards.", plural(nids.len(), "note")));
        }
        pipe.tick();

        let cids: Vec<i64> = self.db()?.list(
            "SELECT id FROM cards WHERE nid NOT IN (SELECT id FROM notes)",
            [],
        )?;
        if !cids.is_empty() {
            self.rem_cards(&cids, false)?;
            pipe.problem(format!(
                "Deleted {} with missing note.",
                plural(cids.len(), "card")
            ));
        }
        pipe.tick();
        Ok(())
    }

    /// `odue` only means something while a card is borrowed by a dynamic
    /// deck, and a card cannot be borrowed from the deck it sits in.
    pub(super) fn check_original_due(&mut self, pipe: &mut Pipeline<'_>) -> Result<()> {
        let (usn, now) = (self.usn(), now_secs());

        let fixed = self.db()?.execute(
            "UPDATE cards SET odue = 0, mod = ?1, usn = ?2 WHERE odid = 0 AND odue != 0",
            params![now, usn],
        )?;
        if fixed > 0 {
            pipe.problem(format!(
                "Fixed {} with invalid original due.",
                plural(fixed, "card")
            ));
        }
        pipe.tick();

        let fixed = self.db()?.execute(
            "UPDATE cards SET odid = 0, odue = 0, mod = ?1, usn = ?2 WHERE odid != 0 AND odid = did",
            params![now, usn],
        )?;
        if fixed > 0 {
            pipe.problem(format!(
                "Fixed {} borrowed from their own deck.",
                plural(fixed, "card")
            ));
        }
        pipe.tick();
        Ok(())
    }

    pub(super) fn check_decks(&mut self, pipe: &mut Pipeline<'_>) -> Result<()> {
        let (usn, now) = (self.usn(), now_secs());

        let normal = self.decks.all_normal_ids();
        let fixed = self.db()?.execute(
            &format!(
                "UPDATE cards SET odid = 0, odue = 0, mod = ?1, usn = ?2
                 WHERE odid != 0 AND did IN {}",
                ids2str(&normal)
            ),
            params![now, usn],
        )?;
        if fixed > 0 {
            pipe.problem(format!(
                "Fixed {} with a filtered-deck marker in a normal deck.",
                plural(fixed, "card")
            ));
        }
        pipe.tick();

        let fixed = self.decks.strip_conf_from_dynamic(usn, now);
        if fixed > 0 {
            pipe.problem(format!(
                "Removed options from {}.",
                plural(fixed, "filtered deck")
            ));
        }
        pipe.tick();

        let fixed = self.decks.reset_dangling_conf(usn, now);
        if fixed > 0 {
            pipe.problem(format!(
                "Reset options of {} to the default.",
                plural(fixed, "deck")
            ));
        }
        pipe.tick();

        for problem in self.decks.check_integrity(usn, now) {
            pipe.problem(problem);
        }
        pipe.tick();
        Ok(())
    }

    pub(super) fn rebuild_tags(&mut self, pipe: &mut Pipeline<'_>) -> Result<()> {
        let usn = self.usn();
        let db = self.db.as_ref().ok_or(CollectionError::Closed)?;
        self.tags.register_notes(db, None, usn)?;
        pipe.tick();
        Ok(())
    }

    pub(super) fn rebuild_field_cache(&mut self, pipe: &mut Pipeline<'_>) -> Result<()> {
        let mids = self.models()?.ids();
        for mid in mids {
            let nids = self.model_nids(mid)?;
            self.update_field_cache(&nids)?;
            pipe.tick();
        }
        Ok(())
    }

    pub(super) fn check_new_positions(&mut self, pipe: &mut Pipeline<'_>) -> Result<()> {
        let fixed = self.db()?.execute(
            "UPDATE cards SET due = ?1, mod = ?2, usn = ?3 WHERE type = ?4 AND due > ?1",
            params![NEW_DUE_CEILING, now_secs(), self.usn(), CARD_TYPE_NEW],
        )?;
        if fixed > 0 {
            pipe.problem(format!(
                "Clamped {} with a position above {}.",
                plural(fixed, "new card"),
                NEW_DUE_CEILING
            ));
        }
        pipe.tick();

        let max: Option<i64> = self
            .db()?
            .scalar("SELECT max(due) FROM cards WHERE type = ?1", [CARD_TYPE_NEW])?;
        if let Some(max) = max {
            self.set_next_position(max + 1);
        }
        pipe.tick();
        Ok(())
    }

    pub(super) fn check_review_due(&mut self, pipe: &mut Pipeline<'_>) -> Result<()> {
        let today = self.sched.today();
        let fixed = self.db()?.execute(
            "UPDATE cards SET due = ?1, ivl = 1, mod = ?2, usn = ?3 WHERE queue = ?4 AND due > ?5",
            params![today, now_secs(), self.usn(), QUEUE_REV, REVIEW_DUE_CEILING],
        )?;
        if fixed > 0 {
            pipe.problem(format!(
                "Reset {} with a due day above {}.",
                plural(fixed, "review card"),
                REVIEW_DUE_CEILING
            ));
        }
        pipe.tick();
        Ok(())
    }

    /// Older schedulers could write fractional intervals and due values.
    pub(super) fn check_fractional_values(&mut self, pipe: &mut Pipeline<'_>) -> Result<()> {
        let (usn, now) = (self.usn(), now_secs());
        let targets = [
            ("cards", "ivl", "card", "interval"),
            ("cards", "due", "card", "due"),
            ("revlog", "ivl", "review entry", "interval"),
            ("revlog", "lastIvl", "review entry", "last interval"),
        ];
        for (table, column, what, label) in targets {
            let stamp = if table == "cards" {
                ", mod = ?1, usn = ?2"
            } else {
                ""
            };
            let sql = format!(
                "UPDATE {table} SET {column} = CAST(round({column}) AS INTEGER){stamp}
                 WHERE {column} != round({column})"
            );
            let fixed = if table == "cards" {
                self.db()?.execute(&sql, params![now, usn])?
            } else {
                self.db()?.execute(&sql, [])?
            };
            if fixed > 0 {
                pipe.problem(format!(
                    "Rounded fractional {} of {}.",
                    label,
                    plural(fixed, what)
                ));
            }
            pipe.tick();
        }
        Ok(())
    }

    pub(super) fn check_indices(&mut self, pipe: &mut Pipeline<'_>) -> Result<()> {
        let db = self.db()?;
        if db.index_count()? < EXPECTED_INDEX_COUNT {
            db.update_indices()?;
            pipe.problem("Recreated missing database indices.".to_string());
        }
        pipe.tick();
        Ok(())
    }

    pub(super) fn check_have_model(&mut self, pipe: &mut Pipeline<'_>) -> Result<()> {
        if self.models()?.count() == 0 {
            let mid = self.add_model(stock::basic())?;
            self.set_current_model(mid)?;
            pipe.problem("Added a missing Basic note type.".to_string());
        }
        pipe.tick();
        Ok(())
    }

    /// Cards in a filtered deck without a normal home deck, or in a deck
    /// that no longer exists, go to a new recovery deck.
    pub(super) fn check_home_decks(&mut self, pipe: &mut Pipeline<'_>) -> Result<()> {
        let dynamic = self.decks.all_dynamic_ids();
        let normal = self.decks.all_normal_ids();
        let all = self.decks.all_ids();
        let cids: Vec<i64> = self.db()?.list(
            &format!(
                "SELECT id FROM cards
                 WHERE (did IN {dynamic} AND odid NOT IN {normal}) OR did NOT IN {all}",
                dynamic = ids2str(&dynamic),
                normal = ids2str(&normal),
                all = ids2str(&all)
            ),
            [],
        )?;
        pipe.tick();
        if cids.is_empty() {
            pipe.tick();
            pipe.tick();
            return Ok(());
        }

        let name = self.free_deck_name(RECOVERY_DECK);
        let did = self.deck_id(&name, true).ok_or_else(|| {
            CollectionError::InvalidOperation(format!("cannot create deck \"{}\"", name))
        })?;
        pipe.tick();

        let moved = self.db().and_then(|db| {
            Ok(db.execute(
                &format!(
                    "UPDATE cards SET did = ?1, odid = 0,
                     due = CASE WHEN odue != 0 THEN odue ELSE due END, odue = 0,
                     mod = ?2, usn = ?3 WHERE id IN {}",
                    ids2str(&cids)
                ),
                params![did, now_secs(), self.usn()],
            )?)
        });
        if let Err(err) = moved {
            // the registry is not covered by the rollback
            self.decks.remove_entry(did);
            return Err(err);
        }
        pipe.problem(format!(
            "Moved {} without a home deck to \"{}\".",
            plural(cids.len(), "card"),
            name
        ));
        pipe.tick();
        Ok(())
    }

    fn free_deck_name(&self, base: &str) -> String {
        let mut name = base.to_string();
        let mut n = 1;
        while self.decks.by_name(&name).is_some() {
            n += 1;
            name = format!("{} {}", base, n);
        }
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plural() {
        assert_eq!(plural(1, "card"), "1 card");
        assert_eq!(plural(3, "note"), "3 notes");
    }
}
