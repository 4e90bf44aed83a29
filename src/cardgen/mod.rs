//! Note to card expansion.
//!
//! For every note the generator works out which template ordinals should
//! have a card, inserts the missing ones in a single batched statement and
//! reports cards whose ordinal is no longer required. Those are never
//! deleted here; callers decide what to do with them.

use std::collections::{BTreeSet, HashMap};

use rusqlite::types::Value;

use crate::cancel::{cancelled, CancelToken};
use crate::cards::{Card, CARD_COLUMN_COUNT, QUEUE_NEW};
use crate::collection::{now_secs, Collection, Result};
use crate::decks::DEFAULT_DECK_ID;
use crate::notes::split_fields;
use crate::notetypes::Model;
use crate::storage::ids2str;
use crate::template::{cloze::cloze_ords, question_has_content};

/// Decides whether an ordinal whose question side would be empty still
/// gets a card.
pub trait EmptyCardPolicy {
    fn keep_empty(&self, model: &Model, ord: usize, fields: &[String]) -> bool;
}

/// Empty questions never produce cards.
#[derive(Debug, Clone, Copy, Default)]
pub struct Strict;

impl EmptyCardPolicy for Strict {
    fn keep_empty(&self, _model: &Model, _ord: usize, _fields: &[String]) -> bool {
        false
    }
}

/// A cloze note without any markers keeps its first card.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClozeLenient;

impl EmptyCardPolicy for ClozeLenient {
    fn keep_empty(&self, model: &Model, ord: usize, _fields: &[String]) -> bool {
        model.is_cloze() && ord == 0
    }
}

/// Ordinals that should exist for `fields`, and those left out because their
/// question would be empty.
pub fn required_ords(
    model: &Model,
    fields: &[String],
    policy: &dyn EmptyCardPolicy,
) -> (BTreeSet<usize>, Vec<usize>) {
    let (mut required, candidates) = if model.is_cloze() {
        let ords = cloze_ords(model, fields);
        let fallback = if ords.is_empty() { vec![0] } else { Vec::new() };
        (ords, fallback)
    } else {
        let values: HashMap<String, String> = model
            .field_names()
            .into_iter()
            .zip(fields.iter().cloned())
            .collect();
        let mut required = BTreeSet::new();
        let mut rest = Vec::new();
        for tmpl in &model.tmpls {
            if question_has_content(&tmpl.qfmt, &values, None) {
                required.insert(tmpl.ord);
            } else {
                rest.push(tmpl.ord);
            }
        }
        (required, rest)
    };

    let mut empty = Vec::new();
    for ord in candidates {
        if policy.keep_empty(model, ord, fields) {
            required.insert(ord);
        } else {
            empty.push(ord);
        }
    }
    (required, empty)
}

/// Ordinals of one note that would render an empty question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmptyCards {
    pub nid: i64,
    pub ords: Vec<usize>,
    /// The note's content requires no card at all.
    pub note_has_no_cards: bool,
}

/// Outcome of a generation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Generation {
    /// Existing cards whose ordinal is no longer required.
    pub to_remove: Vec<i64>,
    /// Number of cards inserted.
    pub added: usize,
    pub empty: Vec<EmptyCards>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommonDeck {
    Unset,
    Single(i64),
    Mixed,
}

#[derive(Debug)]
struct ExistingCards {
    by_ord: HashMap<usize, i64>,
    deck: CommonDeck,
    new_due: Option<i64>,
}

impl Default for ExistingCards {
    fn default() -> Self {
        Self {
            by_ord: HashMap::new(),
            deck: CommonDeck::Unset,
            new_due: None,
        }
    }
}

impl ExistingCards {
    fn add(&mut self, cid: i64, ord: usize, home_did: i64, queue: i32, due: i64) {
        self.by_ord.insert(ord, cid);
        self.deck = match self.deck {
            CommonDeck::Unset => CommonDeck::Single(home_did),
            CommonDeck::Single(did) if did == home_did => CommonDeck::Single(did),
            _ => CommonDeck::Mixed,
        };
        if queue == QUEUE_NEW && self.new_due.is_none() {
            self.new_due = Some(due);
        }
    }

    fn common_deck(&self) -> Option<i64> {
        match self.deck {
            CommonDeck::Single(did) => Some(did),
            _ => None,
        }
    }
}

impl Collection {
    /// Bring the cards of `nids` (all of model `mid`) in line with their
    /// content.
    ///
    /// Returns `None` when `cancel` fires; nothing is inserted in that case.
    pub fn generate_cards(
        &mut self,
        nids: &[i64],
        mid: i64,
        cancel: Option<&CancelToken>,
    ) -> Result<Option<Generation>> {
        let model = self.model(mid)?;
        let mut generation = Generation::default();
        if nids.is_empty() {
            return Ok(Some(generation));
        }

        let mut existing: HashMap<i64, ExistingCards> = HashMap::new();
        let mut notes: Vec<(i64, String)> = Vec::with_capacity(nids.len());
        for chunk in nids.chunks(self.read_chunk) {
            let id_list = ids2str(chunk);
            for (cid, nid, ord, did, odid, queue, due) in self.db()?.query_map(
                &format!(
                    "SELECT id, nid, ord, did, odid, queue, due FROM cards WHERE nid IN {}",
                    id_list
                ),
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i32>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                },
            )? {
                let home = if odid != 0 { odid } else { did };
                existing
                    .entry(nid)
                    .or_default()
                    .add(cid, ord.max(0) as usize, home, queue, due);
            }

            notes.extend(self.db()?.query_map(
                &format!("SELECT id, flds FROM notes WHERE id IN {} AND mid = ?1", id_list),
                [mid],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )?);
        }
        notes.sort_unstable_by_key(|(nid, _)| *nid);

        let start_pos = self.next_pos();
        let mut next_id = self.db()?.max_id()?;
        let now = now_secs();
        let usn = self.usn();
        let mut rows: Vec<Vec<Value>> = Vec::new();
        let no_cards = ExistingCards::default();

        for (nid, flds) in notes {
            if cancelled(cancel) {
                self.set_next_position(start_pos);
                log::info!("Card generation cancelled");
                return Ok(None);
            }

            let fields = split_fields(&flds);
            let (required, empty) = required_ords(&model, &fields, self.empty_policy.as_ref());
            let have = existing.get(&nid).unwrap_or(&no_cards);

            if !empty.is_empty() || required.is_empty() {
                generation.empty.push(EmptyCards {
                    nid,
                    ords: empty,
                    note_has_no_cards: required.is_empty(),
                });
            }

            let mut due = have.new_due;
            for &ord in &required {
                if have.by_ord.contains_key(&ord) {
                    continue;
                }
                let did = self.target_deck(&model, ord, have.common_deck());
                let card_due = match due {
                    Some(due) => due,
                    None => {
                        let pos = self.next_position();
                        due = Some(pos);
                        pos
                    }
                };
                let mut card = Card::new(next_id, nid, did, ord, card_due);
                card.mtime = now;
                card.usn = usn;
                rows.push(card.to_values());
                next_id += 1;
            }

            let mut stale: Vec<(usize, i64)> = have
                .by_ord
                .iter()
                .filter(|(ord, _)| !required.contains(ord))
                .map(|(ord, cid)| (*ord, *cid))
                .collect();
            stale.sort_unstable();
            generation.to_remove.extend(stale.into_iter().map(|(_, cid)| cid));
        }

        generation.added = self.db()?.insert_rows("cards", CARD_COLUMN_COUNT, &rows)?;
        log::debug!(
            "Generated {} cards for {} notes of \"{}\", {} no longer required",
            generation.added,
            nids.len(),
            model.name,
            generation.to_remove.len()
        );
        Ok(Some(generation))
    }

    /// Deck for a new card: template override, then the note's common deck,
    /// then the model's default. Dynamic or missing decks fall back to the
    /// default deck.
    fn target_deck(&self, model: &Model, ord: usize, common: Option<i64>) -> i64 {
        let tmpl_did = model.template(ord).and_then(|tmpl| tmpl.did).filter(|did| *did != 0);
        let did = tmpl_did.or(common).unwrap_or(model.did);
        match self.decks.get(did) {
            Some(deck) if !deck.is_dyn() => did,
            _ => DEFAULT_DECK_ID,
        }
    }

    /// Ids of existing cards whose question side is empty, across every
    /// model.
    pub fn empty_card_ids(&mut self, cancel: Option<&CancelToken>) -> Result<Option<Vec<i64>>> {
        let mut out = Vec::new();
        let mids = self.models()?.ids();
        for mid in mids {
            let model = self.model(mid)?;
            let notes: Vec<(i64, String)> = self.db()?.query_map(
                "SELECT id, flds FROM notes WHERE mid = ?1",
                [mid],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            for (nid, flds) in notes {
                if cancelled(cancel) {
                    return Ok(None);
                }
                let (required, _) =
                    required_ords(&model, &split_fields(&flds), self.empty_policy.as_ref());
                let cards: Vec<(i64, i64)> = self.db()?.query_map(
                    "SELECT id, ord FROM cards WHERE nid = ?1 ORDER BY ord",
                    [nid],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?;
                out.extend(
                    cards
                        .into_iter()
                        .filter(|(_, ord)| !required.contains(&((*ord).max(0) as usize)))
                        .map(|(cid, _)| cid),
                );
            }
        }
        Ok(Some(out))
    }
}
