//! Flashcard collection engine.
//!
//! [`Collection`] owns the database file and every registry kept in it, and
//! is the only entry point for changes: notes, cards, decks, note types,
//! undo and the integrity check all go through it.

pub mod cancel;
pub mod cardgen;
pub mod cards;
pub mod collection;
pub mod config;
pub mod decks;
pub mod integrity;
pub mod media;
pub mod notes;
pub mod notetypes;
pub mod scheduler;
pub mod storage;
pub mod tags;
pub mod template;
pub mod undo;

pub use cancel::CancelToken;
pub use cardgen::{ClozeLenient, EmptyCardPolicy, EmptyCards, Generation, Strict};
pub use cards::Card;
pub use collection::{Collection, CollectionError, Result};
pub use integrity::{IntegrityOutcome, IntegrityReport};
pub use notes::{DupeOrEmpty, Note};
pub use notetypes::{Model, Template};
pub use scheduler::{Scheduler, SchedulerOps};
pub use undo::UndoAction;
