//! Deck registry
//!
//! This module provides:
//! - Hierarchical decks (`Parent::Child` names)
//! - Dynamic (filtered) decks that temporarily hold borrowed cards
//! - Deck options groups shared by normal decks

pub mod models;
pub mod registry;

pub use models::*;
pub use registry::{normalize_name, DeckRegistry};
