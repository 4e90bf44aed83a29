//! Cards
//!
//! A card is one reviewable instance of a note at a template ordinal. Card
//! operations that touch more than one row live on the collection.

pub mod models;

pub use models::*;
