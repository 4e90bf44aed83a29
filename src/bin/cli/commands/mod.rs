pub mod add;
pub mod check;
pub mod decks;
pub mod empty_cards;
pub mod info;
pub mod tags;
