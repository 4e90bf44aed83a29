//! Notes: field values plus tags, typed by a note type.

pub mod models;

pub use models::*;
