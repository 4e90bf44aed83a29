//! Note types (models)
//!
//! A model defines the ordered fields of its notes and the templates that
//! turn a note into cards. Standard models have a fixed template list; cloze
//! models derive their card ordinals from `{{cN::...}}` markers.

pub mod models;
pub mod registry;
pub mod stock;

pub use models::*;
pub use registry::ModelRegistry;
