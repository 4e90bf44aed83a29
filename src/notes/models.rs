//! Note records (`notes` table).

use rusqlite::Row;
use serde::{Deserialize, Serialize};

use crate::notetypes::Model;
use crate::tags;

/// Separator between field values in the `flds` column.
pub const FIELD_SEPARATOR: char = '\u{1f}';

/// Columns selected by [`Note::from_row`], in order.
pub const NOTE_COLUMNS: &str = "id, guid, mid, mod, usn, tags, flds, flags, data";

/// User-entered content: field values plus tags, typed by a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: i64,
    pub guid: String,
    pub mid: i64,
    pub mtime: i64,
    pub usn: i32,
    pub tags: Vec<String>,
    pub fields: Vec<String>,
    pub flags: i32,
    pub data: String,
}

/// Result of checking a note's sort field before adding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DupeOrEmpty {
    Normal,
    Empty,
    Duplicate,
}

impl Note {
    /// A blank, unsaved note with one empty value per model field.
    pub fn new(model: &Model) -> Self {
        Self {
            id: 0,
            guid: new_guid(),
            mid: model.id,
            mtime: 0,
            usn: 0,
            tags: Vec::new(),
            fields: vec![String::new(); model.flds.len()],
            flags: 0,
            data: String::new(),
        }
    }

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let tags: String = row.get(5)?;
        let flds: String = row.get(6)?;
        Ok(Self {
            id: row.get(0)?,
            guid: row.get(1)?,
            mid: row.get(2)?,
            mtime: row.get(3)?,
            usn: row.get(4)?,
            tags: tags::split(&tags),
            fields: split_fields(&flds),
            flags: row.get(7)?,
            data: row.get(8)?,
        })
    }

    pub fn joined_fields(&self) -> String {
        join_fields(&self.fields)
    }

    pub fn string_tags(&self) -> String {
        tags::join(&tags::canonify(&self.tags))
    }

    /// Set a field by name. False when the model has no such field.
    pub fn set_field(&mut self, model: &Model, name: &str, value: &str) -> bool {
        match model.field_map().get(name) {
            Some(idx) if *idx < self.fields.len() => {
                self.fields[*idx] = value.to_string();
                true
            }
            _ => false,
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        tags::in_list(tag, &self.tags)
    }

    pub fn add_tag(&mut self, tag: &str) {
        if !self.has_tag(tag) {
            self.tags.push(tag.to_string());
        }
    }

    pub fn remove_tag(&mut self, tag: &str) {
        self.tags.retain(|t| !t.eq_ignore_ascii_case(tag));
    }
}

pub fn split_fields(flds: &str) -> Vec<String> {
    flds.split(FIELD_SEPARATOR).map(str::to_string).collect()
}

pub fn join_fields(fields: &[String]) -> String {
    fields.join(&FIELD_SEPARATOR.to_string())
}

/// Globally unique id used to match notes across devices.
pub fn new_guid() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
