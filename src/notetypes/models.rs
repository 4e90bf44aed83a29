//! Note types ("models") as stored in the `col.models` JSON blob.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::decks::DEFAULT_DECK_ID;

/// Fixed template list; ordinal = template index.
pub const MODEL_STD: u8 = 0;
/// Single template; ordinals come from cloze markers in the fields.
pub const MODEL_CLOZE: u8 = 1;

/// Field layout and card templates shared by a set of notes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: u8,
    pub flds: Vec<Field>,
    pub tmpls: Vec<Template>,
    /// Index of the field used for sorting and duplicate checks.
    #[serde(default)]
    pub sortf: usize,
    /// Deck new cards go to when nothing more specific applies.
    #[serde(default = "default_deck")]
    pub did: i64,
    #[serde(rename = "mod", default)]
    pub mtime: i64,
    #[serde(default)]
    pub usn: i32,
    #[serde(default)]
    pub css: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_deck() -> i64 {
    DEFAULT_DECK_ID
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub ord: usize,
    #[serde(default)]
    pub sticky: bool,
    #[serde(default)]
    pub rtl: bool,
    #[serde(default = "default_font")]
    pub font: String,
    #[serde(default = "default_font_size")]
    pub size: i32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_font() -> String {
    "Arial".to_string()
}

fn default_font_size() -> i32 {
    20
}

impl Field {
    pub fn new(name: &str, ord: usize) -> Self {
        Self {
            name: name.to_string(),
            ord,
            sticky: false,
            rtl: false,
            font: default_font(),
            size: default_font_size(),
            extra: Map::new(),
        }
    }
}

/// Question/answer format pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    pub ord: usize,
    pub qfmt: String,
    pub afmt: String,
    /// Deck override for cards generated from this template.
    #[serde(default)]
    pub did: Option<i64>,
    #[serde(default)]
    pub bqfmt: String,
    #[serde(default)]
    pub bafmt: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Template {
    pub fn new(name: &str, qfmt: &str, afmt: &str) -> Self {
        Self {
            name: name.to_string(),
            ord: 0,
            qfmt: qfmt.to_string(),
            afmt: afmt.to_string(),
            did: None,
            bqfmt: String::new(),
            bafmt: String::new(),
            extra: Map::new(),
        }
    }
}

impl Model {
    pub fn new(name: &str, kind: u8) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            kind,
            flds: Vec::new(),
            tmpls: Vec::new(),
            sortf: 0,
            did: DEFAULT_DECK_ID,
            mtime: 0,
            usn: 0,
            css: String::new(),
            tags: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn is_cloze(&self) -> bool {
        self.kind == MODEL_CLOZE
    }

    pub fn field_names(&self) -> Vec<String> {
        self.flds.iter().map(|f| f.name.clone()).collect()
    }

    /// Field name -> index.
    pub fn field_map(&self) -> HashMap<String, usize> {
        self.flds
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect()
    }

    /// Sort field index, clamped into range.
    pub fn sort_idx(&self) -> usize {
        if self.sortf < self.flds.len() {
            self.sortf
        } else {
            0
        }
    }

    /// Template for card ordinal `ord`.
    ///
    /// Cloze models have one template; it is cloned with the requested
    /// ordinal so every cloze index renders through it.
    pub fn template(&self, ord: usize) -> Option<Template> {
        if self.is_cloze() {
            let mut tmpl = self.tmpls.first()?.clone();
            tmpl.ord = ord;
            Some(tmpl)
        } else {
            self.tmpls.get(ord).cloned()
        }
    }

    /// Ordinals of a standard model's templates. Empty for cloze models, which
    /// have no fixed bound.
    pub fn template_ords(&self) -> Vec<usize> {
        if self.is_cloze() {
            Vec::new()
        } else {
            self.tmpls.iter().map(|t| t.ord).collect()
        }
    }

    pub fn add_field_entry(&mut self, name: &str) {
        let ord = self.flds.len();
        self.flds.push(Field::new(name, ord));
    }

    pub fn add_template_entry(&mut self, mut tmpl: Template) {
        tmpl.ord = self.tmpls.len();
        self.tmpls.push(tmpl);
    }

    /// Renumber field and template ordinals after a removal.
    pub fn renumber(&mut self) {
        for (i, f) in self.flds.iter_mut().enumerate() {
            f.ord = i;
        }
        for (i, t) in self.tmpls.iter_mut().enumerate() {
            t.ord = i;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cloze_template_is_synthesized() {
        let mut model = Model::new("Cloze", MODEL_CLOZE);
        model.add_field_entry("Text");
        model.add_template_entry(Template::new("Cloze", "{{cloze:Text}}", "{{cloze:Text}}"));

        let tmpl = model.template(4).unwrap();
        assert_eq!(tmpl.ord, 4);
        assert_eq!(tmpl.qfmt, "{{cloze:Text}}");
        assert!(model.template_ords().is_empty());
    }

    #[test]
    fn test_standard_template_lookup() {
        let mut model = Model::new("Basic", MODEL_STD);
        model.add_field_entry("Front");
        model.add_field_entry("Back");
        model.add_template_entry(Template::new("Card 1", "{{Front}}", "{{Back}}"));

        assert!(model.template(0).is_some());
        assert!(model.template(1).is_none());
        assert_eq!(model.template_ords(), vec![0]);
        assert_eq!(model.field_map()["Back"], 1);
    }

    #[test]
    fn test_sort_idx_clamped() {
        let mut model = Model::new("Basic", MODEL_STD);
        model.add_field_entry("Front");
        model.sortf = 3;
        assert_eq!(model.sort_idx(), 0);
    }

    #[test]
    fn test_json_keys() {
        let mut model = Model::new("Basic", MODEL_STD);
        model.add_field_entry("Front");
        let json = serde_json::to_value(&model).unwrap();
        assert_eq!(json["type"], 0);
        assert_eq!(json["did"], 1);
        assert_eq!(json["flds"][0]["name"], "Front");
    }
}
