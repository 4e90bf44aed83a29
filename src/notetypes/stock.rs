//! Built-in note types added to new collections or on demand.

use super::models::{Model, Template, MODEL_CLOZE, MODEL_STD};

pub fn basic() -> Model {
    let mut m = Model::new("Basic", MODEL_STD);
    m.add_field_entry("Front");
    m.add_field_entry("Back");
    m.add_template_entry(Template::new(
        "Card 1",
        "{{Front}}",
        "{{FrontSide}}\n\n<hr id=answer>\n\n{{Back}}",
    ));
    m
}

pub fn basic_and_reversed() -> Model {
    let mut m = basic();
    m.name = "Basic (and reversed card)".to_string();
    m.add_template_entry(Template::new(
        "Card 2",
        "{{Back}}",
        "{{FrontSide}}\n\n<hr id=answer>\n\n{{Front}}",
    ));
    m
}

/// Reverse card only exists when the "Add Reverse" field is filled.
pub fn basic_optional_reversed() -> Model {
    let mut m = basic();
    m.name = "Basic (optional reversed card)".to_string();
    m.add_field_entry("Add Reverse");
    m.add_template_entry(Template::new(
        "Card 2",
        "{{#Add Reverse}}{{Back}}{{/Add Reverse}}",
        "{{FrontSide}}\n\n<hr id=answer>\n\n{{Front}}",
    ));
    m
}

pub fn cloze() -> Model {
    let mut m = Model::new("Cloze", MODEL_CLOZE);
    m.add_field_entry("Text");
    m.add_field_entry("Back Extra");
    m.add_template_entry(Template::new(
        "Cloze",
        "{{cloze:Text}}",
        "{{cloze:Text}}<br>\n{{Back Extra}}",
    ));
    m.css = ".cloze { font-weight: bold; color: blue; }".to_string();
    m
}
