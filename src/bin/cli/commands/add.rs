use anyhow::{bail, Context, Result};

use crate::app::App;
use crate::render::terminal::{paint, Color};
use crate::OutputFormat;

pub fn run(
    app: &mut App,
    model_name: Option<&str>,
    deck_name: Option<&str>,
    tags: Option<&str>,
    fields: Vec<String>,
    format: &OutputFormat,
    use_color: bool,
) -> Result<()> {
    let model = match model_name {
        Some(name) => app.find_model(name)?,
        None => app.col.current_model().context("No note type available")?,
    };
    if fields.len() != model.flds.len() {
        bail!(
            "'{}' expects {} fields ({}), got {}",
            model.name,
            model.flds.len(),
            model.field_names().join(", "),
            fields.len()
        );
    }

    let mut note = app.col.new_note(model.id)?;
    note.fields = fields;
    if let Some(tag_str) = tags {
        for tag in tag_str.split(|c: char| c == ',' || c.is_whitespace()) {
            if !tag.is_empty() {
                note.add_tag(tag);
            }
        }
    }

    let added = app.col.add_note(&mut note)?;
    if added == 0 {
        bail!("The note would produce no cards; check the fields and note type.");
    }

    let mut deck_id = None;
    if let Some(name) = deck_name {
        let did = app
            .col
            .deck_id(name, true)
            .with_context(|| format!("Invalid deck name '{}'", name))?;
        let cids = app.col.card_ids_of_note(note.id)?;
        app.col.set_deck(&cids, did)?;
        deck_id = Some(did);
    }

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "noteId": note.id,
                "noteType": model.name,
                "cards": added,
                "deckId": deck_id,
                "tags": note.tags,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            println!(
                "{} note {} ({}, {} card{})",
                paint("Added", Color::GREEN, use_color),
                note.id,
                model.name,
                added,
                if added == 1 { "" } else { "s" }
            );
        }
    }

    Ok(())
}
