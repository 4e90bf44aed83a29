use std::collections::HashMap;

use anyhow::Result;

use crate::app::App;
use crate::render::terminal::{paint, table, Color};
use crate::OutputFormat;

pub fn run(app: &App, format: &OutputFormat, use_color: bool) -> Result<()> {
    let counts: HashMap<i64, i64> = app
        .col
        .db()?
        .query_map(
            "SELECT did, count() FROM cards GROUP BY did",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?
        .into_iter()
        .collect();
    let current = app.col.current_deck_id();
    let decks = app.col.decks().all();

    match format {
        OutputFormat::Json => {
            let output: Vec<serde_json::Value> = decks
                .iter()
                .map(|deck| {
                    serde_json::json!({
                        "id": deck.id,
                        "name": deck.name,
                        "filtered": deck.is_dyn(),
                        "cards": counts.get(&deck.id).copied().unwrap_or(0),
                        "current": deck.id == current,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            let rows: Vec<(String, String)> = decks
                .iter()
                .map(|deck| {
                    let marker = if deck.id == current { "* " } else { "  " };
                    let filtered = if deck.is_dyn() { " [filtered]" } else { "" };
                    (
                        format!("{}{}{}", marker, deck.name, filtered),
                        counts.get(&deck.id).copied().unwrap_or(0).to_string(),
                    )
                })
                .collect();
            let lines = table(("  Deck", "Cards"), &rows);
            println!("{}", paint(&lines[0], Color::BOLD, use_color));
            for line in &lines[1..] {
                println!("{}", line);
            }
            println!("\n{} decks total", decks.len());
        }
    }

    Ok(())
}
