use anyhow::{Context, Result};

use crate::app::App;
use crate::render::terminal::{paint, Color};
use crate::OutputFormat;

pub fn run(app: &mut App, delete: bool, format: &OutputFormat, use_color: bool) -> Result<()> {
    let cids = app
        .col
        .empty_card_ids(None)?
        .context("Empty card scan was cancelled")?;

    let mut rows = Vec::new();
    for cid in &cids {
        let card = app.col.get_card(*cid)?;
        rows.push((card.id, card.nid, card.ord));
    }

    if delete && !cids.is_empty() {
        app.col.rem_cards(&cids, true)?;
    }

    match format {
        OutputFormat::Json => {
            let output: Vec<serde_json::Value> = rows
                .iter()
                .map(|(cid, nid, ord)| {
                    serde_json::json!({
                        "cardId": cid,
                        "noteId": nid,
                        "ord": ord,
                    })
                })
                .collect();
            let output = serde_json::json!({ "cards": output, "deleted": delete });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            if rows.is_empty() {
                println!("No empty cards.");
                return Ok(());
            }
            for (cid, nid, ord) in &rows {
                println!("card {} (note {}, card {})", cid, nid, ord + 1);
            }
            if delete {
                println!(
                    "{} {} empty cards",
                    paint("Deleted", Color::RED, use_color),
                    rows.len()
                );
            } else {
                println!("\n{} empty cards; pass --delete to remove them", rows.len());
            }
        }
    }

    Ok(())
}
