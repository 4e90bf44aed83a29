use std::collections::BTreeMap;

use anyhow::Result;

use flashdeck_lib::tags;

use crate::app::App;
use crate::render::terminal::{paint, table, Color};
use crate::OutputFormat;

pub fn run(app: &App, format: &OutputFormat, use_color: bool) -> Result<()> {
    let mut counts: BTreeMap<String, usize> = app
        .col
        .tags()
        .all()
        .into_iter()
        .map(|tag| (tag, 0))
        .collect();
    let rows: Vec<String> = app.col.db()?.list("SELECT tags FROM notes", [])?;
    for row in rows {
        for tag in tags::split(&row) {
            *counts.entry(tag).or_insert(0) += 1;
        }
    }

    // Sort by count descending
    let mut tags: Vec<(String, usize)> = counts.into_iter().collect();
    tags.sort_by(|a, b| b.1.cmp(&a.1));

    match format {
        OutputFormat::Json => {
            let output: Vec<serde_json::Value> = tags
                .iter()
                .map(|(tag, count)| {
                    serde_json::json!({
                        "tag": tag,
                        "count": count,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            if tags.is_empty() {
                println!("No tags found.");
                return Ok(());
            }
            let rows: Vec<(String, String)> = tags
                .iter()
                .map(|(tag, count)| (format!("#{}", tag), count.to_string()))
                .collect();
            let lines = table(("Tag", "Notes"), &rows);
            println!("{}", paint(&lines[0], Color::BOLD, use_color));
            for line in &lines[1..] {
                println!("{}", line);
            }
            println!("\n{} tags total", tags.len());
        }
    }

    Ok(())
}
