use anyhow::Result;

use flashdeck_lib::SchedulerOps;

use crate::app::App;
use crate::render::terminal::{paint, Color};
use crate::OutputFormat;

pub fn run(app: &mut App, format: &OutputFormat, use_color: bool) -> Result<()> {
    let col = &mut app.col;
    let notes = col.note_count()?;
    let cards = col.card_count()?;
    let decks = col.decks().count();
    let models = col.models()?.count();
    let sched_ver = col.sched().version();
    let today = col.sched().today();
    let full_sync = col.schema_changed();
    let path = col.path().display().to_string();

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "path": path,
                "notes": notes,
                "cards": cards,
                "decks": decks,
                "noteTypes": models,
                "schedulerVersion": sched_ver,
                "today": today,
                "fullSyncRequired": full_sync,
                "usn": col.usn(),
                "created": col.crt(),
                "modified": col.mtime(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            println!("{}", paint(&path, Color::BOLD, use_color));
            println!("  Notes:       {}", notes);
            println!("  Cards:       {}", cards);
            println!("  Decks:       {}", decks);
            println!("  Note types:  {}", models);
            println!("  Scheduler:   v{} (day {})", sched_ver, today);
            let sync = if full_sync {
                paint("full sync required", Color::YELLOW, use_color)
            } else {
                "incremental".to_string()
            };
            println!("  Next sync:   {}", sync);
        }
    }

    Ok(())
}
