use anyhow::{bail, Result};

use flashdeck_lib::IntegrityOutcome;

use crate::app::App;
use crate::render::terminal::{paint, progress_line, Color};
use crate::OutputFormat;

pub fn run(app: &mut App, format: &OutputFormat, use_color: bool) -> Result<()> {
    let outcome = app.col.check_integrity(&mut progress_line, None)?;

    let report = match outcome {
        IntegrityOutcome::Completed(report) => report,
        IntegrityOutcome::Locked => {
            bail!("The collection is busy or locked. Try again later.")
        }
        IntegrityOutcome::Failed(reason) => bail!("Integrity check failed: {}", reason),
        IntegrityOutcome::Cancelled => {
            eprintln!("Cancelled.");
            return Ok(());
        }
    };

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "problems": report.problems,
                "sizeBefore": report.size_before,
                "sizeAfter": report.size_after,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            if report.problems.is_empty() {
                println!("{}", paint("No problems found.", Color::GREEN, use_color));
            } else {
                for problem in report.reported() {
                    println!("{} {}", paint("fixed:", Color::YELLOW, use_color), problem);
                }
                let hidden = report.problems.len() - report.reported().len();
                if hidden > 0 {
                    println!("... and {} more", hidden);
                }
                println!("A full sync will be required.");
            }
            println!(
                "Size: {} KiB -> {} KiB",
                report.size_before / 1024,
                report.size_after / 1024
            );
        }
    }

    Ok(())
}
