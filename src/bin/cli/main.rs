mod app;
mod commands;
mod render;
mod settings;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "flashdeck-cli", about = "Inspect and maintain a flashcard collection", version)]
struct Cli {
    /// Collection file (default: from cli.toml, else the platform data dir)
    #[arg(long, global = true)]
    collection: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, default_value = "plain")]
    format: OutputFormat,

    /// Disable ANSI colors
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Plain,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Show counts, scheduler version and sync state
    Info,

    /// Run the integrity check and repair what it finds
    Check,

    /// List decks with their card counts
    Decks,

    /// List tags with note counts
    Tags,

    /// Add a note
    Add {
        /// Note type name (case-insensitive prefix match; default: current)
        #[arg(long)]
        model: Option<String>,
        /// Deck for the new cards, created if missing
        #[arg(long)]
        deck: Option<String>,
        /// Comma- or space-separated tags
        #[arg(long)]
        tags: Option<String>,
        /// Field values, in note type order
        #[arg(required = true)]
        fields: Vec<String>,
    },

    /// List cards whose question side is empty
    EmptyCards {
        /// Delete them (and notes left without cards)
        #[arg(long)]
        delete: bool,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let use_color = !cli.no_color && atty_check();
    let mut app = app::App::open(cli.collection.as_deref())?;

    let result = match cli.command {
        Command::Info => commands::info::run(&mut app, &cli.format, use_color),
        Command::Check => commands::check::run(&mut app, &cli.format, use_color),
        Command::Decks => commands::decks::run(&app, &cli.format, use_color),
        Command::Tags => commands::tags::run(&app, &cli.format, use_color),
        Command::Add { model, deck, tags, fields } => commands::add::run(
            &mut app,
            model.as_deref(),
            deck.as_deref(),
            tags.as_deref(),
            fields,
            &cli.format,
            use_color,
        ),
        Command::EmptyCards { delete } => {
            commands::empty_cards::run(&mut app, delete, &cli.format, use_color)
        }
    };

    app.close()?;
    result
}

/// Check if stdout is a terminal (for color support)
fn atty_check() -> bool {
    unsafe { libc_isatty(1) != 0 }
}

extern "C" {
    #[link_name = "isatty"]
    fn libc_isatty(fd: i32) -> i32;
}
