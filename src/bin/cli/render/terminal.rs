/// ANSI color codes
pub struct Color;

#[allow(dead_code)]
impl Color {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const RED: &str = "\x1b[31m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const CYAN: &str = "\x1b[36m";
    pub const GRAY: &str = "\x1b[90m";
}

/// Wrap `text` in `color` when colors are enabled.
pub fn paint(text: &str, color: &str, use_color: bool) -> String {
    if use_color {
        format!("{}{}{}", color, text, Color::RESET)
    } else {
        text.to_string()
    }
}

/// Two-column table with a rule under the header.
pub fn table(headers: (&str, &str), rows: &[(String, String)]) -> Vec<String> {
    let width = rows
        .iter()
        .map(|(left, _)| left.chars().count())
        .chain(std::iter::once(headers.0.len()))
        .max()
        .unwrap_or(0);

    let mut lines = vec![
        format!("{:<width$} {}", headers.0, headers.1, width = width),
        format!(
            "{} {}",
            "\u{2500}".repeat(width),
            "\u{2500}".repeat(headers.1.len().max(6))
        ),
    ];
    for (left, right) in rows {
        lines.push(format!("{:<width$} {}", left, right, width = width));
    }
    lines
}

/// Redraw a `[step/total]` progress line on stderr.
pub fn progress_line(step: usize, total: usize) {
    eprint!("\r[{}/{}] checking", step, total);
    if step >= total {
        eprintln!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_aligns_columns() {
        let rows = vec![
            ("Default".to_string(), "3".to_string()),
            ("Spanish::Verbs".to_string(), "12".to_string()),
        ];
        let lines = table(("Deck", "Cards"), &rows);
        assert_eq!(lines.len(), 4);
        assert!(lines[2].starts_with("Default        3"));
        assert!(lines[3].ends_with(" 12"));
    }

    #[test]
    fn test_paint_without_color() {
        assert_eq!(paint("x", Color::RED, false), "x");
        assert_eq!(paint("x", Color::RED, true), "\x1b[31mx\x1b[0m");
    }
}
