//! Question-side template evaluation.
//!
//! Full rendering lives outside this crate. Card generation only needs to
//! know whether a question would show any field content, which this module
//! answers by walking the template's `{{...}}` tags:
//!
//! - `{{Field}}` / `{{filter:Field}}` substitute a field
//! - `{{#Field}}...{{/Field}}` is shown only when the field is non-empty
//! - `{{^Field}}...{{/Field}}` is shown only when the field is empty
//! - special fields such as `{{Tags}}` or `{{FrontSide}}` never count

pub mod cloze;
pub mod html;

use std::collections::HashMap;

/// Fields provided by the renderer rather than by the note.
const SPECIAL_FIELDS: &[&str] = &[
    "FrontSide", "Tags", "Type", "Deck", "Subdeck", "Card", "CardFlag", "CardID",
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token<'a> {
    Text(&'a str),
    Replace { field: &'a str, filters: Vec<&'a str> },
    Open(&'a str),
    OpenInverted(&'a str),
    Close(&'a str),
}

fn tokenize(template: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        if start > 0 {
            tokens.push(Token::Text(&rest[..start]));
        }
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            tokens.push(Token::Text(&rest[start..]));
            return tokens;
        };
        let inner = after[..end].trim();
        rest = &after[end + 2..];

        if let Some(name) = inner.strip_prefix('#') {
            tokens.push(Token::Open(name.trim()));
        } else if let Some(name) = inner.strip_prefix('^') {
            tokens.push(Token::OpenInverted(name.trim()));
        } else if let Some(name) = inner.strip_prefix('/') {
            tokens.push(Token::Close(name.trim()));
        } else if inner.starts_with('!') || inner.is_empty() {
            continue;
        } else {
            let mut parts: Vec<&str> = inner.split(':').collect();
            let field = parts.pop().unwrap_or_default().trim();
            let filters = parts.into_iter().map(str::trim).collect();
            tokens.push(Token::Replace { field, filters });
        }
    }

    if !rest.is_empty() {
        tokens.push(Token::Text(rest));
    }
    tokens
}

/// Whether the question side of `qfmt` shows any note content.
///
/// `fields` maps field names to their raw values. When `cloze_ord` is given,
/// `{{cloze:Field}}` only counts if the field holds a marker for that ordinal.
pub fn question_has_content(
    qfmt: &str,
    fields: &HashMap<String, String>,
    cloze_ord: Option<usize>,
) -> bool {
    let non_empty = |name: &str| {
        fields
            .get(name)
            .map_or(false, |value| !html::field_is_empty(value))
    };

    // Each entry: whether the enclosing section is being shown.
    let mut stack: Vec<(&str, bool)> = Vec::new();

    for token in tokenize(qfmt) {
        match token {
            Token::Text(_) => {}
            Token::Open(name) => {
                let shown = is_active(&stack) && non_empty(name);
                stack.push((name, shown));
            }
            Token::OpenInverted(name) => {
                let shown = is_active(&stack) && !non_empty(name);
                stack.push((name, shown));
            }
            Token::Close(name) => {
                if let Some(pos) = stack.iter().rposition(|(open, _)| *open == name) {
                    stack.truncate(pos);
                }
            }
            Token::Replace { field, filters } => {
                if !is_active(&stack) || SPECIAL_FIELDS.contains(&field) {
                    continue;
                }
                let Some(value) = fields.get(field) else {
                    continue;
                };
                let has_content = match (filters.contains(&"cloze"), cloze_ord) {
                    (true, Some(ord)) => cloze::has_cloze(value, ord + 1),
                    _ => !html::field_is_empty(value),
                };
                if has_content {
                    return true;
                }
            }
        }
    }
    false
}

fn is_active(stack: &[(&str, bool)]) -> bool {
    stack.last().map_or(true, |(_, shown)| *shown)
}

/// Names of fields substituted through `filter` (e.g. `cloze`).
pub fn fields_with_filter(template: &str, filter: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for token in tokenize(template) {
        if let Token::Replace { field, filters } = token {
            if filters.contains(&filter) && !out.iter().any(|f| f == field) {
                out.push(field.to_string());
            }
        }
    }
    out
}

/// Every field name referenced by a template, in order of first use.
pub fn referenced_fields(template: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for token in tokenize(template) {
        let name = match token {
            Token::Replace { field, .. } => field,
            Token::Open(name) | Token::OpenInverted(name) => name,
            _ => continue,
        };
        if !SPECIAL_FIELDS.contains(&name) && !out.iter().any(|f| f == name) {
            out.push(name.to_string());
        }
    }
    out
}
