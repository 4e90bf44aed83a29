//! Cloze marker detection (`{{c1::answer::hint}}`).

use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

use regex::Regex;

use crate::notetypes::Model;

fn cloze_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\{\{c(\d+)::.*?\}\}").expect("cloze pattern"))
}

/// Cloze numbers (1-based) present in `text`.
pub fn cloze_numbers(text: &str) -> BTreeSet<usize> {
    cloze_re()
        .captures_iter(text)
        .filter_map(|caps| caps[1].parse::<usize>().ok())
        .filter(|n| *n > 0)
        .collect()
}

pub fn has_cloze(text: &str, number: usize) -> bool {
    cloze_numbers(text).contains(&number)
}

/// Card ordinals implied by the cloze markers of a note.
///
/// Only fields substituted through `{{cloze:Field}}` on the model's
/// template are scanned. Ordinal = cloze number - 1.
pub fn cloze_ords(model: &Model, fields: &[String]) -> BTreeSet<usize> {
    let Some(tmpl) = model.tmpls.first() else {
        return BTreeSet::new();
    };
    let index: HashMap<String, usize> = model.field_map();

    let mut ords = BTreeSet::new();
    for name in super::fields_with_filter(&tmpl.qfmt, "cloze") {
        let Some(value) = index.get(&name).and_then(|i| fields.get(*i)) else {
            continue;
        };
        ords.extend(cloze_numbers(value).into_iter().map(|n| n - 1));
    }
    ords
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notetypes::stock;

    #[test]
    fn test_cloze_numbers() {
        let found = cloze_numbers("{{c1::a}} {{c2::b::hint}} {{c1::c}} {{c0::x}} c3::y");
        assert_eq!(found.into_iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_cloze_ords_only_scan_cloze_fields() {
        let model = stock::cloze();
        let fields = vec![
            "{{c1::a}} {{c2::b}}".to_string(),
            "{{c5::ignored}}".to_string(),
        ];
        let ords = cloze_ords(&model, &fields);
        assert_eq!(ords.into_iter().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_no_markers() {
        let model = stock::cloze();
        let fields = vec!["plain text".to_string(), String::new()];
        assert!(cloze_ords(&model, &fields).is_empty());
    }
}
