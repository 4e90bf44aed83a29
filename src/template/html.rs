//! HTML text extraction for field content.
//!
//! Used for the note sort field, duplicate checksums and emptiness tests.

use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};

fn comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<!--.*?-->").expect("comment pattern"))
}

fn style_script_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<style[^>]*>.*?</style>|<script[^>]*>.*?</script>")
            .expect("style/script pattern")
    })
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<.*?>").expect("tag pattern"))
}

fn img_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)<img[^>]*src=["']?([^"'\s>]+)["']?[^>]*>"#).expect("img pattern")
    })
}

/// Strip tags, comments, `<style>`/`<script>` bodies and decode entities.
pub fn strip_html(html: &str) -> String {
    let text = comment_re().replace_all(html, "");
    let text = style_script_re().replace_all(&text, "");
    let text = tag_re().replace_all(&text, "");
    let decoded = html_escape::decode_html_entities(&text);
    decoded.replace('\u{a0}', " ").trim().to_string()
}

/// Like [`strip_html`], but keep image file names so media-only fields still
/// sort and compare.
pub fn strip_html_media(html: &str) -> String {
    let with_names = img_re().replace_all(html, " $1 ");
    strip_html(&with_names)
}

/// Checksum of a field for fast duplicate lookup: the first 8 hex digits of
/// the SHA-256 of its stripped text.
pub fn field_checksum(field: &str) -> i64 {
    let stripped = strip_html_media(field);
    let digest = Sha256::digest(stripped.as_bytes());
    let head = [digest[0], digest[1], digest[2], digest[3]];
    u32::from_be_bytes(head) as i64
}

/// True when the field has no visible content once markup is stripped.
pub fn field_is_empty(field: &str) -> bool {
    strip_html_media(field).trim().is_empty()
}
