//! Header key normalization

use regex::Regex;
use std::sync::OnceLock;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization as _;

fn separator_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^\p{L}\p{N}]+").expect("slug separator pattern is valid"))
}

/// Latin letters that have no decomposition into a base letter.
fn fold_letter(c: char) -> Option<&'static str> {
    Some(match c {
        'ß' => "ss",
        'æ' => "ae",
        'œ' => "oe",
        'ø' => "o",
        'đ' | 'ð' => "d",
        'ł' => "l",
        'þ' => "th",
        'ı' => "i",
        _ => return None,
    })
}

/// Strip accents and fold Latin ligatures to ASCII (`"Straße"` → `"strasse"`).
fn transliterate(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.nfkd().filter(|c| !is_combining_mark(*c)).flat_map(char::to_lowercase) {
        match fold_letter(c) {
            Some(folded) => out.push_str(folded),
            None => out.push(c),
        }
    }
    out
}

/// Transliterate and lower-case `text`, collapse every run of non-alphanumerics
/// into a single hyphen and trim hyphens from both ends (`"Header 1"` → `"header-1"`).
pub fn slugify(text: &str) -> String {
    let lowered = transliterate(text);
    separator_pattern()
        .replace_all(&lowered, "-")
        .trim_matches('-')
        .to_string()
}
