pub mod cache;
pub mod log;
pub mod query;

pub use query::{clean_text, escape_wql};

/// Reduce a mount path to its short mount token (e.g. "E:" from "E:\\").
/// Tokens that are not drive-letter shaped are returned trimmed but otherwise untouched.
pub fn mount_token(s: &str) -> &str {
    let s = clean_text(s);
    let mut chars = s.char_indices();
    match (chars.next(), chars.next()) {
        (Some((_, letter)), Some((i, ':'))) if letter.is_ascii_alphabetic() => &s[..i + 1],
        _ => s,
    }
}
